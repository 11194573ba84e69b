//! How the simulated bridge answers a request

use hue_storm_shared::codec::Request;
use hue_storm_shared::Method;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::sync::Mutex;

/// What to send back for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Respond {
        status: u16,
        reason: &'static str,
        body: String,
    },
    /// Keep the connection open and never answer
    Silent,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Reply::Respond {
            status: 200,
            reason: "OK",
            body: body.to_string(),
        }
    }

    pub fn not_found() -> Self {
        Reply::Respond {
            status: 404,
            reason: "Not Found",
            body: String::new(),
        }
    }

    pub fn busy() -> Self {
        Reply::Respond {
            status: 503,
            reason: "Service Unavailable",
            body: String::new(),
        }
    }
}

/// Failure probabilities, each in [0, 1]; checked in this order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    pub silent: f64,
    pub not_found: f64,
    pub error: f64,
}

pub struct Behavior {
    rates: Rates,
    rng: Mutex<StdRng>,
}

impl Behavior {
    pub fn new(rates: Rates, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rates,
            rng: Mutex::new(rng),
        }
    }

    fn roll(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen(),
            Err(poisoned) => poisoned.into_inner().gen(),
        }
    }

    pub fn decide(&self, request: &Request) -> Reply {
        let address = match resource_address(&request.path) {
            Some(address) => address,
            None => return Reply::not_found(),
        };

        let roll = self.roll();
        let mut threshold = self.rates.silent;
        if roll < threshold {
            return Reply::Silent;
        }
        threshold += self.rates.not_found;
        if roll < threshold {
            return Reply::not_found();
        }
        threshold += self.rates.error;
        if roll < threshold {
            return Reply::ok(error(901, &address, "Internal error, 503"));
        }

        respond(request, &address)
    }
}

/// Resource address below `/api/<username>`, e.g. `/lights/3/state`
fn resource_address(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/api/")?;
    let (username, address) = match rest.split_once('/') {
        Some((username, address)) => (username, format!("/{}", address)),
        None => (rest, String::new()),
    };
    if username.is_empty() {
        return None;
    }
    Some(address)
}

fn error(kind: u32, address: &str, description: &str) -> Value {
    json!([{
        "error": {
            "type": kind,
            "address": address,
            "description": description,
        }
    }])
}

fn respond(request: &Request, address: &str) -> Reply {
    match request.method {
        Method::Get => Reply::ok(json!({})),
        Method::Delete => Reply::ok(json!([{ "success": format!("{} deleted", address) }])),
        Method::Post => Reply::ok(json!([{ "success": { "id": "1" } }])),
        Method::Put => {
            let body: Map<String, Value> = match serde_json::from_str(&request.body) {
                Ok(Value::Object(body)) => body,
                _ => return Reply::ok(error(2, address, "body contains invalid json")),
            };
            let results: Vec<Value> = body
                .into_iter()
                .map(|(key, value)| {
                    let mut success = Map::new();
                    success.insert(format!("{}/{}", address, key), value);
                    json!({ "success": success })
                })
                .collect();
            Reply::ok(Value::Array(results))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(path: &str, body: &str) -> Request {
        Request {
            method: Method::Put,
            path: path.into(),
            body: body.into(),
        }
    }

    fn body(reply: Reply) -> Value {
        match reply {
            Reply::Respond { status: 200, body, .. } => serde_json::from_str(&body).unwrap(),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_success_echoes_fields() {
        let behavior = Behavior::new(Rates::default(), Some(1));
        let reply = behavior.decide(&put(
            "/api/tester/lights/3/state",
            r#"{"bri":127,"transitiontime":4}"#,
        ));
        assert_eq!(
            body(reply),
            json!([
                {"success": {"/lights/3/state/bri": 127}},
                {"success": {"/lights/3/state/transitiontime": 4}}
            ])
        );
    }

    #[test]
    fn test_error_rate() {
        let behavior = Behavior::new(
            Rates {
                error: 1.0,
                ..Rates::default()
            },
            Some(1),
        );
        let reply = behavior.decide(&put("/api/u/groups/0/action", r#"{"hue":1}"#));
        let body = body(reply);
        assert_eq!(body[0]["error"]["type"], 901);
        assert!(body.to_string().contains("error"));
    }

    #[test]
    fn test_silent_and_not_found_rates() {
        let silent = Behavior::new(
            Rates {
                silent: 1.0,
                ..Rates::default()
            },
            None,
        );
        assert_eq!(silent.decide(&put("/api/u/lights/1/state", "{}")), Reply::Silent);

        let missing = Behavior::new(
            Rates {
                not_found: 1.0,
                ..Rates::default()
            },
            None,
        );
        assert_eq!(
            missing.decide(&put("/api/u/lights/1/state", "{}")),
            Reply::not_found()
        );
    }

    #[test]
    fn test_bad_paths_and_bodies() {
        let behavior = Behavior::new(Rates::default(), Some(1));
        assert_eq!(behavior.decide(&put("/lights/1", "{}")), Reply::not_found());
        assert_eq!(behavior.decide(&put("/api/", "{}")), Reply::not_found());

        let reply = behavior.decide(&put("/api/u/lights/1/state", "not json"));
        assert_eq!(body(reply)[0]["error"]["type"], 2);
    }

    #[test]
    fn test_seeded_rolls_repeat() {
        let rates = Rates {
            silent: 0.3,
            not_found: 0.3,
            error: 0.3,
        };
        let a = Behavior::new(rates, Some(9));
        let b = Behavior::new(rates, Some(9));
        let request = put("/api/u/lights/1/state", r#"{"bri":1}"#);
        for _ in 0..20 {
            assert_eq!(a.decide(&request), b.decide(&request));
        }
    }
}

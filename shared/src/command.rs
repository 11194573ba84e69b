//! Bridge command model
//!
//! A [`Command`] describes one state change against one addressable target.
//! Commands are validated on construction and immutable afterwards.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::transition_tenths;

/// Key/value state attributes (`hue`, `sat`, `bri`, `on`, ...)
pub type StatePayload = Map<String, Value>;

/// Field the bridge reads the transition time from
pub const TRANSITION_FIELD: &str = "transitiontime";

/// Errors raised while building a command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Transition must be a finite, non-negative number of seconds, got {0}")]
    InvalidTransition(f64),

    #[error("Can't update a bridge, target a light or group instead")]
    BridgeUpdate,

    #[error("{0} requires a payload")]
    MissingPayload(Action),

    #[error("{0} requires a non-empty payload")]
    EmptyPayload(Action),

    #[error("{action} is not valid against {target}")]
    InvalidTarget { action: Action, target: Target },
}

/// What a command does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Change light or group state
    Update,
    /// Change attributes (name, membership, bridge config)
    Configure,
    /// Create a group
    Create,
    /// Delete a group or light
    Delete,
    /// Read state
    Query,
}

impl Action {
    /// HTTP verb used on the wire
    pub fn method(&self) -> Method {
        match self {
            Action::Query => Method::Get,
            Action::Update | Action::Configure => Method::Put,
            Action::Create => Method::Post,
            Action::Delete => Method::Delete,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Update => "update",
            Action::Configure => "configure",
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Query => "query",
        };
        f.write_str(name)
    }
}

/// The four verbs the bridge understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }

    /// Whether requests with this verb carry a body
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Put | Method::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("Unknown method '{}'", other)),
        }
    }
}

/// Addressable entity on a bridge
///
/// A target is a light, a group, or the bridge itself; never both a light
/// and a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Bridge,
    Light(u32),
    Group(u32),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Bridge => write!(f, "bridge"),
            Target::Light(id) => write!(f, "light {}", id),
            Target::Group(id) => write!(f, "group {}", id),
        }
    }
}

/// One state change to apply to one target
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    action: Action,
    target: Target,
    payload: Option<StatePayload>,
    transition: Option<f64>,
}

impl Command {
    /// Build and validate a command
    pub fn new(
        action: Action,
        target: Target,
        payload: Option<StatePayload>,
        transition: Option<f64>,
    ) -> Result<Self, CommandError> {
        if let Some(seconds) = transition {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(CommandError::InvalidTransition(seconds));
            }
        }

        match (action, target) {
            (Action::Update, Target::Bridge) => return Err(CommandError::BridgeUpdate),
            (Action::Delete, Target::Bridge) | (Action::Create, Target::Light(_)) => {
                return Err(CommandError::InvalidTarget { action, target });
            }
            _ => {}
        }

        if action.method().has_body() {
            match &payload {
                None => return Err(CommandError::MissingPayload(action)),
                Some(p) if p.is_empty() => return Err(CommandError::EmptyPayload(action)),
                Some(_) => {}
            }
        }

        Ok(Self {
            action,
            target,
            payload,
            transition,
        })
    }

    pub fn light_update(
        light_id: u32,
        payload: StatePayload,
        transition: Option<f64>,
    ) -> Result<Self, CommandError> {
        Self::new(Action::Update, Target::Light(light_id), Some(payload), transition)
    }

    pub fn light_modify(light_id: u32, payload: StatePayload) -> Result<Self, CommandError> {
        Self::new(Action::Configure, Target::Light(light_id), Some(payload), None)
    }

    pub fn group_update(
        group_id: u32,
        payload: StatePayload,
        transition: Option<f64>,
    ) -> Result<Self, CommandError> {
        Self::new(Action::Update, Target::Group(group_id), Some(payload), transition)
    }

    pub fn group_modify(group_id: u32, payload: StatePayload) -> Result<Self, CommandError> {
        Self::new(Action::Configure, Target::Group(group_id), Some(payload), None)
    }

    pub fn group_create(payload: StatePayload) -> Result<Self, CommandError> {
        Self::new(Action::Create, Target::Bridge, Some(payload), None)
    }

    pub fn group_delete(group_id: u32) -> Result<Self, CommandError> {
        Self::new(Action::Delete, Target::Group(group_id), None, None)
    }

    pub fn bridge_query() -> Result<Self, CommandError> {
        Self::new(Action::Query, Target::Bridge, None, None)
    }

    pub fn bridge_modify(payload: StatePayload) -> Result<Self, CommandError> {
        Self::new(Action::Configure, Target::Bridge, Some(payload), None)
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn payload(&self) -> Option<&StatePayload> {
        self.payload.as_ref()
    }

    /// Transition in seconds, if any
    pub fn transition(&self) -> Option<f64> {
        self.transition
    }

    pub fn method(&self) -> Method {
        self.action.method()
    }

    /// Request path for this command on a bridge with the given username
    pub fn path(&self, username: &str) -> String {
        let base = format!("/api/{}", username);
        match (self.action, self.target) {
            (Action::Create, _) => format!("{}/groups", base),
            (Action::Update, Target::Light(id)) => format!("{}/lights/{}/state", base, id),
            (Action::Update, Target::Group(id)) => format!("{}/groups/{}/action", base, id),
            (_, Target::Light(id)) => format!("{}/lights/{}", base, id),
            (_, Target::Group(id)) => format!("{}/groups/{}", base, id),
            (_, Target::Bridge) => base,
        }
    }

    /// Wire body: payload merged with the transition field
    ///
    /// Returns `None` for verbs that carry no body.
    pub fn body(&self) -> Result<Option<String>, serde_json::Error> {
        if !self.method().has_body() {
            return Ok(None);
        }

        let mut body = self.payload.clone().unwrap_or_default();
        if let Some(seconds) = self.transition {
            body.insert(TRANSITION_FIELD.into(), transition_tenths(seconds).into());
        }

        serde_json::to_string(&body).map(Some)
    }
}

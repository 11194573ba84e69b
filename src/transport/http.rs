//! HTTP/1.0 transport over plain TCP, one connection per request

use crate::config::BridgeConfig;
use crate::transport::traits::{Delivery, Outcome, Phase, Stopwatch, Transport};
use async_trait::async_trait;
use bytes::BytesMut;
use hue_storm_shared::codec::{self, CodecError};
use hue_storm_shared::limits::MAX_RESPONSE_SIZE;
use hue_storm_shared::Command;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Transport that opens a fresh TCP connection per command
///
/// Dropping the stream on any exit path closes the socket, including when
/// the deadline fires mid-read.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn exchange(
        &self,
        bridge: &BridgeConfig,
        command: &Command,
        watch: &mut Stopwatch,
    ) -> Outcome {
        let request = match codec::encode_request(&bridge.username, command) {
            Ok(request) => request,
            Err(e) => {
                return Outcome::Rejected {
                    status: None,
                    reason: e.to_string(),
                }
            }
        };
        let mut response = BytesMut::with_capacity(1024);
        watch.record(Phase::Allocated);

        let connect = TcpStream::connect((bridge.ip.as_str(), bridge.port));
        let mut stream = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Outcome::ConnectionError {
                    cause: e.to_string(),
                }
            }
            Err(_) => return Outcome::HardTimeout,
        };
        let _ = stream.set_nodelay(true);
        watch.record(Phase::Connected);

        if let Err(e) = stream.write_all(&request).await {
            return Outcome::ConnectionError {
                cause: e.to_string(),
            };
        }
        watch.record(Phase::Sent);

        loop {
            match stream.read_buf(&mut response).await {
                Ok(0) => break,
                Ok(_) => {
                    if watch.first_byte_pending() {
                        watch.record(Phase::FirstByte);
                    }
                    if response.len() > MAX_RESPONSE_SIZE {
                        return Outcome::Rejected {
                            status: None,
                            reason: CodecError::MessageTooLarge(response.len()).to_string(),
                        };
                    }
                }
                Err(e) => {
                    return Outcome::ConnectionError {
                        cause: e.to_string(),
                    }
                }
            }
        }
        watch.record(Phase::Received);
        drop(stream);

        let outcome = classify(codec::decode_response(&response));
        watch.record(Phase::Parsed);
        outcome
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs_f64(
            hue_storm_shared::limits::CONNECT_TIMEOUT_SECS,
        ))
    }
}

/// Map a decoded response onto an outcome
///
/// Non-200 and unparseable responses are rejections; a 200 whose body
/// carries the error marker is a soft failure.
pub fn classify(response: Result<codec::Response, CodecError>) -> Outcome {
    match response {
        Ok(response) if !response.is_ok() => Outcome::Rejected {
            status: Some(response.status),
            reason: response.body,
        },
        Ok(response) if response.has_error_marker() => Outcome::SoftFailure {
            reason: response.body,
        },
        Ok(response) => Outcome::Success {
            status: response.status,
            body: response.body,
        },
        Err(e) => Outcome::Rejected {
            status: None,
            reason: e.to_string(),
        },
    }
}

fn millis(phase: Option<Duration>) -> Option<u64> {
    phase.map(|d| d.as_millis() as u64)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, bridge: &BridgeConfig, command: &Command, deadline: Duration) -> Delivery {
        let mut watch = Stopwatch::start();
        let outcome = match timeout(deadline, self.exchange(bridge, command, &mut watch)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::HardTimeout,
        };

        let elapsed = watch.elapsed();
        let timings = watch.finish();
        trace!(
            bridge = %bridge.name,
            target = %command.target(),
            elapsed_ms = elapsed.as_millis() as u64,
            allocated_ms = millis(timings.allocated),
            connected_ms = millis(timings.connected),
            sent_ms = millis(timings.sent),
            first_byte_ms = millis(timings.first_byte),
            received_ms = millis(timings.received),
            parsed_ms = millis(timings.parsed),
            %outcome,
            "Request finished"
        );

        Delivery::new(outcome, timings)
    }

    fn name(&self) -> &'static str {
        "HTTP/1.0"
    }
}

//! One client connection to the simulated bridge

use anyhow::Result;
use hue_storm_shared::codec::{self, Request, RequestDecoder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

pub struct BridgeSession {
    stream: TcpStream,
    addr: SocketAddr,
    decoder: RequestDecoder,
    read_buf: Vec<u8>,
}

impl BridgeSession {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            decoder: RequestDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Read the request; `None` if the client hung up or sent garbage
    pub async fn recv(&mut self) -> Option<Request> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(request)) => return Some(request),
                Ok(None) => {}
                Err(e) => {
                    warn!("Decode error from {}: {}", self.addr, e);
                    return None;
                }
            }

            match self.stream.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!("Read error from {}: {}", self.addr, e);
                    return None;
                }
            }
        }
    }

    /// Write a response and close our side, HTTP/1.0 style
    pub async fn reply(&mut self, status: u16, reason: &str, body: &str) -> Result<()> {
        let encoded = codec::encode_response(status, reason, body);
        self.stream.write_all(&encoded).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Say nothing until the client gives up or `limit` passes
    pub async fn hold(&mut self, limit: Duration) {
        let _ = tokio::time::timeout(limit, async {
            loop {
                match self.stream.read(&mut self.read_buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
    }
}

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use crate::config::TransportConfig;

/// Any byte stream a session can run over
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Link for T {}

/// Where the radio is reached. Serial radios sit behind a serial-over-TCP
/// bridge (ser2net, socat) that owns the port and its baud rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Connect to a bridge
    Connect(String),
    /// Wait for one peer to connect
    Listen(String),
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self> {
        if let Some(addr) = endpoint.strip_prefix("tcp://") {
            Ok(Endpoint::Connect(addr.to_string()))
        } else if let Some(addr) = endpoint.strip_prefix("tcp-listen://") {
            Ok(Endpoint::Listen(addr.to_string()))
        } else {
            bail!(
                "unsupported endpoint '{}': use tcp://host:port or tcp-listen://host:port \
                 (expose serial devices through a serial-over-TCP bridge)",
                endpoint
            )
        }
    }
}

pub async fn open(config: &TransportConfig) -> Result<Box<dyn Link>> {
    match Endpoint::parse(&config.endpoint)? {
        Endpoint::Connect(addr) => {
            let stream = TcpStream::connect(&addr)
                .await
                .with_context(|| format!("connecting to {}", addr))?;
            stream.set_nodelay(true)?;
            info!("Connected to {} ({} baud link)", addr, config.baud_rate);
            Ok(Box::new(stream))
        }
        Endpoint::Listen(addr) => {
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {}", addr))?;
            info!("Waiting for peer on {}", addr);
            let (stream, peer) = listener.accept().await?;
            stream.set_nodelay(true)?;
            info!("Peer connected from {} ({} baud link)", peer, config.baud_rate);
            Ok(Box::new(stream))
        }
    }
}

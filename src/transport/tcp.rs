//! TCP transport for telnet sessions to nodes

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use node_console_shared::defaults;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[async_trait]
impl TransportStream for TcpStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// TCP connector for a node's telnet endpoint
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Create a connector for a `host:port` address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Create a connector for a node IP, defaulting to the telnet port
    pub fn for_node(ip_address: &str, port: Option<u16>) -> Self {
        let port = port.unwrap_or(defaults::TELNET_PORT);
        Self::new(format!("{ip_address}:{port}"))
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<Self::Stream> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connect to {}", self.address))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("telnet://{}", self.address)
    }
}

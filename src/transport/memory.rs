//! In-memory transport for exercising sessions without sockets

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

const DUPLEX_BUFFER: usize = 64 * 1024;

/// Prompt printed by [`spawn_node`]
pub const NODE_PROMPT: &str = "AP01m> ";

#[async_trait]
impl TransportStream for DuplexStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// Connector that hands the far end of each new duplex pipe to a listener
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
    refuse_remaining: Arc<AtomicU32>,
    connects: Arc<AtomicU32>,
}

/// Receiving side of a [`MemoryConnector`], owned by the fake node
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryListener {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.accept_rx.recv().await
    }
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refuse_remaining: Arc::new(AtomicU32::new(0)),
                connects: Arc::new(AtomicU32::new(0)),
            },
            MemoryListener { accept_rx },
        )
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_next(&self, n: u32) {
        self.refuse_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of connection attempts seen so far, refused ones included
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<Self::Stream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(anyhow!("connection refused"));
        }

        let (client, server) = duplex(DUPLEX_BUFFER);
        self.accept_tx
            .send(server)
            .map_err(|_| anyhow!("listener closed"))?;
        Ok(client)
    }

    fn describe(&self) -> String {
        "memory://node".into()
    }
}

/// Fake node: greets with a prompt, echoes each line, answers via `respond`.
/// `None` means stay silent; the reply "<drop>" closes the connection.
pub fn spawn_node<F>(mut listener: MemoryListener, respond: F)
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    let respond = Arc::new(respond);
    tokio::spawn(async move {
        while let Some(stream) = listener.accept().await {
            tokio::spawn(serve(stream, respond.clone()));
        }
    });
}

async fn serve<F>(stream: DuplexStream, respond: Arc<F>)
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let greeting = format!("Welcome\r\n{}", NODE_PROMPT);
    if writer.write_all(greeting.as_bytes()).await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        match respond.as_ref()(&line) {
            Some(reply) if reply == "<drop>" => return,
            Some(reply) => {
                let out = format!("{}\r\n{}\r\n{}", line, reply, NODE_PROMPT);
                if writer.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
            None => {}
        }
    }
}

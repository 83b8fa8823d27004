//! Execution callback seam between the queue worker and a node

use crate::session::RemoteSession;
use crate::transport::TransportConnector;
use async_trait::async_trait;
use node_console_shared::CommandError;

/// Executes one command text and returns the response.
///
/// The queue worker is the only caller and takes `&mut self`, so
/// implementations never see two calls at once.
#[async_trait]
pub trait CommandExecutor: Send + 'static {
    async fn execute(&mut self, text: &str) -> Result<String, CommandError>;

    /// Called once when the worker stops
    async fn close(&mut self) {}
}

#[async_trait]
impl<C: TransportConnector> CommandExecutor for RemoteSession<C> {
    async fn execute(&mut self, text: &str) -> Result<String, CommandError> {
        let timeout = self.config().command_timeout;
        self.send(text, timeout).await
    }

    async fn close(&mut self) {
        self.disconnect().await;
    }
}

/// Adapts a plain function or closure into an executor
pub struct FnExecutor<F> {
    func: F,
}

impl<F> FnExecutor<F>
where
    F: FnMut(&str) -> Result<String, CommandError> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> CommandExecutor for FnExecutor<F>
where
    F: FnMut(&str) -> Result<String, CommandError> + Send + 'static,
{
    async fn execute(&mut self, text: &str) -> Result<String, CommandError> {
        (self.func)(text)
    }
}

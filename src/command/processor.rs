//! Sequential batch orchestration over a single command queue
//!
//! A batch holds the queue's reclamation off while its commands run, then
//! performs exactly one cleanup pass so failed commands stay visible for
//! diagnosis.

use super::queue::{CommandQueue, Completion};
use node_console_shared::{CommandError, CommandId, CommandStatus, TokenRef};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// One generated command and the token it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub token_ref: TokenRef,
    pub text: String,
}

/// Terminal outcome of one batch item
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub token_ref: TokenRef,
    pub command_id: CommandId,
    pub text: String,
    pub status: CommandStatus,
    pub result: Option<String>,
    pub error: Option<CommandError>,
}

/// Outcomes in submission order plus what the closing cleanup reclaimed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
    pub reclaimed: usize,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(CommandStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(CommandStatus::Failed)
    }

    fn count(&self, status: CommandStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

#[derive(Debug, Default)]
struct ActiveBatches {
    count: usize,
    /// Auto-cleanup setting to restore when the last batch ends
    saved_auto_cleanup: bool,
}

/// Runs batches of generated commands through one queue
pub struct SequentialCommandProcessor {
    queue: Arc<CommandQueue>,
    active: Mutex<ActiveBatches>,
}

impl SequentialCommandProcessor {
    pub fn new(queue: Arc<CommandQueue>) -> Self {
        Self {
            queue,
            active: Mutex::new(ActiveBatches::default()),
        }
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Submit `items` in order, wait until all are terminal, then reclaim
    /// completed commands once.
    ///
    /// Failures are recorded per item and never abort the batch. Batches may
    /// overlap; auto-cleanup stays off until the last one finishes.
    pub async fn run(&self, node: &str, items: Vec<BatchItem>) -> BatchReport {
        info!("Running batch of {} commands on {}", items.len(), node);
        let mut batch = self.enter(node);

        let submitted: Vec<(BatchItem, Completion)> = items
            .into_iter()
            .map(|item| {
                let completion = self
                    .queue
                    .submit(item.text.clone(), Some(item.token_ref.clone()));
                (item, completion)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(submitted.len());
        for (item, completion) in submitted {
            let command_id = completion.id();
            let outcome = match completion.wait().await {
                Ok(command) => BatchOutcome {
                    token_ref: item.token_ref,
                    command_id,
                    text: item.text,
                    status: command.status,
                    result: command.result,
                    error: command.error,
                },
                Err(e) => {
                    warn!("Command {} for {} never finished: {}", command_id, item.token_ref, e);
                    BatchOutcome {
                        token_ref: item.token_ref,
                        command_id,
                        text: item.text,
                        status: CommandStatus::Failed,
                        result: None,
                        error: Some(e),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let reclaimed = self.queue.manual_cleanup();
        batch.finished = true;
        drop(batch);

        let report = BatchReport { outcomes, reclaimed };
        info!(
            "Batch on {} finished: {} completed, {} failed, {} reclaimed",
            node,
            report.completed(),
            report.failed(),
            report.reclaimed
        );
        report
    }

    fn enter<'a>(&'a self, node: &'a str) -> ActiveBatch<'a> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.count == 0 {
            active.saved_auto_cleanup = self.queue.auto_cleanup();
            self.queue.set_auto_cleanup(false);
        }
        active.count += 1;
        ActiveBatch {
            processor: self,
            node,
            finished: false,
        }
    }

    fn leave(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.count = active.count.saturating_sub(1);
        if active.count == 0 {
            self.queue.set_auto_cleanup(active.saved_auto_cleanup);
        }
    }
}

/// Registration of one running batch; released on drop, so a cancelled
/// `run` still restores auto-cleanup
struct ActiveBatch<'a> {
    processor: &'a SequentialCommandProcessor,
    node: &'a str,
    finished: bool,
}

impl Drop for ActiveBatch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let reclaimed = self.processor.queue.manual_cleanup();
            warn!(
                "Batch on {} cancelled, reclaimed {} completed commands",
                self.node, reclaimed
            );
        }
        self.processor.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{FnExecutor, QueueConfig};
    use crate::session::{RemoteSession, SessionConfig};
    use crate::transport::memory::{spawn_node, MemoryConnector};
    use node_console_shared::TokenType;
    use std::time::Duration;

    fn fbc(id: &str) -> BatchItem {
        BatchItem {
            token_ref: TokenRef::new("AP01m", id, TokenType::Fbc),
            text: format!("read {}", id),
        }
    }

    fn processor_failing_on(fail_on: &'static str) -> (SequentialCommandProcessor, Arc<Mutex<Vec<String>>>) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let log = executed.clone();
        let executor = FnExecutor::new(move |text: &str| {
            log.lock().unwrap().push(text.to_string());
            if text == fail_on {
                Err(CommandError::Execution(format!("ERROR: {}", text)))
            } else {
                Ok(format!("{} = 1", text))
            }
        });
        let queue = Arc::new(CommandQueue::new(executor, QueueConfig::default()));
        (SequentialCommandProcessor::new(queue), executed)
    }

    #[tokio::test]
    async fn test_batch_with_one_failure() {
        let (processor, _) = processor_failing_on("read 163");

        let report = processor
            .run("AP01m", vec![fbc("162"), fbc("163"), fbc("164")])
            .await;

        let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![CommandStatus::Completed, CommandStatus::Failed, CommandStatus::Completed]
        );
        assert_eq!(report.outcomes[0].result.as_deref(), Some("read 162 = 1"));
        assert_eq!(
            report.outcomes[1].error,
            Some(CommandError::Execution("ERROR: read 163".into()))
        );
        assert_eq!(report.reclaimed, 2);

        let queue = processor.queue();
        let remaining = queue.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].status, CommandStatus::Failed);
        assert_eq!(remaining[0].token_ref, Some(TokenRef::new("AP01m", "163", TokenType::Fbc)));

        assert_eq!(queue.manual_cleanup(), 0);
        assert!(queue.auto_cleanup());
    }

    #[tokio::test]
    async fn test_new_batch_appends_after_leftover_failures() {
        let (processor, executed) = processor_failing_on("read 163");

        let first = processor.run("AP01m", vec![fbc("162"), fbc("163")]).await;
        let leftover = first.outcomes[1].command_id;

        let second = processor.run("AP01m", vec![fbc("170"), fbc("171")]).await;
        assert_eq!(second.completed(), 2);
        assert!(second.outcomes.iter().all(|o| o.command_id > leftover));

        let remaining = processor.queue().snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, leftover);

        assert_eq!(
            *executed.lock().unwrap(),
            vec!["read 162", "read 163", "read 170", "read 171"]
        );
    }

    #[tokio::test]
    async fn test_mixed_types_keep_caller_order() {
        let (processor, executed) = processor_failing_on("never");
        let items = vec![
            BatchItem {
                token_ref: TokenRef::new("AP01m", "7", TokenType::Rpc),
                text: "rpc 7".into(),
            },
            fbc("162"),
            BatchItem {
                token_ref: TokenRef::new("AP01m", "3", TokenType::Rpc),
                text: "rpc 3".into(),
            },
        ];

        let report = processor.run("AP01m", items).await;
        assert_eq!(report.reclaimed, 3);
        assert_eq!(*executed.lock().unwrap(), vec!["rpc 7", "read 162", "rpc 3"]);
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.token_ref.token_id.as_str()).collect();
        assert_eq!(ids, vec!["7", "162", "3"]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (processor, _) = processor_failing_on("never");
        let report = processor.run("AP01m", Vec::new()).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.reclaimed, 0);
        assert!(processor.queue().auto_cleanup());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_batches_restore_auto_cleanup() {
        let (processor, _) = processor_failing_on("never");
        let processor = Arc::new(processor);

        let a = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run("AP01m", vec![fbc("1"), fbc("2"), fbc("3")]).await })
        };
        let b = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run("AP01m", vec![fbc("4"), fbc("5")]).await })
        };

        let a = a.await.expect("batch a panicked");
        let b = b.await.expect("batch b panicked");
        assert_eq!(a.completed(), 3);
        assert_eq!(b.completed(), 2);
        assert!(processor.queue().is_empty());
        assert!(processor.queue().auto_cleanup());
    }

    /// Sleeps per command so a batch can be cancelled mid-way
    struct SlowExecutor(Duration);

    #[async_trait::async_trait]
    impl crate::command::CommandExecutor for SlowExecutor {
        async fn execute(&mut self, text: &str) -> Result<String, CommandError> {
            tokio::time::sleep(self.0).await;
            Ok(text.to_string())
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch_restores_auto_cleanup() {
        let queue = Arc::new(CommandQueue::new(
            SlowExecutor(Duration::from_millis(30)),
            QueueConfig::default(),
        ));
        let processor = SequentialCommandProcessor::new(queue.clone());
        let items: Vec<_> = (1..=5).map(|i| fbc(&i.to_string())).collect();

        let result = tokio::time::timeout(Duration::from_millis(10), processor.run("AP01m", items)).await;
        assert!(result.is_err(), "batch should not finish within 10ms");
        assert!(queue.auto_cleanup());

        // Remaining commands still run and are reclaimed as they finish
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(queue.is_empty(), "resident: {:?}", queue.snapshot());

        let report = processor.run("AP01m", vec![fbc("6")]).await;
        assert_eq!(report.completed(), 1);
        assert!(queue.auto_cleanup());
    }

    #[tokio::test]
    async fn test_batch_against_remote_session() {
        let (connector, listener) = MemoryConnector::new();
        spawn_node(listener, |cmd| match cmd {
            "read 163" => Some("ERROR: no such connection".into()),
            other => Some(format!("{}: up", other)),
        });

        let config = SessionConfig {
            node_name: "AP01m".into(),
            command_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let session = RemoteSession::new(connector, config).expect("session");
        let queue = Arc::new(CommandQueue::new(session, QueueConfig::default()));
        let processor = SequentialCommandProcessor::new(queue.clone());

        let report = processor
            .run("AP01m", vec![fbc("162"), fbc("163"), fbc("164")])
            .await;
        assert_eq!(report.outcomes[0].result.as_deref(), Some("read 162: up"));
        assert!(matches!(report.outcomes[1].error, Some(CommandError::Execution(_))));
        assert_eq!(report.outcomes[2].status, CommandStatus::Completed);
        assert_eq!(report.reclaimed, 2);

        queue.shutdown().await;
    }
}

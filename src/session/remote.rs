//! Remote session: one telnet-like connection to a node with bounded reconnect

use super::retry::RetryPolicy;
use crate::config::duration_ms;
use crate::transport::{TransportConnector, TransportStream};
use anyhow::Context as _;
use node_console_shared::{
    codec::{self, CodecError, ResponseBuffer, TelnetDecoder},
    defaults,
    state_machine::{SessionEvent, SessionState, SessionStateMachine, TransitionResult},
    CommandError,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for a remote session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Node name, used in logs
    pub node_name: String,
    /// Regex matching the node's command prompt
    pub prompt_pattern: String,
    /// Regex that marks a response as an execution error
    pub error_pattern: Option<String>,
    pub login_pattern: String,
    pub password_pattern: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub line_ending: String,
    /// Budget for one connect attempt, login included
    #[serde(with = "duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Default per-command response timeout
    #[serde(with = "duration_ms", rename = "command_timeout_ms")]
    pub command_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_name: "node".into(),
            prompt_pattern: defaults::PROMPT_PATTERN.into(),
            error_pattern: Some(r"(?im)^\s*(error|unknown command)\b".into()),
            login_pattern: defaults::LOGIN_PATTERN.into(),
            password_pattern: defaults::PASSWORD_PATTERN.into(),
            username: None,
            password: None,
            line_ending: "\r\n".into(),
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
            command_timeout: Duration::from_millis(defaults::COMMAND_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Why a read did not reach the expected pattern
#[derive(Debug)]
enum ReadError {
    Timeout,
    Closed,
    Io(io::Error),
    TooLarge(CodecError),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Timeout => write!(f, "timed out waiting for node"),
            ReadError::Closed => write!(f, "node closed connection"),
            ReadError::Io(e) => write!(f, "I/O error: {}", e),
            ReadError::TooLarge(e) => write!(f, "{}", e),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::Io(e)
    }
}

/// Text read up to a pattern match
#[derive(Debug)]
struct PatternMatch {
    /// Index of the pattern that matched
    index: usize,
    /// Everything before the match
    before: String,
}

/// A session to one node. Not reentrant: a single owner serializes calls.
pub struct RemoteSession<C: TransportConnector> {
    connector: C,
    config: SessionConfig,
    prompt: Regex,
    error_pattern: Option<Regex>,
    login: Regex,
    password: Regex,
    stream: Option<C::Stream>,
    decoder: TelnetDecoder,
    fsm: SessionStateMachine,
}

impl<C: TransportConnector> RemoteSession<C> {
    /// Create a disconnected session; fails only on invalid patterns
    pub fn new(connector: C, config: SessionConfig) -> anyhow::Result<Self> {
        let prompt = Regex::new(&config.prompt_pattern)
            .with_context(|| format!("invalid prompt pattern {:?}", config.prompt_pattern))?;
        let error_pattern = config
            .error_pattern
            .as_deref()
            .map(|p| Regex::new(p).with_context(|| format!("invalid error pattern {:?}", p)))
            .transpose()?;
        let login = Regex::new(&config.login_pattern)
            .with_context(|| format!("invalid login pattern {:?}", config.login_pattern))?;
        let password = Regex::new(&config.password_pattern)
            .with_context(|| format!("invalid password pattern {:?}", config.password_pattern))?;
        let fsm = SessionStateMachine::new(config.retry.max_attempts);

        Ok(Self {
            connector,
            config,
            prompt,
            error_pattern,
            login,
            password,
            stream: None,
            decoder: TelnetDecoder::new(),
            fsm,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.fsm.state()
    }

    pub fn is_connected(&self) -> bool {
        self.fsm.is_connected() && self.stream.is_some()
    }

    /// Establish the transport, retrying per the configured policy
    pub async fn connect(&mut self) -> Result<(), CommandError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.fsm.state() != SessionState::Disconnected {
            // A previous connect was abandoned mid-way
            self.fsm.process_event(SessionEvent::DisconnectRequested);
        }

        let endpoint = self.connector.describe();
        self.fsm.process_event(SessionEvent::ConnectRequested);

        loop {
            let attempt = self.fsm.attempts();
            info!(
                "[{}] Connecting to {} (attempt {}/{})",
                self.config.node_name,
                endpoint,
                attempt,
                self.fsm.max_attempts()
            );

            match self.establish().await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.fsm.process_event(SessionEvent::Established);
                    info!("[{}] Connected to {}", self.config.node_name, endpoint);
                    return Ok(());
                }
                Err(reason) => {
                    warn!(
                        "[{}] Connect attempt {} failed: {}",
                        self.config.node_name, attempt, reason
                    );
                    match self.fsm.process_event(SessionEvent::AttemptFailed { reason }) {
                        TransitionResult::GaveUp { attempts, reason } => {
                            error!(
                                "[{}] Giving up on {} after {} attempts",
                                self.config.node_name, endpoint, attempts
                            );
                            return Err(CommandError::Connection(format!(
                                "{} unreachable after {} attempts: {}",
                                endpoint, attempts, reason
                            )));
                        }
                        _ => {
                            let delay = self.config.retry.delay_after(attempt);
                            debug!("[{}] Reconnecting in {:?}", self.config.node_name, delay);
                            sleep(delay).await;
                            self.fsm.process_event(SessionEvent::ConnectRequested);
                        }
                    }
                }
            }
        }
    }

    /// Send one command line and collect the response up to the next prompt
    pub async fn send(&mut self, command_text: &str, timeout: Duration) -> Result<String, CommandError> {
        if !self.is_connected() {
            info!("[{}] Session down, reconnecting before send", self.config.node_name);
            self.connect().await?;
        }

        let line = codec::encode_line(command_text, &self.config.line_ending);
        if let Err(e) = self.write_line(&line).await {
            // Nothing reached the node, so it is safe to resend once on a fresh link
            warn!("[{}] Write failed, reconnecting: {}", self.config.node_name, e);
            self.drop_link(e.to_string());
            self.connect().await?;
            if let Err(e) = self.write_line(&line).await {
                self.drop_link(e.to_string());
                return Err(CommandError::Connection(format!("write failed: {}", e)));
            }
        }

        let deadline = Instant::now() + timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(CommandError::Connection("session not connected".into()));
        };

        match read_until(stream, &mut self.decoder, &[&self.prompt], deadline).await {
            Ok(found) => {
                let response = clean_response(&found.before, command_text);
                if let Some(pattern) = &self.error_pattern {
                    if pattern.is_match(&response) {
                        debug!("[{}] Node rejected {:?}", self.config.node_name, command_text);
                        return Err(CommandError::Execution(response));
                    }
                }
                Ok(response)
            }
            Err(ReadError::Timeout) => {
                // A late answer would otherwise be read as the next command's response
                self.drop_link("response timeout".into());
                Err(CommandError::Timeout { after: timeout })
            }
            Err(ReadError::TooLarge(e)) => {
                self.drop_link(e.to_string());
                Err(CommandError::Execution(e.to_string()))
            }
            Err(e @ (ReadError::Closed | ReadError::Io(_))) => {
                let reason = e.to_string();
                self.drop_link(reason.clone());
                Err(CommandError::Connection(format!(
                    "link lost while awaiting response: {}",
                    reason
                )))
            }
        }
    }

    /// Close the transport. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = TransportStream::shutdown(&mut stream).await {
                debug!("[{}] Shutdown error ignored: {}", self.config.node_name, e);
            }
            info!("[{}] Disconnected", self.config.node_name);
        }
        self.fsm.process_event(SessionEvent::DisconnectRequested);
    }

    /// One connect attempt: transport, optional login, first prompt
    async fn establish(&mut self) -> Result<C::Stream, String> {
        let deadline = Instant::now() + self.config.connect_timeout;

        let mut stream = match timeout_at(deadline, self.connector.connect()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(format!("{:#}", e)),
            Err(_) => {
                return Err(format!(
                    "connect timed out after {:?}",
                    self.config.connect_timeout
                ))
            }
        };

        self.decoder.reset();
        match self.login(&mut stream, deadline).await {
            Ok(()) => Ok(stream),
            Err(e) => Err(format!("handshake failed: {}", e)),
        }
    }

    async fn login(&mut self, stream: &mut C::Stream, deadline: Instant) -> Result<(), ReadError> {
        let line_ending = self.config.line_ending.clone();

        if let Some(username) = self.config.username.clone() {
            let found = read_until(
                stream,
                &mut self.decoder,
                &[&self.login, &self.prompt],
                deadline,
            )
            .await?;
            if found.index == 1 {
                // Node skipped authentication
                return Ok(());
            }
            stream.write_all(&codec::encode_line(&username, &line_ending)).await?;

            if let Some(password) = self.config.password.clone() {
                read_until(stream, &mut self.decoder, &[&self.password], deadline).await?;
                stream.write_all(&codec::encode_line(&password, &line_ending)).await?;
            }
            stream.flush().await?;
        }

        read_until(stream, &mut self.decoder, &[&self.prompt], deadline).await?;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "session not connected"))?;
        stream.write_all(line).await?;
        stream.flush().await
    }

    fn drop_link(&mut self, reason: String) {
        self.stream = None;
        if let TransitionResult::Invalid { .. } =
            self.fsm.process_event(SessionEvent::IoError { reason })
        {
            self.fsm.process_event(SessionEvent::DisconnectRequested);
        }
    }
}

/// Read and decode until one of `patterns` matches, answering negotiation on the way
async fn read_until<S>(
    stream: &mut S,
    decoder: &mut TelnetDecoder,
    patterns: &[&Regex],
    deadline: Instant,
) -> Result<PatternMatch, ReadError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut response = ResponseBuffer::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        let n = match timeout_at(deadline, stream.read(&mut read_buf)).await {
            Ok(Ok(0)) => return Err(ReadError::Closed),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ReadError::Io(e)),
            Err(_) => return Err(ReadError::Timeout),
        };

        let decoded = decoder.decode(&read_buf[..n]);
        if !decoded.replies.is_empty() {
            stream.write_all(&decoded.replies).await?;
        }
        response.extend(&decoded.data).map_err(ReadError::TooLarge)?;

        let text = response.text();
        for (index, pattern) in patterns.iter().enumerate() {
            if let Some(m) = pattern.find(&text) {
                return Ok(PatternMatch {
                    index,
                    before: text[..m.start()].to_string(),
                });
            }
        }
    }
}

/// Normalize line endings, drop the echoed command and surrounding blank lines
fn clean_response(raw: &str, command_text: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines: Vec<&str> = normalized.lines().collect();

    if lines.first().map(|l| l.trim()) == Some(command_text.trim()) {
        lines.remove(0);
    }

    lines.join("\n").trim_matches('\n').trim_end().to_string()
}

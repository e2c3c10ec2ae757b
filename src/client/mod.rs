//! Typed RPC stub for the session broker.
//!
//! Each method sends one request line and awaits the matching response line on
//! a single persistent connection. Broker-reported failures come back verbatim
//! as [`ClientError::Broker`].

use crate::config::BrokerConfig;
use crate::protocol::{
    read_frame, write_frame, Ack, BrokerFailure, Discovery, LockMode, Message, MessageKind,
    ProtocolError, Request, Response, Severity, StatusSnapshot, Warning,
};
use crate::session::SessionPaths;
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, Instrument};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("broker unreachable at {}: {source}", socket.display())]
    Unreachable {
        socket: PathBuf,
        source: std::io::Error,
    },
    #[error("{op} timed out after {ms}ms")]
    Timeout { op: String, ms: u64 },
    #[error("connection to broker lost during {op}; broker state is unknown")]
    ConnectionLost { op: String },
    #[error("{0}")]
    Broker(BrokerFailure),
    #[error("{op}: unexpected '{got}' response from broker")]
    UnexpectedResponse { op: String, got: &'static str },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Unreachable { .. })
    }
}

/// Result of an acquire call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    Denied { holder: String },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted)
    }
}

/// Result of a release call. `released == false` is a reported no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: bool,
    pub holder: Option<String>,
    pub note: Option<String>,
}

/// Result of a send call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: u64,
    pub delivered_to: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for ClientOptions {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}

pub struct Client {
    agent_id: String,
    session: String,
    options: ClientOptions,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    // Set once a request fails mid-flight; the stream may hold a stale reply
    broken: bool,
}

impl Client {
    /// Connect to the session broker and register `agent_id`.
    /// Fails with [`ClientError::Unreachable`] when no broker is listening.
    pub async fn new(
        paths: &SessionPaths,
        agent_id: &str,
        task: &str,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let mut client = Self::connect(&paths.socket, paths.id.as_str(), agent_id, options).await?;
        client.register_agent(task).await?;
        Ok(client)
    }

    /// Connect without registering a mailbox
    pub async fn connect(
        socket: &Path,
        session: &str,
        agent_id: &str,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let unreachable = |source| ClientError::Unreachable {
            socket: socket.to_path_buf(),
            source,
        };

        let stream = match tokio::time::timeout(options.connect_timeout, UnixStream::connect(socket)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(unreachable(e)),
            Err(_) => {
                return Err(unreachable(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                )))
            }
        };

        debug!(agent_id = %agent_id, session = %session, "Connected to broker");
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            agent_id: agent_id.to_string(),
            session: session.to_string(),
            options,
            reader: BufReader::new(read_half),
            writer: write_half,
            broken: false,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub async fn register_agent(&mut self, task: &str) -> Result<(), ClientError> {
        let request = Request::Register {
            agent_id: self.agent_id.clone(),
            task: task.to_string(),
        };
        self.call_ok(request).await.map(|_| ())
    }

    pub async fn acquire_file_lock(
        &mut self,
        path: &str,
        mode: LockMode,
    ) -> Result<LockOutcome, ClientError> {
        let request = Request::AcquireFileLock {
            agent_id: self.agent_id.clone(),
            path: path.to_string(),
            mode,
        };
        self.call_ok(request).await.map(lock_outcome)
    }

    pub async fn release_file_lock(&mut self, path: &str) -> Result<ReleaseReport, ClientError> {
        let request = Request::ReleaseFileLock {
            agent_id: self.agent_id.clone(),
            path: path.to_string(),
        };
        self.call_ok(request).await.map(release_report)
    }

    pub async fn acquire_git_lock(&mut self) -> Result<LockOutcome, ClientError> {
        let request = Request::AcquireGitLock {
            agent_id: self.agent_id.clone(),
        };
        self.call_ok(request).await.map(lock_outcome)
    }

    pub async fn release_git_lock(&mut self) -> Result<ReleaseReport, ClientError> {
        let request = Request::ReleaseGitLock {
            agent_id: self.agent_id.clone(),
        };
        self.call_ok(request).await.map(release_report)
    }

    pub async fn send_message(
        &mut self,
        to: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<SendReceipt, ClientError> {
        let request = Request::SendMessage {
            agent_id: self.agent_id.clone(),
            to: to.to_string(),
            kind,
            content: content.to_string(),
        };
        let ack = self.call_ok(request).await?;
        match ack.message_id {
            Some(message_id) => Ok(SendReceipt {
                message_id,
                delivered_to: ack.delivered_to.unwrap_or(0),
            }),
            None => Err(ClientError::UnexpectedResponse {
                op: "send_message".to_string(),
                got: "ok",
            }),
        }
    }

    /// Drain the mailbox. A backlog larger than one frame arrives over
    /// several polls, which are repeated until the broker reports none left.
    pub async fn poll_inbox(&mut self) -> Result<Vec<Message>, ClientError> {
        let mut drained = Vec::new();
        loop {
            let request = Request::PollInbox {
                agent_id: self.agent_id.clone(),
            };
            match self.call(request).await? {
                Response::Messages { messages, remaining } => {
                    drained.extend(messages);
                    if remaining == 0 {
                        return Ok(drained);
                    }
                    debug!(remaining, "Inbox backlog spans several frames");
                }
                other => return Err(unexpected("poll_inbox", &other)),
            }
        }
    }

    pub async fn get_status(&mut self) -> Result<StatusSnapshot, ClientError> {
        let request = Request::GetStatus {
            agent_id: self.agent_id.clone(),
        };
        match self.call(request).await? {
            Response::Status(snapshot) => Ok(snapshot),
            other => Err(unexpected("get_status", &other)),
        }
    }

    pub async fn record_discovery(&mut self, category: &str, content: &str) -> Result<(), ClientError> {
        let request = Request::RecordDiscovery {
            agent_id: self.agent_id.clone(),
            category: category.to_string(),
            content: content.to_string(),
        };
        self.call_ok(request).await.map(|_| ())
    }

    pub async fn get_discoveries(&mut self) -> Result<Vec<Discovery>, ClientError> {
        let mut all = Vec::new();
        let mut from = 0;
        loop {
            let request = Request::GetDiscoveries {
                agent_id: self.agent_id.clone(),
                from,
            };
            match self.call(request).await? {
                Response::Discoveries { discoveries, next } => {
                    all.extend(discoveries);
                    match next {
                        Some(cursor) => from = cursor,
                        None => return Ok(all),
                    }
                }
                other => return Err(unexpected("get_discoveries", &other)),
            }
        }
    }

    pub async fn record_warning(&mut self, severity: Severity, content: &str) -> Result<(), ClientError> {
        let request = Request::RecordWarning {
            agent_id: self.agent_id.clone(),
            severity,
            content: content.to_string(),
        };
        self.call_ok(request).await.map(|_| ())
    }

    pub async fn get_warnings(&mut self) -> Result<Vec<Warning>, ClientError> {
        let mut all = Vec::new();
        let mut from = 0;
        loop {
            let request = Request::GetWarnings {
                agent_id: self.agent_id.clone(),
                from,
            };
            match self.call(request).await? {
                Response::Warnings { warnings, next } => {
                    all.extend(warnings);
                    match next {
                        Some(cursor) => from = cursor,
                        None => return Ok(all),
                    }
                }
                other => return Err(unexpected("get_warnings", &other)),
            }
        }
    }

    /// Ask the broker to exit. All coordination state is discarded.
    pub async fn shutdown_broker(&mut self) -> Result<(), ClientError> {
        let request = Request::Shutdown {
            agent_id: self.agent_id.clone(),
        };
        self.call_ok(request).await.map(|_| ())
    }

    /// Close the connection. Locks and queued messages stay with the broker.
    pub fn disconnect(self) {
        debug!(agent_id = %self.agent_id, "Disconnected from broker");
    }

    async fn call_ok(&mut self, request: Request) -> Result<Ack, ClientError> {
        let op = request.op();
        match self.call(request).await? {
            Response::Ok(ack) => Ok(ack),
            other => Err(unexpected(op, &other)),
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let op = request.op();
        if self.broken {
            return Err(ClientError::ConnectionLost { op: op.to_string() });
        }

        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            op,
            Some(&self.agent_id),
            Some(&self.session),
            Some(&correlation_id),
        );

        let timeout = self.options.request_timeout;
        let exchange = async {
            write_frame(&mut self.writer, &request).await?;
            read_frame::<_, Response>(&mut self.reader).await
        };

        let outcome = tokio::time::timeout(timeout, exchange.instrument(span)).await;
        let response = match outcome {
            Ok(Ok(Some(response))) => response,
            Ok(Ok(None)) | Ok(Err(ProtocolError::Io(_))) => {
                self.broken = true;
                return Err(ClientError::ConnectionLost { op: op.to_string() });
            }
            Ok(Err(e)) => {
                self.broken = true;
                return Err(ClientError::Protocol(e));
            }
            Err(_) => {
                self.broken = true;
                return Err(ClientError::Timeout {
                    op: op.to_string(),
                    ms: timeout.as_millis() as u64,
                });
            }
        };

        match response {
            Response::Error(failure) => Err(ClientError::Broker(failure)),
            other => Ok(other),
        }
    }
}

fn unexpected(op: &str, response: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        op: op.to_string(),
        got: response.kind(),
    }
}

fn lock_outcome(ack: Ack) -> LockOutcome {
    match (ack.granted, ack.holder) {
        (Some(false), holder) => LockOutcome::Denied {
            holder: holder.unwrap_or_else(|| "unknown".to_string()),
        },
        _ => LockOutcome::Granted,
    }
}

fn release_report(ack: Ack) -> ReleaseReport {
    ReleaseReport {
        released: ack.released.unwrap_or(false),
        holder: ack.holder,
        note: ack.note,
    }
}

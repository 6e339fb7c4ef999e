// src/client.rs
//! Consumer side: opens the event stream, decodes it and feeds a `SessionController`.
//!
//! One runner task owns the controller. Each search gets its own reader task whose messages are
//! tagged with the session id, so a superseded reader can only ever talk to a dead session.
//! Observers get whole-session snapshots through a `watch` channel.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::SearchError;
use crate::merge::SortMode;
use crate::session::{SearchSession, SessionController, SessionId};
use crate::stream::{SearchEvent, StreamDecoder};
use crate::types::{SearchQuery, SearchRequest};

pub type ByteStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Where raw stream bytes come from. HTTP in production; canned chunks in tests.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, request: &SearchRequest) -> anyhow::Result<ByteStream>;
}

pub const STREAM_PATH: &str = "/api/search/stream";

pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSource {
    /// `base_url` is the aggregator root, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::fetch::DEFAULT_USER_AGENT)
            .build()
            .context("building stream client")?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), STREAM_PATH),
        }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn open(&self, request: &SearchRequest) -> anyhow::Result<ByteStream> {
        let resp = self
            .client
            .post(&self.url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .with_context(|| format!("opening {}", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("stream endpoint returned HTTP {}", status.as_u16());
        }
        Ok(resp.bytes_stream().map(|r| r.map_err(anyhow::Error::from)).boxed())
    }
}

enum Command {
    Search {
        query: SearchQuery,
        request: SearchRequest,
        reply: oneshot::Sender<SessionId>,
    },
    Cancel,
    SetSortMode(SortMode),
    Shutdown,
}

enum StreamMsg {
    Event(SearchEvent),
    Ended,
    Failed(String),
}

/// Cheap to clone; all clones drive the same runner.
#[derive(Clone)]
pub struct SearchHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Option<SearchSession>>,
}

impl SearchHandle {
    /// Validate and start a search, superseding any running one.
    pub async fn search(&self, request: SearchRequest) -> Result<SessionId, SearchError> {
        let query = request.to_query()?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Search { query, request, reply })
            .map_err(|_| SearchError::Closed)?;
        rx.await.map_err(|_| SearchError::Closed)
    }

    pub fn cancel(&self) -> Result<(), SearchError> {
        self.commands.send(Command::Cancel).map_err(|_| SearchError::Closed)
    }

    pub fn set_sort_mode(&self, mode: SortMode) -> Result<(), SearchError> {
        self.commands
            .send(Command::SetSortMode(mode))
            .map_err(|_| SearchError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SearchSession>> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Option<SearchSession> {
        self.snapshots.borrow().clone()
    }

    /// Wait until session `id` is no longer running. `None` if it was superseded or the runner
    /// stopped first.
    pub async fn wait_for(&self, id: SessionId) -> Option<SearchSession> {
        let mut rx = self.snapshots.clone();
        let seen = rx
            .wait_for(|s| match s {
                Some(s) => s.id() > id || (s.id() == id && !s.is_running()),
                None => false,
            })
            .await
            .ok()?;
        seen.clone().filter(|s| s.id() == id)
    }
}

/// Spawn the runner task on the current tokio runtime.
pub fn spawn_runner(source: Arc<dyn EventSource>, controller: SessionController) -> SearchHandle {
    let (commands, rx) = mpsc::unbounded_channel();
    let (snap_tx, snapshots) = watch::channel(controller.current().cloned());
    tokio::spawn(run(source, controller, rx, snap_tx));
    SearchHandle { commands, snapshots }
}

async fn run(
    source: Arc<dyn EventSource>,
    mut controller: SessionController,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<Option<SearchSession>>,
) {
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<(SessionId, StreamMsg)>();
    let mut reader: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Search { query, request, reply }) => {
                    if let Some(token) = reader.take() {
                        token.cancel();
                    }
                    let id = controller.begin(query);
                    let token = CancellationToken::new();
                    tokio::spawn(read_stream(
                        source.clone(),
                        request,
                        id,
                        msg_tx.clone(),
                        token.clone(),
                    ));
                    reader = Some(token);
                    let _ = reply.send(id);
                }
                Some(Command::Cancel) => {
                    if let Some(token) = reader.take() {
                        token.cancel();
                    }
                    controller.cancel();
                }
                Some(Command::SetSortMode(mode)) => controller.set_sort_mode(mode),
                Some(Command::Shutdown) | None => {
                    if let Some(token) = reader.take() {
                        token.cancel();
                    }
                    controller.cancel();
                    snapshots.send_replace(controller.current().cloned());
                    tracing::debug!(target: "session", "search runner stopped");
                    break;
                }
            },
            Some((id, msg)) = msg_rx.recv() => {
                match msg {
                    StreamMsg::Event(ev) => controller.handle(id, ev),
                    StreamMsg::Ended => controller.end_of_stream(id),
                    StreamMsg::Failed(message) => controller.fail(id, message),
                };
            }
        }
        snapshots.send_replace(controller.current().cloned());
    }
}

async fn read_stream(
    source: Arc<dyn EventSource>,
    request: SearchRequest,
    id: SessionId,
    out: mpsc::UnboundedSender<(SessionId, StreamMsg)>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        r = source.open(&request) => r,
    };
    let mut body = match opened {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(target: "session", session = %id, error = %format!("{e:#}"), "failed to open search stream");
            let _ = out.send((id, StreamMsg::Failed(format!("{e:#}"))));
            return;
        }
    };

    let mut decoder = StreamDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            c = body.next() => c,
        };
        match chunk {
            Some(Ok(bytes)) => {
                for ev in decoder.push(&bytes) {
                    let terminal = ev.is_terminal();
                    if out.send((id, StreamMsg::Event(ev))).is_err() || terminal {
                        return;
                    }
                }
            }
            // A broken transport is handled like an early close: keep what arrived.
            Some(Err(e)) => {
                tracing::warn!(target: "session", session = %id, error = %e, "search stream broke");
                break;
            }
            None => break,
        }
    }

    if let Some(ev) = decoder.finish() {
        let terminal = ev.is_terminal();
        if out.send((id, StreamMsg::Event(ev))).is_err() || terminal {
            return;
        }
    }
    let _ = out.send((id, StreamMsg::Ended));
}

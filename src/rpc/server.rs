//! JSON-lines controller channel
//!
//! Each connection reads one request per line and writes one response per
//! line. Agent events are interleaved on the same stream; a controller
//! tells them apart by the `kind` field. Requests are handled one at a
//! time, in arrival order.

use super::agent::Agent;
use super::wire::{Request, Response};
use crate::config::ServerConfig;
use crate::events::{AgentEvent, EventReceiver};
use crate::host::NativeHost;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request handler failed: {0}")]
    Handler(#[from] JoinError),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events buffered per subscriber before it starts lagging
const EVENT_BACKLOG: usize = 1024;

/// Fans agent events out to every connected controller
///
/// Events emitted while nobody is subscribed are dropped.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventHub {
    /// Forward everything arriving on `events` until the agent side closes
    pub fn spawn(mut events: EventReceiver) -> Self {
        let (tx, _) = broadcast::channel(EVENT_BACKLOG);
        let forward = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // no receivers is not an error
                let _ = forward.send(event);
            }
            debug!("Event source closed");
        });
        EventHub { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Run one request on the blocking pool; discovery scans can take a while
async fn dispatch<H>(agent: &Arc<Mutex<Agent<H>>>, request: Request) -> ServerResult<Response>
where
    H: NativeHost + ?Sized + 'static,
{
    let mut agent = Arc::clone(agent).lock_owned().await;
    Ok(tokio::task::spawn_blocking(move || agent.handle(request)).await?)
}

/// Serve one controller until it disconnects
pub async fn serve_connection<H, R, W>(
    agent: Arc<Mutex<Agent<H>>>,
    reader: R,
    mut writer: W,
    mut events: broadcast::Receiver<AgentEvent>,
) -> ServerResult<()>
where
    H: NativeHost + ?Sized + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut events_open = true;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<Request>(line) {
                    Ok(request) => dispatch(&agent, request).await?,
                    Err(e) => {
                        warn!(error = %e, "Unparseable request");
                        Response::failure(None, "parse", e.to_string())
                    }
                };
                write_line(&mut writer, &response).await?;
            }
            event = events.recv(), if events_open => match event {
                Ok(event) => write_line(&mut writer, &event).await?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Controller lagging; events dropped"),
                Err(RecvError::Closed) => events_open = false,
            },
        }
    }

    debug!("Controller disconnected");
    Ok(())
}

/// Accept controllers on `listener` until the task is cancelled
pub async fn serve<H>(
    listener: TcpListener,
    agent: Arc<Mutex<Agent<H>>>,
    hub: EventHub,
    max_connections: usize,
) -> ServerResult<()>
where
    H: NativeHost + ?Sized + 'static,
{
    let permits = Arc::new(Semaphore::new(max_connections));
    loop {
        let (stream, peer) = listener.accept().await?;
        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
            warn!(%peer, max_connections, "Connection limit reached; refusing");
            continue;
        };
        info!(%peer, "Controller connected");

        let agent = Arc::clone(&agent);
        let events = hub.subscribe();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            if let Err(e) = serve_connection(agent, reader, writer, events).await {
                error!(%peer, error = %e, "Connection failed");
            }
            drop(permit);
        });
    }
}

/// Bind the configured address and serve `agent`
pub async fn listen<H>(config: &ServerConfig, agent: Agent<H>, events: EventReceiver) -> ServerResult<()>
where
    H: NativeHost + ?Sized + 'static,
{
    let address = format!("{}:{}", config.host, config.port);
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(source) => return Err(ServerError::Bind { address, source }),
    };
    info!(%address, "Listening for controllers");

    let hub = EventHub::spawn(events);
    serve(listener, Arc::new(Mutex::new(agent)), hub, config.max_connections).await
}

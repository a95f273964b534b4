//! Cumulus production server.
//!
//! Cloud-variable server over WebSocket: clients join the room of a project,
//! read and write its variables, and receive every write made by the rest of
//! the room. Dead or stalled clients are found by the liveness scheduler from
//! [`cumulus_core`], which probes one bucket of connections per tick with a
//! WebSocket Ping and evicts whoever failed to answer the previous probe.
//!
//! # Components
//!
//! - [`Server`]: TCP listener, WebSocket upgrade, per-connection handlers
//! - [`LivenessTimer`]: repeating task that ticks the shared [`Liveness`]
//! - [`WsProxy`]: [`cumulus_core::ConnectionProxy`] over a writer-task channel
//! - [`RoomDirectory`]: room membership for broadcast
//! - [`Storage`]: variable persistence ([`MemoryStorage`], [`RedbStorage`])
//! - [`ProjectFilter`]: blocked projects
//! - [`SystemEnv`]: production environment (tokio clock, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod filter;
mod liveness;
pub mod protocol;
mod rooms;
pub mod storage;
mod system_env;
mod transport;

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use cumulus_core::{ConnectionId, Environment, LivenessConfig, RoomId};
pub use error::ServerError;
pub use filter::ProjectFilter;
use futures::StreamExt;
pub use liveness::{Liveness, LivenessTimer, SharedLiveness};
pub use protocol::{ClientMessage, ServerMessage};
pub use rooms::RoomDirectory;
use serde_json::Value;
pub use storage::{MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::RwLock,
};
use tokio_tungstenite::tungstenite::Message;
pub use transport::{Outbound, WsProxy};

/// How long a closed connection waits for the client's close reply.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:9080")
    pub bind_address: String,
    /// Redb database path. In-memory storage when `None`
    pub data_path: Option<PathBuf>,
    /// Project blocklist path. Built-in patterns only when `None`
    pub filter_path: Option<PathBuf>,
    /// Probe timeout and bucket count
    pub liveness: LivenessConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9080".to_string(),
            data_path: None,
            filter_path: None,
            liveness: LivenessConfig::default(),
        }
    }
}

/// State shared by every connection handler.
struct SharedState<S> {
    liveness: SharedLiveness<WsProxy>,
    /// Room membership, written at handshake and disconnect
    rooms: RwLock<RoomDirectory>,
    /// Outbound handle per connection, for broadcast
    outbound: RwLock<HashMap<ConnectionId, WsProxy>>,
    storage: S,
    filter: ProjectFilter,
    env: SystemEnv,
}

/// Production Cumulus server.
pub struct Server<S: Storage> {
    listener: TcpListener,
    shared: Arc<SharedState<S>>,
    timer: LivenessTimer<WsProxy>,
}

impl<S: Storage> Server<S> {
    /// Validate the configuration, load the blocklist and bind the listener.
    ///
    /// The liveness timer is not started until [`Self::run`].
    pub async fn bind(config: ServerRuntimeConfig, storage: S) -> Result<Self, ServerError> {
        let liveness = Liveness::new(config.liveness)?.shared();

        let filter = match &config.filter_path {
            Some(path) => ProjectFilter::load(path)?,
            None => ProjectFilter::default(),
        };

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Transport(format!("cannot bind {}: {e}", config.bind_address))
        })?;

        let shared = Arc::new(SharedState {
            liveness: Arc::clone(&liveness),
            rooms: RwLock::new(RoomDirectory::new()),
            outbound: RwLock::new(HashMap::new()),
            storage,
            filter,
            env: SystemEnv::new(),
        });

        Ok(Self { listener, shared, timer: LivenessTimer::new(liveness) })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared liveness state.
    pub fn liveness(&self) -> &SharedLiveness<WsProxy> {
        self.timer.liveness()
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Start the liveness timer and accept connections until `shutdown`
    /// resolves, then stop the timer.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        self.timer.start().await?;
        tracing::info!(%addr, "server started");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, shared).await {
                                tracing::debug!(%peer, error = %e, "connection error");
                            }
                        });
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "accept error");
                    },
                },
            }
        }

        tracing::info!("server shutting down");
        self.timer.stop().await?;
        Ok(())
    }
}

/// Handle a single WebSocket connection from upgrade to disconnect.
async fn handle_connection<S: Storage>(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<SharedState<S>>,
) -> Result<(), ServerError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (sink, mut source) = ws.split();

    let (proxy, outbound_rx) = WsProxy::channel();
    let mut writer = tokio::spawn(transport::run_writer(sink, outbound_rx));

    let id = {
        let mut liveness = shared.liveness.lock().await;
        let now = shared.env.now();
        loop {
            let id = ConnectionId(shared.env.random_u64());
            if let Some(bucket) =
                liveness.registry.handle_connect(id, proxy.clone(), now, &shared.env)
            {
                tracing::debug!(connection = %id, %peer, bucket, "connection accepted");
                break id;
            }
        }
    };
    shared.outbound.write().await.insert(id, proxy.clone());

    let mut closed_by_server = false;
    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&shared, id, &proxy, text.as_str()).await;
                },
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(&shared, id, &proxy, text).await,
                    Err(_) => tracing::debug!(connection = %id, "ignoring non-UTF-8 frame"),
                },
                Some(Ok(Message::Pong(_))) => {
                    shared.liveness.lock().await.registry.handle_pong(id);
                },
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by tungstenite
                Some(Ok(Message::Ping(_) | Message::Frame(_))) => {},
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "read error");
                    break;
                },
            },
            _ = &mut writer => {
                closed_by_server = true;
                break;
            },
        }
    }

    shared.liveness.lock().await.registry.handle_disconnect(id);
    shared.outbound.write().await.remove(&id);
    {
        let mut rooms = shared.rooms.write().await;
        if let Some(room) = rooms.leave(id) {
            tracing::debug!(connection = %id, %room, rooms = rooms.room_count(), "left room");
        }
    }
    tracing::debug!(connection = %id, "connection closed");

    // Let the client echo our close frame before the socket drops
    if closed_by_server {
        let drain = async { while let Some(Ok(_)) = source.next().await {} };
        let _ = tokio::time::timeout(CLOSE_GRACE, drain).await;
    }

    Ok(())
}

async fn handle_text<S: Storage>(
    shared: &SharedState<S>,
    id: ConnectionId,
    proxy: &WsProxy,
    text: &str,
) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(connection = %id, error = %e, "ignoring message");
            return;
        },
    };

    match message {
        ClientMessage::Handshake { project_id, user } => {
            handle_handshake(shared, id, proxy, project_id, &user).await;
        },
        ClientMessage::Set { name, value } => handle_set(shared, id, name, value).await,
        ClientMessage::Get { name } => handle_get(shared, id, proxy, name).await,
    }
}

async fn handle_handshake<S: Storage>(
    shared: &SharedState<S>,
    id: ConnectionId,
    proxy: &WsProxy,
    project_id: String,
    user: &str,
) {
    if project_id.is_empty() || project_id.contains('\0') {
        proxy.close("invalid project id");
        return;
    }
    if shared.filter.is_blocked(&project_id) {
        tracing::info!(connection = %id, project = %project_id, "blocked project");
        proxy.close("project blocked");
        return;
    }

    let room = RoomId::new(project_id);
    let members = {
        let mut rooms = shared.rooms.write().await;
        if !rooms.join(id, room.clone()) {
            proxy.close("already joined");
            return;
        }
        rooms.member_count(&room)
    };
    shared.liveness.lock().await.registry.join_room(id, room.clone());

    let variables = shared.storage.load_room(&room).unwrap_or_else(|e| {
        tracing::error!(%room, error = %e, "cannot load room");
        Default::default()
    });

    tracing::debug!(connection = %id, %room, user, members, "handshake complete");
    send(proxy, &ServerMessage::All { variables });
}

async fn handle_set<S: Storage>(
    shared: &SharedState<S>,
    id: ConnectionId,
    name: String,
    value: Value,
) {
    let Some(room) = shared.rooms.read().await.room_of(id).cloned() else {
        tracing::debug!(connection = %id, "set before handshake");
        return;
    };

    if let Err(e) = shared.storage.set(&room, &name, &value) {
        tracing::error!(%room, variable = %name, error = %e, "cannot store variable");
    }

    let text = match (ServerMessage::Set { name, value }).to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "cannot encode broadcast");
            return;
        },
    };

    let rooms = shared.rooms.read().await;
    let outbound = shared.outbound.read().await;
    for member in rooms.members(&room) {
        if let Some(proxy) = outbound.get(&member) {
            proxy.send_text(text.clone());
        }
    }
}

async fn handle_get<S: Storage>(
    shared: &SharedState<S>,
    id: ConnectionId,
    proxy: &WsProxy,
    name: String,
) {
    let Some(room) = shared.rooms.read().await.room_of(id).cloned() else {
        tracing::debug!(connection = %id, "get before handshake");
        return;
    };

    let value = match shared.storage.get(&room, &name) {
        Ok(value) => value.unwrap_or_else(|| Value::from(0)),
        Err(e) => {
            tracing::error!(%room, variable = %name, error = %e, "cannot read variable");
            Value::from(0)
        },
    };

    send(proxy, &ServerMessage::Set { name, value });
}

fn send(proxy: &WsProxy, message: &ServerMessage) {
    match message.to_json() {
        Ok(text) => {
            proxy.send_text(text);
        },
        Err(e) => tracing::warn!(error = %e, "cannot encode reply"),
    }
}

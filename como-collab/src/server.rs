//! WebSocket sync server for one shared scene.
//!
//! Architecture:
//! ```text
//! Client A ──┐                 ┌── Scene (authority: users, locks, ids)
//!            ├── session ──────┤
//! Client B ──┘   per socket    └── CommandsHistoric ──watch(tail)──┐
//!                                       │                          │
//!                          ┌────────────┼────────────┐             │
//!                          ▼            ▼            ▼             │
//!                       session A    session B    session C ◄──────┘
//!                       cursor       cursor       cursor
//! ```
//!
//! Every session runs one task. It handles the client's SceneUpdate packets
//! and, whenever the historic grows, sends the client what it has not seen
//! yet in packets of at most four commands.
//!
//! Lock order: scene, then historic. Never the other way round.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, BroadcastStats, PublicUser, ReplicationCursor};
use crate::command::Command;
use crate::historic::{CommandsHistoric, DEFAULT_HISTORIC_RETENTION};
use crate::ids::UserId;
use crate::protocol::{Packet, ProtocolError, UserAccepted, MAX_COMMANDS_PER_PACKET};
use crate::scene::{Scene, SceneError, DEFAULT_MAX_LIGHTS};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum simultaneous users
    pub max_users: usize,
    /// Name announced to every joining user
    pub scene_name: String,
    /// Maximum lights in the scene
    pub max_lights: usize,
    /// Passed commands kept before the historic is pruned
    pub historic_retention: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            max_users: 8,
            scene_name: "Untitled scene".to_string(),
            max_lights: DEFAULT_MAX_LIGHTS,
            historic_retention: DEFAULT_HISTORIC_RETENTION,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_packets: u64,
    pub commands_received: u64,
    pub historic_len: u64,
}

/// Everything sessions share.
struct SharedState {
    scene: Mutex<Scene>,
    historic: Mutex<CommandsHistoric>,
    group: BroadcastGroup,
    stats: RwLock<ServerStats>,
}

/// What a successful handshake hands to the session task.
struct Session {
    user_id: UserId,
    accepted: UserAccepted,
    /// Scene rebuild for a joiner that cannot replay from index 0
    snapshot: Vec<Command>,
    cursor: Arc<ReplicationCursor>,
    tail: watch::Receiver<u64>,
}

impl SharedState {
    fn new(config: &ServerConfig) -> Self {
        let historic = CommandsHistoric::new(config.historic_retention);
        let group = BroadcastGroup::new(historic.subscribe());
        Self {
            scene: Mutex::new(Scene::new(
                config.scene_name.clone(),
                config.max_users,
                config.max_lights,
            )),
            historic: Mutex::new(historic),
            group,
            stats: RwLock::new(ServerStats::default()),
        }
    }

    /// Admit `name` into the scene and register its session.
    async fn join(&self, name: &str) -> Result<Session, SceneError> {
        let mut scene = self.scene.lock().await;
        let record = scene.connect_user(name)?;
        let accepted = UserAccepted {
            user_id: record.user_id,
            name: record.name.clone(),
            selection_color: record.selection_color,
            scene_id: scene.id(),
            scene_name: scene.name().to_string(),
        };

        let mut historic = self.historic.lock().await;
        let snapshot = if historic.has_pruned() {
            scene.snapshot_commands()
        } else {
            Vec::new()
        };
        historic.add_command(record.connection_command());
        // The snapshot already announces this user.
        let start = if historic.has_pruned() { historic.len() } else { 0 };

        let user = PublicUser::new(record.user_id, &record.name, record.selection_color, start);
        let cursor = Arc::clone(&user.cursor);
        let tail = self.group.add_user(user).await;

        Ok(Session {
            user_id: record.user_id,
            accepted,
            snapshot,
            cursor,
            tail,
        })
    }

    /// Run a client's commands through the scene and append the outcome.
    ///
    /// Commands accepted before a protocol violation are still appended.
    async fn handle_commands(
        &self,
        user_id: UserId,
        commands: Vec<Arc<Command>>,
    ) -> Result<(), ProtocolError> {
        let received = commands.len() as u64;
        let mut scene = self.scene.lock().await;
        let mut accepted = Vec::with_capacity(commands.len());
        let mut result = Ok(());
        for command in commands {
            match scene.process_command(user_id, Arc::unwrap_or_clone(command)) {
                Ok(out) => accepted.extend(out),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let mut historic = self.historic.lock().await;
        historic.add_commands(accepted);
        let min_cursor = self.group.min_cursor(historic.len()).await;
        historic.prune(min_cursor);
        drop(historic);
        drop(scene);

        self.stats.write().await.commands_received += received;
        result
    }

    /// Tear down a session: locks, colour, registry, announcement, pruning.
    async fn remove_user(&self, user_id: UserId) {
        let mut scene = self.scene.lock().await;
        let disconnection = scene.disconnect_user(user_id);
        let mut historic = self.historic.lock().await;
        self.group.remove_user(user_id).await;
        if let Some(command) = disconnection {
            historic.add_command(command);
        }
        let min_cursor = self.group.min_cursor(historic.len()).await;
        historic.prune(min_cursor);
    }

    /// Send the session everything up to the historic tail.
    async fn flush(&self, session: &mut Session, sender: &mut WsSink) -> Result<(), BoxError> {
        session.tail.borrow_and_update();
        loop {
            let current = session.cursor.next_command();
            let batch = {
                let historic = self.historic.lock().await;
                historic.fill_update_packet(current, MAX_COMMANDS_PER_PACKET, session.user_id)
            };
            if batch.next == current {
                return Ok(());
            }
            session.cursor.advance(batch.next, !batch.commands.is_empty());
            if batch.commands.is_empty() {
                continue;
            }
            let n_commands = batch.commands.len();
            let encoded = Packet::scene_update(batch.commands).encode()?;
            sender.send(Message::Binary(encoded.into())).await?;
            self.group.record_packet(n_commands);
        }
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    state: Arc<SharedState>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(SharedState::new(&config));
        Self { config, state }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Sync server for scene {:?} listening on {}",
            self.config.scene_name,
            self.config.bind_addr
        );
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, state).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to teardown.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        state: Arc<SharedState>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        state.stats.write().await.total_connections += 1;

        let name = match Self::next_packet(&mut ws_receiver).await? {
            Some(Packet::NewUser { name }) => name,
            Some(other) => {
                log::warn!("{addr} opened with {:?} instead of NewUser", other.packet_type());
                return Err(ProtocolError::UnexpectedPacket(other.packet_type()).into());
            }
            None => return Ok(()),
        };

        let mut session = match state.join(&name).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("Rejected user {name:?} from {addr}: {e}");
                state.stats.write().await.rejected_connections += 1;
                let encoded = Packet::user_rejected(e.to_string()).encode()?;
                ws_sender.send(Message::Binary(encoded.into())).await?;
                ws_sender.close().await?;
                return Ok(());
            }
        };
        let user_id = session.user_id;
        log::info!("User {user_id} ({name}) connected from {addr}");
        state.stats.write().await.active_connections += 1;

        let result = Self::run_session(&state, &mut session, &mut ws_sender, &mut ws_receiver).await;

        state.remove_user(user_id).await;
        state.stats.write().await.active_connections -= 1;
        match &result {
            Ok(()) => log::info!("User {user_id} ({name}) disconnected"),
            Err(e) => log::warn!("User {user_id} ({name}) dropped: {e}"),
        }
        result
    }

    async fn run_session(
        state: &SharedState,
        session: &mut Session,
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
    ) -> Result<(), BoxError> {
        let encoded = Packet::UserAccepted(session.accepted.clone()).encode()?;
        ws_sender.send(Message::Binary(encoded.into())).await?;

        for chunk in std::mem::take(&mut session.snapshot).chunks(MAX_COMMANDS_PER_PACKET) {
            let commands = chunk.iter().cloned().map(Arc::new).collect();
            let encoded = Packet::scene_update(commands).encode()?;
            ws_sender.send(Message::Binary(encoded.into())).await?;
        }
        state.flush(session, ws_sender).await?;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            state.stats.write().await.total_packets += 1;
                            match Packet::decode(&bytes)? {
                                Packet::SceneUpdate { commands } => {
                                    state.handle_commands(session.user_id, commands).await?;
                                    state.flush(session, ws_sender).await?;
                                }
                                other => {
                                    return Err(ProtocolError::UnexpectedPacket(other.packet_type()).into());
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => return Ok(()),

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => return Err(e.into()),

                        _ => {}
                    }
                }

                // Historic grew
                changed = session.tail.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    state.flush(session, ws_sender).await?;
                }
            }
        }
    }

    /// Next protocol packet, skipping control frames. `None` on close.
    async fn next_packet(receiver: &mut WsSource) -> Result<Option<Packet>, BoxError> {
        while let Some(msg) = receiver.next().await {
            match msg? {
                Message::Binary(data) => {
                    let bytes: Vec<u8> = data.into();
                    return Ok(Some(Packet::decode(&bytes)?));
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.state.stats.read().await.clone();
        stats.historic_len = self.state.historic.lock().await.len();
        stats
    }

    /// Replication counters of the session registry.
    pub async fn broadcast_stats(&self) -> BroadcastStats {
        self.state.group.stats().await
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn scene_id(&self) -> Uuid {
        self.state.scene.lock().await.id()
    }

    /// Commands still held in memory by the historic.
    pub async fn retained_commands(&self) -> usize {
        self.state.historic.lock().await.retained()
    }
}

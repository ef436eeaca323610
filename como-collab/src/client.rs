//! WebSocket sync client.
//!
//! Provides:
//! - Handshake (`NewUser` → `UserAccepted` / `UserRejected`)
//! - A local queue of outgoing commands, flushed by a writer task every
//!   `flush_interval` in packets of at most four commands
//! - A reader task applying every received command to the [`SceneMirror`]
//! - Convenience builders for every command a user can issue
//!
//! ```text
//!   app ──► queue ──(100 ms tick)──► writer ──► socket ──► server
//!   app ◄── events ◄── mirror ◄──── reader ◄── socket ◄────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::command::{
    CameraCommand, Color, Command, CommandBody, GeometricPrimitiveCommand, LightCommand,
    LightType, MaterialColorComponent, MaterialCommand, MaterialInfo, PrimitiveCategoryCommand,
    PrimitiveCommand, PrimitiveShape, SelectionCommand, TextureCommand, Transformation,
};
use crate::ids::{ResourceId, UserId};
use crate::mirror::{SceneEvent, SceneMirror};
use crate::protocol::{Packet, ProtocolError, UserAccepted, MAX_COMMANDS_PER_PACKET};

type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Period of the outgoing flush timer
    pub flush_interval: Duration,
    /// Commands per packet, never above `MAX_COMMANDS_PER_PACKET`
    pub max_commands_per_packet: usize,
    /// How long to wait for `UserAccepted`
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            max_commands_per_packet: MAX_COMMANDS_PER_PACKET,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Server rejected the connection: {0}")]
    Rejected(String),
    #[error("Handshake timed out")]
    Timeout,
    #[error("Not connected")]
    Disconnected,
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// First event of every subscription made while connected
    Connected,
    /// Connection lost or closed
    Disconnected,
    Scene(SceneEvent),
}

/// The sync client.
pub struct SyncClient {
    accepted: UserAccepted,
    config: ClientConfig,
    mirror: Arc<Mutex<SceneMirror>>,
    /// Commands waiting for the next flush
    queue: Arc<Mutex<VecDeque<Command>>>,
    state: Arc<RwLock<ConnectionState>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Connect to `url` as `name` and start the reader and writer tasks.
    pub async fn connect(
        url: &str,
        name: &str,
        mut config: ClientConfig,
    ) -> Result<Self, ClientError> {
        config.max_commands_per_packet = config.max_commands_per_packet.clamp(1, MAX_COMMANDS_PER_PACKET);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let hello = Packet::new_user(name).encode()?;
        ws_writer.send(Message::Binary(hello.into())).await?;

        let accepted = tokio::time::timeout(config.handshake_timeout, Self::handshake(&mut ws_reader))
            .await
            .map_err(|_| ClientError::Timeout)??;
        log::info!(
            "Joined scene {:?} as user {} ({})",
            accepted.scene_name,
            accepted.user_id,
            accepted.name
        );

        let mut mirror = SceneMirror::new(accepted.user_id);
        let scene_events = mirror.subscribe();
        let mirror = Arc::new(Mutex::new(mirror));
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let subscribers = Arc::new(Mutex::new(Vec::<mpsc::UnboundedSender<ClientEvent>>::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Writer task: flush the queue on every tick, close on shutdown
        let writer = {
            let queue = Arc::clone(&queue);
            let interval = config.flush_interval;
            let per_packet = config.max_commands_per_packet;
            let mut shutdown_rx = shutdown_rx;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    let closing = tokio::select! {
                        _ = ticker.tick() => false,
                        _ = shutdown_rx.changed() => true,
                    };
                    loop {
                        let batch: Vec<Arc<Command>> = {
                            let mut queue = queue.lock().await;
                            let n = queue.len().min(per_packet);
                            queue.drain(..n).map(Arc::new).collect()
                        };
                        if batch.is_empty() {
                            break;
                        }
                        let encoded = match Packet::scene_update(batch).encode() {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                log::error!("Dropping unencodable packet: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_writer.send(Message::Binary(encoded.into())).await {
                            log::warn!("Send failed, writer stopping: {e}");
                            return;
                        }
                    }
                    if closing {
                        let _ = ws_writer.close().await;
                        return;
                    }
                }
            })
        };

        // Reader task: apply server commands to the mirror
        {
            let mirror = Arc::clone(&mirror);
            let state = Arc::clone(&state);
            let subscribers = Arc::clone(&subscribers);
            let mut scene_events = scene_events;
            tokio::spawn(async move {
                while let Some(msg) = ws_reader.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => {
                            let bytes: Vec<u8> = data.into();
                            match Packet::decode(&bytes) {
                                Ok(Packet::SceneUpdate { commands }) => {
                                    {
                                        let mut mirror = mirror.lock().await;
                                        for command in &commands {
                                            mirror.apply(command);
                                        }
                                    }
                                    let mut subscribers = subscribers.lock().await;
                                    while let Ok(event) = scene_events.try_recv() {
                                        subscribers.retain(|tx| tx.send(ClientEvent::Scene(event.clone())).is_ok());
                                    }
                                }
                                Ok(other) => {
                                    log::warn!("Ignoring unexpected {:?} packet", other.packet_type());
                                }
                                Err(e) => {
                                    log::error!("Undecodable packet from server: {e}");
                                    break;
                                }
                            }
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }

                // Connection lost
                *state.write().await = ConnectionState::Disconnected;
                let mut subscribers = subscribers.lock().await;
                subscribers.retain(|tx| tx.send(ClientEvent::Disconnected).is_ok());
                log::info!("Disconnected from server");
            });
        }

        Ok(Self {
            accepted,
            config,
            mirror,
            queue,
            state,
            subscribers,
            shutdown_tx,
            writer: Mutex::new(Some(writer)),
        })
    }

    async fn handshake(reader: &mut WsSource) -> Result<UserAccepted, ClientError> {
        while let Some(msg) = reader.next().await {
            match msg? {
                Message::Binary(data) => {
                    let bytes: Vec<u8> = data.into();
                    return match Packet::decode(&bytes)? {
                        Packet::UserAccepted(accepted) => Ok(accepted),
                        Packet::UserRejected { reason } => Err(ClientError::Rejected(reason)),
                        other => Err(ProtocolError::UnexpectedPacket(other.packet_type()).into()),
                    };
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(ClientError::Disconnected)
    }

    /// Flush whatever is queued and close the connection.
    pub async fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(writer) = self.writer.lock().await.take() {
            let _ = writer.await;
        }
    }

    /// Receive client events from now on.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.connection_state().await == ConnectionState::Connected {
            let _ = tx.send(ClientEvent::Connected);
        }
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Queue an arbitrary command body under this client's user id.
    pub async fn submit(&self, body: CommandBody) -> Result<(), ClientError> {
        self.enqueue(Command::new(self.user_id(), body)).await
    }

    async fn enqueue(&self, command: Command) -> Result<(), ClientError> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(ClientError::Disconnected);
        }
        self.queue.lock().await.push_back(command);
        Ok(())
    }

    /// Reserve `count` ids and queue the creation built from the first.
    ///
    /// The server accepts a creator's ids only in increasing order, so the
    /// mirror stays locked until the command is queued.
    async fn create(
        &self,
        count: u32,
        body: impl FnOnce(ResourceId) -> CommandBody,
    ) -> Result<ResourceId, ClientError> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(ClientError::Disconnected);
        }
        let mut mirror = self.mirror.lock().await;
        let first = mirror.reserve_resource_ids(count);
        let command = Command::new(self.user_id(), body(first));
        self.queue.lock().await.push_back(command);
        Ok(first)
    }

    /// Ask for the lock on `resource` and its descendants.
    pub async fn request_resource_lock(&self, resource: ResourceId) -> Result<(), ClientError> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(ClientError::Disconnected);
        }
        // Pending order must match send order: hold the mirror while queueing.
        let mut mirror = self.mirror.lock().await;
        let command = mirror.request_lock(resource);
        self.queue.lock().await.push_back(command);
        Ok(())
    }

    pub async fn request_selection_unlock(&self) -> Result<(), ClientError> {
        self.enqueue(Command::selection_unlock(self.user_id())).await
    }

    pub async fn request_selection_deletion(&self) -> Result<(), ClientError> {
        self.enqueue(Command::selection_deletion(self.user_id())).await
    }

    /// Create a mesh with its material and texture walls. Returns the mesh id.
    pub async fn create_geometric_primitive(&self, shape: PrimitiveShape) -> Result<ResourceId, ClientError> {
        self.create(2 + shape.n_texture_walls(), |mesh| {
            CommandBody::GeometricPrimitive(GeometricPrimitiveCommand::Creation {
                mesh,
                material: mesh.offset(1),
                first_texture_wall: mesh.offset(2),
                shape,
            })
        })
        .await
    }

    pub async fn create_light(&self, light_type: LightType, color: Color) -> Result<ResourceId, ClientError> {
        self.create(1, |light| {
            CommandBody::Light(LightCommand::Creation {
                light,
                light_type,
                color,
            })
        })
        .await
    }

    pub async fn create_camera(&self, name: &str) -> Result<ResourceId, ClientError> {
        let name = name.to_string();
        self.create(1, |camera| CommandBody::Camera(CameraCommand::Creation { camera, name }))
            .await
    }

    pub async fn create_texture(&self, name: &str) -> Result<ResourceId, ClientError> {
        let name = name.to_string();
        self.create(1, |texture| CommandBody::Texture(TextureCommand::Creation { texture, name }))
            .await
    }

    pub async fn create_primitive_category(&self, name: &str) -> Result<ResourceId, ClientError> {
        let name = name.to_string();
        self.create(1, |category| {
            CommandBody::PrimitiveCategory(PrimitiveCategoryCommand::Creation { category, name })
        })
        .await
    }

    pub async fn import_primitive(&self, category: ResourceId, name: &str) -> Result<ResourceId, ClientError> {
        let name = name.to_string();
        self.create(1, |primitive| {
            CommandBody::Primitive(PrimitiveCommand::Import {
                primitive,
                category,
                name,
            })
        })
        .await
    }

    /// Place an instance of `primitive`. Returns the new mesh id.
    pub async fn instantiate_primitive(
        &self,
        primitive: ResourceId,
        n_materials: u8,
    ) -> Result<ResourceId, ClientError> {
        self.create(1 + u32::from(n_materials), |mesh| {
            CommandBody::Primitive(PrimitiveCommand::Instantiation {
                primitive,
                mesh,
                first_material: mesh.offset(1),
                n_materials,
            })
        })
        .await
    }

    pub async fn create_material(&self, parent: ResourceId, info: MaterialInfo) -> Result<ResourceId, ClientError> {
        self.create(1, |material| {
            CommandBody::Material(MaterialCommand::Creation {
                material,
                parent,
                info,
            })
        })
        .await
    }

    pub async fn change_material_color(
        &self,
        material: ResourceId,
        component: MaterialColorComponent,
        color: Color,
    ) -> Result<(), ClientError> {
        self.submit(CommandBody::Material(MaterialCommand::ColorChange {
            material,
            component,
            color,
        }))
        .await
    }

    pub async fn change_light_color(&self, light: ResourceId, color: Color) -> Result<(), ClientError> {
        self.submit(CommandBody::Light(LightCommand::ColorChange { light, color }))
            .await
    }

    /// Transform every entity in this user's selection.
    pub async fn transform_selection(&self, transformation: Transformation) -> Result<(), ClientError> {
        self.submit(CommandBody::Selection(SelectionCommand::Transformation { transformation }))
            .await
    }

    /// Shared handle to the local scene replica.
    pub fn mirror(&self) -> Arc<Mutex<SceneMirror>> {
        Arc::clone(&self.mirror)
    }

    pub fn user_id(&self) -> UserId {
        self.accepted.user_id
    }

    pub fn user_name(&self) -> &str {
        &self.accepted.name
    }

    pub fn selection_color(&self) -> Color {
        self.accepted.selection_color
    }

    pub fn scene_id(&self) -> Uuid {
        self.accepted.scene_id
    }

    pub fn scene_name(&self) -> &str {
        &self.accepted.scene_name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Commands waiting for the next flush.
    pub async fn queued_commands(&self) -> usize {
        self.queue.lock().await.len()
    }
}

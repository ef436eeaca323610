//! # como-collab: Collaborative scene synchronization for COMO
//!
//! Several users edit one shared 3D scene through a central server. The
//! server is the only authority: it validates every command, appends the
//! accepted ones to a totally ordered historic and replays that historic to
//! every client, the sender included.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    WebSocket     ┌──────────────┐
//! │ SyncClient   │ ◄──────────────► │ SyncServer   │
//! │ (per user)   │   Binary Proto   │ (central)    │
//! └──────┬───────┘                  └──────┬───────┘
//!        │                                 │
//!        ▼                                 ▼
//! ┌──────────────┐                  ┌──────────────┐
//! │ SceneMirror  │                  │ Scene        │
//! │ (replica)    │                  │ (authority)  │
//! └──────────────┘                  └──────┬───────┘
//!                                          │
//!                                  ┌───────┴────────┐
//!                                  │CommandsHistoric│
//!                                  │ (total order)  │
//!                                  └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`ids`]: Resource ids, per-user generators and the server registry
//! - [`command`]: The command set and its wire form
//! - [`protocol`]: Packets framed one per WebSocket message
//! - [`historic`]: Ordered log of accepted commands
//! - [`ownership`]: Resource tree and lock table
//! - [`scene`]: Server-side validation of every command
//! - [`broadcast`]: Session registry with replication cursors
//! - [`server`]: WebSocket sync server
//! - [`client`]: WebSocket sync client with a batched writer
//! - [`mirror`]: Client-side scene replica and selections

pub mod ids;
pub mod command;
pub mod protocol;
pub mod historic;
pub mod ownership;
pub mod scene;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod mirror;

// Re-exports for convenience
pub use ids::{ResourceId, ResourceIdsGenerator, ResourceIdsRegistry, UserId, NO_RESOURCE, NO_USER};
pub use command::{
    Color, Command, CommandBody, CommandTarget, MaterialInfo, PrimitiveShape, RejectionReason,
    ResourceKind, Transformation,
};
pub use protocol::{Packet, PacketType, ProtocolError, UserAccepted, MAX_COMMANDS_PER_PACKET};
pub use historic::{CommandsHistoric, UpdateBatch, DEFAULT_HISTORIC_RETENTION};
pub use ownership::{LockOutcome, OwnershipTable};
pub use scene::{Scene, SceneError, UserRecord};
pub use broadcast::{BroadcastGroup, BroadcastStats, PublicUser, ReplicationCursor};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use client::{ClientConfig, ClientError, ClientEvent, ConnectionState, SyncClient};
pub use mirror::{SceneEvent, SceneMirror, Selections};

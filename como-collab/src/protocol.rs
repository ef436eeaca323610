//! Binary packet protocol between clients and the sync server.
//!
//! Every WebSocket binary frame carries exactly one packet:
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ type     │ body                                         │
//! │ 1 byte   │ bincode (standard config)                    │
//! └──────────┴──────────────────────────────────────────────┘
//!
//! SceneUpdate body:
//! ┌──────────┬───────────┬───────────┬─────┐
//! │ count u8 │ command 0 │ command 1 │ ... │   count <= 4
//! └──────────┴───────────┴───────────┴─────┘
//! ```
//!
//! Commands are self-describing, so the body is decoded sequentially.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::command::{Color, Command};
use crate::ids::UserId;

/// Upper bound on commands in one SceneUpdate packet.
pub const MAX_COMMANDS_PER_PACKET: usize = 4;

/// Upper bound on the bytes a decoder may allocate for one packet body or
/// command. Length prefixes claiming more fail instead of allocating.
pub const MAX_DECODE_BYTES: usize = 64 * 1024;

/// Bincode configuration for reading untrusted input.
pub(crate) fn decode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_DECODE_BYTES>()
}

/// Packet type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Client asks to join with a display name
    NewUser = 1,
    /// Server accepts the join
    UserAccepted = 2,
    /// Server refuses the join
    UserRejected = 3,
    /// Batch of scene commands, both directions
    SceneUpdate = 4,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::NewUser),
            2 => Ok(Self::UserAccepted),
            3 => Ok(Self::UserRejected),
            4 => Ok(Self::SceneUpdate),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// Payload of a successful join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccepted {
    pub user_id: UserId,
    pub name: String,
    pub selection_color: Color,
    /// Identity of the running scene, fixed for the server's lifetime
    pub scene_id: Uuid,
    pub scene_name: String,
}

/// Top-level protocol packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    NewUser { name: String },
    UserAccepted(UserAccepted),
    UserRejected { reason: String },
    SceneUpdate { commands: Vec<Arc<Command>> },
}

impl Packet {
    pub fn new_user(name: impl Into<String>) -> Self {
        Self::NewUser { name: name.into() }
    }

    pub fn user_rejected(reason: impl Into<String>) -> Self {
        Self::UserRejected {
            reason: reason.into(),
        }
    }

    pub fn scene_update(commands: Vec<Arc<Command>>) -> Self {
        Self::SceneUpdate { commands }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::NewUser { .. } => PacketType::NewUser,
            Self::UserAccepted(_) => PacketType::UserAccepted,
            Self::UserRejected { .. } => PacketType::UserRejected,
            Self::SceneUpdate { .. } => PacketType::SceneUpdate,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![self.packet_type() as u8];
        match self {
            Self::NewUser { name } => encode_body(name, &mut out)?,
            Self::UserAccepted(accepted) => encode_body(accepted, &mut out)?,
            Self::UserRejected { reason } => encode_body(reason, &mut out)?,
            Self::SceneUpdate { commands } => {
                if commands.len() > MAX_COMMANDS_PER_PACKET {
                    return Err(ProtocolError::TooManyCommands(commands.len()));
                }
                out.push(commands.len() as u8);
                for command in commands {
                    command.encode_into(&mut out)?;
                }
            }
        }
        Ok(out)
    }

    /// Deserialize from binary wire format. The whole frame must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, body) = bytes.split_first().ok_or(ProtocolError::EmptyPacket)?;
        match PacketType::try_from(tag)? {
            PacketType::NewUser => Ok(Self::NewUser {
                name: decode_body(body)?,
            }),
            PacketType::UserAccepted => Ok(Self::UserAccepted(decode_body(body)?)),
            PacketType::UserRejected => Ok(Self::UserRejected {
                reason: decode_body(body)?,
            }),
            PacketType::SceneUpdate => {
                let (&count, mut rest) = body.split_first().ok_or(ProtocolError::EmptyPacket)?;
                let count = count as usize;
                if count > MAX_COMMANDS_PER_PACKET {
                    return Err(ProtocolError::TooManyCommands(count));
                }
                let mut commands = Vec::with_capacity(count);
                for _ in 0..count {
                    let (command, used) = Command::decode_from(rest)?;
                    commands.push(Arc::new(command));
                    rest = &rest[used..];
                }
                if !rest.is_empty() {
                    return Err(ProtocolError::TrailingBytes(rest.len()));
                }
                Ok(Self::SceneUpdate { commands })
            }
        }
    }
}

fn encode_body<T: Serialize>(value: &T, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
    out.extend_from_slice(&bytes);
    Ok(())
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    let (value, used) = bincode::serde::decode_from_slice(body, decode_config())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    if used != body.len() {
        return Err(ProtocolError::TrailingBytes(body.len() - used));
    }
    Ok(value)
}

/// Protocol errors. Any of these ends the session that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Empty packet")]
    EmptyPacket,
    #[error("Unknown packet type {0}")]
    UnknownPacketType(u8),
    #[error("Too many commands in one packet: {0}")]
    TooManyCommands(usize),
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
    #[error("Unexpected {0:?} packet")]
    UnexpectedPacket(PacketType),
    #[error("Command {0} may only be issued by the server")]
    ForbiddenCommand(&'static str),
    #[error("Connection closed")]
    ConnectionClosed,
}

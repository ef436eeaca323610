//! Canonical server-side scene.
//!
//! The scene is the single authority that decides whether a client command
//! is accepted. It owns:
//!
//! ```text
//!   Scene
//!   ├── users          UserId -> name, selection colour
//!   ├── free_colors    pool of unused selection colours
//!   ├── ownership      resource forest + locks
//!   ├── registry       highest accepted index per creator
//!   └── sync data      creation units + latest mutations (snapshots)
//! ```
//!
//! `process_command` never fails on a legitimate but refused request: the
//! refusal becomes a denial or rejection command scoped to the requester.
//! Only commands a client may never send are protocol errors.

use std::collections::{BTreeMap, HashMap, VecDeque};

use thiserror::Error;
use uuid::Uuid;

use crate::command::{
    Color, Command, CommandBody, EntityCommand, RejectionReason, ResourceCommand, ResourceKind,
    ResourcesSelectionCommand, SelectionCommand, SyncSlot, Transformation, NAME_SIZE,
};
use crate::ids::{ResourceId, ResourceIdsRegistry, UserId, NO_RESOURCE, NO_USER};
use crate::ownership::{LockOutcome, OwnershipTable};
use crate::protocol::ProtocolError;

/// Lights a scene may hold at once.
pub const DEFAULT_MAX_LIGHTS: usize = 4;

/// Selection colours handed out to users, in order.
pub const USER_COLORS: [Color; 16] = [
    Color::rgba(255, 0, 0, 255),
    Color::rgba(0, 255, 0, 255),
    Color::rgba(0, 0, 255, 255),
    Color::rgba(255, 255, 0, 255),
    Color::rgba(255, 0, 255, 255),
    Color::rgba(0, 255, 255, 255),
    Color::rgba(255, 128, 0, 255),
    Color::rgba(128, 0, 255, 255),
    Color::rgba(0, 128, 255, 255),
    Color::rgba(255, 0, 128, 255),
    Color::rgba(128, 255, 0, 255),
    Color::rgba(0, 255, 128, 255),
    Color::rgba(128, 64, 0, 255),
    Color::rgba(64, 0, 128, 255),
    Color::rgba(0, 128, 64, 255),
    Color::rgba(128, 128, 128, 255),
];

/// Scene errors. Connection errors refuse a join; the others become
/// rejection commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("invalid user or resource name")]
    InvalidName,
    #[error("name {0:?} is already in use")]
    NameInUse(String),
    #[error("server is full")]
    ServerFull,
    #[error("resource id {0} already used or out of sequence")]
    DuplicateResourceId(ResourceId),
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),
    #[error("resource {0} is not owned by user {1}")]
    NotOwner(ResourceId, UserId),
    #[error("no room for another {0:?}")]
    CapacityExceeded(ResourceKind),
}

impl SceneError {
    pub fn rejection_reason(&self) -> RejectionReason {
        match self {
            Self::InvalidName | Self::NameInUse(_) => RejectionReason::InvalidName,
            Self::ServerFull | Self::CapacityExceeded(_) => RejectionReason::CapacityExceeded,
            Self::DuplicateResourceId(_) => RejectionReason::DuplicateResourceId,
            Self::UnknownResource(_) => RejectionReason::UnknownResource,
            Self::NotOwner(..) => RejectionReason::NotOwner,
        }
    }
}

/// A connected user as the scene knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub name: String,
    pub selection_color: Color,
}

impl UserRecord {
    pub fn connection_command(&self) -> Command {
        Command::user_connection(self.user_id, self.name.clone(), self.selection_color)
    }
}

/// A creation command and every resource it brought into existence.
#[derive(Debug)]
struct CreationUnit {
    command: Command,
    resources: Vec<ResourceId>,
}

/// Mutations needed to bring a freshly created resource up to date.
#[derive(Debug, Default)]
struct ResourceSyncData {
    /// Transformations are cumulative and kept in order.
    transformations: Vec<Command>,
    settings: Vec<(SyncSlot, Command)>,
}

impl ResourceSyncData {
    fn record(&mut self, command: Command) {
        let Some(slot) = command.sync_slot() else {
            self.transformations.push(command);
            return;
        };
        match self.settings.iter_mut().find(|(s, _)| *s == slot) {
            Some(entry) => entry.1 = command,
            None => self.settings.push((slot, command)),
        }
    }

    fn commands(&self) -> impl Iterator<Item = &Command> {
        self.transformations
            .iter()
            .chain(self.settings.iter().map(|(_, command)| command))
    }
}

pub fn validate_name(name: &str) -> Result<(), SceneError> {
    if name.is_empty() || name.len() > NAME_SIZE {
        return Err(SceneError::InvalidName);
    }
    Ok(())
}

pub struct Scene {
    id: Uuid,
    name: String,
    max_users: usize,
    max_lights: usize,
    users: BTreeMap<UserId, UserRecord>,
    next_user_id: UserId,
    free_colors: VecDeque<Color>,
    ownership: OwnershipTable,
    registry: ResourceIdsRegistry,
    units: BTreeMap<u64, CreationUnit>,
    unit_of: HashMap<ResourceId, u64>,
    next_unit: u64,
    sync: HashMap<ResourceId, ResourceSyncData>,
}

impl Scene {
    pub fn new(name: impl Into<String>, max_users: usize, max_lights: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            max_users,
            max_lights,
            users: BTreeMap::new(),
            next_user_id: NO_USER + 1,
            free_colors: USER_COLORS.iter().copied().collect(),
            ownership: OwnershipTable::new(),
            registry: ResourceIdsRegistry::new(),
            units: BTreeMap::new(),
            unit_of: HashMap::new(),
            next_unit: 0,
            sync: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_users(&self) -> usize {
        self.max_users
    }

    pub fn user(&self, user_id: UserId) -> Option<&UserRecord> {
        self.users.get(&user_id)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn ownership(&self) -> &OwnershipTable {
        &self.ownership
    }

    /// Admit a new user, or explain why not.
    pub fn connect_user(&mut self, name: &str) -> Result<UserRecord, SceneError> {
        validate_name(name)?;
        if self.users.len() >= self.max_users || self.next_user_id == UserId::MAX {
            return Err(SceneError::ServerFull);
        }
        if self.users.values().any(|user| user.name == name) {
            return Err(SceneError::NameInUse(name.to_string()));
        }
        let selection_color = self.free_colors.pop_front().ok_or(SceneError::ServerFull)?;

        let user_id = self.next_user_id;
        self.next_user_id += 1;
        let record = UserRecord {
            user_id,
            name: name.to_string(),
            selection_color,
        };
        self.users.insert(user_id, record.clone());
        log::info!("user {user_id} ({name}) joined scene {:?}", self.name);
        Ok(record)
    }

    /// Forget a user and release everything they held.
    ///
    /// Returns the `USER_DISCONNECTION` command to append, or `None` if the
    /// user was not connected.
    pub fn disconnect_user(&mut self, user_id: UserId) -> Option<Command> {
        let record = self.users.remove(&user_id)?;
        let released = self.ownership.release_user(user_id);
        self.free_colors.push_back(record.selection_color);
        log::info!(
            "user {user_id} ({}) left, {} resources released",
            record.name,
            released.len()
        );
        Some(Command::user_disconnection(user_id))
    }

    /// Validate one client command and return what to append to the historic.
    pub fn process_command(
        &mut self,
        user: UserId,
        mut command: Command,
    ) -> Result<Vec<Command>, ProtocolError> {
        if !self.users.contains_key(&user) {
            log::warn!("dropping {} from unknown user {user}", command.subtype_name());
            return Ok(Vec::new());
        }
        command.user_id = user;

        match command.body {
            CommandBody::User(_)
            | CommandBody::Resource(ResourceCommand::LockDenial { .. })
            | CommandBody::Resource(ResourceCommand::Rejection { .. }) => {
                return Err(ProtocolError::ForbiddenCommand(command.subtype_name()));
            }
            CommandBody::Resource(ResourceCommand::Lock { resource }) => {
                return Ok(match self.ownership.lock(resource, user) {
                    LockOutcome::Granted(_) => vec![command],
                    LockOutcome::Denied => vec![Command::lock_denial(user, resource)],
                });
            }
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Unlock) => {
                self.ownership.unlock_user(user);
                return Ok(vec![command]);
            }
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Deletion) => {
                self.delete_selection(user);
                return Ok(vec![command]);
            }
            CommandBody::Selection(SelectionCommand::Transformation { transformation }) => {
                self.record_selection_transformation(user, transformation);
                return Ok(vec![command]);
            }
            _ => {}
        }

        let outcome = if command.is_mutation() {
            self.apply_mutation(user, &command)
        } else {
            self.apply_creation(user, &command)
        };
        match outcome {
            Ok(()) => Ok(vec![command]),
            Err(err) => {
                log::debug!("user {user}: {} rejected: {err}", command.subtype_name());
                let resource = command
                    .targeted_resource()
                    .or_else(|| match command.created_resources() {
                        Ok(created) => created.first().map(|c| c.id),
                        Err(first) => Some(first),
                    })
                    .unwrap_or(NO_RESOURCE);
                Ok(vec![Command::rejection(user, resource, err.rejection_reason())])
            }
        }
    }

    fn apply_creation(&mut self, user: UserId, command: &Command) -> Result<(), SceneError> {
        if let Some(name) = command.name() {
            validate_name(name)?;
        }
        let created = command
            .created_resources()
            .map_err(SceneError::DuplicateResourceId)?;
        if created.is_empty() {
            return Ok(());
        }
        let ids: Vec<ResourceId> = created.iter().map(|c| c.id).collect();
        self.registry.check(user, &ids)?;

        // Children join their parent's selection, so a parent locked by
        // someone else cannot grow.
        for parent in created.iter().filter_map(|c| c.parent) {
            if ids.contains(&parent) {
                continue;
            }
            if !self.ownership.contains(parent) {
                return Err(SceneError::UnknownResource(parent));
            }
            if self.ownership.owner(parent).is_some_and(|owner| owner != user) {
                return Err(SceneError::NotOwner(parent, user));
            }
        }
        for referenced in command.referenced_resources() {
            if !self.ownership.contains(referenced) {
                return Err(SceneError::UnknownResource(referenced));
            }
        }
        let new_lights = created.iter().filter(|c| c.kind == ResourceKind::Light).count();
        if new_lights > 0 && self.ownership.count_of(ResourceKind::Light) + new_lights > self.max_lights {
            return Err(SceneError::CapacityExceeded(ResourceKind::Light));
        }

        self.registry.claim(user, &ids)?;
        for c in &created {
            self.ownership.insert(c.id, c.kind, c.parent)?;
        }
        let seq = self.next_unit;
        self.next_unit += 1;
        for id in &ids {
            self.unit_of.insert(*id, seq);
        }
        self.units.insert(
            seq,
            CreationUnit {
                command: command.clone(),
                resources: ids,
            },
        );
        Ok(())
    }

    fn apply_mutation(&mut self, user: UserId, command: &Command) -> Result<(), SceneError> {
        let Some(target) = command.targeted_resource() else {
            return Ok(());
        };
        if !self.ownership.contains(target) {
            return Err(SceneError::UnknownResource(target));
        }
        if !self.ownership.is_owned_by(target, user) {
            return Err(SceneError::NotOwner(target, user));
        }
        for referenced in command.referenced_resources() {
            if !self.ownership.contains(referenced) {
                return Err(SceneError::UnknownResource(referenced));
            }
        }
        self.sync.entry(target).or_default().record(command.clone());
        Ok(())
    }

    fn record_selection_transformation(&mut self, user: UserId, transformation: Transformation) {
        for entity in self.ownership.owned_by(user) {
            let is_entity = self
                .ownership
                .get(entity)
                .is_some_and(|record| record.kind.is_entity());
            if !is_entity {
                continue;
            }
            let per_entity = Command::new(
                user,
                CommandBody::Entity(EntityCommand::Transformation {
                    entity,
                    transformation,
                }),
            );
            self.sync.entry(entity).or_default().record(per_entity);
        }
    }

    fn delete_selection(&mut self, user: UserId) -> Vec<ResourceId> {
        let deleted = self.ownership.delete_user_selection(user);
        let mut touched = Vec::new();
        for id in &deleted {
            self.sync.remove(id);
            if let Some(seq) = self.unit_of.remove(id) {
                touched.push(seq);
            }
        }
        for seq in touched {
            let dead = self
                .units
                .get(&seq)
                .is_some_and(|unit| unit.resources.iter().all(|r| !self.ownership.contains(*r)));
            if dead {
                self.units.remove(&seq);
            }
        }
        deleted
    }

    /// Commands that rebuild the current scene on an empty client.
    ///
    /// Order: user connections, live creation units, deletion of resources a
    /// live unit created but which are gone since, latest mutations, locks.
    pub fn snapshot_commands(&self) -> Vec<Command> {
        let mut out: Vec<Command> = self.users.values().map(UserRecord::connection_command).collect();

        let mut dead = Vec::new();
        for unit in self.units.values() {
            out.push(unit.command.clone());
            dead.extend(
                unit.resources
                    .iter()
                    .filter(|id| !self.ownership.contains(**id))
                    .copied(),
            );
        }
        if !dead.is_empty() {
            out.extend(dead.iter().map(|id| Command::resource_lock(NO_USER, *id)));
            out.push(Command::selection_deletion(NO_USER));
        }

        for unit in self.units.values() {
            for id in &unit.resources {
                if let Some(sync) = self.sync.get(id) {
                    out.extend(sync.commands().cloned());
                }
            }
        }

        out.extend(
            self.ownership
                .owned()
                .map(|(id, owner)| Command::resource_lock(owner, id)),
        );
        out
    }
}

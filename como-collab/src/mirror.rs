//! Client-side mirror of the shared scene.
//!
//! The mirror only changes in response to commands coming back from the
//! server, so every client converges on the historic's total order. The one
//! optimistic piece of state is id reservation.
//!
//! ```text
//!   per kind:  Selections
//!              ├── by_user[1]  {(1,1) (1,2)}
//!              ├── by_user[4]  {(4,7)}
//!              └── non_selected {(1,5) (4,2) ...}
//! ```
//!
//! A resource sits in exactly one bucket of its kind. Moving it between two
//! users' selections happens under a single `&mut SceneMirror`, so there is
//! no pair of selection locks to order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tokio::sync::mpsc;

use crate::command::{
    CameraCommand, Color, Command, CommandBody, EntityCommand, GeometricPrimitiveCommand,
    LightCommand, LightType, MaterialColorComponent, MaterialCommand, MaterialInfo,
    PrimitiveCategoryCommand, PrimitiveCommand, PrimitiveShape, RejectionReason,
    ResourceCommand, ResourceKind, ResourcesSelectionCommand, SelectionCommand, TextureCommand,
    TextureWallCommand, TextureWallParameter, Transformation, UserCommand,
};
use crate::ids::{ResourceId, ResourceIdsGenerator, UserId, NO_USER};

/// Notifications for whoever renders or inspects the mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    ResourceAdded {
        id: ResourceId,
        kind: ResourceKind,
        parent: Option<ResourceId>,
    },
    ResourceRemoved {
        id: ResourceId,
        kind: ResourceKind,
    },
    OwnerChanged {
        id: ResourceId,
        kind: ResourceKind,
        previous: UserId,
        owner: UserId,
    },
    AttributesChanged {
        id: ResourceId,
    },
    UserConnected {
        user_id: UserId,
        name: String,
        selection_color: Color,
    },
    UserDisconnected {
        user_id: UserId,
    },
    /// A lock this client asked for went to someone else.
    LockDenied {
        resource: ResourceId,
    },
    /// The server refused one of this client's commands.
    Rejected {
        resource: ResourceId,
        reason: RejectionReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightAttributes {
    pub light_type: LightType,
    pub color: Color,
    pub ambient_coefficient: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    pub eye: [f32; 3],
    pub center: [f32; 3],
    pub up: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureWallAttributes {
    pub offset: [f32; 2],
    pub scale: [f32; 2],
    pub texture: Option<ResourceId>,
}

impl Default for TextureWallAttributes {
    fn default() -> Self {
        Self {
            offset: [0.0, 0.0],
            scale: [1.0, 1.0],
            texture: None,
        }
    }
}

/// Whatever the protocol tells us about a resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceAttributes {
    pub name: Option<String>,
    pub shape: Option<PrimitiveShape>,
    pub material: Option<MaterialInfo>,
    pub light: Option<LightAttributes>,
    pub camera_view: Option<CameraView>,
    pub texture_wall: Option<TextureWallAttributes>,
    /// Primitive a mesh was instantiated from
    pub source_primitive: Option<ResourceId>,
    /// Applied in order; composing them is left to the renderer.
    pub transformations: Vec<Transformation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// `NO_USER` while unowned
    pub owner: UserId,
    pub parent: Option<ResourceId>,
    pub children: Vec<ResourceId>,
    pub attributes: ResourceAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorUser {
    pub user_id: UserId,
    pub name: String,
    pub selection_color: Color,
}

/// Ownership buckets for one resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selections {
    by_user: BTreeMap<UserId, BTreeSet<ResourceId>>,
    non_selected: BTreeSet<ResourceId>,
}

impl Selections {
    fn bucket_mut(&mut self, owner: UserId) -> &mut BTreeSet<ResourceId> {
        if owner == NO_USER {
            &mut self.non_selected
        } else {
            self.by_user.entry(owner).or_default()
        }
    }

    fn insert(&mut self, id: ResourceId, owner: UserId) {
        self.bucket_mut(owner).insert(id);
    }

    fn remove(&mut self, id: ResourceId, owner: UserId) {
        if owner == NO_USER {
            self.non_selected.remove(&id);
        } else if let Some(set) = self.by_user.get_mut(&owner) {
            set.remove(&id);
            if set.is_empty() {
                self.by_user.remove(&owner);
            }
        }
    }

    fn move_resource(&mut self, id: ResourceId, from: UserId, to: UserId) {
        self.remove(id, from);
        self.insert(id, to);
    }

    pub fn of(&self, user: UserId) -> Option<&BTreeSet<ResourceId>> {
        if user == NO_USER {
            Some(&self.non_selected)
        } else {
            self.by_user.get(&user)
        }
    }

    pub fn non_selected(&self) -> &BTreeSet<ResourceId> {
        &self.non_selected
    }
}

/// The client's replica of the scene.
pub struct SceneMirror {
    local_user: UserId,
    generator: ResourceIdsGenerator,
    resources: BTreeMap<ResourceId, MirrorResource>,
    selections: BTreeMap<ResourceKind, Selections>,
    users: BTreeMap<UserId, MirrorUser>,
    pending_locks: VecDeque<ResourceId>,
    /// Marked by server-issued locks; owners are left untouched
    server_selection: BTreeSet<ResourceId>,
    subscribers: Vec<mpsc::UnboundedSender<SceneEvent>>,
}

impl SceneMirror {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            generator: ResourceIdsGenerator::new(local_user),
            resources: BTreeMap::new(),
            selections: ResourceKind::ALL
                .iter()
                .map(|kind| (*kind, Selections::default()))
                .collect(),
            users: BTreeMap::new(),
            pending_locks: VecDeque::new(),
            server_selection: BTreeSet::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SceneEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Reserve `count` ids for a local creation.
    pub fn reserve_resource_ids(&mut self, count: u32) -> ResourceId {
        self.generator.reserve_resource_ids(count)
    }

    /// Record a lock request and build the command that carries it.
    pub fn request_lock(&mut self, resource: ResourceId) -> Command {
        self.pending_locks.push_back(resource);
        Command::resource_lock(self.local_user, resource)
    }

    pub fn pending_locks(&self) -> &VecDeque<ResourceId> {
        &self.pending_locks
    }

    pub fn resource(&self, id: ResourceId) -> Option<&MirrorResource> {
        self.resources.get(&id)
    }

    pub fn resources(&self) -> &BTreeMap<ResourceId, MirrorResource> {
        &self.resources
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    pub fn owner(&self, id: ResourceId) -> Option<UserId> {
        self.resources
            .get(&id)
            .map(|r| r.owner)
            .filter(|owner| *owner != NO_USER)
    }

    pub fn count_of(&self, kind: ResourceKind) -> usize {
        self.resources.values().filter(|r| r.kind == kind).count()
    }

    pub fn users(&self) -> &BTreeMap<UserId, MirrorUser> {
        &self.users
    }

    pub fn user(&self, user_id: UserId) -> Option<&MirrorUser> {
        self.users.get(&user_id)
    }

    pub fn selections(&self, kind: ResourceKind) -> Option<&Selections> {
        self.selections.get(&kind)
    }

    /// Resources of `kind` owned by `user`.
    pub fn selection(&self, user: UserId, kind: ResourceKind) -> BTreeSet<ResourceId> {
        self.selections
            .get(&kind)
            .and_then(|s| s.of(user))
            .cloned()
            .unwrap_or_default()
    }

    pub fn local_selection(&self, kind: ResourceKind) -> BTreeSet<ResourceId> {
        self.selection(self.local_user, kind)
    }

    pub fn non_selected(&self, kind: ResourceKind) -> BTreeSet<ResourceId> {
        self.selection(NO_USER, kind)
    }

    /// Apply one command from the server.
    pub fn apply(&mut self, command: &Command) {
        let user = command.user_id;
        match &command.body {
            CommandBody::User(UserCommand::Connection {
                name,
                selection_color,
            }) => {
                self.users.insert(
                    user,
                    MirrorUser {
                        user_id: user,
                        name: name.clone(),
                        selection_color: *selection_color,
                    },
                );
                self.emit(SceneEvent::UserConnected {
                    user_id: user,
                    name: name.clone(),
                    selection_color: *selection_color,
                });
            }
            CommandBody::User(UserCommand::Disconnection) => {
                for id in self.owned_by(user) {
                    self.set_owner(id, NO_USER);
                }
                self.users.remove(&user);
                self.emit(SceneEvent::UserDisconnected { user_id: user });
            }
            CommandBody::Resource(ResourceCommand::Lock { resource }) if user == NO_USER => {
                let marked = self.subtree(*resource);
                self.server_selection.extend(marked);
            }
            CommandBody::Resource(ResourceCommand::Lock { resource }) => {
                if user == self.local_user {
                    self.match_lock_response(*resource);
                }
                for id in self.subtree(*resource) {
                    self.set_owner(id, user);
                }
            }
            CommandBody::Resource(ResourceCommand::LockDenial { resource }) => {
                if user == self.local_user {
                    self.match_lock_response(*resource);
                    self.emit(SceneEvent::LockDenied {
                        resource: *resource,
                    });
                }
            }
            CommandBody::Resource(ResourceCommand::Rejection { resource, reason }) => {
                if user == self.local_user {
                    log::warn!("server rejected command on {resource}: {reason:?}");
                    self.emit(SceneEvent::Rejected {
                        resource: *resource,
                        reason: *reason,
                    });
                }
            }
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Unlock) if user == NO_USER => {
                self.server_selection.clear();
            }
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Unlock) => {
                for id in self.owned_by(user) {
                    self.set_owner(id, NO_USER);
                }
            }
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Deletion) => {
                self.delete_selection(user);
            }
            CommandBody::Selection(SelectionCommand::Transformation { transformation }) => {
                for id in self.owned_by(user) {
                    let is_entity = self.resources.get(&id).is_some_and(|r| r.kind.is_entity());
                    if is_entity {
                        self.update(id, |a| a.transformations.push(*transformation));
                    }
                }
            }
            CommandBody::Entity(EntityCommand::Transformation {
                entity,
                transformation,
            }) => {
                self.update(*entity, |a| a.transformations.push(*transformation));
            }
            CommandBody::Material(MaterialCommand::ColorChange {
                material,
                component,
                color,
            }) => {
                self.update(*material, |a| {
                    let info = a.material.get_or_insert_with(MaterialInfo::default);
                    match component {
                        MaterialColorComponent::Ambient => info.ambient = *color,
                        MaterialColorComponent::Diffuse => info.diffuse = *color,
                        MaterialColorComponent::Specular => info.specular = *color,
                    }
                });
            }
            CommandBody::Material(MaterialCommand::ShininessChange {
                material,
                shininess,
            }) => {
                self.update(*material, |a| {
                    a.material.get_or_insert_with(MaterialInfo::default).shininess = *shininess;
                });
            }
            CommandBody::Light(LightCommand::ColorChange { light, color }) => {
                self.update(*light, |a| {
                    if let Some(attrs) = a.light.as_mut() {
                        attrs.color = *color;
                    }
                });
            }
            CommandBody::Light(LightCommand::AmbientCoefficientChange { light, coefficient }) => {
                self.update(*light, |a| {
                    if let Some(attrs) = a.light.as_mut() {
                        attrs.ambient_coefficient = *coefficient;
                    }
                });
            }
            CommandBody::Camera(CameraCommand::ViewChange {
                camera,
                eye,
                center,
                up,
            }) => {
                let view = CameraView {
                    eye: *eye,
                    center: *center,
                    up: *up,
                };
                self.update(*camera, |a| a.camera_view = Some(view));
            }
            CommandBody::TextureWall(TextureWallCommand::Modification {
                texture_wall,
                parameter,
                value,
            }) => {
                self.update(*texture_wall, |a| {
                    let wall = a.texture_wall.get_or_insert_with(TextureWallAttributes::default);
                    match parameter {
                        TextureWallParameter::OffsetX => wall.offset[0] = *value,
                        TextureWallParameter::OffsetY => wall.offset[1] = *value,
                        TextureWallParameter::ScaleX => wall.scale[0] = *value,
                        TextureWallParameter::ScaleY => wall.scale[1] = *value,
                    }
                });
            }
            CommandBody::TextureWall(TextureWallCommand::TextureChange {
                texture_wall,
                texture,
            }) => {
                self.update(*texture_wall, |a| {
                    a.texture_wall
                        .get_or_insert_with(TextureWallAttributes::default)
                        .texture = Some(*texture);
                });
            }
            CommandBody::Material(MaterialCommand::Creation { .. })
            | CommandBody::Light(LightCommand::Creation { .. })
            | CommandBody::Camera(CameraCommand::Creation { .. })
            | CommandBody::Texture(TextureCommand::Creation { .. })
            | CommandBody::GeometricPrimitive(GeometricPrimitiveCommand::Creation { .. })
            | CommandBody::Primitive(_)
            | CommandBody::PrimitiveCategory(PrimitiveCategoryCommand::Creation { .. }) => {
                self.apply_creation(command);
            }
        }
    }

    fn apply_creation(&mut self, command: &Command) {
        let created_resources = match command.created_resources() {
            Ok(created) => created,
            Err(first) => {
                log::warn!("creation block starting at {first} overflows, ignored");
                return;
            }
        };
        for created in created_resources {
            let mut attributes = ResourceAttributes {
                name: command.name().map(str::to_string),
                ..ResourceAttributes::default()
            };
            match (&command.body, created.kind) {
                (CommandBody::Material(MaterialCommand::Creation { info, .. }), _) => {
                    attributes.material = Some(info.clone());
                }
                (CommandBody::Light(LightCommand::Creation { light_type, color, .. }), _) => {
                    attributes.light = Some(LightAttributes {
                        light_type: *light_type,
                        color: *color,
                        ambient_coefficient: 0.0,
                    });
                }
                (
                    CommandBody::GeometricPrimitive(GeometricPrimitiveCommand::Creation { shape, .. }),
                    ResourceKind::Mesh,
                ) => {
                    attributes.shape = Some(*shape);
                }
                (
                    CommandBody::Primitive(PrimitiveCommand::Instantiation { primitive, .. }),
                    ResourceKind::Mesh,
                ) => {
                    attributes.source_primitive = Some(*primitive);
                }
                (_, ResourceKind::Material) => {
                    attributes.material = Some(MaterialInfo::default());
                }
                (_, ResourceKind::TextureWall) => {
                    attributes.texture_wall = Some(TextureWallAttributes::default());
                }
                _ => {}
            }
            self.insert(created.id, created.kind, created.parent, attributes);
        }
    }

    fn insert(
        &mut self,
        id: ResourceId,
        kind: ResourceKind,
        parent: Option<ResourceId>,
        attributes: ResourceAttributes,
    ) {
        if self.resources.contains_key(&id) {
            log::warn!("mirror already holds {id}, creation ignored");
            return;
        }
        // A child lands in its parent's selection.
        let mut owner = NO_USER;
        if let Some(parent_id) = parent {
            match self.resources.get_mut(&parent_id) {
                Some(p) => {
                    p.children.push(id);
                    owner = p.owner;
                }
                None => log::warn!("parent {parent_id} of {id} missing from mirror"),
            }
        }
        self.resources.insert(
            id,
            MirrorResource {
                id,
                kind,
                owner,
                parent,
                children: Vec::new(),
                attributes,
            },
        );
        self.selections.entry(kind).or_default().insert(id, owner);
        self.emit(SceneEvent::ResourceAdded { id, kind, parent });
    }

    fn update(&mut self, id: ResourceId, change: impl FnOnce(&mut ResourceAttributes)) {
        match self.resources.get_mut(&id) {
            Some(resource) => {
                change(&mut resource.attributes);
                self.emit(SceneEvent::AttributesChanged { id });
            }
            None => log::debug!("attribute change for unknown resource {id}"),
        }
    }

    /// Move one resource to `owner`'s bucket; `NO_USER` unselects it.
    fn set_owner(&mut self, id: ResourceId, owner: UserId) {
        let Some(resource) = self.resources.get_mut(&id) else {
            return;
        };
        let previous = resource.owner;
        if previous == owner {
            return;
        }
        resource.owner = owner;
        let kind = resource.kind;
        self.selections
            .entry(kind)
            .or_default()
            .move_resource(id, previous, owner);
        self.emit(SceneEvent::OwnerChanged {
            id,
            kind,
            previous,
            owner,
        });
    }

    fn match_lock_response(&mut self, resource: ResourceId) {
        match self.pending_locks.front() {
            Some(front) if *front == resource => {
                self.pending_locks.pop_front();
            }
            Some(front) => {
                log::warn!("lock response for {resource} while {front} is pending, ignored");
            }
            None => log::warn!("lock response for {resource} with no pending request"),
        }
    }

    fn owned_by(&self, user: UserId) -> Vec<ResourceId> {
        if user == NO_USER {
            return self.server_selection.iter().copied().collect();
        }
        self.resources
            .values()
            .filter(|r| r.owner == user)
            .map(|r| r.id)
            .collect()
    }

    fn subtree(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(resource) = self.resources.get(&current) else {
                continue;
            };
            out.push(current);
            stack.extend(resource.children.iter().rev().copied());
        }
        out
    }

    fn delete_selection(&mut self, user: UserId) {
        let roots = if user == NO_USER {
            std::mem::take(&mut self.server_selection).into_iter().collect()
        } else {
            self.owned_by(user)
        };
        let mut doomed = BTreeSet::new();
        let mut ordered = Vec::new();
        for root in roots {
            for id in self.subtree(root) {
                if doomed.insert(id) {
                    ordered.push(id);
                }
            }
        }
        for id in ordered {
            let Some(resource) = self.resources.remove(&id) else {
                continue;
            };
            if let Some(parent_id) = resource.parent {
                if !doomed.contains(&parent_id) {
                    if let Some(parent) = self.resources.get_mut(&parent_id) {
                        parent.children.retain(|child| *child != id);
                    }
                }
            }
            if let Some(selections) = self.selections.get_mut(&resource.kind) {
                selections.remove(id, resource.owner);
            }
            self.emit(SceneEvent::ResourceRemoved {
                id,
                kind: resource.kind,
            });
        }
    }

    fn emit(&mut self, event: SceneEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_with_materials(creator: UserId, n_materials: u8) -> Command {
        Command::new(
            creator,
            CommandBody::Primitive(PrimitiveCommand::Instantiation {
                primitive: ResourceId::new(NO_USER, 1),
                mesh: ResourceId::new(creator, 1),
                first_material: ResourceId::new(creator, 2),
                n_materials,
            }),
        )
    }

    fn light(creator: UserId, index: u32) -> Command {
        Command::new(
            creator,
            CommandBody::Light(LightCommand::Creation {
                light: ResourceId::new(creator, index),
                light_type: LightType::Directional,
                color: Color::WHITE,
            }),
        )
    }

    #[test]
    fn test_creation_lands_in_non_selected() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&mesh_with_materials(2, 3));

        assert_eq!(mirror.count_of(ResourceKind::Material), 3);
        assert_eq!(mirror.non_selected(ResourceKind::Mesh).len(), 1);
        assert_eq!(mirror.non_selected(ResourceKind::Material).len(), 3);
        let mesh = mirror.resource(ResourceId::new(2, 1)).unwrap();
        assert_eq!(mesh.children.len(), 3);
        assert_eq!(mesh.attributes.source_primitive, Some(ResourceId::new(NO_USER, 1)));
    }

    #[test]
    fn test_lock_moves_subtree_to_owner() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&mesh_with_materials(2, 3));
        mirror.apply(&Command::resource_lock(4, ResourceId::new(2, 1)));

        assert_eq!(mirror.selection(4, ResourceKind::Mesh).len(), 1);
        assert_eq!(mirror.selection(4, ResourceKind::Material).len(), 3);
        assert!(mirror.non_selected(ResourceKind::Material).is_empty());
        assert_eq!(mirror.owner(ResourceId::new(2, 3)), Some(4));
    }

    #[test]
    fn test_child_joins_parent_selection() {
        let mut mirror = SceneMirror::new(1);
        let mesh = ResourceId::new(2, 1);
        mirror.apply(&mesh_with_materials(2, 1));
        mirror.apply(&Command::resource_lock(2, mesh));
        mirror.apply(&Command::new(
            2,
            CommandBody::Material(MaterialCommand::Creation {
                material: ResourceId::new(2, 5),
                parent: mesh,
                info: MaterialInfo::default(),
            }),
        ));

        assert_eq!(mirror.owner(ResourceId::new(2, 5)), Some(2));
        assert_eq!(mirror.selection(2, ResourceKind::Material).len(), 2);
        assert!(mirror.non_selected(ResourceKind::Material).is_empty());

        mirror.apply(&Command::selection_deletion(2));
        assert_eq!(mirror.count_of(ResourceKind::Material), 0);
        assert!(!mirror.contains(mesh));
    }

    #[test]
    fn test_fifo_lock_matching() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&light(1, 1));
        mirror.apply(&light(1, 2));
        let a = ResourceId::new(1, 1);
        let b = ResourceId::new(1, 2);

        mirror.request_lock(a);
        mirror.request_lock(b);
        assert_eq!(mirror.pending_locks().len(), 2);

        mirror.apply(&Command::resource_lock(1, a));
        assert_eq!(mirror.pending_locks().front(), Some(&b));
        assert!(mirror.local_selection(ResourceKind::Light).contains(&a));

        mirror.apply(&Command::lock_denial(1, b));
        assert!(mirror.pending_locks().is_empty());
        assert!(!mirror.local_selection(ResourceKind::Light).contains(&b));
    }

    #[test]
    fn test_out_of_order_response_leaves_queue() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&light(1, 1));
        mirror.apply(&light(1, 2));
        mirror.request_lock(ResourceId::new(1, 1));

        mirror.apply(&Command::lock_denial(1, ResourceId::new(1, 2)));
        assert_eq!(mirror.pending_locks().len(), 1);
    }

    #[test]
    fn test_unlock_and_disconnect_release() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&Command::user_connection(4, "Dora", Color::WHITE));
        mirror.apply(&light(4, 1));
        mirror.apply(&light(4, 2));
        mirror.apply(&Command::resource_lock(4, ResourceId::new(4, 1)));
        mirror.apply(&Command::resource_lock(4, ResourceId::new(4, 2)));

        mirror.apply(&Command::selection_unlock(4));
        assert_eq!(mirror.non_selected(ResourceKind::Light).len(), 2);

        mirror.apply(&Command::resource_lock(4, ResourceId::new(4, 1)));
        mirror.apply(&Command::user_disconnection(4));
        assert_eq!(mirror.owner(ResourceId::new(4, 1)), None);
        assert!(mirror.user(4).is_none());
    }

    #[test]
    fn test_cascading_deletion() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&mesh_with_materials(2, 3));
        mirror.apply(&Command::resource_lock(2, ResourceId::new(2, 1)));
        mirror.apply(&Command::selection_deletion(2));

        assert!(mirror.resources().is_empty());
        assert!(mirror.selection(2, ResourceKind::Material).is_empty());
        assert!(mirror.non_selected(ResourceKind::Material).is_empty());
    }

    #[test]
    fn test_server_deletion_spares_other_unowned() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&mesh_with_materials(2, 3));
        mirror.apply(&light(1, 1));
        let material = ResourceId::new(2, 3);
        mirror.apply(&Command::resource_lock(NO_USER, material));
        mirror.apply(&Command::selection_deletion(NO_USER));

        assert!(!mirror.contains(material));
        assert!(mirror.contains(ResourceId::new(2, 1)));
        assert!(mirror.contains(ResourceId::new(1, 1)));
        assert_eq!(mirror.count_of(ResourceKind::Material), 2);
        assert_eq!(mirror.owner(ResourceId::new(2, 2)), None);
        assert!(mirror.non_selected(ResourceKind::Material).contains(&ResourceId::new(2, 2)));
        assert_eq!(
            mirror.resource(ResourceId::new(2, 1)).unwrap().children,
            vec![ResourceId::new(2, 2), ResourceId::new(2, 4)]
        );
    }

    #[test]
    fn test_attribute_changes() {
        let mut mirror = SceneMirror::new(1);
        mirror.apply(&Command::new(
            1,
            CommandBody::Material(MaterialCommand::Creation {
                material: ResourceId::new(1, 5),
                parent: ResourceId::new(9, 9),
                info: MaterialInfo::default(),
            }),
        ));
        let red = Color::rgba(255, 0, 0, 255);
        mirror.apply(&Command::new(
            1,
            CommandBody::Material(MaterialCommand::ColorChange {
                material: ResourceId::new(1, 5),
                component: MaterialColorComponent::Specular,
                color: red,
            }),
        ));
        let material = mirror.resource(ResourceId::new(1, 5)).unwrap();
        assert_eq!(material.attributes.material.as_ref().unwrap().specular, red);
    }

    #[tokio::test]
    async fn test_events() {
        let mut mirror = SceneMirror::new(1);
        let mut events = mirror.subscribe();
        mirror.apply(&light(1, 1));
        mirror.request_lock(ResourceId::new(1, 1));
        mirror.apply(&Command::lock_denial(1, ResourceId::new(1, 1)));

        assert_eq!(
            events.recv().await,
            Some(SceneEvent::ResourceAdded {
                id: ResourceId::new(1, 1),
                kind: ResourceKind::Light,
                parent: None,
            })
        );
        assert_eq!(
            events.recv().await,
            Some(SceneEvent::LockDenied {
                resource: ResourceId::new(1, 1)
            })
        );
    }

    #[test]
    fn test_reserve_ids_are_local() {
        let mut mirror = SceneMirror::new(3);
        assert_eq!(mirror.reserve_resource_ids(2), ResourceId::new(3, 1));
        assert_eq!(mirror.reserve_resource_ids(1), ResourceId::new(3, 3));
    }
}

//! Scene commands: the unit of replication.
//!
//! A command is an immutable record of one accepted state change. It is a
//! plain sum type over target categories, each with its own subtype enum:
//!
//! ```text
//! ┌──────────┬──────────────┬──────────┬──────────────────────┐
//! │ user_id  │ target (u8)  │ subtype  │ payload              │
//! │ varint   │ category tag │ u8 tag   │ subtype-specific     │
//! └──────────┴──────────────┴──────────┴──────────────────────┘
//! ```
//!
//! Commands are bincode-encoded back to back inside a SceneUpdate packet;
//! each one self-describes its size, so no length table is needed.

use serde::{Deserialize, Serialize};

use crate::ids::{ResourceId, UserId};
use crate::protocol::{decode_config, ProtocolError};

/// Maximum length in bytes of user and resource names.
pub const NAME_SIZE: usize = 64;

/// Command categories, in wire tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandTarget {
    User = 0,
    Resource = 1,
    ResourcesSelection = 2,
    Entity = 3,
    Material = 4,
    Light = 5,
    Camera = 6,
    Texture = 7,
    TextureWall = 8,
    GeometricPrimitive = 9,
    Primitive = 10,
    PrimitiveCategory = 11,
    Selection = 12,
}

/// Kinds of shared, lockable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Mesh,
    Material,
    Light,
    Camera,
    Texture,
    TextureWall,
    Primitive,
    PrimitiveCategory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Mesh,
        ResourceKind::Material,
        ResourceKind::Light,
        ResourceKind::Camera,
        ResourceKind::Texture,
        ResourceKind::TextureWall,
        ResourceKind::Primitive,
        ResourceKind::PrimitiveCategory,
    ];

    /// Entities can be transformed in space.
    pub fn is_entity(&self) -> bool {
        matches!(self, Self::Mesh | Self::Light | Self::Camera)
    }
}

/// RGBA color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(&self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Spatial transformation applied to an entity or a whole selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transformation {
    Translation([f32; 3]),
    Rotation { angle: f32, axis: [f32; 3] },
    Scale([f32; 3]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaterialColorComponent {
    Ambient,
    Diffuse,
    Specular,
}

/// Material description carried by creation commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialInfo {
    pub name: String,
    pub ambient: Color,
    pub diffuse: Color,
    pub specular: Color,
    pub shininess: f32,
}

impl Default for MaterialInfo {
    fn default() -> Self {
        Self {
            name: "Material".to_string(),
            ambient: Color::rgba(50, 50, 50, 255),
            diffuse: Color::rgba(200, 200, 200, 255),
            specular: Color::WHITE,
            shininess: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightType {
    Directional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureWallParameter {
    OffsetX,
    OffsetY,
    ScaleX,
    ScaleY,
}

/// Shape parameters of a system-generated primitive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveShape {
    Cube { width: f32, height: f32, depth: f32 },
    Cone { height: f32, radius: f32, n_base_vertices: u16 },
    Cylinder { height: f32, radius: f32, n_rims: u16, n_base_vertices: u16 },
    Sphere { radius: f32, n_divisions: u16 },
}

impl PrimitiveShape {
    /// Number of texture walls created together with the mesh.
    pub fn n_texture_walls(&self) -> u32 {
        match self {
            Self::Cube { .. } => 6,
            Self::Cone { .. } => 2,
            Self::Cylinder { .. } => 3,
            Self::Sphere { .. } => 1,
        }
    }
}

/// Why the server refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    DuplicateResourceId,
    UnknownResource,
    NotOwner,
    CapacityExceeded,
    InvalidName,
}

// ───────────────────────────────────────────────────────────────────
// Per-category subtypes
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserCommand {
    Connection { name: String, selection_color: Color },
    Disconnection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceCommand {
    /// Request from a client; echoed to everyone once granted.
    Lock { resource: ResourceId },
    /// Denial, only delivered to the requester.
    LockDenial { resource: ResourceId },
    /// Refusal of a creation or mutation, only delivered to its author.
    Rejection { resource: ResourceId, reason: RejectionReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourcesSelectionCommand {
    Unlock,
    Deletion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityCommand {
    Transformation { entity: ResourceId, transformation: Transformation },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MaterialCommand {
    Creation { material: ResourceId, parent: ResourceId, info: MaterialInfo },
    ColorChange { material: ResourceId, component: MaterialColorComponent, color: Color },
    ShininessChange { material: ResourceId, shininess: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LightCommand {
    Creation { light: ResourceId, light_type: LightType, color: Color },
    ColorChange { light: ResourceId, color: Color },
    AmbientCoefficientChange { light: ResourceId, coefficient: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CameraCommand {
    Creation { camera: ResourceId, name: String },
    ViewChange { camera: ResourceId, eye: [f32; 3], center: [f32; 3], up: [f32; 3] },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextureCommand {
    Creation { texture: ResourceId, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextureWallCommand {
    Modification { texture_wall: ResourceId, parameter: TextureWallParameter, value: f32 },
    TextureChange { texture_wall: ResourceId, texture: ResourceId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeometricPrimitiveCommand {
    /// Creates a mesh, its material and its texture walls as one unit.
    Creation {
        mesh: ResourceId,
        material: ResourceId,
        first_texture_wall: ResourceId,
        shape: PrimitiveShape,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveCommand {
    Import { primitive: ResourceId, category: ResourceId, name: String },
    Instantiation {
        primitive: ResourceId,
        mesh: ResourceId,
        first_material: ResourceId,
        n_materials: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveCategoryCommand {
    Creation { category: ResourceId, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectionCommand {
    Transformation { transformation: Transformation },
}

/// Category-tagged command payload. Variant order is the wire tag order of
/// [`CommandTarget`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandBody {
    User(UserCommand),
    Resource(ResourceCommand),
    ResourcesSelection(ResourcesSelectionCommand),
    Entity(EntityCommand),
    Material(MaterialCommand),
    Light(LightCommand),
    Camera(CameraCommand),
    Texture(TextureCommand),
    TextureWall(TextureWallCommand),
    GeometricPrimitive(GeometricPrimitiveCommand),
    Primitive(PrimitiveCommand),
    PrimitiveCategory(PrimitiveCategoryCommand),
    Selection(SelectionCommand),
}

/// A resource brought into existence by a creation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub parent: Option<ResourceId>,
}

/// Slot under which a "set"-style command supersedes earlier ones when
/// compacting per-resource sync data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncSlot {
    MaterialColor(MaterialColorComponent),
    MaterialShininess,
    LightColor,
    LightAmbientCoefficient,
    CameraView,
    TextureWallParameter(TextureWallParameter),
    TextureWallTexture,
}

/// One scene command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// User who performed the command (`NO_USER` for the server).
    pub user_id: UserId,
    pub body: CommandBody,
}

impl Command {
    pub fn new(user_id: UserId, body: CommandBody) -> Self {
        Self { user_id, body }
    }

    pub fn user_connection(user_id: UserId, name: impl Into<String>, selection_color: Color) -> Self {
        Self::new(
            user_id,
            CommandBody::User(UserCommand::Connection {
                name: name.into(),
                selection_color,
            }),
        )
    }

    pub fn user_disconnection(user_id: UserId) -> Self {
        Self::new(user_id, CommandBody::User(UserCommand::Disconnection))
    }

    pub fn resource_lock(user_id: UserId, resource: ResourceId) -> Self {
        Self::new(user_id, CommandBody::Resource(ResourceCommand::Lock { resource }))
    }

    pub fn lock_denial(user_id: UserId, resource: ResourceId) -> Self {
        Self::new(user_id, CommandBody::Resource(ResourceCommand::LockDenial { resource }))
    }

    pub fn rejection(user_id: UserId, resource: ResourceId, reason: RejectionReason) -> Self {
        Self::new(
            user_id,
            CommandBody::Resource(ResourceCommand::Rejection { resource, reason }),
        )
    }

    pub fn selection_unlock(user_id: UserId) -> Self {
        Self::new(
            user_id,
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Unlock),
        )
    }

    pub fn selection_deletion(user_id: UserId) -> Self {
        Self::new(
            user_id,
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Deletion),
        )
    }

    pub fn target(&self) -> CommandTarget {
        match &self.body {
            CommandBody::User(_) => CommandTarget::User,
            CommandBody::Resource(_) => CommandTarget::Resource,
            CommandBody::ResourcesSelection(_) => CommandTarget::ResourcesSelection,
            CommandBody::Entity(_) => CommandTarget::Entity,
            CommandBody::Material(_) => CommandTarget::Material,
            CommandBody::Light(_) => CommandTarget::Light,
            CommandBody::Camera(_) => CommandTarget::Camera,
            CommandBody::Texture(_) => CommandTarget::Texture,
            CommandBody::TextureWall(_) => CommandTarget::TextureWall,
            CommandBody::GeometricPrimitive(_) => CommandTarget::GeometricPrimitive,
            CommandBody::Primitive(_) => CommandTarget::Primitive,
            CommandBody::PrimitiveCategory(_) => CommandTarget::PrimitiveCategory,
            CommandBody::Selection(_) => CommandTarget::Selection,
        }
    }

    /// Human readable subtype, for logs.
    pub fn subtype_name(&self) -> &'static str {
        match &self.body {
            CommandBody::User(UserCommand::Connection { .. }) => "USER_CONNECTION",
            CommandBody::User(UserCommand::Disconnection) => "USER_DISCONNECTION",
            CommandBody::Resource(ResourceCommand::Lock { .. }) => "RESOURCE_LOCK",
            CommandBody::Resource(ResourceCommand::LockDenial { .. }) => "RESOURCE_LOCK_DENIAL",
            CommandBody::Resource(ResourceCommand::Rejection { .. }) => "RESOURCE_REJECTION",
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Unlock) => "SELECTION_UNLOCK",
            CommandBody::ResourcesSelection(ResourcesSelectionCommand::Deletion) => "SELECTION_DELETION",
            CommandBody::Entity(_) => "ENTITY_TRANSFORMATION",
            CommandBody::Material(MaterialCommand::Creation { .. }) => "MATERIAL_CREATION",
            CommandBody::Material(MaterialCommand::ColorChange { .. }) => "MATERIAL_COLOR_CHANGE",
            CommandBody::Material(MaterialCommand::ShininessChange { .. }) => "MATERIAL_SHININESS_CHANGE",
            CommandBody::Light(LightCommand::Creation { .. }) => "LIGHT_CREATION",
            CommandBody::Light(LightCommand::ColorChange { .. }) => "LIGHT_COLOR_CHANGE",
            CommandBody::Light(LightCommand::AmbientCoefficientChange { .. }) => {
                "LIGHT_AMBIENT_COEFFICIENT_CHANGE"
            }
            CommandBody::Camera(CameraCommand::Creation { .. }) => "CAMERA_CREATION",
            CommandBody::Camera(CameraCommand::ViewChange { .. }) => "CAMERA_VIEW_CHANGE",
            CommandBody::Texture(_) => "TEXTURE_CREATION",
            CommandBody::TextureWall(TextureWallCommand::Modification { .. }) => "TEXTURE_WALL_MODIFICATION",
            CommandBody::TextureWall(TextureWallCommand::TextureChange { .. }) => "TEXTURE_WALL_TEXTURE_CHANGE",
            CommandBody::GeometricPrimitive(_) => "GEOMETRIC_PRIMITIVE_CREATION",
            CommandBody::Primitive(PrimitiveCommand::Import { .. }) => "PRIMITIVE_IMPORT",
            CommandBody::Primitive(PrimitiveCommand::Instantiation { .. }) => "PRIMITIVE_INSTANTIATION",
            CommandBody::PrimitiveCategory(_) => "PRIMITIVE_CATEGORY_CREATION",
            CommandBody::Selection(_) => "SELECTION_TRANSFORMATION",
        }
    }

    /// Resources this command brings into existence, parents first.
    ///
    /// Fails with the first id of a block whose indices would run past
    /// `u32::MAX`.
    pub fn created_resources(&self) -> Result<Vec<CreatedResource>, ResourceId> {
        let created = |id, kind, parent| CreatedResource { id, kind, parent };
        let block = |first: ResourceId, count: u32, kind, parent| {
            (0..count)
                .map(|n| first.checked_offset(n).map(|id| created(id, kind, parent)))
                .collect::<Option<Vec<_>>>()
                .ok_or(first)
        };
        let resources = match &self.body {
            CommandBody::Material(MaterialCommand::Creation { material, parent, .. }) => {
                vec![created(*material, ResourceKind::Material, Some(*parent))]
            }
            CommandBody::Light(LightCommand::Creation { light, .. }) => {
                vec![created(*light, ResourceKind::Light, None)]
            }
            CommandBody::Camera(CameraCommand::Creation { camera, .. }) => {
                vec![created(*camera, ResourceKind::Camera, None)]
            }
            CommandBody::Texture(TextureCommand::Creation { texture, .. }) => {
                vec![created(*texture, ResourceKind::Texture, None)]
            }
            CommandBody::GeometricPrimitive(GeometricPrimitiveCommand::Creation {
                mesh,
                material,
                first_texture_wall,
                shape,
            }) => {
                let mut out = vec![
                    created(*mesh, ResourceKind::Mesh, None),
                    created(*material, ResourceKind::Material, Some(*mesh)),
                ];
                out.extend(block(
                    *first_texture_wall,
                    shape.n_texture_walls(),
                    ResourceKind::TextureWall,
                    Some(*mesh),
                )?);
                out
            }
            CommandBody::Primitive(PrimitiveCommand::Import { primitive, category, .. }) => {
                vec![created(*primitive, ResourceKind::Primitive, Some(*category))]
            }
            CommandBody::Primitive(PrimitiveCommand::Instantiation {
                mesh,
                first_material,
                n_materials,
                ..
            }) => {
                let mut out = vec![created(*mesh, ResourceKind::Mesh, None)];
                out.extend(block(
                    *first_material,
                    u32::from(*n_materials),
                    ResourceKind::Material,
                    Some(*mesh),
                )?);
                out
            }
            CommandBody::PrimitiveCategory(PrimitiveCategoryCommand::Creation { category, .. }) => {
                vec![created(*category, ResourceKind::PrimitiveCategory, None)]
            }
            _ => Vec::new(),
        };
        Ok(resources)
    }

    /// Pre-existing resources a command depends on, besides parents and
    /// its target.
    pub fn referenced_resources(&self) -> Vec<ResourceId> {
        match &self.body {
            CommandBody::Primitive(PrimitiveCommand::Instantiation { primitive, .. }) => vec![*primitive],
            CommandBody::TextureWall(TextureWallCommand::TextureChange { texture, .. }) => vec![*texture],
            _ => Vec::new(),
        }
    }

    /// The single existing resource a mutation or resource command acts on.
    pub fn targeted_resource(&self) -> Option<ResourceId> {
        match &self.body {
            CommandBody::Resource(ResourceCommand::Lock { resource })
            | CommandBody::Resource(ResourceCommand::LockDenial { resource })
            | CommandBody::Resource(ResourceCommand::Rejection { resource, .. }) => Some(*resource),
            CommandBody::Entity(EntityCommand::Transformation { entity, .. }) => Some(*entity),
            CommandBody::Material(MaterialCommand::ColorChange { material, .. })
            | CommandBody::Material(MaterialCommand::ShininessChange { material, .. }) => Some(*material),
            CommandBody::Light(LightCommand::ColorChange { light, .. })
            | CommandBody::Light(LightCommand::AmbientCoefficientChange { light, .. }) => Some(*light),
            CommandBody::Camera(CameraCommand::ViewChange { camera, .. }) => Some(*camera),
            CommandBody::TextureWall(TextureWallCommand::Modification { texture_wall, .. })
            | CommandBody::TextureWall(TextureWallCommand::TextureChange { texture_wall, .. }) => {
                Some(*texture_wall)
            }
            _ => None,
        }
    }

    /// Whether this command mutates an existing, owned resource.
    pub fn is_mutation(&self) -> bool {
        !matches!(self.body, CommandBody::Resource(_)) && self.targeted_resource().is_some()
    }

    /// Response commands are only delivered to the user they answer.
    pub fn response_scope(&self) -> Option<UserId> {
        match &self.body {
            CommandBody::Resource(ResourceCommand::LockDenial { .. })
            | CommandBody::Resource(ResourceCommand::Rejection { .. }) => Some(self.user_id),
            _ => None,
        }
    }

    /// Names carried by the command, subject to `NAME_SIZE`.
    pub fn name(&self) -> Option<&str> {
        match &self.body {
            CommandBody::User(UserCommand::Connection { name, .. })
            | CommandBody::Camera(CameraCommand::Creation { name, .. })
            | CommandBody::Texture(TextureCommand::Creation { name, .. })
            | CommandBody::Primitive(PrimitiveCommand::Import { name, .. })
            | CommandBody::PrimitiveCategory(PrimitiveCategoryCommand::Creation { name, .. }) => {
                Some(name)
            }
            CommandBody::Material(MaterialCommand::Creation { info, .. }) => Some(&info.name),
            _ => None,
        }
    }

    /// Slot a "set"-style mutation occupies; `None` for cumulative ones.
    pub fn sync_slot(&self) -> Option<SyncSlot> {
        match &self.body {
            CommandBody::Material(MaterialCommand::ColorChange { component, .. }) => {
                Some(SyncSlot::MaterialColor(*component))
            }
            CommandBody::Material(MaterialCommand::ShininessChange { .. }) => Some(SyncSlot::MaterialShininess),
            CommandBody::Light(LightCommand::ColorChange { .. }) => Some(SyncSlot::LightColor),
            CommandBody::Light(LightCommand::AmbientCoefficientChange { .. }) => {
                Some(SyncSlot::LightAmbientCoefficient)
            }
            CommandBody::Camera(CameraCommand::ViewChange { .. }) => Some(SyncSlot::CameraView),
            CommandBody::TextureWall(TextureWallCommand::Modification { parameter, .. }) => {
                Some(SyncSlot::TextureWallParameter(*parameter))
            }
            CommandBody::TextureWall(TextureWallCommand::TextureChange { .. }) => {
                Some(SyncSlot::TextureWallTexture)
            }
            _ => None,
        }
    }

    /// Append this command's wire form to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<usize, ProtocolError> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        buffer.extend_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Decode one command from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn decode_from(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        bincode::serde::decode_from_slice(bytes, decode_config())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Size of this command on the wire.
    pub fn packet_size(&self) -> Result<usize, ProtocolError> {
        let mut scratch = Vec::new();
        self.encode_into(&mut scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ResourceId;

    fn cube(user: UserId) -> Command {
        Command::new(
            user,
            CommandBody::GeometricPrimitive(GeometricPrimitiveCommand::Creation {
                mesh: ResourceId::new(user, 1),
                material: ResourceId::new(user, 2),
                first_texture_wall: ResourceId::new(user, 3),
                shape: PrimitiveShape::Cube { width: 1.0, height: 1.0, depth: 1.0 },
            }),
        )
    }

    #[test]
    fn test_target_tag_order() {
        assert_eq!(CommandTarget::User as u8, 0);
        assert_eq!(CommandTarget::Resource as u8, 1);
        assert_eq!(CommandTarget::ResourcesSelection as u8, 2);
        assert_eq!(CommandTarget::Selection as u8, 12);
    }

    #[test]
    fn test_category_byte_leads_the_body() {
        // user_id 3 fits a single varint byte, so the category tag follows it.
        let cmd = Command::resource_lock(3, ResourceId::new(1, 1));
        let mut buf = Vec::new();
        cmd.encode_into(&mut buf).unwrap();
        assert_eq!(buf[0], 3);
        assert_eq!(buf[1], CommandTarget::Resource as u8);
        assert_eq!(buf[2], 0); // Lock subtype

        let denial = Command::lock_denial(3, ResourceId::new(1, 1));
        let mut buf = Vec::new();
        denial.encode_into(&mut buf).unwrap();
        assert_eq!(buf[2], 1);
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let a = cube(2);
        let b = Command::selection_unlock(2);
        let mut buf = Vec::new();
        let size_a = a.encode_into(&mut buf).unwrap();
        b.encode_into(&mut buf).unwrap();

        let (decoded_a, used) = Command::decode_from(&buf).unwrap();
        assert_eq!(used, size_a);
        assert_eq!(decoded_a, a);
        let (decoded_b, _) = Command::decode_from(&buf[used..]).unwrap();
        assert_eq!(decoded_b, b);
        assert_eq!(a.packet_size().unwrap(), size_a);
    }

    #[test]
    fn test_unknown_category_fails_to_decode() {
        let garbage = [1u8, 200, 0, 0];
        assert!(Command::decode_from(&garbage).is_err());
    }

    #[test]
    fn test_decode_rejects_huge_name_length() {
        let mut buf = Vec::new();
        Command::user_connection(1, "Zed", Color::WHITE).encode_into(&mut buf).unwrap();
        let name_at = buf
            .windows(4)
            .position(|w| w == [3, b'Z', b'e', b'd'])
            .unwrap();
        buf.truncate(name_at);
        buf.push(253);
        buf.extend_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(
            Command::decode_from(&buf),
            Err(ProtocolError::DeserializationError(_))
        ));
    }

    #[test]
    fn test_texture_walls_past_index_space() {
        let cmd = Command::new(
            1,
            CommandBody::GeometricPrimitive(GeometricPrimitiveCommand::Creation {
                mesh: ResourceId::new(1, 1),
                material: ResourceId::new(1, 2),
                first_texture_wall: ResourceId::new(1, u32::MAX),
                shape: PrimitiveShape::Cube { width: 1.0, height: 1.0, depth: 1.0 },
            }),
        );
        assert_eq!(cmd.created_resources(), Err(ResourceId::new(1, u32::MAX)));
    }

    #[test]
    fn test_geometric_primitive_creates_unit() {
        let created = cube(2).created_resources().unwrap();
        // mesh + material + 6 walls
        assert_eq!(created.len(), 8);
        assert_eq!(created[0].kind, ResourceKind::Mesh);
        assert_eq!(created[0].parent, None);
        assert!(created[1..]
            .iter()
            .all(|c| c.parent == Some(ResourceId::new(2, 1))));
        assert_eq!(created[7].id, ResourceId::new(2, 8));
    }

    #[test]
    fn test_instantiation_materials_are_children() {
        let cmd = Command::new(
            5,
            CommandBody::Primitive(PrimitiveCommand::Instantiation {
                primitive: ResourceId::new(0, 4),
                mesh: ResourceId::new(5, 10),
                first_material: ResourceId::new(5, 11),
                n_materials: 3,
            }),
        );
        let created = cmd.created_resources().unwrap();
        assert_eq!(created.len(), 4);
        assert_eq!(created[3].id, ResourceId::new(5, 13));
        assert_eq!(cmd.referenced_resources(), vec![ResourceId::new(0, 4)]);
    }

    #[test]
    fn test_response_scope() {
        assert_eq!(Command::lock_denial(4, ResourceId::new(1, 1)).response_scope(), Some(4));
        assert_eq!(
            Command::rejection(4, ResourceId::new(4, 1), RejectionReason::NotOwner).response_scope(),
            Some(4)
        );
        assert_eq!(Command::resource_lock(4, ResourceId::new(1, 1)).response_scope(), None);
    }

    #[test]
    fn test_mutation_classification() {
        let color = Command::new(
            1,
            CommandBody::Light(LightCommand::ColorChange {
                light: ResourceId::new(1, 1),
                color: Color::WHITE,
            }),
        );
        assert!(color.is_mutation());
        assert_eq!(color.sync_slot(), Some(SyncSlot::LightColor));
        assert!(!Command::resource_lock(1, ResourceId::new(1, 1)).is_mutation());
        assert!(!cube(1).is_mutation());

        let move_entity = Command::new(
            1,
            CommandBody::Entity(EntityCommand::Transformation {
                entity: ResourceId::new(1, 1),
                transformation: Transformation::Translation([1.0, 0.0, 0.0]),
            }),
        );
        assert!(move_entity.is_mutation());
        assert_eq!(move_entity.sync_slot(), None);
    }

    #[test]
    fn test_names() {
        let cmd = Command::user_connection(1, "Alice", Color::WHITE);
        assert_eq!(cmd.name(), Some("Alice"));
        assert_eq!(cmd.subtype_name(), "USER_CONNECTION");
        assert_eq!(Command::selection_deletion(1).name(), None);
    }
}

//! Randomised convergence tests.
//!
//! Drives the authoritative scene with seeded random command streams from
//! several users and checks that every replica built from its output, live
//! or from a snapshot, matches the server's resource tree and lock table.

use std::collections::{BTreeMap, BTreeSet};

use como_collab::command::{
    Color, Command, CommandBody, GeometricPrimitiveCommand, LightCommand, LightType,
    MaterialCommand, MaterialInfo, PrimitiveCategoryCommand, PrimitiveCommand, PrimitiveShape,
    ResourceKind,
};
use como_collab::ids::{ResourceId, ResourceIdsGenerator, UserId, NO_USER};
use como_collab::mirror::SceneMirror;
use como_collab::scene::Scene;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const USERS: usize = 3;
const STEPS: usize = 300;
const CHECKPOINT_EVERY: usize = 40;
const OBSERVER: UserId = 200;

struct Simulation {
    rng: StdRng,
    scene: Scene,
    users: Vec<UserId>,
    generators: BTreeMap<UserId, ResourceIdsGenerator>,
    live: SceneMirror,
    late_joiners: Vec<SceneMirror>,
    historic: Vec<Command>,
}

impl Simulation {
    fn new(seed: u64) -> Self {
        let mut scene = Scene::new("Random scene", 8, 6);
        let mut live = SceneMirror::new(OBSERVER);
        let mut users = Vec::new();
        let mut generators = BTreeMap::new();
        let mut historic = Vec::new();
        for i in 0..USERS {
            let record = scene.connect_user(&format!("user{i}")).unwrap();
            live.apply(&record.connection_command());
            historic.push(record.connection_command());
            generators.insert(record.user_id, ResourceIdsGenerator::new(record.user_id));
            users.push(record.user_id);
        }
        Self {
            rng: StdRng::seed_from_u64(seed),
            scene,
            users,
            generators,
            live,
            late_joiners: Vec::new(),
            historic,
        }
    }

    fn pick(&mut self, kinds: &[ResourceKind]) -> Option<ResourceId> {
        let candidates: Vec<ResourceId> = self
            .live
            .resources()
            .values()
            .filter(|r| kinds.is_empty() || kinds.contains(&r.kind))
            .map(|r| r.id)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.gen_range(0..candidates.len())])
    }

    fn reserve(&mut self, user: UserId, count: u32) -> ResourceId {
        self.generators
            .get_mut(&user)
            .unwrap()
            .reserve_resource_ids(count)
    }

    fn random_command(&mut self, user: UserId) -> Option<Command> {
        let body = match self.rng.gen_range(0..100) {
            0..=14 => {
                let shape = match self.rng.gen_range(0..4) {
                    0 => PrimitiveShape::Cube { width: 1.0, height: 1.0, depth: 1.0 },
                    1 => PrimitiveShape::Cone { height: 1.0, radius: 0.5, n_base_vertices: 8 },
                    2 => PrimitiveShape::Cylinder {
                        height: 1.0,
                        radius: 0.5,
                        n_rims: 2,
                        n_base_vertices: 8,
                    },
                    _ => PrimitiveShape::Sphere { radius: 1.0, n_divisions: 8 },
                };
                let mesh = self.reserve(user, 2 + shape.n_texture_walls());
                CommandBody::GeometricPrimitive(GeometricPrimitiveCommand::Creation {
                    mesh,
                    material: mesh.offset(1),
                    first_texture_wall: mesh.offset(2),
                    shape,
                })
            }
            15..=22 => {
                let light = self.reserve(user, 1);
                CommandBody::Light(LightCommand::Creation {
                    light,
                    light_type: LightType::Directional,
                    color: Color::WHITE,
                })
            }
            23..=32 => {
                let parent = self.pick(&[ResourceKind::Mesh])?;
                let material = self.reserve(user, 1);
                CommandBody::Material(MaterialCommand::Creation {
                    material,
                    parent,
                    info: MaterialInfo::default(),
                })
            }
            33..=36 => {
                let category = self.reserve(user, 1);
                CommandBody::PrimitiveCategory(PrimitiveCategoryCommand::Creation {
                    category,
                    name: format!("Category {}", category.index),
                })
            }
            37..=41 => {
                let category = self.pick(&[ResourceKind::PrimitiveCategory])?;
                let primitive = self.reserve(user, 1);
                CommandBody::Primitive(PrimitiveCommand::Import {
                    primitive,
                    category,
                    name: format!("Primitive {}", primitive.index),
                })
            }
            42..=46 => {
                let primitive = self.pick(&[ResourceKind::Primitive])?;
                let n_materials = self.rng.gen_range(0..4u8);
                let mesh = self.reserve(user, 1 + u32::from(n_materials));
                CommandBody::Primitive(PrimitiveCommand::Instantiation {
                    primitive,
                    mesh,
                    first_material: mesh.offset(1),
                    n_materials,
                })
            }
            47..=49 => {
                // Index taken from the scene, usually already claimed.
                let stale = self.pick(&[])?;
                CommandBody::Light(LightCommand::Creation {
                    light: ResourceId::new(user, stale.index),
                    light_type: LightType::Directional,
                    color: Color::WHITE,
                })
            }
            50..=79 => {
                let target = self.pick(&[])?;
                return Some(Command::resource_lock(user, target));
            }
            80..=91 => return Some(Command::selection_unlock(user)),
            _ => return Some(Command::selection_deletion(user)),
        };
        Some(Command::new(user, body))
    }

    fn step(&mut self) {
        let user = self.users[self.rng.gen_range(0..self.users.len())];
        let Some(command) = self.random_command(user) else {
            return;
        };
        let out = self.scene.process_command(user, command).unwrap();
        for command in &out {
            self.live.apply(command);
            for joiner in &mut self.late_joiners {
                joiner.apply(command);
            }
        }
        self.historic.extend(out);
    }

    /// A client that joined before anything was pruned replays it all.
    fn replay_all(&self) -> SceneMirror {
        let mut mirror = SceneMirror::new(OBSERVER);
        for command in &self.historic {
            mirror.apply(command);
        }
        mirror
    }

    /// A client joining now receives the snapshot, then the live tail.
    fn join_late(&mut self) {
        let mut joiner = SceneMirror::new(OBSERVER);
        for command in self.scene.snapshot_commands() {
            joiner.apply(&command);
        }
        self.late_joiners.push(joiner);
    }
}

fn assert_matches_scene(scene: &Scene, mirror: &SceneMirror, context: &str) {
    let ownership = scene.ownership();
    assert_eq!(mirror.resources().len(), ownership.len(), "{context}: resource count");

    for (id, resource) in mirror.resources() {
        let record = ownership
            .get(*id)
            .unwrap_or_else(|| panic!("{context}: {id} only exists in the mirror"));
        assert_eq!(resource.kind, record.kind, "{context}: kind of {id}");
        assert_eq!(resource.parent, record.parent, "{context}: parent of {id}");
        assert_eq!(resource.owner, record.owner, "{context}: owner of {id}");
        let mirror_children: BTreeSet<_> = resource.children.iter().copied().collect();
        let scene_children: BTreeSet<_> = record.children.iter().copied().collect();
        assert_eq!(mirror_children, scene_children, "{context}: children of {id}");
        assert!(
            mirror.selection(resource.owner, resource.kind).contains(id),
            "{context}: {id} missing from its owner's selection"
        );
    }

    // Every selection bucket holds exactly the resources with that owner.
    let mut owners: BTreeSet<UserId> = mirror.resources().values().map(|r| r.owner).collect();
    owners.insert(NO_USER);
    owners.extend(scene.users().map(|u| u.user_id));
    for owner in owners {
        for kind in ResourceKind::ALL {
            let expected = mirror
                .resources()
                .values()
                .filter(|r| r.owner == owner && r.kind == kind)
                .count();
            assert_eq!(
                mirror.selection(owner, kind).len(),
                expected,
                "{context}: {kind:?} selection of user {owner}"
            );
        }
    }

    let mirror_users: BTreeSet<UserId> = mirror.users().keys().copied().collect();
    let scene_users: BTreeSet<UserId> = scene.users().map(|u| u.user_id).collect();
    assert_eq!(mirror_users, scene_users, "{context}: users");
}

fn run(seed: u64) {
    let mut sim = Simulation::new(seed);
    for step in 1..=STEPS {
        sim.step();
        if step % CHECKPOINT_EVERY == 0 {
            assert_matches_scene(&sim.scene, &sim.live, &format!("seed {seed} step {step} live"));
            sim.join_late();
        }
    }
    assert_matches_scene(&sim.scene, &sim.live, &format!("seed {seed} live"));
    for (i, joiner) in sim.late_joiners.iter().enumerate() {
        assert_matches_scene(&sim.scene, joiner, &format!("seed {seed} late joiner {i}"));
    }
    assert_matches_scene(&sim.scene, &sim.replay_all(), &format!("seed {seed} full replay"));
    assert!(sim.historic.len() > USERS);
}

#[test]
fn test_random_sessions_converge() {
    for seed in 0..25 {
        run(seed);
    }
}

#[test]
fn test_fresh_snapshot_matches_scene() {
    let mut sim = Simulation::new(0xC0_40);
    for _ in 0..STEPS {
        sim.step();
    }
    sim.join_late();
    let joiner = sim.late_joiners.pop().unwrap();
    assert_matches_scene(&sim.scene, &joiner, "final snapshot");
}

//! Scene-side collaborators of the host: entity bodies, ray queries and
//! spawn points.
//!
//! The scene owns every entity's lifetime. Player records only hold an
//! [`EntityRef`] into it. Ray queries are split into two surface sets, player
//! bodies (damageable) and static walls (blocking), and callers choose which
//! set to query.

use shared::{EntityRef, Vec3};
use std::collections::BTreeMap;

/// Axis-aligned box used for static blocking geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Builds a box from two opposite corners in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Distance along a unit ray to the entry point, if within `max_distance`.
    /// Rays starting inside the box do not hit it.
    pub fn ray_distance(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<f32> {
        let mut t_enter = 0.0f32;
        let mut t_exit = max_distance;

        let axes = [
            (origin.x, dir.x, self.min.x, self.max.x),
            (origin.y, dir.y, self.min.y, self.max.y),
            (origin.z, dir.z, self.min.z, self.max.z),
        ];

        let mut inside = true;
        for (o, d, lo, hi) in axes {
            if o < lo || o > hi {
                inside = false;
            }
            if d.abs() < 1e-8 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (lo - o) * inv;
                let b = (hi - o) * inv;
                if a < b {
                    (a, b)
                } else {
                    (b, a)
                }
            };
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }

        if inside {
            None
        } else {
            Some(t_enter)
        }
    }
}

/// Which logical surfaces a ray query considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceSet {
    /// Player bodies
    Damageable,
    /// Static walls
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Struck {
    Entity(EntityRef),
    Wall(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub distance: f32,
    pub struck: Struck,
}

/// "Cast a ray, get the first surface it meets" over one surface set.
pub trait RayIntersection {
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        set: SurfaceSet,
        ignore: Option<EntityRef>,
    ) -> Option<RayHit>;
}

/// Read-only source of respawn positions.
pub trait SpawnPoints {
    fn spawn_points(&self) -> &[Vec3];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub forward: Vec3,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            forward: Vec3::FORWARD,
        }
    }
}

pub struct Scene {
    entities: BTreeMap<EntityRef, Transform>,
    walls: Vec<Aabb>,
    spawn_points: Vec<Vec3>,
    hit_radius: f32,
    next_entity: u32,
}

impl Scene {
    pub fn new(spawn_points: Vec<Vec3>, walls: Vec<Aabb>, hit_radius: f32) -> Self {
        Self {
            entities: BTreeMap::new(),
            walls,
            spawn_points,
            hit_radius,
            next_entity: 1,
        }
    }

    pub fn spawn_entity(&mut self, transform: Transform) -> EntityRef {
        let entity = EntityRef(self.next_entity);
        self.next_entity += 1;
        self.entities.insert(entity, transform);
        entity
    }

    pub fn despawn_entity(&mut self, entity: EntityRef) -> Option<Transform> {
        self.entities.remove(&entity)
    }

    pub fn transform(&self, entity: EntityRef) -> Option<Transform> {
        self.entities.get(&entity).copied()
    }

    /// Overwrites an entity's transform. The forward vector is normalised and
    /// a degenerate one keeps the previous facing.
    pub fn set_transform(&mut self, entity: EntityRef, position: Vec3, forward: Vec3) -> bool {
        match self.entities.get_mut(&entity) {
            Some(transform) => {
                transform.position = position;
                let forward = forward.normalize_or_zero();
                if forward != Vec3::ZERO {
                    transform.forward = forward;
                }
                true
            }
            None => false,
        }
    }

    /// Unconditional teleport: no distance or physics checks.
    pub fn teleport(&mut self, entity: EntityRef, position: Vec3) -> bool {
        match self.entities.get_mut(&entity) {
            Some(transform) => {
                transform.position = position;
                true
            }
            None => false,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn sphere_distance(&self, center: Vec3, origin: Vec3, dir: Vec3) -> Option<f32> {
        let oc = origin - center;
        let b = oc.dot(dir);
        let c = oc.length_squared() - self.hit_radius * self.hit_radius;
        if c <= 0.0 {
            // Origin inside the body
            return None;
        }
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let t = -b - disc.sqrt();
        (t >= 0.0).then_some(t)
    }
}

impl RayIntersection for Scene {
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        set: SurfaceSet,
        ignore: Option<EntityRef>,
    ) -> Option<RayHit> {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO || max_distance <= 0.0 {
            return None;
        }

        let closest = match set {
            SurfaceSet::Damageable => self
                .entities
                .iter()
                .filter(|(entity, _)| Some(**entity) != ignore)
                .filter_map(|(entity, transform)| {
                    self.sphere_distance(transform.position, origin, dir)
                        .map(|t| (t, Struck::Entity(*entity)))
                })
                .filter(|(t, _)| *t <= max_distance)
                .min_by(|a, b| a.0.total_cmp(&b.0)),
            SurfaceSet::Blocking => self
                .walls
                .iter()
                .enumerate()
                .filter_map(|(index, wall)| {
                    wall.ray_distance(origin, dir, max_distance)
                        .map(|t| (t, Struck::Wall(index)))
                })
                .min_by(|a, b| a.0.total_cmp(&b.0)),
        };

        closest.map(|(distance, struck)| RayHit {
            point: origin + dir * distance,
            distance,
            struck,
        })
    }
}

impl SpawnPoints for Scene {
    fn spawn_points(&self) -> &[Vec3] {
        &self.spawn_points
    }
}

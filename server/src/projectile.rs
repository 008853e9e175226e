//! Projectile lifecycle on the host
//!
//! A shot raycasts once at fire time, spawns a projectile in front of the
//! shooter and arms a two-phase despawn: the fire interval, then a short
//! grace period, after which a despawn request is handed back to the caller.
//! A controller can only hold one live projectile; further shots are
//! suppressed until its despawn completes.

use crate::registry::EntityRegistry;
use crate::scene::{RayIntersection, Struck, SurfaceSet};
use crate::scheduler::{Scheduler, TimerHandle};
use log::{debug, info};
use shared::{
    CallId, EntityRef, NetError, NetResult, PlayerId, ProjectileId, ProjectileSnapshot,
    RemoteCall, Vec3,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DespawnPhase {
    FireInterval,
    Grace,
}

#[derive(Debug, Clone, Copy)]
struct DeferredDespawn {
    controller: PlayerId,
    projectile: ProjectileId,
    phase: DespawnPhase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnedProjectile {
    pub controller: PlayerId,
    pub position: Vec3,
    /// Beam endpoints once the visual has been replicated
    pub visual: Option<(Vec3, Vec3)>,
    /// Set once the shot has dealt its damage
    pub scored: bool,
}

/// Where the shooter stands when the trigger is pulled.
#[derive(Debug, Clone, Copy)]
pub struct Shot {
    pub shooter: PlayerId,
    pub body: EntityRef,
    pub position: Vec3,
    pub forward: Vec3,
    pub origin: Vec3,
    pub direction: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotReport {
    pub projectile: ProjectileId,
    pub end: Vec3,
    pub hit: Option<PlayerId>,
}

pub struct ProjectileLifecycle {
    projectiles: BTreeMap<ProjectileId, SpawnedProjectile>,
    handles: HashMap<PlayerId, ProjectileId>,
    timers: HashMap<PlayerId, TimerHandle>,
    scheduler: Scheduler<DeferredDespawn>,
    next_id: u32,
    damage: i32,
    max_range: f32,
    muzzle_offset: f32,
    fire_interval: Duration,
    despawn_grace: Duration,
}

impl ProjectileLifecycle {
    pub fn new(
        damage: i32,
        max_range: f32,
        muzzle_offset: f32,
        fire_interval: Duration,
        despawn_grace: Duration,
    ) -> Self {
        Self {
            projectiles: BTreeMap::new(),
            handles: HashMap::new(),
            timers: HashMap::new(),
            scheduler: Scheduler::new(),
            next_id: 1,
            damage,
            max_range,
            muzzle_offset,
            fire_interval,
            despawn_grace,
        }
    }

    /// True while the controller's previous shot has not been despawned.
    pub fn is_busy(&self, controller: PlayerId) -> bool {
        self.handles.contains_key(&controller) || self.timers.contains_key(&controller)
    }

    /// Resolves a shot and spawns its projectile.
    ///
    /// The ray is tested against player bodies first (the shooter's own body
    /// is ignored), then against walls; with neither it ends at max range.
    /// Replication calls are pushed to `effects`: the spawn, the beam visual
    /// and, on a player hit, the damage request. Returns `Ok(None)` when the
    /// shot is suppressed because a projectile is still live.
    pub fn fire(
        &mut self,
        shot: Shot,
        world: &impl RayIntersection,
        registry: &EntityRegistry,
        effects: &mut Vec<RemoteCall>,
    ) -> NetResult<Option<ShotReport>> {
        if !shot.origin.is_finite() || !shot.direction.is_finite() {
            return Err(NetError::authority(CallId::Fire, "shot is not finite"));
        }
        if self.is_busy(shot.shooter) {
            debug!("{} fired while a projectile is live, ignored", shot.shooter);
            return Ok(None);
        }

        let mut direction = shot.direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            direction = shot.forward.normalize_or_zero();
        }

        let mut hit = None;
        let end = match world.cast_ray(
            shot.origin,
            direction,
            self.max_range,
            SurfaceSet::Damageable,
            Some(shot.body),
        ) {
            Some(ray) => {
                if let Struck::Entity(entity) = ray.struck {
                    hit = registry.find_by_entity(entity);
                }
                ray.point
            }
            None => match world.cast_ray(
                shot.origin,
                direction,
                self.max_range,
                SurfaceSet::Blocking,
                None,
            ) {
                Some(ray) => ray.point,
                None => shot.origin + direction * self.max_range,
            },
        };

        let projectile = ProjectileId(self.next_id);
        self.next_id += 1;
        let position = shot.position + shot.forward * self.muzzle_offset;
        self.projectiles.insert(
            projectile,
            SpawnedProjectile {
                controller: shot.shooter,
                position,
                visual: None,
                scored: hit.is_some(),
            },
        );

        let handle = self.scheduler.schedule(
            self.fire_interval,
            DeferredDespawn {
                controller: shot.shooter,
                projectile,
                phase: DespawnPhase::FireInterval,
            },
        );
        self.timers.insert(shot.shooter, handle);

        info!("{} fired {} towards {:?}", shot.shooter, projectile, end);

        effects.push(RemoteCall::ProjectileSpawned {
            projectile,
            controller: shot.shooter,
            position,
        });
        effects.push(RemoteCall::SetProjectileVisual {
            projectile,
            controller: shot.shooter,
            start: shot.origin,
            end,
        });
        if let Some(target) = hit {
            effects.push(RemoteCall::ApplyDamage {
                target,
                amount: self.damage,
                attacker: shot.shooter,
            });
        }

        Ok(Some(ShotReport {
            projectile,
            end,
            hit,
        }))
    }

    /// Records the beam and makes the projectile the controller's live handle.
    pub fn record_handle(
        &mut self,
        projectile: ProjectileId,
        controller: PlayerId,
        start: Vec3,
        end: Vec3,
    ) -> NetResult<()> {
        let spawned = self
            .projectiles
            .get_mut(&projectile)
            .ok_or(NetError::UnknownProjectile(projectile))?;
        spawned.visual = Some((start, end));
        self.handles.insert(controller, projectile);
        Ok(())
    }

    /// Claims the single hit a controller's live projectile may still deal.
    ///
    /// Used for hits reported by a peer instead of found by the host's own
    /// raycast. Fails when the controller has no live projectile or its shot
    /// has already scored.
    pub fn claim_hit(&mut self, controller: PlayerId) -> NetResult<ProjectileId> {
        let live = self
            .projectiles
            .iter_mut()
            .find(|(_, spawned)| spawned.controller == controller && !spawned.scored);
        match live {
            Some((id, spawned)) => {
                spawned.scored = true;
                debug!("{} claimed a hit with {}", controller, id);
                Ok(*id)
            }
            None => Err(NetError::authority(
                CallId::ApplyDamage,
                format!("{} has no unscored projectile", controller),
            )),
        }
    }

    /// Advances the despawn timers and returns the despawn requests now due.
    ///
    /// Requests for projectiles that are already gone are dropped.
    pub fn advance(&mut self, dt: Duration) -> Vec<RemoteCall> {
        let mut requests = Vec::new();
        let mut fired = self.scheduler.advance(dt);

        while !fired.is_empty() {
            for task in fired {
                match task.phase {
                    DespawnPhase::FireInterval => {
                        let handle = self.scheduler.schedule(
                            self.despawn_grace,
                            DeferredDespawn {
                                phase: DespawnPhase::Grace,
                                ..task
                            },
                        );
                        self.timers.insert(task.controller, handle);
                    }
                    DespawnPhase::Grace => {
                        self.timers.remove(&task.controller);
                        if self.projectiles.contains_key(&task.projectile) {
                            requests.push(RemoteCall::DespawnProjectile {
                                projectile: task.projectile,
                                controller: task.controller,
                            });
                        } else {
                            debug!("{} already gone at despawn", task.projectile);
                        }
                    }
                }
            }
            // A zero grace period comes due without further clock movement
            fired = self.scheduler.advance(Duration::ZERO);
        }

        requests
    }

    /// Removes a projectile on behalf of its controller.
    pub fn despawn(
        &mut self,
        projectile: ProjectileId,
        controller: PlayerId,
    ) -> NetResult<SpawnedProjectile> {
        let owner = self
            .projectiles
            .get(&projectile)
            .map(|spawned| spawned.controller)
            .ok_or(NetError::UnknownProjectile(projectile))?;
        if owner != controller {
            return Err(NetError::authority(
                CallId::DespawnProjectile,
                format!("{} is not controlled by {}", projectile, controller),
            ));
        }

        let spawned = self
            .projectiles
            .remove(&projectile)
            .ok_or(NetError::UnknownProjectile(projectile))?;
        if self.handles.get(&controller) == Some(&projectile) {
            self.handles.remove(&controller);
        }
        if let Some(timer) = self.timers.remove(&controller) {
            timer.cancel();
        }
        info!("Despawned {} of {}", projectile, controller);
        Ok(spawned)
    }

    /// Drops everything a departing controller owns; returns the removed ids.
    pub fn teardown_controller(&mut self, controller: PlayerId) -> Vec<ProjectileId> {
        if let Some(timer) = self.timers.remove(&controller) {
            timer.cancel();
        }
        self.handles.remove(&controller);

        let owned: Vec<ProjectileId> = self
            .projectiles
            .iter()
            .filter(|(_, spawned)| spawned.controller == controller)
            .map(|(id, _)| *id)
            .collect();
        for id in &owned {
            self.projectiles.remove(id);
        }
        owned
    }

    pub fn handle(&self, controller: PlayerId) -> Option<ProjectileId> {
        self.handles.get(&controller).copied()
    }

    pub fn live_count(&self) -> usize {
        self.projectiles.len()
    }

    pub fn snapshots(&self) -> Vec<ProjectileSnapshot> {
        self.projectiles
            .iter()
            .map(|(id, spawned)| ProjectileSnapshot {
                id: *id,
                controller: spawned.controller,
                position: spawned.position,
                visual: spawned.visual,
            })
            .collect()
    }
}

//! Damage, death and respawn on the host.
//!
//! The controller mutates the registry directly and pushes the replication
//! calls its changes require onto an `effects` list, in the order observers
//! must see them. The session routes those effects once the controller
//! returns, including after a partial failure.

use crate::registry::EntityRegistry;
use crate::scene::SpawnPoints;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{NetError, NetResult, PlayerId, RemoteCall, Vec3, MAX_HEALTH};

#[derive(Debug, Clone, PartialEq)]
pub struct DeathReport {
    pub deaths: u32,
    pub attacker_kills: u32,
    pub respawn: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageReport {
    /// Health right after the hit, before any death reset
    pub health_after_hit: i32,
    pub death: Option<DeathReport>,
}

pub struct CombatController {
    rng: StdRng,
}

impl CombatController {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Subtracts `amount` from the target's health and runs the death
    /// transition when it reaches zero.
    ///
    /// Health is not clamped before the check, so a lethal hit is observable
    /// as a non-positive `health_after_hit`. Both players must be registered;
    /// otherwise nothing is mutated. If the death transition fails to find a
    /// spawn point, the committed counters and health are still replicated
    /// and the error is returned afterwards.
    pub fn apply_damage(
        &mut self,
        registry: &mut EntityRegistry,
        spawns: &impl SpawnPoints,
        target: PlayerId,
        amount: i32,
        attacker: PlayerId,
        effects: &mut Vec<RemoteCall>,
    ) -> NetResult<DamageReport> {
        registry.get(attacker)?;

        let health_after_hit = registry.mutate(target, |record| {
            record.health -= amount;
            record.health
        })?;
        info!(
            "{} hit {} for {}, health is {}",
            attacker, target, amount, health_after_hit
        );

        let mut death = None;
        let mut failure = None;
        if health_after_hit <= 0 {
            match self.on_death(registry, spawns, target, attacker, effects) {
                Ok(report) => death = Some(report),
                Err(e) => failure = Some(e),
            }
        }

        let health = registry.get(target)?.health;
        effects.push(RemoteCall::SetHealth {
            player: target,
            health,
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(DamageReport {
                health_after_hit,
                death,
            }),
        }
    }

    /// Death transition: count the death and the kill, restore health and
    /// send the victim's owner to a random spawn point.
    pub fn on_death(
        &mut self,
        registry: &mut EntityRegistry,
        spawns: &impl SpawnPoints,
        target: PlayerId,
        attacker: PlayerId,
        effects: &mut Vec<RemoteCall>,
    ) -> NetResult<DeathReport> {
        registry.get(attacker)?;

        let (deaths, owner) = registry.mutate(target, |record| {
            record.deaths += 1;
            record.health = MAX_HEALTH;
            (record.deaths, record.owner)
        })?;
        let attacker_kills = registry.mutate(attacker, |record| {
            record.kills += 1;
            record.kills
        })?;
        info!("{} was killed by {}", target, attacker);

        effects.push(RemoteCall::SetDeaths {
            player: target,
            deaths,
        });
        effects.push(RemoteCall::SetKills {
            player: attacker,
            kills: attacker_kills,
        });

        let respawn = match self.pick_spawn(spawns) {
            Ok(position) => position,
            Err(e) => {
                warn!("Respawn of {} skipped: {}", target, e);
                return Err(e);
            }
        };

        effects.push(RemoteCall::Relocate {
            connection: owner,
            player: target,
            position: respawn,
        });

        Ok(DeathReport {
            deaths,
            attacker_kills,
            respawn,
        })
    }

    /// Uniform pick from the configured spawn points.
    pub fn pick_spawn(&mut self, spawns: &impl SpawnPoints) -> NetResult<Vec3> {
        let points = spawns.spawn_points();
        if points.is_empty() {
            return Err(NetError::NoSpawnPoints);
        }
        Ok(points[self.rng.gen_range(0..points.len())])
    }
}

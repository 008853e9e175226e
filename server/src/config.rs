//! Host configuration.
//!
//! Scene data (spawn points, blocking walls) is supplied from outside; the
//! binary fills it from command line arguments.

use crate::scene::Aabb;
use shared::{Vec3, DESPAWN_GRACE_MS, FIRE_INTERVAL_MS, MAX_RANGE, WEAPON_DAMAGE};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Fixed simulation tick
    pub tick_duration: Duration,
    pub max_clients: usize,
    /// Silence after which a client is considered gone
    pub client_timeout: Duration,
    pub weapon_damage: i32,
    /// Time a projectile stays up before its despawn is requested
    pub fire_interval: Duration,
    /// Extra delay after the fire interval before the despawn goes out
    pub despawn_grace: Duration,
    pub max_range: f32,
    /// Distance along the firer's forward at which the projectile appears
    pub muzzle_offset: f32,
    /// Radius of the damageable sphere around each player entity
    pub hit_radius: f32,
    pub spawn_points: Vec<Vec3>,
    pub walls: Vec<Aabb>,
    /// Fixed seed for respawn selection; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_secs_f32(1.0 / 30.0),
            max_clients: 16,
            client_timeout: Duration::from_secs(5),
            weapon_damage: WEAPON_DAMAGE,
            fire_interval: Duration::from_millis(FIRE_INTERVAL_MS),
            despawn_grace: Duration::from_millis(DESPAWN_GRACE_MS),
            max_range: MAX_RANGE,
            muzzle_offset: 1.0,
            hit_radius: 0.5,
            spawn_points: vec![
                Vec3::new(-10.0, 1.0, -10.0),
                Vec3::new(10.0, 1.0, -10.0),
                Vec3::new(-10.0, 1.0, 10.0),
                Vec3::new(10.0, 1.0, 10.0),
            ],
            walls: Vec::new(),
            seed: None,
        }
    }
}

/// Shortest tick the server loop will run at.
pub const MIN_TICK: Duration = Duration::from_millis(1);

impl ServerConfig {
    /// Ticks per second, clamped so the period stays between 1 ms and 1 s.
    pub fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(tick_rate.max(1)));
        self.tick_duration = period.max(MIN_TICK);
        self
    }
}

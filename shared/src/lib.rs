use serde::{Deserialize, Serialize};

pub mod calls;
pub mod error;
pub mod ids;
pub mod math;
pub mod replica;
pub mod router;

pub use calls::{CallId, Discipline, PlayerSnapshot, ProjectileSnapshot, RemoteCall};
pub use error::{NetError, NetResult};
pub use ids::{ConnectionId, EntityRef, PlayerId, ProjectileId};
pub use math::Vec3;
pub use replica::ObserverView;
pub use router::{
    invoke, Authority, CallContext, Caller, Envelope, Outbox, Outcome, RemoteCallRouter,
    RouterHost,
};

pub const PROTOCOL_VERSION: u32 = 2;
pub const MAX_HEALTH: i32 = 100;
pub const WEAPON_DAMAGE: i32 = 5;
pub const FIRE_INTERVAL_MS: u64 = 2000;
pub const DESPAWN_GRACE_MS: u64 = 100;
pub const MAX_RANGE: f32 = 100.0;
pub const RECV_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Call {
        call: RemoteCall,
    },
    Heartbeat,
    Disconnect,

    Connected {
        connection: ConnectionId,
        player: PlayerId,
    },
    Replicate {
        seq: u64,
        call: RemoteCall,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn encode(&self) -> NetResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> NetResult<Packet> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicate_packet_survives_the_wire() {
        let packet = Packet::Replicate {
            seq: 42,
            call: RemoteCall::SetProjectileVisual {
                projectile: ProjectileId(3),
                controller: PlayerId(1),
                start: Vec3::new(0.0, 1.5, -2.0),
                end: Vec3::new(0.0, 1.5, 98.0),
            },
        };

        let bytes = packet.encode().unwrap();
        assert!(bytes.len() < RECV_BUFFER_SIZE);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_truncated_packet_is_a_codec_error() {
        let bytes = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        }
        .encode()
        .unwrap();

        let result = Packet::decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(NetError::Codec(_))));
    }
}

//! Message protocol.
//!
//! Every top-level message starts with a one-byte subtype:
//!
//! ```text
//! IMMEDIATE: [0][opcode:u8][payload]                 out-of-band (handshake, ping/pong, input)
//! QUEUE:     [1][tick:u16]([opcode:u8][payload])*    tick-tagged game messages
//! ```
//!
//! Queue sub-messages run until the buffer is exhausted. Entity variable
//! changes carry no length; their size comes from the class schema, which is
//! why decoding needs the [`ClassRegistry`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    codec::{CodecError, PacketReader, PacketWriter},
    math::Vec2,
    registry::{ClassId, ClassRegistry, EntityId, RegistryError},
    value::WireValue,
};

/// Protocol version identifier. Peers must match exactly.
pub const PROTOCOL_VERSION: u64 = 0x4e53_594e_0000_0003;

/// Top-level subtypes.
pub mod subtype {
    pub const IMMEDIATE: u8 = 0;
    pub const QUEUE: u8 = 1;
}

/// Sub-message opcodes.
pub mod opcode {
    pub const INIT: u8 = 0x01;
    pub const PING: u8 = 0x02;
    pub const PONG: u8 = 0x03;
    pub const INPUT: u8 = 0x04;
    pub const DISCONNECT: u8 = 0x05;

    pub const ENTITY_CREATE: u8 = 0x10;
    pub const ENTITY_UPDATE: u8 = 0x11;
    pub const ENTITY_DELETE: u8 = 0x12;
    pub const PLAYER_JOIN: u8 = 0x20;
    pub const PLAYER_LEAVE: u8 = 0x21;
    pub const PLAYER_MOVE: u8 = 0x22;
    pub const ROUND_START: u8 = 0x30;
    pub const ROUND_END: u8 = 0x31;
    pub const RPC: u8 = 0x40;
    pub const TERRAIN: u8 = 0x50;
}

/// Round-end winner byte meaning "no winner".
pub const NO_WINNER: u8 = u8::MAX;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("unknown message subtype {0}")]
    UnknownSubtype(u8),
    #[error("unknown opcode {opcode:#04x} in subtype {subtype}")]
    UnknownOpcode { subtype: u8, opcode: u8 },
    #[error("{0} trailing bytes after immediate message")]
    TrailingBytes(usize),
    #[error("opcode {0:#04x} is not valid in a queue frame")]
    NotQueueable(u8),
}

/// Handshake payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitInfo {
    pub version: u64,
    /// Remote fixed ticks per second.
    pub tick_rate: u8,
    /// Remote wall-clock time at `reference_tick`, in ms.
    pub reference_time_ms: i64,
    pub reference_tick: u16,
    /// Id assigned to the local player.
    pub player_id: u8,
}

/// Client input sample sent to the authoritative peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    pub tick: u16,
    pub buttons: u8,
    pub aim: f32,
}

/// Terrain/world event forwarded untouched to the scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainEvent {
    pub x: f64,
    pub y: f64,
    pub radius: i32,
}

/// Out-of-band messages, handled as soon as they arrive.
#[derive(Debug, Clone, PartialEq)]
pub enum Immediate {
    Init(InitInfo),
    Ping { sent_at_ms: i64 },
    Pong { original_ms: i64, remote_ms: i64 },
    Input(InputCommand),
    Disconnect { reason: String },
}

/// Tick-tagged game messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    EntityCreate {
        class: ClassId,
        entity: EntityId,
    },
    EntityUpdate {
        class: ClassId,
        entity: EntityId,
        /// One value per class variable, in wire order.
        values: Vec<WireValue>,
    },
    EntityDelete {
        class: ClassId,
        entity: EntityId,
    },
    PlayerJoin {
        player: u8,
        name: String,
    },
    PlayerLeave {
        player: u8,
    },
    PlayerMove {
        player: u8,
        position: Vec2,
    },
    RoundStart {
        round: u16,
        seed: u32,
    },
    RoundEnd {
        winner: Option<u8>,
    },
    Rpc {
        name: String,
        payload: Bytes,
    },
    Terrain(TerrainEvent),
}

/// All messages produced by the remote at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickFrame {
    pub tick: u16,
    pub messages: Vec<Message>,
}

/// A decoded top-level message.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Immediate(Immediate),
    Queue(TickFrame),
}

impl Packet {
    pub fn decode(bytes: impl Into<Bytes>, registry: &ClassRegistry) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(bytes);
        match r.read_u8()? {
            subtype::IMMEDIATE => {
                let msg = Immediate::decode(&mut r)?;
                if r.has_more_data() {
                    return Err(ProtocolError::TrailingBytes(r.remaining()));
                }
                Ok(Packet::Immediate(msg))
            }
            subtype::QUEUE => {
                let tick = r.read_u16()?;
                let mut messages = Vec::new();
                while r.has_more_data() {
                    messages.push(Message::decode(&mut r, registry)?);
                }
                Ok(Packet::Queue(TickFrame { tick, messages }))
            }
            other => Err(ProtocolError::UnknownSubtype(other)),
        }
    }

    pub fn encode(&self, registry: &ClassRegistry) -> Result<Bytes, ProtocolError> {
        let mut w = PacketWriter::with_capacity(64);
        match self {
            Packet::Immediate(msg) => {
                w.write_u8(subtype::IMMEDIATE);
                msg.encode(&mut w)?;
            }
            Packet::Queue(frame) => {
                w.write_u8(subtype::QUEUE);
                w.write_u16(frame.tick);
                for msg in &frame.messages {
                    msg.encode(&mut w, registry)?;
                }
            }
        }
        Ok(w.freeze())
    }
}

impl Immediate {
    fn decode(r: &mut PacketReader) -> Result<Self, ProtocolError> {
        Ok(match r.read_u8()? {
            opcode::INIT => Immediate::Init(InitInfo {
                version: r.read_u64()?,
                tick_rate: r.read_u8()?,
                reference_time_ms: r.read_i64()?,
                reference_tick: r.read_u16()?,
                player_id: r.read_u8()?,
            }),
            opcode::PING => Immediate::Ping {
                sent_at_ms: r.read_i64()?,
            },
            opcode::PONG => Immediate::Pong {
                original_ms: r.read_i64()?,
                remote_ms: r.read_i64()?,
            },
            opcode::INPUT => Immediate::Input(InputCommand {
                tick: r.read_u16()?,
                buttons: r.read_u8()?,
                aim: r.read_f32()?,
            }),
            opcode::DISCONNECT => Immediate::Disconnect {
                reason: r.read_str8()?,
            },
            other => {
                return Err(ProtocolError::UnknownOpcode {
                    subtype: subtype::IMMEDIATE,
                    opcode: other,
                })
            }
        })
    }

    fn encode(&self, w: &mut PacketWriter) -> Result<(), ProtocolError> {
        match self {
            Immediate::Init(info) => {
                w.write_u8(opcode::INIT);
                w.write_u64(info.version);
                w.write_u8(info.tick_rate);
                w.write_i64(info.reference_time_ms);
                w.write_u16(info.reference_tick);
                w.write_u8(info.player_id);
            }
            Immediate::Ping { sent_at_ms } => {
                w.write_u8(opcode::PING);
                w.write_i64(*sent_at_ms);
            }
            Immediate::Pong {
                original_ms,
                remote_ms,
            } => {
                w.write_u8(opcode::PONG);
                w.write_i64(*original_ms);
                w.write_i64(*remote_ms);
            }
            Immediate::Input(cmd) => {
                w.write_u8(opcode::INPUT);
                w.write_u16(cmd.tick);
                w.write_u8(cmd.buttons);
                w.write_f32(cmd.aim);
            }
            Immediate::Disconnect { reason } => {
                w.write_u8(opcode::DISCONNECT);
                w.write_str8(reason)?;
            }
        }
        Ok(())
    }

    /// Shorthand for a single immediate packet.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut w = PacketWriter::with_capacity(32);
        w.write_u8(subtype::IMMEDIATE);
        self.encode(&mut w)?;
        Ok(w.freeze())
    }
}

impl Message {
    fn decode(r: &mut PacketReader, registry: &ClassRegistry) -> Result<Self, ProtocolError> {
        Ok(match r.read_u8()? {
            opcode::ENTITY_CREATE => {
                let (class, entity) = read_entity_header(r, registry)?;
                Message::EntityCreate { class, entity }
            }
            opcode::ENTITY_UPDATE => {
                let (class, entity) = read_entity_header(r, registry)?;
                let values = registry.get(class)?.read_values(r)?;
                Message::EntityUpdate {
                    class,
                    entity,
                    values,
                }
            }
            opcode::ENTITY_DELETE => {
                let (class, entity) = read_entity_header(r, registry)?;
                Message::EntityDelete { class, entity }
            }
            opcode::PLAYER_JOIN => Message::PlayerJoin {
                player: r.read_u8()?,
                name: r.read_str8()?,
            },
            opcode::PLAYER_LEAVE => Message::PlayerLeave {
                player: r.read_u8()?,
            },
            opcode::PLAYER_MOVE => Message::PlayerMove {
                player: r.read_u8()?,
                position: r.read_vec2()?,
            },
            opcode::ROUND_START => Message::RoundStart {
                round: r.read_u16()?,
                seed: r.read_u32()?,
            },
            opcode::ROUND_END => {
                let winner = r.read_u8()?;
                Message::RoundEnd {
                    winner: (winner != NO_WINNER).then_some(winner),
                }
            }
            opcode::RPC => Message::Rpc {
                name: r.read_str8()?,
                payload: r.read_bytes16()?,
            },
            opcode::TERRAIN => Message::Terrain(TerrainEvent {
                x: r.read_f64()?,
                y: r.read_f64()?,
                radius: r.read_i32()?,
            }),
            other @ (opcode::INIT
            | opcode::PING
            | opcode::PONG
            | opcode::INPUT
            | opcode::DISCONNECT) => return Err(ProtocolError::NotQueueable(other)),
            other => {
                return Err(ProtocolError::UnknownOpcode {
                    subtype: subtype::QUEUE,
                    opcode: other,
                })
            }
        })
    }

    fn encode(&self, w: &mut PacketWriter, registry: &ClassRegistry) -> Result<(), ProtocolError> {
        match self {
            Message::EntityCreate { class, entity } => {
                registry.get(*class)?;
                w.write_u8(opcode::ENTITY_CREATE);
                write_entity_header(w, *class, *entity);
            }
            Message::EntityUpdate {
                class,
                entity,
                values,
            } => {
                let registration = registry.get(*class)?;
                w.write_u8(opcode::ENTITY_UPDATE);
                write_entity_header(w, *class, *entity);
                registration.write_values(w, values)?;
            }
            Message::EntityDelete { class, entity } => {
                registry.get(*class)?;
                w.write_u8(opcode::ENTITY_DELETE);
                write_entity_header(w, *class, *entity);
            }
            Message::PlayerJoin { player, name } => {
                w.write_u8(opcode::PLAYER_JOIN);
                w.write_u8(*player);
                w.write_str8(name)?;
            }
            Message::PlayerLeave { player } => {
                w.write_u8(opcode::PLAYER_LEAVE);
                w.write_u8(*player);
            }
            Message::PlayerMove { player, position } => {
                w.write_u8(opcode::PLAYER_MOVE);
                w.write_u8(*player);
                w.write_vec2(*position);
            }
            Message::RoundStart { round, seed } => {
                w.write_u8(opcode::ROUND_START);
                w.write_u16(*round);
                w.write_u32(*seed);
            }
            Message::RoundEnd { winner } => {
                w.write_u8(opcode::ROUND_END);
                w.write_u8(winner.unwrap_or(NO_WINNER));
            }
            Message::Rpc { name, payload } => {
                w.write_u8(opcode::RPC);
                w.write_str8(name)?;
                w.write_bytes16(payload)?;
            }
            Message::Terrain(ev) => {
                w.write_u8(opcode::TERRAIN);
                w.write_f64(ev.x);
                w.write_f64(ev.y);
                w.write_i32(ev.radius);
            }
        }
        Ok(())
    }
}

fn read_entity_header(
    r: &mut PacketReader,
    registry: &ClassRegistry,
) -> Result<(ClassId, EntityId), ProtocolError> {
    let class = ClassId(r.read_u8()?);
    registry.get(class)?;
    let entity = EntityId(r.read_u32()?);
    Ok((class, entity))
}

fn write_entity_header(w: &mut PacketWriter, class: ClassId, entity: EntityId) {
    w.write_u8(class.0);
    w.write_u32(entity.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    fn frame(messages: Vec<Message>) -> Packet {
        Packet::Queue(TickFrame { tick: 300, messages })
    }

    #[test]
    fn init_layout() {
        let bytes = Immediate::Init(InitInfo {
            version: PROTOCOL_VERSION,
            tick_rate: 20,
            reference_time_ms: 1_700_000_000_000,
            reference_tick: 42,
            player_id: 3,
        })
        .to_bytes()
        .unwrap();
        // subtype + opcode + version + rate + time + tick + player
        assert_eq!(bytes.len(), 1 + 1 + 8 + 1 + 8 + 2 + 1);
        assert_eq!(bytes[0], subtype::IMMEDIATE);
        assert_eq!(bytes[1], opcode::INIT);
    }

    #[test]
    fn ping_and_pong_layout() {
        let ping = Immediate::Ping { sent_at_ms: 5 }.to_bytes().unwrap();
        assert_eq!(&ping[..], &[0, opcode::PING, 0, 0, 0, 0, 0, 0, 0, 5]);

        let reg = catalog::registry().unwrap();
        let pong = Immediate::Pong {
            original_ms: -1,
            remote_ms: 77,
        };
        let decoded = Packet::decode(pong.to_bytes().unwrap(), &reg).unwrap();
        assert_eq!(decoded, Packet::Immediate(pong));
    }

    #[test]
    fn queue_frame_carries_every_message_kind() {
        let reg = catalog::registry().unwrap();
        let mine = reg.id_of("Mine").unwrap();
        let packet = frame(vec![
            Message::EntityCreate {
                class: mine,
                entity: EntityId(7),
            },
            Message::EntityUpdate {
                class: mine,
                entity: EntityId(7),
                values: vec![
                    WireValue::Bool(true),
                    WireValue::I16(50),
                    WireValue::Vec2(Vec2::new(1.0, 2.0)),
                ],
            },
            Message::PlayerJoin {
                player: 2,
                name: "worm".into(),
            },
            Message::PlayerMove {
                player: 2,
                position: Vec2::new(3.0, 4.0),
            },
            Message::RoundStart { round: 9, seed: 1234 },
            Message::Rpc {
                name: "shake".into(),
                payload: Bytes::from_static(&[1, 2, 3]),
            },
            Message::Terrain(TerrainEvent {
                x: 10.5,
                y: -3.0,
                radius: 25,
            }),
            Message::PlayerLeave { player: 2 },
            Message::EntityDelete {
                class: mine,
                entity: EntityId(7),
            },
            Message::RoundEnd { winner: None },
        ]);
        let bytes = packet.encode(&reg).unwrap();
        assert_eq!(Packet::decode(bytes, &reg).unwrap(), packet);
    }

    #[test]
    fn entity_update_size_follows_schema() {
        let reg = catalog::registry().unwrap();
        let mine = reg.id_of("Mine").unwrap();
        let bytes = frame(vec![Message::EntityUpdate {
            class: mine,
            entity: EntityId(1),
            values: reg.get(mine).unwrap().spawn_defaults(),
        }])
        .encode(&reg)
        .unwrap();
        // subtype + tick + opcode + class + entity + (bool + i16 + vec2)
        assert_eq!(bytes.len(), 1 + 2 + 1 + 1 + 4 + 1 + 2 + 8);
    }

    #[test]
    fn empty_queue_frame_is_valid() {
        let reg = catalog::registry().unwrap();
        let decoded = Packet::decode(vec![subtype::QUEUE, 0, 9], &reg).unwrap();
        assert_eq!(
            decoded,
            Packet::Queue(TickFrame {
                tick: 9,
                messages: vec![]
            })
        );
    }

    #[test]
    fn unknown_class_rejected() {
        let reg = catalog::registry().unwrap();
        let bytes = vec![subtype::QUEUE, 0, 1, opcode::ENTITY_CREATE, 200, 0, 0, 0, 1];
        assert_eq!(
            Packet::decode(bytes, &reg),
            Err(ProtocolError::Registry(RegistryError::UnknownClass(200)))
        );
    }

    #[test]
    fn truncated_update_underruns() {
        let reg = catalog::registry().unwrap();
        // Mine update missing its position bytes
        let bytes = vec![
            subtype::QUEUE,
            0,
            1,
            opcode::ENTITY_UPDATE,
            2,
            0,
            0,
            0,
            7,
            1,
            0,
            50,
        ];
        assert!(matches!(
            Packet::decode(bytes, &reg),
            Err(ProtocolError::Codec(CodecError::BufferUnderrun { needed: 8, remaining: 0 }))
        ));
    }

    #[test]
    fn unknown_subtype_and_opcode() {
        let reg = catalog::registry().unwrap();
        assert_eq!(
            Packet::decode(vec![7u8], &reg),
            Err(ProtocolError::UnknownSubtype(7))
        );
        assert_eq!(
            Packet::decode(vec![subtype::QUEUE, 0, 0, 0xee], &reg),
            Err(ProtocolError::UnknownOpcode {
                subtype: subtype::QUEUE,
                opcode: 0xee
            })
        );
        assert_eq!(
            Packet::decode(vec![subtype::QUEUE, 0, 0, opcode::PING], &reg),
            Err(ProtocolError::NotQueueable(opcode::PING))
        );
        assert!(Packet::decode(Vec::<u8>::new(), &reg).is_err());
    }

    #[test]
    fn immediate_trailing_bytes_rejected() {
        let reg = catalog::registry().unwrap();
        let mut bytes = Immediate::Ping { sent_at_ms: 1 }.to_bytes().unwrap().to_vec();
        bytes.push(0);
        assert_eq!(
            Packet::decode(bytes, &reg),
            Err(ProtocolError::TrailingBytes(1))
        );
    }
}

//! Encoding and decoding of single RCON packets.
//!
//! On the wire every packet looks like this, with all integers little-endian:
//!
//! ```text
//! size: i32 | id: i32 | kind: i32 | body | 0x00 | 0x00
//! ```
//!
//! `size` covers everything after itself. The reference protocol limits bodies to 4096 bytes, but
//! no limit is enforced here.

use crate::Error;
use std::io;

/// Length of the `id` and `kind` fields.
pub const HEADER_LEN: usize = 8;

/// Length of the two null bytes following the body.
pub const TERMINATOR_LEN: usize = 2;

/// Smallest valid packet payload: a header followed by an empty body.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + TERMINATOR_LEN;

/// Body of the packet a server sends after echoing a mirror packet.
pub const TRAILER: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Stage of a session, used to tell apart packet kinds that share a wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Auth,
    Command,
}

/// The `kind` field of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Auth,
    AuthResponse,
    ExecCommand,
    ResponseValue,
    /// A wire value this client has no meaning for.
    Unknown(i32),
}

impl PacketKind {
    pub fn to_wire(self) -> i32 {
        match self {
            PacketKind::Auth => SERVERDATA_AUTH,
            PacketKind::AuthResponse => SERVERDATA_AUTH_RESPONSE,
            PacketKind::ExecCommand => SERVERDATA_EXECCOMMAND,
            PacketKind::ResponseValue => SERVERDATA_RESPONSE_VALUE,
            PacketKind::Unknown(value) => value,
        }
    }

    /// Interprets a wire value. `2` means [`PacketKind::AuthResponse`] during authentication and
    /// [`PacketKind::ExecCommand`] afterwards.
    pub fn from_wire(value: i32, phase: Phase) -> Self {
        match (value, phase) {
            (SERVERDATA_AUTH, _) => PacketKind::Auth,
            (SERVERDATA_AUTH_RESPONSE, Phase::Auth) => PacketKind::AuthResponse,
            (SERVERDATA_EXECCOMMAND, Phase::Command) => PacketKind::ExecCommand,
            (SERVERDATA_RESPONSE_VALUE, _) => PacketKind::ResponseValue,
            (value, _) => PacketKind::Unknown(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: PacketKind,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new<B: Into<Vec<u8>>>(id: i32, kind: PacketKind, body: B) -> Self {
        Packet {
            id,
            kind,
            body: body.into(),
        }
    }

    /// Encodes the packet, including its size prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + MIN_PACKET_LEN + self.body.len());
        serialize_packet(self, &mut buf);
        buf
    }

    /// Decodes a packet from a payload that has already had its size prefix removed.
    pub fn decode(payload: &[u8], phase: Phase) -> crate::Result<Self> {
        deserialize_packet(payload, phase)
    }
}

/// Appends the encoded packet, including its size prefix, to `buf`.
pub fn serialize_packet(packet: &Packet, buf: &mut Vec<u8>) {
    let size = (HEADER_LEN + packet.body.len() + TERMINATOR_LEN) as u32;

    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&packet.id.to_le_bytes());
    buf.extend_from_slice(&packet.kind.to_wire().to_le_bytes());
    buf.extend_from_slice(&packet.body);
    buf.extend_from_slice(&[0; TERMINATOR_LEN]);
}

/// Decodes a size-stripped payload. Only the presence of the terminator is checked, not its
/// contents.
pub fn deserialize_packet(payload: &[u8], phase: Phase) -> crate::Result<Packet> {
    if payload.len() < MIN_PACKET_LEN {
        return Err(Error::MalformedPacket { len: payload.len() });
    }

    let (id_bytes, rest) = payload.split_at(4);
    let (kind_bytes, rest) = rest.split_at(4);
    let body = &rest[..rest.len() - TERMINATOR_LEN];

    Ok(Packet {
        id: i32::from_le_bytes(read_word(id_bytes)),
        kind: PacketKind::from_wire(i32::from_le_bytes(read_word(kind_bytes)), phase),
        body: body.to_vec(),
    })
}

fn read_word(bytes: &[u8]) -> [u8; 4] {
    let mut word = [0; 4];
    word.copy_from_slice(bytes);
    word
}

/// Interprets a size prefix. A negative size can never be framed, so it is reported as invalid
/// data on the stream.
pub(crate) fn frame_size(size_bytes: [u8; 4]) -> crate::Result<usize> {
    let size = i32::from_le_bytes(size_bytes);
    usize::try_from(size).map_err(|_| {
        Error::Transport(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("negative packet size {}", size),
        ))
    })
}

/// Hands out request ids. Ids are always positive, so they never collide with the `-1` a server
/// sends to reject authentication.
#[derive(Debug)]
pub(crate) struct RequestIds {
    next: i32,
}

impl RequestIds {
    pub fn new() -> Self {
        RequestIds { next: 1 }
    }

    pub fn next(&mut self) -> i32 {
        let id = self.next;
        self.next = if id == i32::MAX { 1 } else { id + 1 };
        id
    }
}

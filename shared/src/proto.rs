//! Fixed-layout wire protocol
//!
//! Every packet starts with the same 10-byte [`Header`]: a type tag, a
//! protocol version and a sequence number. The remainder of the packet is a
//! type-specific record of fixed size. All multi-byte integers travel in
//! network (big-endian) order; [`hton_packet`] and [`ntoh_packet`] are the only
//! places where that conversion happens.
//!
//! Fixed sizes are looked up through [`packet_size`], which is indexed by the
//! type tag. A buffer whose length disagrees with the size for its tag is
//! malformed and never reaches a handler.

use bincode::Options;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::error::WireError;

pub const PROTOCOL_VERSION: u8 = 1;

pub const ACKPKT: u8 = 0;
pub const LOGREQ: u8 = 1;
pub const ACTREQ: u8 = 2;
pub const POSUPD: u8 = 3;
pub const SRVNOT: u8 = 4;
pub const PNGPKT: u8 = 5;
pub const LGTREQ: u8 = 6;
pub const SRVKEY: u8 = 7;
pub const OBJDEL: u8 = 8;

pub const HEADER_SIZE: usize = 10;
pub const NAME_LEN: usize = 64;
pub const PUBKEY_LEN: usize = 256;
pub const IV_LEN: usize = 16;
pub const ADDR_LEN: usize = 46;

/// Access levels carried in login and logout acknowledgements
pub const ACCESS_NONE: u64 = 1;
pub const ACCESS_VIEW: u64 = 2;
pub const ACCESS_MOVE: u64 = 3;
pub const ACCESS_MODIFY: u64 = 4;

/// Position fields carry centimetres
pub const POSITION_SCALE: f64 = 100.0;
/// Orientation and look vectors carry ten-thousandths
pub const ORIENTATION_SCALE: f64 = 10000.0;

/// Fixed byte size of each packet type, indexed by type tag
const PACKET_SIZES: [usize; 9] = [
    HEADER_SIZE + 1 + 8 * 4,                       // ACKPKT
    HEADER_SIZE + NAME_LEN * 2 + PUBKEY_LEN,       // LOGREQ
    HEADER_SIZE + 8 + 2 + 1 + 8 * 3 + 8 + 8 * 3,   // ACTREQ
    HEADER_SIZE + 8 + 2 + 8 * 3 + 4 * 4 + 4 * 3,   // POSUPD
    HEADER_SIZE + 1 + ADDR_LEN + 2 + 1,            // SRVNOT
    HEADER_SIZE,                                   // PNGPKT
    HEADER_SIZE,                                   // LGTREQ
    HEADER_SIZE + PUBKEY_LEN + IV_LEN,             // SRVKEY
    HEADER_SIZE + 8,                               // OBJDEL
];

/// Returns the fixed wire size for a type tag
pub fn packet_size(kind: u8) -> Result<usize, WireError> {
    PACKET_SIZES
        .get(kind as usize)
        .copied()
        .ok_or(WireError::UnknownType(kind))
}

/// Human readable packet type name for log lines
pub fn type_name(kind: u8) -> &'static str {
    match kind {
        ACKPKT => "ACKPKT",
        LOGREQ => "LOGREQ",
        ACTREQ => "ACTREQ",
        POSUPD => "POSUPD",
        SRVNOT => "SRVNOT",
        PNGPKT => "PNGPKT",
        LGTREQ => "LGTREQ",
        SRVKEY => "SRVKEY",
        OBJDEL => "OBJDEL",
        _ => "UNKNOWN",
    }
}

pub fn access_name(level: u64) -> &'static str {
    match level {
        ACCESS_NONE => "ACCESS_NONE",
        ACCESS_VIEW => "ACCESS_VIEW",
        ACCESS_MOVE => "ACCESS_MOVE",
        ACCESS_MODIFY => "ACCESS_MODIFY",
        _ => "unknown",
    }
}

/// Handshake packets are never covered by the session cipher
pub fn is_handshake(kind: u8) -> bool {
    kind == LOGREQ || kind == SRVKEY
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Common prefix of every packet
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: u8,
    pub version: u8,
    pub sequence: u64,
}

impl Header {
    pub fn new(kind: u8) -> Self {
        Self {
            kind,
            version: PROTOCOL_VERSION,
            sequence: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AckPacket {
    pub header: Header,
    pub request: u8,
    pub misc: [u64; 4],
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub header: Header,
    #[serde(with = "BigArray")]
    pub username: [u8; NAME_LEN],
    #[serde(with = "BigArray")]
    pub charname: [u8; NAME_LEN],
    #[serde(with = "BigArray")]
    pub pubkey: [u8; PUBKEY_LEN],
}

impl LoginRequest {
    pub fn username(&self) -> String {
        read_fixed(&self.username)
    }

    pub fn charname(&self) -> String {
        read_fixed(&self.charname)
    }

    /// DER encoded public key, without the zero padding
    pub fn pubkey_der(&self) -> Option<&[u8]> {
        der_slice(&self.pubkey)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub header: Header,
    pub object_id: u64,
    pub action_id: u16,
    pub power_level: u8,
    pub x_pos_source: u64,
    pub y_pos_source: u64,
    pub z_pos_source: u64,
    pub dest_object_id: u64,
    pub x_pos_dest: i64,
    pub y_pos_dest: i64,
    pub z_pos_dest: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub header: Header,
    pub object_id: u64,
    pub frame_number: u16,
    pub x_pos: u64,
    pub y_pos: u64,
    pub z_pos: u64,
    pub w_orient: i32,
    pub x_orient: i32,
    pub y_orient: i32,
    pub z_orient: i32,
    pub x_look: i32,
    pub y_look: i32,
    pub z_look: i32,
}

impl PositionUpdate {
    /// Builds an update from world units, quantising to the wire scale
    pub fn from_world(
        object_id: u64,
        frame_number: u16,
        position: [f64; 3],
        orientation: [f64; 4],
        look: [f64; 3],
    ) -> Self {
        // Positions are unsigned on the wire; anything below the origin clamps.
        let pos = |v: f64| (v * POSITION_SCALE).round().max(0.0) as u64;
        let ori = |v: f64| (v * ORIENTATION_SCALE).round() as i32;

        Self {
            header: Header::new(POSUPD),
            object_id,
            frame_number,
            x_pos: pos(position[0]),
            y_pos: pos(position[1]),
            z_pos: pos(position[2]),
            w_orient: ori(orientation[0]),
            x_orient: ori(orientation[1]),
            y_orient: ori(orientation[2]),
            z_orient: ori(orientation[3]),
            x_look: ori(look[0]),
            y_look: ori(look[1]),
            z_look: ori(look[2]),
        }
    }

    /// Position in metres
    pub fn position(&self) -> [f64; 3] {
        [
            self.x_pos as f64 / POSITION_SCALE,
            self.y_pos as f64 / POSITION_SCALE,
            self.z_pos as f64 / POSITION_SCALE,
        ]
    }

    /// Orientation quaternion as (w, x, y, z)
    pub fn orientation(&self) -> [f64; 4] {
        [
            self.w_orient as f64 / ORIENTATION_SCALE,
            self.x_orient as f64 / ORIENTATION_SCALE,
            self.y_orient as f64 / ORIENTATION_SCALE,
            self.z_orient as f64 / ORIENTATION_SCALE,
        ]
    }

    pub fn look(&self) -> [f64; 3] {
        [
            self.x_look as f64 / ORIENTATION_SCALE,
            self.y_look as f64 / ORIENTATION_SCALE,
            self.z_look as f64 / ORIENTATION_SCALE,
        ]
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerNotice {
    pub header: Header,
    pub ipproto: u8,
    #[serde(with = "BigArray")]
    pub addr: [u8; ADDR_LEN],
    pub port: u16,
    pub direction: u8,
}

impl ServerNotice {
    pub fn addr(&self) -> String {
        read_fixed(&self.addr)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerKey {
    pub header: Header,
    #[serde(with = "BigArray")]
    pub pubkey: [u8; PUBKEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl ServerKey {
    pub fn pubkey_der(&self) -> Option<&[u8]> {
        der_slice(&self.pubkey)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ObjectDelete {
    pub header: Header,
    pub object_id: u64,
}

/// One packet of any type
///
/// Each variant embeds the shared [`Header`] as its first field, so the tag,
/// version and sequence are reachable without knowing the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ack(AckPacket),
    Login(LoginRequest),
    Action(ActionRequest),
    Position(PositionUpdate),
    Notice(ServerNotice),
    Ping(Header),
    Logout(Header),
    ServerKey(ServerKey),
    ObjectDelete(ObjectDelete),
}

impl Packet {
    pub fn ack(request: u8, misc: [u64; 4]) -> Self {
        Packet::Ack(AckPacket {
            header: Header::new(ACKPKT),
            request,
            misc,
        })
    }

    pub fn login(username: &str, charname: &str, pubkey_der: &[u8]) -> Result<Self, WireError> {
        let mut request = LoginRequest {
            header: Header::new(LOGREQ),
            username: [0; NAME_LEN],
            charname: [0; NAME_LEN],
            pubkey: [0; PUBKEY_LEN],
        };
        write_fixed(&mut request.username, username);
        write_fixed(&mut request.charname, charname);
        copy_key("pubkey", &mut request.pubkey, pubkey_der)?;
        Ok(Packet::Login(request))
    }

    pub fn action(
        object_id: u64,
        action_id: u16,
        power_level: u8,
        source: [u64; 3],
        dest_object_id: u64,
        dest: [i64; 3],
    ) -> Self {
        Packet::Action(ActionRequest {
            header: Header::new(ACTREQ),
            object_id,
            action_id,
            power_level,
            x_pos_source: source[0],
            y_pos_source: source[1],
            z_pos_source: source[2],
            dest_object_id,
            x_pos_dest: dest[0],
            y_pos_dest: dest[1],
            z_pos_dest: dest[2],
        })
    }

    pub fn notice(ipproto: u8, addr: &str, port: u16, direction: u8) -> Self {
        let mut notice = ServerNotice {
            header: Header::new(SRVNOT),
            ipproto,
            addr: [0; ADDR_LEN],
            port,
            direction,
        };
        write_fixed(&mut notice.addr, addr);
        Packet::Notice(notice)
    }

    pub fn ping() -> Self {
        Packet::Ping(Header::new(PNGPKT))
    }

    pub fn logout() -> Self {
        Packet::Logout(Header::new(LGTREQ))
    }

    pub fn server_key(pubkey_der: &[u8], iv: [u8; IV_LEN]) -> Result<Self, WireError> {
        let mut key = ServerKey {
            header: Header::new(SRVKEY),
            pubkey: [0; PUBKEY_LEN],
            iv,
        };
        copy_key("pubkey", &mut key.pubkey, pubkey_der)?;
        Ok(Packet::ServerKey(key))
    }

    pub fn object_delete(object_id: u64) -> Self {
        Packet::ObjectDelete(ObjectDelete {
            header: Header::new(OBJDEL),
            object_id,
        })
    }

    pub fn header(&self) -> &Header {
        match self {
            Packet::Ack(p) => &p.header,
            Packet::Login(p) => &p.header,
            Packet::Action(p) => &p.header,
            Packet::Position(p) => &p.header,
            Packet::Notice(p) => &p.header,
            Packet::Ping(h) | Packet::Logout(h) => h,
            Packet::ServerKey(p) => &p.header,
            Packet::ObjectDelete(p) => &p.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            Packet::Ack(p) => &mut p.header,
            Packet::Login(p) => &mut p.header,
            Packet::Action(p) => &mut p.header,
            Packet::Position(p) => &mut p.header,
            Packet::Notice(p) => &mut p.header,
            Packet::Ping(h) | Packet::Logout(h) => h,
            Packet::ServerKey(p) => &mut p.header,
            Packet::ObjectDelete(p) => &mut p.header,
        }
    }

    pub fn kind(&self) -> u8 {
        self.header().kind
    }

    pub fn sequence(&self) -> u64 {
        self.header().sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.header_mut().sequence = sequence;
    }

    /// Encodes into a freshly allocated buffer of exactly the fixed size
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = vec![0u8; packet_size(self.kind())?];
        hton_packet(self, &mut buf)?;
        Ok(buf)
    }

    /// Decodes a buffer that must be exactly the fixed size for its tag
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let kind = *buf.first().ok_or(WireError::Truncated {
            kind: 0,
            expected: HEADER_SIZE,
            actual: 0,
        })?;
        let expected = packet_size(kind)?;
        if buf.len() != expected {
            return Err(WireError::SizeMismatch {
                kind,
                expected,
                actual: buf.len(),
            });
        }
        ntoh_packet(buf)
    }
}

/// Writes `packet` into `buf` in network byte order
///
/// Fails without touching `buf` when it is shorter than the fixed size for
/// the packet's type. Returns the number of bytes written.
pub fn hton_packet(packet: &Packet, buf: &mut [u8]) -> Result<usize, WireError> {
    let kind = packet.kind();
    let size = packet_size(kind)?;
    if buf.len() < size {
        return Err(WireError::Truncated {
            kind,
            expected: size,
            actual: buf.len(),
        });
    }

    let out = &mut buf[..size];
    let options = wire_options();
    match packet {
        Packet::Ack(p) => options.serialize_into(out, p)?,
        Packet::Login(p) => options.serialize_into(out, p)?,
        Packet::Action(p) => options.serialize_into(out, p)?,
        Packet::Position(p) => options.serialize_into(out, p)?,
        Packet::Notice(p) => options.serialize_into(out, p)?,
        Packet::Ping(h) | Packet::Logout(h) => options.serialize_into(out, h)?,
        Packet::ServerKey(p) => options.serialize_into(out, p)?,
        Packet::ObjectDelete(p) => options.serialize_into(out, p)?,
    }
    Ok(size)
}

/// Reads a packet from network byte order
///
/// The tag is read first; the buffer must hold at least the fixed size for
/// that tag. Bytes past the fixed size are ignored.
pub fn ntoh_packet(buf: &[u8]) -> Result<Packet, WireError> {
    let kind = *buf.first().ok_or(WireError::Truncated {
        kind: 0,
        expected: HEADER_SIZE,
        actual: 0,
    })?;
    let size = packet_size(kind)?;
    if buf.len() < size {
        return Err(WireError::Truncated {
            kind,
            expected: size,
            actual: buf.len(),
        });
    }

    let input = &buf[..size];
    let options = wire_options();
    let packet = match kind {
        ACKPKT => Packet::Ack(options.deserialize(input)?),
        LOGREQ => Packet::Login(options.deserialize(input)?),
        ACTREQ => Packet::Action(options.deserialize(input)?),
        POSUPD => Packet::Position(options.deserialize(input)?),
        SRVNOT => Packet::Notice(options.deserialize(input)?),
        PNGPKT => Packet::Ping(options.deserialize(input)?),
        LGTREQ => Packet::Logout(options.deserialize(input)?),
        SRVKEY => Packet::ServerKey(options.deserialize(input)?),
        OBJDEL => Packet::ObjectDelete(options.deserialize(input)?),
        other => return Err(WireError::UnknownType(other)),
    };
    Ok(packet)
}

/// Copies `value` into a NUL padded fixed-width field, truncating if needed
pub fn write_fixed(field: &mut [u8], value: &str) {
    field.fill(0);
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

/// Reads a NUL padded fixed-width field
pub fn read_fixed(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn copy_key(field: &'static str, dst: &mut [u8], der: &[u8]) -> Result<(), WireError> {
    if der.len() > dst.len() {
        return Err(WireError::FieldTooLong {
            field,
            max: dst.len(),
            actual: der.len(),
        });
    }
    dst.fill(0);
    dst[..der.len()].copy_from_slice(der);
    Ok(())
}

/// Length of the outer DER SEQUENCE at the start of `field`
fn der_slice(field: &[u8]) -> Option<&[u8]> {
    if field.len() < 2 || field[0] != 0x30 {
        return None;
    }
    let (header, body) = match field[1] {
        len @ 0..=0x7f => (2, len as usize),
        0x81 => (3, *field.get(2)? as usize),
        0x82 => (4, u16::from_be_bytes([*field.get(2)?, *field.get(3)?]) as usize),
        _ => return None,
    };
    field.get(..header + body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn sample_packets() -> Vec<Packet> {
        let der = [0x30, 0x03, 0x01, 0x02, 0x03];
        vec![
            Packet::ack(LOGREQ, [3, 7, u64::MAX, 0]),
            Packet::login("alice", "Alice the Bold", &der).unwrap(),
            Packet::action(42, 3, 200, [100, 200, 300], 77, [-5, 0, i64::MAX]),
            Packet::Position(PositionUpdate::from_world(
                9,
                513,
                [1.5, 2.0, 0.0],
                [1.0, 0.0, -0.5, 0.25],
                [0.0, -1.0, 0.0],
            )),
            Packet::notice(6, "2001:db8::1", 4100, 1),
            Packet::ping(),
            Packet::logout(),
            Packet::server_key(&der, [0xAB; IV_LEN]).unwrap(),
            Packet::object_delete(12345),
        ]
    }

    #[test]
    fn test_packet_sizes() {
        assert_eq!(packet_size(ACKPKT).unwrap(), 43);
        assert_eq!(packet_size(LOGREQ).unwrap(), 394);
        assert_eq!(packet_size(ACTREQ).unwrap(), 77);
        assert_eq!(packet_size(POSUPD).unwrap(), 72);
        assert_eq!(packet_size(SRVNOT).unwrap(), 60);
        assert_eq!(packet_size(PNGPKT).unwrap(), HEADER_SIZE);
        assert_eq!(packet_size(LGTREQ).unwrap(), HEADER_SIZE);
        assert_eq!(packet_size(SRVKEY).unwrap(), 282);
        assert_eq!(packet_size(OBJDEL).unwrap(), 18);
    }

    #[test]
    fn test_encoded_length_matches_table() {
        for packet in sample_packets() {
            let bytes = packet.to_bytes().unwrap();
            assert_eq!(bytes.len(), packet_size(packet.kind()).unwrap());
            assert_eq!(bytes[0], packet.kind());
            assert_eq!(bytes[1], PROTOCOL_VERSION);
        }
    }

    #[test]
    fn test_roundtrip_all_types() {
        for mut packet in sample_packets() {
            packet.set_sequence(0x0102_0304_0506_0708);
            let bytes = packet.to_bytes().unwrap();
            let decoded = ntoh_packet(&bytes).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_header_is_big_endian() {
        let mut packet = Packet::ping();
        packet.set_sequence(0x0102_0304_0506_0708);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes, vec![PNGPKT, 1, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_ack_fields_big_endian() {
        let bytes = Packet::ack(ACTREQ, [1, 0, 0, 0]).to_bytes().unwrap();
        assert_eq!(bytes[HEADER_SIZE], ACTREQ);
        assert_eq!(&bytes[HEADER_SIZE + 1..HEADER_SIZE + 9], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_hton_short_buffer_untouched() {
        for packet in sample_packets() {
            let size = packet_size(packet.kind()).unwrap();
            let mut buf = vec![0xEEu8; size - 1];
            assert!(hton_packet(&packet, &mut buf).is_err());
            assert!(buf.iter().all(|&b| b == 0xEE));
        }
    }

    #[test]
    fn test_ntoh_short_buffer_rejected() {
        for packet in sample_packets() {
            let bytes = packet.to_bytes().unwrap();
            let short = &bytes[..bytes.len() - 1];
            match ntoh_packet(short) {
                Err(WireError::Truncated { kind, .. }) => assert_eq!(kind, packet.kind()),
                other => panic!("expected truncation error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(packet_size(9), Err(WireError::UnknownType(9))));
        assert!(matches!(packet_size(255), Err(WireError::UnknownType(255))));

        let mut buf = vec![0u8; 512];
        buf[0] = 200;
        assert!(matches!(ntoh_packet(&buf), Err(WireError::UnknownType(200))));
        assert!(matches!(Packet::from_bytes(&buf), Err(WireError::UnknownType(200))));
    }

    #[test]
    fn test_from_bytes_requires_exact_size() {
        let mut bytes = Packet::object_delete(5).to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(WireError::SizeMismatch { kind: OBJDEL, expected: 18, actual: 19 })
        ));
        // ntoh only needs the minimum
        assert!(ntoh_packet(&bytes).is_ok());
    }

    #[test]
    fn test_empty_buffer_rejected() {
        assert!(ntoh_packet(&[]).is_err());
        assert!(Packet::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_position_decode_scale() {
        let update = PositionUpdate {
            header: Header::new(POSUPD),
            object_id: 1,
            frame_number: 0,
            x_pos: 150,
            y_pos: 200,
            z_pos: 0,
            w_orient: 10000,
            x_orient: 0,
            y_orient: 0,
            z_orient: 0,
            x_look: 0,
            y_look: 0,
            z_look: 0,
        };
        let [x, y, z] = update.position();
        assert_approx_eq!(x, 1.50, 1e-9);
        assert_approx_eq!(y, 2.00, 1e-9);
        assert_approx_eq!(z, 0.00, 1e-9);
        assert_approx_eq!(update.orientation()[0], 1.0, 1e-9);
    }

    #[test]
    fn test_position_negative_clamps_to_origin() {
        let update = PositionUpdate::from_world(1, 0, [-3.0, 1.234, 0.0], [1.0, 0.0, 0.0, 0.0], [0.0; 3]);
        assert_eq!(update.x_pos, 0);
        assert_eq!(update.y_pos, 123);
    }

    #[test]
    fn test_fixed_text_fields() {
        let long = "x".repeat(NAME_LEN + 10);
        match Packet::login(&long, "c", &[0x30, 0x00]).unwrap() {
            Packet::Login(request) => {
                assert_eq!(request.username().len(), NAME_LEN);
                assert_eq!(request.charname(), "c");
            }
            _ => panic!("Wrong packet type"),
        }
    }

    #[test]
    fn test_pubkey_too_long_rejected() {
        let der = vec![0u8; PUBKEY_LEN + 1];
        assert!(matches!(
            Packet::login("a", "b", &der),
            Err(WireError::FieldTooLong { field: "pubkey", .. })
        ));
    }

    #[test]
    fn test_der_slice_strips_padding() {
        let mut field = [0u8; PUBKEY_LEN];
        field[..5].copy_from_slice(&[0x30, 0x03, 1, 2, 3]);
        assert_eq!(der_slice(&field), Some(&field[..5]));

        field[0] = 0x31;
        assert_eq!(der_slice(&field), None);

        let mut long_form = [0u8; PUBKEY_LEN];
        long_form[..3].copy_from_slice(&[0x30, 0x81, 0x90]);
        assert_eq!(der_slice(&long_form).map(|s| s.len()), Some(3 + 0x90));

        let mut overflow = [0u8; PUBKEY_LEN];
        overflow[..4].copy_from_slice(&[0x30, 0x82, 0x10, 0x00]);
        assert_eq!(der_slice(&overflow), None);
    }

    #[test]
    fn test_access_names() {
        assert_eq!(access_name(ACCESS_MOVE), "ACCESS_MOVE");
        assert_eq!(access_name(ACCESS_NONE), "ACCESS_NONE");
        assert_eq!(access_name(0), "unknown");
        assert_eq!(access_name(5), "unknown");
    }

    #[test]
    fn test_handshake_types() {
        assert!(is_handshake(LOGREQ));
        assert!(is_handshake(SRVKEY));
        assert!(!is_handshake(ACKPKT));
        assert!(!is_handshake(PNGPKT));
    }
}

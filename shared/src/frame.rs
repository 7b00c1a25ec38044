//! Sealing packets into datagrams and opening them again
//!
//! A sealed frame keeps the 10-byte header in the clear so the receiver can
//! read the type tag before deciding whether to decrypt. With a session in
//! place every non-handshake body is replaced by its AES-256-CBC ciphertext;
//! header-only packets carry no body and go out as plain headers.

use crate::crypto::SessionCipher;
use crate::error::{FrameError, WireError};
use crate::proto::{is_handshake, packet_size, Packet, HEADER_SIZE};

/// Largest frame either side will ever produce
pub const MAX_FRAME: usize = 512;

/// Serialises `packet` and encrypts its body when a session is established
pub fn seal(packet: &Packet, session: Option<&SessionCipher>) -> Result<Vec<u8>, FrameError> {
    let bytes = packet.to_bytes()?;
    let session = match session {
        Some(session) if !is_handshake(packet.kind()) && bytes.len() > HEADER_SIZE => session,
        _ => return Ok(bytes),
    };

    let mut frame = Vec::with_capacity(MAX_FRAME);
    frame.extend_from_slice(&bytes[..HEADER_SIZE]);
    frame.extend_from_slice(&session.encrypt(&bytes[HEADER_SIZE..])?);
    Ok(frame)
}

/// Decrypts (when needed) and decodes one received frame
pub fn open(frame: &[u8], session: Option<&SessionCipher>) -> Result<Packet, FrameError> {
    if frame.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            kind: frame.first().copied().unwrap_or(0),
            expected: HEADER_SIZE,
            actual: frame.len(),
        }
        .into());
    }

    let kind = frame[0];
    let expected = packet_size(kind)?;
    let session = match session {
        Some(session) if !is_handshake(kind) && expected > HEADER_SIZE => session,
        _ => return Ok(Packet::from_bytes(frame)?),
    };

    let body = session.decrypt(&frame[HEADER_SIZE..])?;
    let mut plain = Vec::with_capacity(HEADER_SIZE + body.len());
    plain.extend_from_slice(&frame[..HEADER_SIZE]);
    plain.extend_from_slice(&body);
    Ok(Packet::from_bytes(&plain)?)
}

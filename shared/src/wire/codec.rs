//! Packet header/body framing, compression, and encryption layering.
//!
//! Encode order: serialize body, compress, encrypt, size check. Decode
//! mirrors it: decrypt, decompress, then verify the header-declared body
//! length. A packet that demands a cipher the session has not established is
//! a decode error; plaintext is never silently passed through.

use bytes::{BufMut, BytesMut};

use crate::{
    constants::{COMPRESSION_LEVEL, DEFAULT_MAX_PACKET_SIZE, PACKET_HEADER_SIZE},
    crypto::{EncryptionContext, EncryptionState},
    wire::{
        error::{DecodeError, EncodeError},
        flags::PacketFlags,
        packet::Packet,
    },
};

/// Knobs shared by the encode and decode paths.
#[derive(Clone, Debug)]
pub struct CodecConfig {
    /// Fixed ceiling on the encoded size of one packet, enforced to bound
    /// memory use.
    pub max_packet_size: usize,
    /// zstd level applied to bodies flagged Compressed.
    pub compression_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            compression_level: COMPRESSION_LEVEL,
        }
    }
}

/// Encode a packet for the wire: `[header][processed body]`. Stream
/// transports add their own 4-byte length prefix on top.
pub fn encode(
    packet: &Packet,
    crypto: &mut EncryptionContext,
    config: &CodecConfig,
) -> Result<Vec<u8>, EncodeError> {
    let mut flags = packet.header.flags;
    flags.validate()?;

    let declared_size = packet.body.len() as i32;
    let mut body = packet.body.clone();

    if flags.compressed() {
        body = zstd::bulk::compress(&body, config.compression_level).map_err(|_| {
            EncodeError::CompressionFailed {
                body_size: body.len(),
            }
        })?;
    }

    if !flags.do_not_encrypt() {
        if !flags.asymmetrical() && !flags.symmetrical() {
            // Select the strongest cipher the handshake has reached
            if crypto.state().symmetric_ready() && crypto.has_symmetric_key() {
                flags = flags.with(PacketFlags::SYMMETRICAL);
            } else if crypto.state().asymmetric_ready() && crypto.has_peer_key() {
                flags = flags.with(PacketFlags::ASYMMETRICAL);
            }
        }
        if flags.symmetrical() {
            body = crypto.encrypt_symmetric(&body)?;
        } else if flags.asymmetrical() {
            body = crypto.encrypt_asymmetric(&body)?;
        }
    } else {
        flags = flags
            .without(PacketFlags::ASYMMETRICAL)
            .without(PacketFlags::SYMMETRICAL);
    }

    let total = PACKET_HEADER_SIZE + body.len();
    if total > config.max_packet_size {
        return Err(EncodeError::TooLarge {
            size: total,
            max: config.max_packet_size,
        });
    }

    let mut header = packet.header;
    header.flags = flags;
    header.declared_size = declared_size;

    let mut buf = BytesMut::with_capacity(total);
    header.write(&mut buf);
    buf.put_slice(&body);
    Ok(buf.to_vec())
}

/// Decode one wire packet (without any stream length prefix).
pub fn decode(
    bytes: &[u8],
    crypto: &mut EncryptionContext,
    config: &CodecConfig,
) -> Result<Packet, DecodeError> {
    if bytes.len() > config.max_packet_size {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            max: config.max_packet_size,
        });
    }

    let mut cursor = bytes;
    let header = crate::wire::header::PacketHeader::read(&mut cursor)?;
    let mut body = cursor.to_vec();

    if header.flags.symmetrical() {
        if !crypto.state().symmetric_ready() || !crypto.has_symmetric_key() {
            return Err(DecodeError::EncryptionNotReady {
                required: "symmetric",
            });
        }
        body = crypto.decrypt_symmetric(&body)?;
    } else if header.flags.asymmetrical() {
        if !crypto.state().asymmetric_ready() && crypto.state() != EncryptionState::Handshake {
            return Err(DecodeError::EncryptionNotReady {
                required: "asymmetric",
            });
        }
        body = crypto.decrypt_asymmetric(&body)?;
    }

    if header.flags.compressed() {
        let declared = header.declared_size as usize;
        if declared > config.max_packet_size {
            return Err(DecodeError::TooLarge {
                size: declared,
                max: config.max_packet_size,
            });
        }
        body = zstd::bulk::decompress(&body, declared).map_err(|_| {
            DecodeError::DecompressionFailed {
                body_size: body.len(),
            }
        })?;
    }

    if body.len() != header.declared_size as usize {
        return Err(DecodeError::SizeMismatch {
            declared: header.declared_size as usize,
            actual: body.len(),
        });
    }

    Ok(Packet { header, body })
}

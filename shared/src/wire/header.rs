use bytes::{Buf, BufMut};

use crate::{
    constants::PACKET_HEADER_SIZE,
    types::{CustomId, SessionId},
    wire::{error::HeaderError, flags::PacketFlags, packet_kind::PacketKind},
};

/// The fixed header preceding every packet body.
///
/// On the wire: `kind: u8, flags: u8, target_id: i32, custom_id: i32,
/// declared_size: i32`, all big-endian, 14 bytes total. `target_id == 0`
/// addresses the session itself rather than a replicated object.
/// `declared_size` is the length of the plaintext, uncompressed body and must
/// match it exactly after decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub flags: PacketFlags,
    pub target_id: SessionId,
    pub custom_id: CustomId,
    pub declared_size: i32,
}

impl PacketHeader {
    pub fn new(kind: PacketKind, flags: PacketFlags, target_id: SessionId) -> Self {
        Self {
            kind,
            flags,
            target_id,
            custom_id: 0,
            declared_size: 0,
        }
    }

    /// Whether this packet is addressed to the session itself, as opposed to
    /// a replicated object.
    pub fn session_addressed(&self) -> bool {
        self.target_id == 0
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind.to_u8());
        buf.put_u8(self.flags.bits());
        buf.put_i32(self.target_id);
        buf.put_i32(self.custom_id);
        buf.put_i32(self.declared_size);
    }

    pub fn read(buf: &mut impl Buf) -> Result<Self, HeaderError> {
        if buf.remaining() < PACKET_HEADER_SIZE {
            return Err(HeaderError::Truncated {
                available: buf.remaining(),
            });
        }
        let kind = PacketKind::from_u8(buf.get_u8())?;
        let flags = PacketFlags::from_bits(buf.get_u8())?;
        let target_id = buf.get_i32();
        let custom_id = buf.get_i32();
        let declared_size = buf.get_i32();
        if declared_size < 0 {
            return Err(HeaderError::NegativeSize {
                size: declared_size,
            });
        }
        Ok(Self {
            kind,
            flags,
            target_id,
            custom_id,
            declared_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_round_trip() {
        let header = PacketHeader {
            kind: PacketKind::NetworkInvocation,
            flags: PacketFlags::new().with(PacketFlags::COMPRESSED),
            target_id: 42,
            custom_id: -7,
            declared_size: 1234,
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);
        let decoded = PacketHeader::read(&mut buf.freeze()).expect("decodes");
        assert_eq!(decoded, header);
    }

    #[test]
    fn truncated_header_is_an_error() {
        let mut buf = bytes::Bytes::from_static(&[5, 0, 0]);
        assert!(PacketHeader::read(&mut buf).is_err());
    }

    #[test]
    fn negative_declared_size_is_an_error() {
        let header = PacketHeader {
            kind: PacketKind::None,
            flags: PacketFlags::new(),
            target_id: 0,
            custom_id: 0,
            declared_size: 0,
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        // Corrupt the declared size to a negative value
        let mut bytes = buf.to_vec();
        bytes[10] = 0xFF;
        assert!(PacketHeader::read(&mut &bytes[..]).is_err());
    }
}

use crate::wire::error::PacketFlagsError;

/// The header flag bitset. The two encryption bits are mutually exclusive
/// with each other, and meaningless combined with DO_NOT_ENCRYPT.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const COMPRESSED: u8 = 0x01;
    pub const ASYMMETRICAL: u8 = 0x02;
    pub const SYMMETRICAL: u8 = 0x04;
    pub const PRIORITY: u8 = 0x08;
    pub const DO_NOT_ENCRYPT: u8 = 0x10;

    const KNOWN: u8 = Self::COMPRESSED
        | Self::ASYMMETRICAL
        | Self::SYMMETRICAL
        | Self::PRIORITY
        | Self::DO_NOT_ENCRYPT;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Result<Self, PacketFlagsError> {
        if bits & !Self::KNOWN != 0 {
            return Err(PacketFlagsError::UnknownBits { bits });
        }
        let flags = Self(bits);
        flags.validate()?;
        Ok(flags)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn with(mut self, flag: u8) -> Self {
        self.0 |= flag;
        self
    }

    pub fn without(mut self, flag: u8) -> Self {
        self.0 &= !flag;
        self
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn compressed(self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    pub fn asymmetrical(self) -> bool {
        self.contains(Self::ASYMMETRICAL)
    }

    pub fn symmetrical(self) -> bool {
        self.contains(Self::SYMMETRICAL)
    }

    pub fn priority(self) -> bool {
        self.contains(Self::PRIORITY)
    }

    pub fn do_not_encrypt(self) -> bool {
        self.contains(Self::DO_NOT_ENCRYPT)
    }

    /// Check the internal consistency rules for the encryption bits.
    pub fn validate(self) -> Result<(), PacketFlagsError> {
        if self.asymmetrical() && self.symmetrical() {
            return Err(PacketFlagsError::ConflictingEncryption { bits: self.0 });
        }
        if (self.asymmetrical() || self.symmetrical()) && self.do_not_encrypt() {
            return Err(PacketFlagsError::EncryptionSuppressed { bits: self.0 });
        }
        Ok(())
    }
}

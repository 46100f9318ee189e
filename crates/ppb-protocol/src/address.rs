//! PPB address bitmask
//!
//! Every unit behind the bridge owns one bit of a 16-bit mask: bit *i*
//! selects device *i + 1*. Setting several bits addresses several units with
//! one request, and `0xFFFF` addresses all of them.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Number of units a bridge can address
pub const MAX_DEVICES: u8 = 16;

/// 16-bit device address mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address(pub u16);

impl Address {
    /// All units at once
    pub const BROADCAST: Address = Address(0xFFFF);

    /// Address of a single device, numbered 1..=16
    pub fn device(number: u8) -> Option<Self> {
        if (1..=MAX_DEVICES).contains(&number) {
            Some(Self(1 << (number - 1)))
        } else {
            None
        }
    }

    /// Raw mask value
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Whether no bit is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether exactly one device is addressed
    pub fn is_single(&self) -> bool {
        self.0.count_ones() == 1
    }

    /// Whether every device is addressed
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Number of devices selected by the mask
    pub fn device_count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Device number (1..=16) of a single-bit address
    pub fn index(&self) -> Option<u8> {
        if self.is_single() {
            Some(self.0.trailing_zeros() as u8 + 1)
        } else {
            None
        }
    }

    /// Whether `other`'s bits are all contained in this mask
    pub fn contains(&self, other: Address) -> bool {
        !other.is_empty() && self.0 & other.0 == other.0
    }

    /// Iterate over the single-device addresses contained in this mask
    pub fn devices(&self) -> impl Iterator<Item = Address> + '_ {
        (0..MAX_DEVICES)
            .map(|bit| 1u16 << bit)
            .filter(move |mask| self.0 & mask != 0)
            .map(Address)
    }

    /// Little-endian wire bytes
    pub fn to_le_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Read from little-endian wire bytes
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }
}

impl From<u16> for Address {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    /// Accepts `0x`-prefixed hex masks or plain decimal masks
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => trimmed.parse::<u16>(),
        };
        parsed
            .map(Address)
            .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))
    }
}

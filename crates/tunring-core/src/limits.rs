//! Fixed limits of the driver ABI and the checks built on them.

use crate::error::{TunError, TunResult};

/// Maximum adapter name or tunnel type length, in UTF-16 code units
/// including the NUL terminator.
pub const MAX_POOL: usize = 256;

/// Largest IP packet that fits in a single ring slot.
pub const MAX_IP_PACKET_SIZE: u32 = 0xFFFF;

/// Inclusive bounds on the ring capacity a driver accepts, plus the value
/// used when the caller does not pick one. The unit is driver-defined
/// (bytes for Wintun, packet slots for the in-memory driver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityBounds {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl CapacityBounds {
    /// Wintun's ring limits: 128 KiB to 64 MiB.
    pub const WINTUN: CapacityBounds = CapacityBounds {
        min: 0x2_0000,
        max: 0x400_0000,
        default: 0x40_0000,
    };

    /// Check `capacity` and return it, or an `InvalidArgument` naming the range.
    pub fn validate(&self, capacity: u32) -> TunResult<u32> {
        if !capacity.is_power_of_two() {
            return Err(TunError::InvalidArgument(format!(
                "ring capacity {capacity} is not a power of two"
            )));
        }
        if !(self.min..=self.max).contains(&capacity) {
            return Err(TunError::InvalidArgument(format!(
                "ring capacity {capacity} not in [{},{}]",
                self.min, self.max
            )));
        }
        Ok(capacity)
    }
}

/// Encode `s` as NUL-terminated UTF-16, as the driver ABI expects.
pub fn encode_utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Validate an adapter name or tunnel type.
pub fn validate_pool_string(what: &str, value: &str) -> TunResult<()> {
    if value.is_empty() {
        return Err(TunError::InvalidArgument(format!("{what} is empty")));
    }
    if value.contains('\0') {
        return Err(TunError::InvalidArgument(format!("{what} contains NUL")));
    }
    if encode_utf16(value).len() > MAX_POOL {
        return Err(TunError::InvalidArgument(format!("{what} too long")));
    }
    Ok(())
}

/// Validate a requested send packet size.
pub fn validate_packet_size(size: usize) -> TunResult<u32> {
    if size == 0 || size > MAX_IP_PACKET_SIZE as usize {
        return Err(TunError::InvalidArgument(format!(
            "packet size {size} not in [1,{MAX_IP_PACKET_SIZE}]"
        )));
    }
    Ok(size as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wintun_bounds() {
        let b = CapacityBounds::WINTUN;
        assert!(b.validate(0x2_0000).is_ok());
        assert!(b.validate(0x400_0000).is_ok());
        assert!(b.validate(b.default).is_ok());
        assert!(b.validate(0x1_0000).is_err());
        assert!(b.validate(0x800_0000).is_err());
        assert!(b.validate(0x2_0001).is_err());
    }

    #[test]
    fn test_pool_strings() {
        assert!(validate_pool_string("name", "tun0").is_ok());
        assert!(validate_pool_string("name", "").is_err());
        assert!(validate_pool_string("name", "a\0b").is_err());
        assert!(validate_pool_string("name", &"x".repeat(MAX_POOL - 1)).is_ok());
        assert!(validate_pool_string("name", &"x".repeat(MAX_POOL)).is_err());
    }

    #[test]
    fn test_packet_size() {
        assert_eq!(validate_packet_size(100).unwrap(), 100);
        assert!(validate_packet_size(0).is_err());
        assert!(validate_packet_size(0x1_0000).is_err());
    }
}

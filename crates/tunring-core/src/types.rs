//! Plain value types exchanged with the driver.

use std::fmt;

/// Locally unique identifier of a network interface (NET_LUID).
///
/// Layout: bits 0..24 reserved, 24..48 the interface index, 48..64 the
/// IANA interface type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Luid(u64);

impl Luid {
    /// IANA `ifType` for a generic "other" interface, used by Wintun adapters.
    pub const IF_TYPE_PROP_VIRTUAL: u16 = 53;

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn from_parts(net_luid_index: u32, if_type: u16) -> Self {
        Self((((net_luid_index & 0x00FF_FFFF) as u64) << 24) | ((if_type as u64) << 48))
    }

    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn net_luid_index(&self) -> u32 {
        ((self.0 >> 24) & 0x00FF_FFFF) as u32
    }

    #[inline]
    pub const fn if_type(&self) -> u16 {
        (self.0 >> 48) as u16
    }
}

impl fmt::Display for Luid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Version of the running driver, decoded from its 32-bit form
/// (`major << 16 | minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriverVersion {
    pub major: u16,
    pub minor: u16,
}

impl DriverVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self {
            major: (raw >> 16) as u16,
            minor: (raw & 0xFFFF) as u16,
        }
    }

    pub const fn as_raw(&self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Requested adapter GUID.
///
/// Field split matches the Windows `GUID::from_u128` convention so the
/// registry form printed here is what the OS will report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(u128);

impl Guid {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub const fn data1(&self) -> u32 {
        (self.0 >> 96) as u32
    }

    pub const fn data2(&self) -> u16 {
        (self.0 >> 80) as u16
    }

    pub const fn data3(&self) -> u16 {
        (self.0 >> 64) as u16
    }

    pub const fn data4(&self) -> [u8; 8] {
        (self.0 as u64).to_be_bytes()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d4 = self.data4();
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1(),
            self.data2(),
            self.data3(),
            d4[0],
            d4[1],
            d4[2],
            d4[3],
            d4[4],
            d4[5],
            d4[6],
            d4[7]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_decode() {
        let v = DriverVersion::from_raw(0x0000_000E);
        assert_eq!(v, DriverVersion::new(0, 14));
        assert_eq!(v.to_string(), "0.14");

        let v = DriverVersion::from_raw(0x0001_0002);
        assert_eq!(v.to_string(), "1.2");
        assert_eq!(v.as_raw(), 0x0001_0002);
        assert!(DriverVersion::new(0, 14) < DriverVersion::new(1, 0));
    }

    #[test]
    fn test_luid_fields() {
        let luid = Luid::from_parts(7, Luid::IF_TYPE_PROP_VIRTUAL);
        assert_eq!(luid.net_luid_index(), 7);
        assert_eq!(luid.if_type(), 53);
        assert_eq!(Luid::from_raw(luid.as_raw()), luid);
    }

    #[test]
    fn test_guid_format() {
        let guid = Guid::from_u128(0xdeadbeef_cafe_babe_0123_456789abcdef);
        assert_eq!(guid.to_string(), "{DEADBEEF-CAFE-BABE-0123-456789ABCDEF}");
        assert_eq!(guid.data1(), 0xdeadbeef);
        assert_eq!(guid.data2(), 0xcafe);
        assert_eq!(guid.data3(), 0xbabe);
        assert_eq!(guid.data4(), [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
    }
}

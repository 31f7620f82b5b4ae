use core::fmt::{self, Display};

/// Identifier authority component of a SID (6-byte big-endian value).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SidIdentifierAuthority {
    /// Raw authority bytes, most significant first.
    pub value: [u8; 6],
}

impl SidIdentifierAuthority {
    /// Null authority (`S-1-0`).
    pub const NULL_AUTHORITY: Self = Self::from_low_byte(0);
    /// World authority (`S-1-1`).
    pub const WORLD_AUTHORITY: Self = Self::from_low_byte(1);
    /// Local authority (`S-1-2`).
    pub const LOCAL_AUTHORITY: Self = Self::from_low_byte(2);
    /// Creator authority (`S-1-3`).
    pub const CREATOR_AUTHORITY: Self = Self::from_low_byte(3);
    /// Non-unique authority (`S-1-4`).
    pub const NON_UNIQUE_AUTHORITY: Self = Self::from_low_byte(4);
    /// NT authority (`S-1-5`), the issuer of account and group SIDs.
    pub const NT_AUTHORITY: Self = Self::from_low_byte(5);
    /// Resource-manager authority (`S-1-9`).
    pub const RESOURCE_MANAGER_AUTHORITY: Self = Self::from_low_byte(9);

    const fn from_low_byte(byte: u8) -> Self {
        Self {
            value: [0, 0, 0, 0, 0, byte],
        }
    }

    /// The authority as an integer (the 6 bytes interpreted big-endian).
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        let mut be = [0u8; 8];
        let mut i = 0;
        while i < 6 {
            be[i + 2] = self.value[i];
            i += 1;
        }
        u64::from_be_bytes(be)
    }

    /// Stable name for well-known authorities, used as the
    /// `windowssubauthority` claim property value.
    ///
    /// Unknown authorities have no name and render as their decimal value.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        match self.as_u64() {
            0 => Some("NullAuthority"),
            1 => Some("WorldAuthority"),
            2 => Some("LocalAuthority"),
            3 => Some("CreatorAuthority"),
            4 => Some("NonUniqueAuthority"),
            5 => Some("NTAuthority"),
            9 => Some("ResourceManagerAuthority"),
            _ => None,
        }
    }
}

impl Display for SidIdentifierAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.as_u64()),
        }
    }
}

impl From<[u8; 6]> for SidIdentifierAuthority {
    fn from(value: [u8; 6]) -> Self {
        Self { value }
    }
}

impl From<SidIdentifierAuthority> for [u8; 6] {
    fn from(value: SidIdentifierAuthority) -> Self {
        value.value
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        pub fn arb_identifier_authority()
            (val in 1u8..=5)
            -> SidIdentifierAuthority {
            let mut bytes = [0u8; 6];
            bytes[5] = val;
            SidIdentifierAuthority::from(bytes)
        }
    }

    #[test]
    fn known_authority_names() {
        assert_eq!(
            SidIdentifierAuthority::NT_AUTHORITY.name(),
            Some("NTAuthority"),
            "NT authority must have a stable name"
        );
        assert_eq!(SidIdentifierAuthority::NT_AUTHORITY.to_string(), "NTAuthority");
        assert_eq!(SidIdentifierAuthority::WORLD_AUTHORITY.to_string(), "WorldAuthority");
    }

    #[test]
    fn unknown_authority_renders_decimal() {
        let authority = SidIdentifierAuthority::from([0, 0, 0, 0, 0, 42]);
        assert_eq!(authority.name(), None, "42 is not a well-known authority");
        assert_eq!(authority.to_string(), "42");
    }

    #[test]
    fn as_u64_is_big_endian() {
        let authority = SidIdentifierAuthority::from([0, 0, 0, 0, 1, 0]);
        assert_eq!(authority.as_u64(), 256, "authority bytes are big-endian");
    }
}

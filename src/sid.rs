//! Owned, immutable Windows **Security Identifier** (SID) value.
//!
//! Unlike the raw OS representation (a header followed by a variable tail of
//! sub-authorities behind a `PSID`), [`SecurityIdentifier`] is a plain value
//! type: it can be built from parts, parsed from the canonical `S-1-…` text
//! form, or decoded from the Windows binary layout, and compares by value.
//! Short SIDs (the common case) stay inline thanks to `SmallVec`.

use core::fmt::{self, Debug, Display};
use core::str::FromStr;

use smallvec::SmallVec;

use crate::SidIdentifierAuthority;
use crate::error::InvalidSidFormat;

/// SID revision; always 1 for every SID Windows issues.
pub const SID_REVISION: u8 = 1;
/// Minimum number of sub-authorities in a valid SID.
pub const MIN_SUB_AUTHORITY_COUNT: usize = 1;
/// Maximum number of sub-authorities in a valid SID.
pub const MAX_SUB_AUTHORITY_COUNT: usize = 15;

const HEADER_LEN: usize = 8; // revision + count + 6 authority bytes

/// Owned, immutable Windows Security Identifier.
///
/// Equality, ordering and hashing are value-based: two SIDs are equal iff
/// their binary forms are identical.
///
/// # Examples
/// ```rust
/// use win_token_identity::{SecurityIdentifier, SidIdentifierAuthority};
///
/// // BUILTIN\Administrators => S-1-5-32-544
/// let sid = SecurityIdentifier::new(SidIdentifierAuthority::NT_AUTHORITY, &[32, 544])
///     .expect("valid SID parts");
/// assert_eq!(sid.to_string(), "S-1-5-32-544");
/// assert_eq!(sid, "S-1-5-32-544".parse().unwrap());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecurityIdentifier {
    revision: u8,
    identifier_authority: SidIdentifierAuthority,
    sub_authorities: SmallVec<[u32; 8]>,
}

impl SecurityIdentifier {
    /// Creates a SID from an authority and 1..=15 sub-authorities.
    ///
    /// # Errors
    /// [`InvalidSidFormat`] when the sub-authority count is out of range.
    pub fn new<I: Into<SidIdentifierAuthority>>(
        identifier_authority: I,
        sub_authorities: &[u32],
    ) -> Result<Self, InvalidSidFormat> {
        if !(MIN_SUB_AUTHORITY_COUNT..=MAX_SUB_AUTHORITY_COUNT).contains(&sub_authorities.len()) {
            return Err(InvalidSidFormat);
        }
        Ok(Self {
            revision: SID_REVISION,
            identifier_authority: identifier_authority.into(),
            sub_authorities: SmallVec::from_slice(sub_authorities),
        })
    }

    /// Decodes a SID from the Windows in-memory layout:
    /// `[revision u8][count u8][authority; 6 (BE)][count × u32 (LE)]`.
    ///
    /// # Errors
    /// [`InvalidSidFormat`] when the revision, count or total length do not
    /// describe a valid SID.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidSidFormat> {
        let (&revision, rest) = bytes.split_first().ok_or(InvalidSidFormat)?;
        let (&count, rest) = rest.split_first().ok_or(InvalidSidFormat)?;
        if revision != SID_REVISION {
            return Err(InvalidSidFormat);
        }
        let count = count as usize;
        if !(MIN_SUB_AUTHORITY_COUNT..=MAX_SUB_AUTHORITY_COUNT).contains(&count)
            || rest.len() != 6 + count * 4
        {
            return Err(InvalidSidFormat);
        }
        let (authority_bytes, sub_bytes) = rest.split_at(6);
        let mut authority = [0u8; 6];
        authority.copy_from_slice(authority_bytes);
        let sub_authorities = sub_bytes
            .chunks_exact(4)
            .map(|chunk| {
                let mut le = [0u8; 4];
                le.copy_from_slice(chunk);
                u32::from_le_bytes(le)
            })
            .collect();
        Ok(Self {
            revision,
            identifier_authority: SidIdentifierAuthority::from(authority),
            sub_authorities,
        })
    }

    /// Encodes this SID into the Windows in-memory layout.
    #[must_use]
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.sub_authorities.len() * 4);
        out.push(self.revision);
        #[expect(
            clippy::cast_possible_truncation,
            reason = "count is bounded by MAX_SUB_AUTHORITY_COUNT"
        )]
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.identifier_authority.value);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }

    /// The SID revision (always 1).
    #[must_use]
    pub const fn revision(&self) -> u8 {
        self.revision
    }

    /// The identifier authority.
    #[must_use]
    pub const fn identifier_authority(&self) -> SidIdentifierAuthority {
        self.identifier_authority
    }

    /// The sub-authority values, in order.
    #[must_use]
    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// The last sub-authority (relative identifier).
    #[must_use]
    pub fn rid(&self) -> u32 {
        // A valid SID always has at least one sub-authority.
        self.sub_authorities.last().copied().unwrap_or(0)
    }
}

impl Display for SecurityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.revision)?;

        // Identifier authority: decimal if it fits in u32, else hex.
        let id_auth_value = self.identifier_authority.as_u64();
        if id_auth_value <= u64::from(u32::MAX) {
            write!(f, "-{id_auth_value}")?;
        } else {
            write!(f, "-0x{id_auth_value:X}")?;
        }

        for &sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl Debug for SecurityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityIdentifier({self})")
    }
}

impl FromStr for SecurityIdentifier {
    type Err = InvalidSidFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        if !parts
            .next()
            .is_some_and(|head| head.eq_ignore_ascii_case("s"))
        {
            return Err(InvalidSidFormat);
        }
        let revision = parts
            .next()
            .ok_or(InvalidSidFormat)?
            .parse::<u8>()
            .map_err(|_| InvalidSidFormat)?;
        if revision != SID_REVISION {
            return Err(InvalidSidFormat);
        }

        let identifier_authority = parts
            .next()
            .ok_or(InvalidSidFormat)
            .and_then(|part| {
                if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
                    u64::from_str_radix(hex, 16).map_err(|_| InvalidSidFormat)
                } else {
                    part.parse::<u64>().map_err(|_| InvalidSidFormat)
                }
            })
            .and_then(|value| {
                if value >> 48 != 0 {
                    return Err(InvalidSidFormat);
                }
                let be = value.to_be_bytes();
                let mut bytes = [0u8; 6];
                bytes.copy_from_slice(&be[2..]);
                Ok(SidIdentifierAuthority::from(bytes))
            })?;

        let mut sub_authorities = SmallVec::<[u32; 8]>::new();
        for part in parts {
            if sub_authorities.len() == MAX_SUB_AUTHORITY_COUNT {
                return Err(InvalidSidFormat);
            }
            sub_authorities.push(part.parse::<u32>().map_err(|_| InvalidSidFormat)?);
        }
        if sub_authorities.is_empty() {
            return Err(InvalidSidFormat);
        }

        Ok(Self {
            revision,
            identifier_authority,
            sub_authorities,
        })
    }
}

impl TryFrom<&[u8]> for SecurityIdentifier {
    type Error = InvalidSidFormat;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in tests")]
pub(crate) mod test {
    use super::*;
    use crate::sid_identifier_authority::test::arb_identifier_authority;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    pub(crate) fn arb_security_identifier() -> impl Strategy<Value = SecurityIdentifier> {
        (
            arb_identifier_authority(),
            proptest::collection::vec(any::<u32>(), 1..=15),
        )
            .prop_map(|(authority, subs)| {
                SecurityIdentifier::new(authority, &subs).unwrap()
            })
    }

    proptest! {
        #[test]
        fn display_round_trip(sid in arb_security_identifier()) {
            let display = sid.to_string();
            prop_assert!(display.starts_with("S-1-"), "display does not start with S-1-: {}", display);

            let dash_count = display.matches('-').count();
            prop_assert_eq!(dash_count, sid.sub_authorities().len() + 2);
            prop_assert_eq!(display.parse::<SecurityIdentifier>().unwrap(), sid);
        }

        #[test]
        fn binary_round_trip(sid in arb_security_identifier()) {
            let bytes = sid.as_bytes();
            prop_assert_eq!(bytes.len(), 8 + sid.sub_authorities().len() * 4);
            prop_assert_eq!(SecurityIdentifier::from_bytes(&bytes).unwrap(), sid);
        }

        #[test]
        fn eq_implies_same_hash(a in arb_security_identifier(), b in arb_security_identifier()) {
            if a == b {
                let mut ha = DefaultHasher::new();
                a.hash(&mut ha);
                let mut hb = DefaultHasher::new();
                b.hash(&mut hb);
                prop_assert_eq!(ha.finish(), hb.finish(), "equal SIDs must hash equal");
            }
        }
    }

    #[test]
    fn builtin_administrators_binary_layout() {
        let sid =
            SecurityIdentifier::new(SidIdentifierAuthority::NT_AUTHORITY, &[32, 544]).unwrap();
        assert_eq!(
            sid.as_bytes(),
            [1, 2, 0, 0, 0, 0, 0, 5, 32, 0, 0, 0, 32, 2, 0, 0],
            "layout must match the Windows binary SID"
        );
        assert_eq!(sid.rid(), 544);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("S-1".parse::<SecurityIdentifier>().is_err());
        assert!("X-1-5-18".parse::<SecurityIdentifier>().is_err());
        assert!("S-2-5-18".parse::<SecurityIdentifier>().is_err());
        assert!("S-1-5".parse::<SecurityIdentifier>().is_err(), "no sub-authorities");
        assert!(SecurityIdentifier::from_bytes(&[1, 1, 0, 0, 0, 0, 0, 5]).is_err());
        assert!(SecurityIdentifier::new(SidIdentifierAuthority::NT_AUTHORITY, &[]).is_err());
        assert!(SecurityIdentifier::new(SidIdentifierAuthority::NT_AUTHORITY, &[0; 16]).is_err());
    }

    #[test]
    fn large_authority_renders_hex() {
        let authority = SidIdentifierAuthority::from([0, 1, 0, 0, 0, 0]);
        let sid = SecurityIdentifier::new(authority, &[1]).unwrap();
        let display = sid.to_string();
        assert!(display.starts_with("S-1-0x"), "large authority must be hex: {display}");
        assert_eq!(display.parse::<SecurityIdentifier>().unwrap(), sid);
    }
}

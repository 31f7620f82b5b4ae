//! Token-information queries and the neutral payload encoding.
//!
//! [`TokenInfoReader::query`] implements the size-probe/retry protocol over
//! [`TokenProvider::token_information`]: probe with an empty buffer, learn
//! the required size, reallocate and retry once. The retry is the only
//! locally-handled condition and never surfaces to callers.
//!
//! # Neutral encoding
//! Providers serialize information blocks into a pointer-free layout so
//! decoding is portable (the OS layout embeds `PSID` pointers and cannot
//! leave the FFI boundary). All integers are little-endian:
//!
//! - SID: `[u32 len][len bytes]` (the Windows binary SID form)
//! - SID-and-attributes (`User`): `[u32 attributes]` then a SID
//! - group list (`Groups`, `DeviceGroups`): `[u32 count]` then `count`
//!   SID-and-attributes blocks
//! - single SID (`PrimaryGroup`, `Owner`): one SID
//! - scalar (`Type`, `ImpersonationLevel`): `[u32]`

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::Error;
use crate::group_claims::SidAndAttributes;
use crate::sid::SecurityIdentifier;
use crate::token::provider::{InfoQuery, RawToken, TokenProvider};

/// Attribute block selector, mirroring `TOKEN_INFORMATION_CLASS` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum TokenInformationClass {
    /// The token's user SID and attributes.
    User = 1,
    /// The token's group list.
    Groups = 2,
    /// The token's default owner SID.
    Owner = 4,
    /// The token's primary group SID.
    PrimaryGroup = 5,
    /// Primary vs impersonation token.
    Type = 8,
    /// The impersonation level of an impersonation token.
    ImpersonationLevel = 9,
    /// Token statistics block.
    Statistics = 10,
    /// Device groups, when the token carries them.
    DeviceGroups = 37,
}

/// `TOKEN_TYPE` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum TokenType {
    /// A primary (process) token.
    Primary = 1,
    /// An impersonation token.
    Impersonation = 2,
}

/// Impersonation level of a token-backed identity.
///
/// OS raw levels shift up by one so that `None` can represent a primary
/// token; the anonymous sentinel identity reports `Anonymous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ImpersonationLevel {
    /// A primary token; no impersonation involved.
    None = 0,
    /// The server cannot identify or impersonate the client.
    Anonymous = 1,
    /// The server can identify but not impersonate the client.
    Identification = 2,
    /// The server can impersonate the client locally.
    Impersonation = 3,
    /// The server can impersonate the client on remote systems.
    Delegation = 4,
}

/// Queries variable-length token-information blocks.
#[derive(Clone)]
pub struct TokenInfoReader {
    provider: Arc<dyn TokenProvider>,
}

impl TokenInfoReader {
    /// Creates a reader over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }

    /// Fetches the information block for `class`, handling the buffer size
    /// probe internally.
    ///
    /// # Errors
    /// Any provider failure other than the first undersized-buffer reply,
    /// mapped per the crate taxonomy. A provider that reports "too small"
    /// again for the size it just asked for is broken and reported as
    /// [`Error::Platform`].
    pub fn query(&self, token: RawToken, class: TokenInformationClass) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        let needed = match self.provider.token_information(token, class, &mut buf)? {
            InfoQuery::Filled(len) => {
                buf.truncate(len);
                return Ok(buf);
            }
            InfoQuery::Needs(len) => len,
        };

        buf = vec![0u8; needed];
        match self.provider.token_information(token, class, &mut buf)? {
            InfoQuery::Filled(len) => {
                buf.truncate(len);
                Ok(buf)
            }
            InfoQuery::Needs(len) => Err(Error::Platform {
                code: 0,
                message: format!(
                    "token information query for {class:?} grew from {needed} to {len} bytes"
                ),
            }),
        }
    }

    /// Fetches and decodes a `[u32]` scalar block (`Type`,
    /// `ImpersonationLevel`).
    pub fn query_u32(&self, token: RawToken, class: TokenInformationClass) -> Result<u32, Error> {
        let bytes = self.query(token, class)?;
        let (value, _) = read_u32(&bytes).ok_or_else(|| decode_error(class))?;
        Ok(value)
    }
}

fn decode_error(class: TokenInformationClass) -> Error {
    Error::Platform {
        code: 0,
        message: format!("malformed token information payload for {class:?}"),
    }
}

/// Reads a little-endian `u32`, returning it and the remaining bytes.
#[must_use]
pub fn read_u32(bytes: &[u8]) -> Option<(u32, &[u8])> {
    let (head, rest) = bytes.split_at_checked(4)?;
    let mut le = [0u8; 4];
    le.copy_from_slice(head);
    Some((u32::from_le_bytes(le), rest))
}

fn read_sid(bytes: &[u8]) -> Option<(SecurityIdentifier, &[u8])> {
    let (len, rest) = read_u32(bytes)?;
    let (sid_bytes, rest) = rest.split_at_checked(len as usize)?;
    let sid = SecurityIdentifier::from_bytes(sid_bytes).ok()?;
    Some((sid, rest))
}

fn read_sid_and_attributes(bytes: &[u8]) -> Option<(SidAndAttributes, &[u8])> {
    let (attributes, rest) = read_u32(bytes)?;
    let (sid, rest) = read_sid(rest)?;
    Some((SidAndAttributes { sid, attributes }, rest))
}

/// Decodes a single-SID block (`PrimaryGroup`, `Owner`).
pub fn decode_sid(
    class: TokenInformationClass,
    bytes: &[u8],
) -> Result<SecurityIdentifier, Error> {
    match read_sid(bytes) {
        Some((sid, rest)) if rest.is_empty() => Ok(sid),
        _ => Err(decode_error(class)),
    }
}

/// Decodes a SID-and-attributes block (`User`).
pub fn decode_sid_and_attributes(
    class: TokenInformationClass,
    bytes: &[u8],
) -> Result<SidAndAttributes, Error> {
    match read_sid_and_attributes(bytes) {
        Some((entry, rest)) if rest.is_empty() => Ok(entry),
        _ => Err(decode_error(class)),
    }
}

/// Decodes a group-list block (`Groups`, `DeviceGroups`), preserving the
/// OS-reported order.
pub fn decode_groups(
    class: TokenInformationClass,
    bytes: &[u8],
) -> Result<Vec<SidAndAttributes>, Error> {
    let (count, mut rest) = read_u32(bytes).ok_or_else(|| decode_error(class))?;
    // Cap the reservation by what the payload could actually hold
    // (attributes + SID length prefix + 8-byte SID header per entry), so a
    // corrupt count cannot trigger a huge allocation before decoding fails.
    const MIN_ENTRY_LEN: usize = 4 + 4 + 8;
    let mut groups = Vec::with_capacity((count as usize).min(rest.len() / MIN_ENTRY_LEN));
    for _ in 0..count {
        let (entry, tail) = read_sid_and_attributes(rest).ok_or_else(|| decode_error(class))?;
        groups.push(entry);
        rest = tail;
    }
    if rest.is_empty() {
        Ok(groups)
    } else {
        Err(decode_error(class))
    }
}

/// Encodes one SID (`[u32 len][bytes]`). Provider-side helper.
#[must_use]
pub fn encode_sid(sid: &SecurityIdentifier) -> Vec<u8> {
    let bytes = sid.as_bytes();
    #[expect(clippy::cast_possible_truncation, reason = "SIDs are at most 68 bytes")]
    let mut out = (bytes.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&bytes);
    out
}

/// Encodes a SID-and-attributes block. Provider-side helper.
#[must_use]
pub fn encode_sid_and_attributes(entry: &SidAndAttributes) -> Vec<u8> {
    let mut out = entry.attributes.to_le_bytes().to_vec();
    out.extend_from_slice(&encode_sid(&entry.sid));
    out
}

/// Encodes a group list. Provider-side helper.
#[must_use]
pub fn encode_groups(groups: &[SidAndAttributes]) -> Vec<u8> {
    #[expect(clippy::cast_possible_truncation, reason = "group counts fit in u32")]
    let mut out = (groups.len() as u32).to_le_bytes().to_vec();
    for entry in groups {
        out.extend_from_slice(&encode_sid_and_attributes(entry));
    }
    out
}

//! Well-known SID constructors.
//!
//! Source: <https://learn.microsoft.com/windows/win32/secauthz/well-known-sids>
//!
//! Only the SIDs the identity predicates need are defined here, plus the
//! basic authorities. Each constructor allocates a fresh
//! [`SecurityIdentifier`]; they are infallible because every definition is
//! statically within SID bounds.

use crate::{SecurityIdentifier, SidIdentifierAuthority};

const SECURITY_ANONYMOUS_LOGON_RID: u32 = 7;
const SECURITY_AUTHENTICATED_USER_RID: u32 = 11;
const SECURITY_LOCAL_SYSTEM_RID: u32 = 18;
const SECURITY_BUILTIN_DOMAIN_RID: u32 = 32;
const DOMAIN_ALIAS_RID_ADMINS: u32 = 544;
const DOMAIN_ALIAS_RID_USERS: u32 = 545;
const DOMAIN_ALIAS_RID_GUESTS: u32 = 546;

fn nt_authority(sub_authorities: &[u32]) -> SecurityIdentifier {
    // Infallible: every caller passes 1..=2 sub-authorities.
    SecurityIdentifier::new(SidIdentifierAuthority::NT_AUTHORITY, sub_authorities)
        .unwrap_or_else(|_| unreachable!())
}

/// World SID, a.k.a. Everyone (`S-1-1-0`).
#[must_use]
pub fn world() -> SecurityIdentifier {
    SecurityIdentifier::new(SidIdentifierAuthority::WORLD_AUTHORITY, &[0])
        .unwrap_or_else(|_| unreachable!())
}

/// Anonymous logon (`S-1-5-7`).
#[must_use]
pub fn anonymous_logon() -> SecurityIdentifier {
    nt_authority(&[SECURITY_ANONYMOUS_LOGON_RID])
}

/// Authenticated Users (`S-1-5-11`).
#[must_use]
pub fn authenticated_users() -> SecurityIdentifier {
    nt_authority(&[SECURITY_AUTHENTICATED_USER_RID])
}

/// Local System (`S-1-5-18`).
#[must_use]
pub fn local_system() -> SecurityIdentifier {
    nt_authority(&[SECURITY_LOCAL_SYSTEM_RID])
}

/// BUILTIN\Administrators (`S-1-5-32-544`).
#[must_use]
pub fn builtin_administrators() -> SecurityIdentifier {
    nt_authority(&[SECURITY_BUILTIN_DOMAIN_RID, DOMAIN_ALIAS_RID_ADMINS])
}

/// BUILTIN\Users (`S-1-5-32-545`).
#[must_use]
pub fn builtin_users() -> SecurityIdentifier {
    nt_authority(&[SECURITY_BUILTIN_DOMAIN_RID, DOMAIN_ALIAS_RID_USERS])
}

/// BUILTIN\Guests (`S-1-5-32-546`).
#[must_use]
pub fn builtin_guests() -> SecurityIdentifier {
    nt_authority(&[SECURITY_BUILTIN_DOMAIN_RID, DOMAIN_ALIAS_RID_GUESTS])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        assert_eq!(world().to_string(), "S-1-1-0");
        assert_eq!(anonymous_logon().to_string(), "S-1-5-7");
        assert_eq!(authenticated_users().to_string(), "S-1-5-11");
        assert_eq!(local_system().to_string(), "S-1-5-18");
        assert_eq!(builtin_administrators().to_string(), "S-1-5-32-544");
        assert_eq!(builtin_users().to_string(), "S-1-5-32-545");
        assert_eq!(builtin_guests().to_string(), "S-1-5-32-546");
    }
}

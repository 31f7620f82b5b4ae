//! Classification of token SID entries into claims.
//!
//! Pure functions over already-decoded token data; no OS access. The
//! attribute mask and the one-time primary-group emission follow the
//! Windows token semantics exactly: the primary group yields *two* claims
//! (its `PrimaryGroupSid`/`DenyOnlyPrimaryGroupSid` claim plus the regular
//! group claim), logon-session entries yield none.

use crate::claim::{Claim, claim_types};
use crate::sid::SecurityIdentifier;

/// `SE_GROUP_*` attribute bits relevant to claim classification.
pub mod group_attributes {
    /// The group is enabled in the token.
    pub const ENABLED: u32 = 0x0000_0004;
    /// The group may only be used to deny access.
    pub const USE_FOR_DENY_ONLY: u32 = 0x0000_0010;
    /// The group identifies a logon session rather than a principal.
    pub const LOGON_ID: u32 = 0xC000_0000;

    /// Bits consulted when classifying a group entry.
    pub const CLASSIFICATION_MASK: u32 = ENABLED | USE_FOR_DENY_ONLY | LOGON_ID;
}

/// One token group entry: a SID plus its `SE_GROUP_*` attribute bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidAndAttributes {
    /// The group or user SID.
    pub sid: SecurityIdentifier,
    /// Raw attribute bits as reported by the OS.
    pub attributes: u32,
}

fn sid_claim(claim_type: &str, sid: &SecurityIdentifier, issuer: &str) -> Claim {
    Claim::new(claim_type, sid.to_string(), issuer).with_property(
        claim_types::WINDOWS_SUB_AUTHORITY,
        sid.identifier_authority().to_string(),
    )
}

/// Classifies a token's group list into claims, in OS-reported order.
///
/// Per entry, `attributes` is masked against
/// [`group_attributes::CLASSIFICATION_MASK`]:
/// - exactly `ENABLED`: one `GroupSid` claim; additionally, the first such
///   entry whose SID equals `primary_group` emits one `PrimaryGroupSid`
///   claim (before the group claim).
/// - exactly `USE_FOR_DENY_ONLY`: same pattern with `DenyOnlySid` /
///   `DenyOnlyPrimaryGroupSid`.
/// - anything else (disabled, logon-id set, mixed bits): skipped.
#[must_use]
pub fn group_sid_claims(
    primary_group: &SecurityIdentifier,
    groups: &[SidAndAttributes],
    issuer: &str,
) -> Vec<Claim> {
    let mut claims = Vec::new();
    let mut found_primary = false;

    for entry in groups {
        let masked = entry.attributes & group_attributes::CLASSIFICATION_MASK;
        let (primary_type, group_type) = match masked {
            group_attributes::ENABLED => {
                (claim_types::PRIMARY_GROUP_SID, claim_types::GROUP_SID)
            }
            group_attributes::USE_FOR_DENY_ONLY => (
                claim_types::DENY_ONLY_PRIMARY_GROUP_SID,
                claim_types::DENY_ONLY_SID,
            ),
            _ => continue,
        };

        if !found_primary && entry.sid == *primary_group {
            claims.push(sid_claim(primary_type, &entry.sid, issuer));
            found_primary = true;
        }
        // The primary group yields both its primary claim and a regular one.
        claims.push(sid_claim(group_type, &entry.sid, issuer));
    }

    claims
}

/// Classifies the token's user entry into at most one claim.
///
/// Zero attributes yield a `PrimarySid` claim; the deny-only bit yields a
/// `DenyOnlyPrimarySid` claim; anything else yields none.
#[must_use]
pub fn primary_sid_claim(user: &SidAndAttributes, issuer: &str) -> Option<Claim> {
    if user.attributes == 0 {
        Some(sid_claim(claim_types::PRIMARY_SID, &user.sid, issuer))
    } else if user.attributes & group_attributes::USE_FOR_DENY_ONLY != 0 {
        Some(sid_claim(claim_types::DENY_ONLY_PRIMARY_SID, &user.sid, issuer))
    } else {
        None
    }
}

/// Classifies a token's device-group list into claims, in OS-reported
/// order.
///
/// Same attribute mask as [`group_sid_claims`], but device groups have no
/// primary-group counterpart: enabled entries yield `WindowsDeviceGroup`
/// claims, deny-only entries `DenyOnlyWindowsDeviceGroup`.
#[must_use]
pub fn device_sid_claims(groups: &[SidAndAttributes], issuer: &str) -> Vec<Claim> {
    groups
        .iter()
        .filter_map(|entry| {
            let claim_type = match entry.attributes & group_attributes::CLASSIFICATION_MASK {
                group_attributes::ENABLED => claim_types::WINDOWS_DEVICE_GROUP,
                group_attributes::USE_FOR_DENY_ONLY => {
                    claim_types::DENY_ONLY_WINDOWS_DEVICE_GROUP
                }
                _ => return None,
            };
            Some(sid_claim(claim_type, &entry.sid, issuer))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in tests")]
mod tests {
    use super::*;
    use crate::claim::DEFAULT_ISSUER;
    use crate::{SidIdentifierAuthority, well_known};

    fn sid(subs: &[u32]) -> SecurityIdentifier {
        SecurityIdentifier::new(SidIdentifierAuthority::NT_AUTHORITY, subs).unwrap()
    }

    fn entry(subs: &[u32], attributes: u32) -> SidAndAttributes {
        SidAndAttributes {
            sid: sid(subs),
            attributes,
        }
    }

    fn types(claims: &[Claim]) -> Vec<&str> {
        claims.iter().map(Claim::claim_type).collect()
    }

    #[test]
    fn primary_group_yields_two_claims() {
        let primary = sid(&[21, 1, 2, 513]);
        let groups = vec![
            entry(&[32, 545], group_attributes::ENABLED),
            entry(&[21, 1, 2, 513], group_attributes::ENABLED),
        ];
        let claims = group_sid_claims(&primary, &groups, DEFAULT_ISSUER);
        assert_eq!(
            types(&claims),
            vec![
                claim_types::GROUP_SID,
                claim_types::PRIMARY_GROUP_SID,
                claim_types::GROUP_SID,
            ]
        );
        assert_eq!(claims[1].value(), primary.to_string());
        assert_eq!(claims[2].value(), primary.to_string());
    }

    #[test]
    fn primary_group_claim_emitted_once() {
        let primary = sid(&[21, 513]);
        // The primary group appears twice in the list; only the first match wins.
        let groups = vec![
            entry(&[21, 513], group_attributes::ENABLED),
            entry(&[21, 513], group_attributes::ENABLED),
        ];
        let claims = group_sid_claims(&primary, &groups, DEFAULT_ISSUER);
        let primary_count = claims
            .iter()
            .filter(|claim| claim.claim_type() == claim_types::PRIMARY_GROUP_SID)
            .count();
        assert_eq!(primary_count, 1, "exactly one PrimaryGroupSid claim");
        assert_eq!(claims.len(), 3);
    }

    #[test]
    fn logon_id_entry_is_skipped() {
        let primary = sid(&[21, 513]);
        let groups = vec![entry(
            &[5, 1, 2],
            group_attributes::LOGON_ID | group_attributes::ENABLED,
        )];
        assert!(
            group_sid_claims(&primary, &groups, DEFAULT_ISSUER).is_empty(),
            "logon-session groups yield no claims"
        );
    }

    #[test]
    fn disabled_entry_is_skipped() {
        let primary = sid(&[21, 513]);
        let groups = vec![entry(&[32, 545], 0)];
        assert!(group_sid_claims(&primary, &groups, DEFAULT_ISSUER).is_empty());
    }

    #[test]
    fn deny_only_primary_group() {
        let primary = sid(&[21, 513]);
        let groups = vec![entry(&[21, 513], group_attributes::USE_FOR_DENY_ONLY)];
        let claims = group_sid_claims(&primary, &groups, DEFAULT_ISSUER);
        assert_eq!(
            types(&claims),
            vec![
                claim_types::DENY_ONLY_PRIMARY_GROUP_SID,
                claim_types::DENY_ONLY_SID,
            ]
        );
    }

    #[test]
    fn claims_carry_authority_property() {
        let primary = sid(&[21, 513]);
        let groups = vec![entry(&[32, 544], group_attributes::ENABLED)];
        let claims = group_sid_claims(&primary, &groups, DEFAULT_ISSUER);
        assert_eq!(
            claims[0].properties().get(claim_types::WINDOWS_SUB_AUTHORITY),
            Some(&"NTAuthority".to_owned())
        );
    }

    #[test]
    fn device_groups_have_no_primary_claim() {
        let groups = vec![
            entry(&[21, 9, 600], group_attributes::ENABLED),
            entry(&[21, 9, 601], group_attributes::USE_FOR_DENY_ONLY),
            entry(&[21, 9, 602], 0),
        ];
        let claims = device_sid_claims(&groups, DEFAULT_ISSUER);
        assert_eq!(
            types(&claims),
            vec![
                claim_types::WINDOWS_DEVICE_GROUP,
                claim_types::DENY_ONLY_WINDOWS_DEVICE_GROUP,
            ]
        );
    }

    #[test]
    fn user_entry_classification() {
        let user = SidAndAttributes {
            sid: well_known::local_system(),
            attributes: 0,
        };
        let claim = primary_sid_claim(&user, DEFAULT_ISSUER).unwrap();
        assert_eq!(claim.claim_type(), claim_types::PRIMARY_SID);
        assert_eq!(claim.value(), "S-1-5-18");

        let deny_only = SidAndAttributes {
            attributes: group_attributes::USE_FOR_DENY_ONLY,
            ..user.clone()
        };
        assert_eq!(
            primary_sid_claim(&deny_only, DEFAULT_ISSUER).unwrap().claim_type(),
            claim_types::DENY_ONLY_PRIMARY_SID
        );

        let other = SidAndAttributes {
            attributes: group_attributes::ENABLED,
            ..user
        };
        assert!(primary_sid_claim(&other, DEFAULT_ISSUER).is_none());
    }
}

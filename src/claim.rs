//! Claims and the plain claims-identity aggregate.
//!
//! [`Claim`] is an immutable `(type, value)` assertion carrying issuer
//! metadata and a small string-property map. [`ClaimsIdentity`] is the
//! non-token-backed base aggregate; the token-backed [`TokenIdentity`]
//! composes one rather than inheriting from it.
//!
//! [`TokenIdentity`]: crate::TokenIdentity

use std::collections::BTreeMap;

/// Claim-type URIs emitted by this crate.
pub mod claim_types {
    /// Account name of the principal.
    pub const NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
    /// SID of the principal's user account.
    pub const PRIMARY_SID: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/primarysid";
    /// Deny-only variant of [`PRIMARY_SID`].
    pub const DENY_ONLY_PRIMARY_SID: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/denyonlyprimarysid";
    /// SID of an enabled group the principal belongs to.
    pub const GROUP_SID: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/groupsid";
    /// SID of the principal's primary group.
    pub const PRIMARY_GROUP_SID: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/primarygroupsid";
    /// Deny-only variant of [`GROUP_SID`].
    pub const DENY_ONLY_SID: &str =
        "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/denyonlysid";
    /// Deny-only variant of [`PRIMARY_GROUP_SID`].
    pub const DENY_ONLY_PRIMARY_GROUP_SID: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/denyonlyprimarygroupsid";
    /// SID of an enabled group of the principal's device.
    pub const WINDOWS_DEVICE_GROUP: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/windowsdevicegroup";
    /// Deny-only variant of [`WINDOWS_DEVICE_GROUP`].
    pub const DENY_ONLY_WINDOWS_DEVICE_GROUP: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/denyonlywindowsdevicegroup";
    /// Property key recording a SID's identifier authority.
    pub const WINDOWS_SUB_AUTHORITY: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/windowssubauthority";
}

/// Claim value-type URIs.
pub mod claim_value_types {
    /// XML-schema string.
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
}

/// Issuer recorded on claims derived from an access token.
pub const DEFAULT_ISSUER: &str = "AD AUTHORITY";

/// An immutable assertion about a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    claim_type: String,
    value: String,
    value_type: String,
    issuer: String,
    original_issuer: String,
    properties: BTreeMap<String, String>,
}

impl Claim {
    /// Creates a string-valued claim with `issuer` as both issuer and
    /// original issuer.
    #[must_use]
    pub fn new(claim_type: &str, value: impl Into<String>, issuer: &str) -> Self {
        Self {
            claim_type: claim_type.to_owned(),
            value: value.into(),
            value_type: claim_value_types::STRING.to_owned(),
            issuer: issuer.to_owned(),
            original_issuer: issuer.to_owned(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds a string property; only usable while building the claim.
    #[must_use]
    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_owned(), value.into());
        self
    }

    /// The claim-type URI.
    #[must_use]
    pub fn claim_type(&self) -> &str {
        &self.claim_type
    }

    /// The claim value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The value-type URI.
    #[must_use]
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    /// The issuer of the claim.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The original issuer of the claim.
    #[must_use]
    pub fn original_issuer(&self) -> &str {
        &self.original_issuer
    }

    /// Extra string properties attached to the claim.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

/// Plain claims-bearing identity: authentication type plus an ordered claim
/// sequence.
#[derive(Debug, Clone, Default)]
pub struct ClaimsIdentity {
    authentication_type: Option<String>,
    claims: Vec<Claim>,
    name_claim_type: String,
    role_claim_type: String,
}

impl ClaimsIdentity {
    /// Creates an empty identity with the given claim-type URIs used to
    /// answer [`name`](Self::name) and role queries.
    #[must_use]
    pub fn new(
        authentication_type: Option<String>,
        name_claim_type: &str,
        role_claim_type: &str,
    ) -> Self {
        Self {
            authentication_type,
            claims: Vec::new(),
            name_claim_type: name_claim_type.to_owned(),
            role_claim_type: role_claim_type.to_owned(),
        }
    }

    /// The authentication type, if any.
    #[must_use]
    pub fn authentication_type(&self) -> Option<&str> {
        self.authentication_type.as_deref()
    }

    /// The claims held directly by this identity, in insertion order.
    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Appends a claim.
    pub fn add_claim(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    /// Value of the first claim whose type is the name claim type.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.find_first(&self.name_claim_type).map(Claim::value)
    }

    /// The claim-type URI used for name lookups.
    #[must_use]
    pub fn name_claim_type(&self) -> &str {
        &self.name_claim_type
    }

    /// The claim-type URI used for role lookups.
    #[must_use]
    pub fn role_claim_type(&self) -> &str {
        &self.role_claim_type
    }

    /// First claim of the given type, if present.
    #[must_use]
    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type() == claim_type)
    }
}

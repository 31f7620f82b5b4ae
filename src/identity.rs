//! The token-backed identity facade.
//!
//! [`TokenIdentity`] composes a plain [`ClaimsIdentity`] with an owned
//! [`TokenHandle`] and derives everything else lazily from the token:
//! claims are materialized once under a mutex (double-checked fast path),
//! `is_authenticated`/`impersonation_level` memoize once with benign races
//! allowed, and the SID predicates recompute on every call.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::claim::{Claim, ClaimsIdentity, DEFAULT_ISSUER, claim_types};
use crate::error::Error;
use crate::group_claims::{
    SidAndAttributes, device_sid_claims, group_attributes, group_sid_claims, primary_sid_claim,
};
use crate::impersonation;
use crate::sid::SecurityIdentifier;
use crate::token::handle::TokenHandle;
use crate::token::info::{
    self, ImpersonationLevel, TokenInfoReader, TokenInformationClass, TokenType,
};
use crate::token::provider::{RawToken, TokenProvider};
use crate::well_known;

/// Authentication type recorded on token-backed identities.
///
/// The OS would derive the real value from the token's logon session; that
/// query is out of scope here, so a fixed value is used unless the caller
/// supplies one.
pub const DEFAULT_AUTHENTICATION_TYPE: &str = "Windows";

/// `GetTokenInformation` reports this code for a class the token does not
/// carry; for device groups it is the "none present" answer, not a failure.
const ERROR_INVALID_PARAMETER: u32 = 87;

/// A security principal backed by an OS access token.
pub struct TokenIdentity {
    provider: Arc<dyn TokenProvider>,
    reader: TokenInfoReader,
    handle: TokenHandle,
    base: ClaimsIdentity,
    authentication_type: String,
    /// Set only for the anonymous identity; a disposed identity also holds
    /// the invalid sentinel but keeps reporting `InvalidToken`.
    anonymous: bool,
    is_authenticated: OnceLock<bool>,
    impersonation_level: OnceLock<ImpersonationLevel>,
    name: Mutex<Option<String>>,
    user_sid: Mutex<Option<SecurityIdentifier>>,
    owner_sid: Mutex<Option<SecurityIdentifier>>,
    // Claim materialization: OnceLock for the lock-free fast path, the
    // mutex to serialize the (fallible) first materialization.
    claims_init: Mutex<()>,
    user_claims: OnceLock<Vec<Claim>>,
    device_claims: OnceLock<Vec<Claim>>,
}

impl TokenIdentity {
    fn build(
        provider: Arc<dyn TokenProvider>,
        handle: TokenHandle,
        authentication_type: String,
        anonymous: bool,
    ) -> Self {
        Self {
            reader: TokenInfoReader::new(Arc::clone(&provider)),
            provider,
            handle,
            anonymous,
            base: ClaimsIdentity::new(None, claim_types::NAME, claim_types::GROUP_SID),
            authentication_type,
            is_authenticated: OnceLock::new(),
            impersonation_level: OnceLock::new(),
            name: Mutex::new(None),
            user_sid: Mutex::new(None),
            owner_sid: Mutex::new(None),
            claims_init: Mutex::new(()),
            user_claims: OnceLock::new(),
            device_claims: OnceLock::new(),
        }
    }

    /// Creates an identity from a caller-supplied raw token.
    ///
    /// The token is validated and duplicated; the caller keeps ownership of
    /// `raw` (see [`TokenHandle::from_raw`]).
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] for a null value, [`Error::InvalidToken`]
    /// for a dead handle, any provider error from the duplication.
    pub fn from_raw(provider: Arc<dyn TokenProvider>, raw: RawToken) -> Result<Self, Error> {
        let handle = TokenHandle::from_raw(Arc::clone(&provider), raw)?;
        Ok(Self::build(
            provider,
            handle,
            DEFAULT_AUTHENTICATION_TYPE.to_owned(),
            false,
        ))
    }

    /// Creates an identity for the calling context, preferring the thread's
    /// impersonation token and falling back to the process token.
    ///
    /// # Errors
    /// Any provider failure opening the token.
    pub fn current(provider: Arc<dyn TokenProvider>) -> Result<Self, Error> {
        let raw = provider
            .open_current_token(false)?
            .ok_or(Error::InvalidToken)?;
        let handle = TokenHandle::from_owned(Arc::clone(&provider), raw);
        Ok(Self::build(
            provider,
            handle,
            DEFAULT_AUTHENTICATION_TYPE.to_owned(),
            false,
        ))
    }

    /// Creates an identity for the calling thread's impersonation token, or
    /// `None` when the thread is not impersonating.
    ///
    /// # Errors
    /// Any provider failure opening the token.
    pub fn current_thread(provider: Arc<dyn TokenProvider>) -> Result<Option<Self>, Error> {
        let Some(raw) = provider.open_current_token(true)? else {
            return Ok(None);
        };
        let handle = TokenHandle::from_owned(Arc::clone(&provider), raw);
        Ok(Some(Self::build(
            provider,
            handle,
            DEFAULT_AUTHENTICATION_TYPE.to_owned(),
            false,
        )))
    }

    /// The anonymous identity: no token, empty name and authentication
    /// type, no claims.
    #[must_use]
    pub fn anonymous(provider: Arc<dyn TokenProvider>) -> Self {
        let handle = TokenHandle::invalid(Arc::clone(&provider));
        Self::build(provider, handle, String::new(), true)
    }

    /// The token handle backing this identity.
    #[must_use]
    pub fn token(&self) -> &TokenHandle {
        &self.handle
    }

    /// The authentication type supplied at construction; empty for the
    /// anonymous identity.
    #[must_use]
    pub fn authentication_type(&self) -> &str {
        &self.authentication_type
    }

    /// True when the token belongs to an authenticated (non-anonymous)
    /// logon: membership of well-known Authenticated Users.
    ///
    /// Memoized after the first successful check.
    ///
    /// # Errors
    /// Any provider failure duplicating or querying the token.
    pub fn is_authenticated(&self) -> Result<bool, Error> {
        if let Some(value) = self.is_authenticated.get() {
            return Ok(*value);
        }
        let value = if self.anonymous {
            false
        } else {
            self.check_membership(&well_known::authenticated_users())?
        };
        Ok(*self.is_authenticated.get_or_init(|| value))
    }

    /// The token's impersonation level, memoized after the first read.
    ///
    /// The anonymous identity reports `Anonymous`; a primary token reports
    /// `None`; otherwise the OS level shifted up by one.
    ///
    /// # Errors
    /// Any provider failure querying the token.
    pub fn impersonation_level(&self) -> Result<ImpersonationLevel, Error> {
        if let Some(level) = self.impersonation_level.get() {
            return Ok(*level);
        }
        let level = self.read_impersonation_level()?;
        Ok(*self.impersonation_level.get_or_init(|| level))
    }

    fn read_impersonation_level(&self) -> Result<ImpersonationLevel, Error> {
        if self.anonymous {
            return Ok(ImpersonationLevel::Anonymous);
        }
        self.handle.with_raw(|raw| {
            let token_type = self.reader.query_u32(raw, TokenInformationClass::Type)?;
            if matches!(TokenType::try_from(token_type), Ok(TokenType::Primary)) {
                return Ok(ImpersonationLevel::None);
            }
            let os_level = self
                .reader
                .query_u32(raw, TokenInformationClass::ImpersonationLevel)?;
            ImpersonationLevel::try_from(os_level + 1).map_err(|_| Error::Platform {
                code: 0,
                message: format!("unknown impersonation level {os_level}"),
            })
        })
    }

    /// True when the user is the anonymous-logon principal (or the identity
    /// is the anonymous sentinel). Recomputed per call.
    ///
    /// # Errors
    /// Any provider failure querying the token.
    pub fn is_anonymous(&self) -> Result<bool, Error> {
        if self.anonymous {
            return Ok(true);
        }
        Ok(self.query_user_sid()? == well_known::anonymous_logon())
    }

    /// True when the user is Local System. Recomputed per call.
    ///
    /// # Errors
    /// Any provider failure querying the token.
    pub fn is_system(&self) -> Result<bool, Error> {
        if self.anonymous {
            return Ok(false);
        }
        Ok(self.query_user_sid()? == well_known::local_system())
    }

    /// True when the token is a member of BUILTIN\Guests. Recomputed per
    /// call.
    ///
    /// # Errors
    /// Any provider failure duplicating or querying the token.
    pub fn is_guest(&self) -> Result<bool, Error> {
        if self.anonymous {
            return Ok(false);
        }
        self.check_membership(&well_known::builtin_guests())
    }

    /// The `DOMAIN\name` form of the user account, memoized after the first
    /// successful resolution; empty for the anonymous identity.
    ///
    /// The lookup runs in an unimpersonated region so it never executes
    /// under an unrelated thread impersonation.
    ///
    /// # Errors
    /// Any provider failure querying the token or resolving the account.
    pub fn name(&self) -> Result<String, Error> {
        if self.anonymous {
            return Ok(String::new());
        }
        let mut cached = self.name.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = cached.as_ref() {
            return Ok(name.clone());
        }
        let sid = self.query_user_sid()?;
        let resolved =
            impersonation::run(&self.provider, None, || self.provider.lookup_account(&sid))??;
        *cached = Some(resolved.clone());
        Ok(resolved)
    }

    /// The user SID, memoized; `None` for the anonymous identity.
    ///
    /// # Errors
    /// Any provider failure querying the token.
    pub fn user_sid(&self) -> Result<Option<SecurityIdentifier>, Error> {
        if self.anonymous {
            return Ok(None);
        }
        self.query_user_sid().map(Some)
    }

    /// The token's default owner SID, memoized; `None` for the anonymous
    /// identity.
    ///
    /// # Errors
    /// Any provider failure querying the token.
    pub fn owner_sid(&self) -> Result<Option<SecurityIdentifier>, Error> {
        if self.anonymous {
            return Ok(None);
        }
        let mut cached = self
            .owner_sid
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sid) = cached.as_ref() {
            return Ok(Some(sid.clone()));
        }
        let bytes = self
            .handle
            .with_raw(|raw| self.reader.query(raw, TokenInformationClass::Owner))?;
        let sid = info::decode_sid(TokenInformationClass::Owner, &bytes)?;
        *cached = Some(sid.clone());
        Ok(Some(sid))
    }

    /// The enabled group SIDs, in OS-reported order; empty for the
    /// anonymous identity.
    ///
    /// # Errors
    /// Any provider failure querying the token.
    pub fn groups(&self) -> Result<Vec<SecurityIdentifier>, Error> {
        if self.anonymous {
            return Ok(Vec::new());
        }
        let entries = self.query_groups(TokenInformationClass::Groups)?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.attributes & group_attributes::ENABLED != 0)
            .map(|entry| entry.sid)
            .collect())
    }

    /// All claims of this identity: the base claims followed by the
    /// token-derived user and device claims.
    ///
    /// Materialization happens on the first call; afterwards the same
    /// underlying lists are returned.
    ///
    /// # Errors
    /// Any provider failure during the first materialization.
    pub fn claims(&self) -> Result<impl Iterator<Item = &Claim>, Error> {
        let (user, device) = self.ensure_claims()?;
        Ok(self.base.claims().iter().chain(user).chain(device))
    }

    /// The token-derived user claims (name, primary SID, group SIDs).
    ///
    /// # Errors
    /// Any provider failure during the first materialization.
    pub fn user_claims(&self) -> Result<&[Claim], Error> {
        Ok(self.ensure_claims()?.0)
    }

    /// The token-derived device claims; empty when the token carries no
    /// device groups.
    ///
    /// # Errors
    /// Any provider failure during the first materialization.
    pub fn device_claims(&self) -> Result<&[Claim], Error> {
        Ok(self.ensure_claims()?.1)
    }

    fn ensure_claims(&self) -> Result<(&[Claim], &[Claim]), Error> {
        if let (Some(user), Some(device)) = (self.user_claims.get(), self.device_claims.get()) {
            return Ok((user, device));
        }
        let _guard = self
            .claims_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.user_claims.get().is_none() {
            let claims = self.materialize_user_claims()?;
            let _ = self.user_claims.set(claims);
        }
        if self.device_claims.get().is_none() {
            let claims = self.materialize_device_claims()?;
            let _ = self.device_claims.set(claims);
        }
        // Both cells are set under the init lock above.
        match (self.user_claims.get(), self.device_claims.get()) {
            (Some(user), Some(device)) => Ok((user, device)),
            _ => Err(Error::Platform {
                code: 0,
                message: "claim caches empty after initialization".to_owned(),
            }),
        }
    }

    fn materialize_user_claims(&self) -> Result<Vec<Claim>, Error> {
        if self.anonymous {
            return Ok(Vec::new());
        }
        let mut claims = Vec::new();

        let name = self.name()?;
        if !name.is_empty() {
            claims.push(Claim::new(claim_types::NAME, name, DEFAULT_ISSUER));
        }

        let bytes = self
            .handle
            .with_raw(|raw| self.reader.query(raw, TokenInformationClass::User))?;
        let user = info::decode_sid_and_attributes(TokenInformationClass::User, &bytes)?;
        if let Some(claim) = primary_sid_claim(&user, DEFAULT_ISSUER) {
            claims.push(claim);
        }

        let bytes = self
            .handle
            .with_raw(|raw| self.reader.query(raw, TokenInformationClass::PrimaryGroup))?;
        let primary_group = info::decode_sid(TokenInformationClass::PrimaryGroup, &bytes)?;
        let groups = self.query_groups(TokenInformationClass::Groups)?;
        claims.extend(group_sid_claims(&primary_group, &groups, DEFAULT_ISSUER));

        Ok(claims)
    }

    /// Device groups are absent on most tokens; the OS reports that as
    /// `ERROR_INVALID_PARAMETER`, which maps to an empty list. Any other
    /// failure propagates so the next access retries.
    fn materialize_device_claims(&self) -> Result<Vec<Claim>, Error> {
        if self.anonymous {
            return Ok(Vec::new());
        }
        match self.query_groups(TokenInformationClass::DeviceGroups) {
            Ok(groups) => Ok(device_sid_claims(&groups, DEFAULT_ISSUER)),
            Err(Error::Platform {
                code: ERROR_INVALID_PARAMETER,
                ..
            }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn query_groups(
        &self,
        class: TokenInformationClass,
    ) -> Result<Vec<SidAndAttributes>, Error> {
        let bytes = self.handle.with_raw(|raw| self.reader.query(raw, class))?;
        info::decode_groups(class, &bytes)
    }

    fn query_user_sid(&self) -> Result<SecurityIdentifier, Error> {
        let mut cached = self.user_sid.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sid) = cached.as_ref() {
            return Ok(sid.clone());
        }
        let bytes = self
            .handle
            .with_raw(|raw| self.reader.query(raw, TokenInformationClass::User))?;
        let user = info::decode_sid_and_attributes(TokenInformationClass::User, &bytes)?;
        *cached = Some(user.sid.clone());
        Ok(user.sid)
    }

    /// Membership check against an impersonation view of the token: a
    /// primary token is duplicated at identification level first, and the
    /// duplicate released immediately after.
    fn check_membership(&self, sid: &SecurityIdentifier) -> Result<bool, Error> {
        self.handle.with_raw(|raw| {
            let token_type = self.reader.query_u32(raw, TokenInformationClass::Type)?;
            if matches!(TokenType::try_from(token_type), Ok(TokenType::Primary)) {
                let duplicate = self.provider.duplicate_impersonation(raw)?;
                let result = self.provider.check_membership(duplicate, sid);
                let _ = self.provider.close(duplicate);
                result
            } else {
                self.provider.check_membership(raw, sid)
            }
        })
    }

    /// Releases the token handle and the memoized name and SIDs.
    ///
    /// Idempotent. Claims already materialized stay accessible; operations
    /// needing the token fail with [`Error::InvalidToken`] afterwards.
    pub fn dispose(&self) {
        self.handle.dispose();
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.user_sid.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.owner_sid.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for TokenIdentity {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for TokenIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIdentity")
            .field("handle", &self.handle)
            .field("authentication_type", &self.authentication_type)
            .finish_non_exhaustive()
    }
}

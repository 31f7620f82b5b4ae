//! RAII ownership of one OS access-token handle.

use std::fmt::{self, Debug};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::Error;
use crate::token::info::TokenInformationClass;
use crate::token::provider::{RawToken, TokenProvider};

/// Owns one access-token handle obtained from a [`TokenProvider`].
///
/// Construction from a caller-supplied raw value *duplicates* the handle;
/// the caller's original is never closed here. [`dispose`](Self::dispose)
/// is idempotent and a no-op for the invalid sentinel, which models the
/// anonymous identity. Dropping the handle disposes it.
///
/// The raw value is only ever lent out for the duration of a single OS
/// call ([`with_raw`](Self::with_raw)); an `RwLock` guarantees the handle
/// cannot be closed while such a call is in flight.
pub struct TokenHandle {
    provider: Arc<dyn TokenProvider>,
    raw: RwLock<RawToken>,
}

impl TokenHandle {
    /// Validates and duplicates a caller-supplied raw token.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] for the null/zero value;
    /// [`Error::InvalidToken`] when the OS rejects a probe of the token's
    /// type; any provider error from the duplication itself.
    pub fn from_raw(provider: Arc<dyn TokenProvider>, raw: RawToken) -> Result<Self, Error> {
        if raw.0 == 0 {
            return Err(Error::InvalidArgument);
        }
        // Probe the token type to find out whether the handle is live. The
        // probe may legitimately ask for a bigger buffer; only an OS
        // rejection of the handle itself matters here.
        let mut probe = [0u8; 4];
        provider.token_information(raw, TokenInformationClass::Type, &mut probe)?;
        let owned = provider.duplicate(raw)?;
        Ok(Self::from_owned(provider, owned))
    }

    /// Wraps a raw token already owned by the caller (no duplication).
    pub(crate) fn from_owned(provider: Arc<dyn TokenProvider>, raw: RawToken) -> Self {
        Self {
            provider,
            raw: RwLock::new(raw),
        }
    }

    /// The invalid-sentinel handle modeling the anonymous identity.
    #[must_use]
    pub fn invalid(provider: Arc<dyn TokenProvider>) -> Self {
        Self::from_owned(provider, RawToken::INVALID)
    }

    /// True when this handle holds the invalid sentinel (anonymous
    /// identity) or has been disposed.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.read().is_invalid()
    }

    /// The provider this handle belongs to.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn TokenProvider> {
        &self.provider
    }

    /// Duplicates this handle into an independent one referencing the same
    /// token object.
    ///
    /// # Errors
    /// [`Error::InvalidToken`] when this handle is closed or the sentinel.
    pub fn duplicate(&self) -> Result<Self, Error> {
        self.with_raw(|raw| {
            let dup = self.provider.duplicate(raw)?;
            Ok(Self::from_owned(Arc::clone(&self.provider), dup))
        })
    }

    /// Lends the raw value to `body` for the duration of one OS call.
    ///
    /// # Errors
    /// [`Error::InvalidToken`] when the handle is closed or the sentinel;
    /// otherwise whatever `body` returns.
    pub fn with_raw<T>(&self, body: impl FnOnce(RawToken) -> Result<T, Error>) -> Result<T, Error> {
        let guard = self.raw.read().unwrap_or_else(PoisonError::into_inner);
        let raw = *guard;
        if raw.is_invalid() {
            return Err(Error::InvalidToken);
        }
        body(raw)
    }

    /// Closes the owned handle. Idempotent; a no-op on the sentinel.
    pub fn dispose(&self) {
        let mut guard = self.raw.write().unwrap_or_else(PoisonError::into_inner);
        let raw = std::mem::replace(&mut *guard, RawToken::INVALID);
        if !raw.is_invalid() {
            // Close failures are unreportable from Drop; the handle is
            // gone either way.
            let _ = self.provider.close(raw);
        }
    }

    fn read(&self) -> RawToken {
        *self.raw.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TokenHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Debug for TokenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenHandle")
            .field("raw", &self.read())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in tests")]
mod tests {
    use super::*;
    use crate::SidIdentifierAuthority;
    use crate::sid::SecurityIdentifier;
    use crate::token::provider::mock::{Event, MockTokenProvider, TokenData};

    fn sid(subs: &[u32]) -> SecurityIdentifier {
        SecurityIdentifier::new(SidIdentifierAuthority::NT_AUTHORITY, subs).unwrap()
    }

    fn provider_with_token() -> (Arc<MockTokenProvider>, RawToken) {
        let provider = Arc::new(MockTokenProvider::new());
        let raw = provider.register(TokenData::primary(sid(&[21, 42])));
        (provider, raw)
    }

    #[test]
    fn construction_duplicates_and_keeps_source_open() {
        let (provider, source) = provider_with_token();
        let handle = TokenHandle::from_raw(provider.clone(), source).unwrap();
        assert!(!handle.is_invalid());
        assert!(provider.is_open(source), "caller's handle must not be closed");
        drop(handle);
        assert!(provider.is_open(source), "dispose closes only the duplicate");
        assert_eq!(provider.open_count(), 1);
    }

    #[test]
    fn null_raw_value_is_invalid_argument() {
        let provider = Arc::new(MockTokenProvider::new());
        let err = TokenHandle::from_raw(provider, RawToken(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument));
    }

    #[test]
    fn stale_raw_value_is_invalid_token() {
        let (provider, source) = provider_with_token();
        provider.close(source).unwrap();
        let err = TokenHandle::from_raw(provider, source).unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
    }

    #[test]
    fn dispose_is_idempotent() {
        let (provider, source) = provider_with_token();
        let handle = TokenHandle::from_raw(provider.clone(), source).unwrap();
        provider.clear_events();
        handle.dispose();
        handle.dispose();
        let closes = provider
            .events()
            .iter()
            .filter(|event| matches!(event, Event::Close(_)))
            .count();
        assert_eq!(closes, 1, "second dispose must be a no-op");
        assert!(handle.is_invalid());
    }

    #[test]
    fn sentinel_dispose_is_noop() {
        let provider = Arc::new(MockTokenProvider::new());
        let handle = TokenHandle::invalid(provider.clone());
        assert!(handle.is_invalid());
        handle.dispose();
        assert!(provider.events().is_empty(), "sentinel is never closed");
    }

    #[test]
    fn duplicate_of_disposed_handle_fails() {
        let (provider, source) = provider_with_token();
        let handle = TokenHandle::from_raw(provider, source).unwrap();
        handle.dispose();
        assert!(matches!(handle.duplicate().unwrap_err(), Error::InvalidToken));
    }

    #[test]
    fn duplicates_are_independent() {
        let (provider, source) = provider_with_token();
        let handle = TokenHandle::from_raw(provider.clone(), source).unwrap();
        let dup = handle.duplicate().unwrap();
        handle.dispose();
        assert!(!dup.is_invalid(), "duplicate survives the source's dispose");
        dup.with_raw(|raw| {
            assert!(provider.is_open(raw), "duplicate raw value stays live");
            Ok(())
        })
        .unwrap();
    }
}

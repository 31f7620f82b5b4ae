//! The injectable OS token-provider seam.
//!
//! Everything this crate asks of the OS security subsystem goes through
//! [`TokenProvider`], so every component above the FFI boundary can be
//! exercised against an in-memory provider. Token-information payloads use
//! a neutral, pointer-free encoding (see [`crate::token::info`]) that every
//! provider produces.

use crate::error::Error;
use crate::sid::SecurityIdentifier;
use crate::token::info::TokenInformationClass;

/// Copyable opaque token value handed out by a provider.
///
/// `0` is never a valid token (rejected with [`Error::InvalidArgument`] at
/// handle construction); [`RawToken::INVALID`] is the sentinel modeling the
/// anonymous identity and is never passed to OS calls or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawToken(pub isize);

impl RawToken {
    /// Sentinel for the anonymous identity (`INVALID_HANDLE_VALUE`).
    pub const INVALID: Self = Self(-1);

    /// True for the sentinel and the null value.
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == -1 || self.0 == 0
    }
}

/// Outcome of one `token_information` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    /// The buffer was filled with this many bytes.
    Filled(usize),
    /// The buffer was too small; this many bytes are required.
    Needs(usize),
}

/// OS security-subsystem operations consumed by this crate.
///
/// All calls are synchronous and may block on the underlying subsystem.
/// Implementations map every OS failure into the [`Error`] taxonomy.
pub trait TokenProvider: Send + Sync {
    /// Opens the calling context's token.
    ///
    /// Prefers the thread (impersonation) token; falls back to the process
    /// token unless `thread_only` is set, in which case an unimpersonated
    /// caller gets `Ok(None)`.
    fn open_current_token(&self, thread_only: bool) -> Result<Option<RawToken>, Error>;

    /// Duplicates `token` with the same access, yielding an independent
    /// handle to the same token object.
    fn duplicate(&self, token: RawToken) -> Result<RawToken, Error>;

    /// Duplicates `token` as an identification-level impersonation token,
    /// suitable for membership checks against a primary token.
    fn duplicate_impersonation(&self, token: RawToken) -> Result<RawToken, Error>;

    /// Writes the information block for `class` into `buf`.
    ///
    /// Returns [`InfoQuery::Needs`] with the required size when `buf` is
    /// too small; the payload uses the neutral encoding documented in
    /// [`crate::token::info`].
    fn token_information(
        &self,
        token: RawToken,
        class: TokenInformationClass,
        buf: &mut [u8],
    ) -> Result<InfoQuery, Error>;

    /// Resolves a SID to its `DOMAIN\name` account form.
    fn lookup_account(&self, sid: &SecurityIdentifier) -> Result<String, Error>;

    /// True when `sid` is present and enabled in `token`.
    ///
    /// `token` must be an impersonation token.
    fn check_membership(&self, token: RawToken, sid: &SecurityIdentifier) -> Result<bool, Error>;

    /// Ends impersonation on the calling thread.
    fn revert_to_self(&self) -> Result<(), Error>;

    /// Impersonates `token` on the calling thread.
    fn impersonate(&self, token: RawToken) -> Result<(), Error>;

    /// Closes `token`. Callers guarantee it is live and owned.
    fn close(&self, token: RawToken) -> Result<(), Error>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory provider used across the crate's unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{InfoQuery, RawToken, TokenProvider};
    use crate::error::Error;
    use crate::group_claims::SidAndAttributes;
    use crate::sid::SecurityIdentifier;
    use crate::token::info::{self, TokenInformationClass, TokenType};

    /// Everything the mock knows about one token object.
    #[derive(Debug, Clone)]
    pub(crate) struct TokenData {
        pub user: SidAndAttributes,
        pub groups: Vec<SidAndAttributes>,
        pub device_groups: Option<Vec<SidAndAttributes>>,
        pub primary_group: SecurityIdentifier,
        pub owner: SecurityIdentifier,
        pub token_type: TokenType,
        /// Raw impersonation level, only meaningful for impersonation tokens.
        pub impersonation_level: u32,
        pub account_name: String,
        /// SIDs `check_membership` answers true for.
        pub memberships: Vec<SecurityIdentifier>,
    }

    impl TokenData {
        pub(crate) fn primary(user: SecurityIdentifier) -> Self {
            let primary_group = user.clone();
            Self {
                user: SidAndAttributes {
                    sid: user,
                    attributes: 0,
                },
                groups: Vec::new(),
                device_groups: None,
                primary_group: primary_group.clone(),
                owner: primary_group,
                token_type: TokenType::Primary,
                impersonation_level: 2,
                account_name: "MOCK\\user".to_owned(),
                memberships: Vec::new(),
            }
        }
    }

    /// Observable provider events, recorded in call order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Impersonate(RawToken),
        RevertToSelf,
        Close(RawToken),
        Duplicate { source: RawToken, result: RawToken },
        LookupAccount(SecurityIdentifier),
    }

    #[derive(Default)]
    struct State {
        tokens: HashMap<isize, TokenData>,
        next_handle: isize,
        events: Vec<Event>,
        /// Token of the calling context, if any (`open_current_token`).
        current_thread_token: Option<TokenData>,
        current_process_token: Option<TokenData>,
        /// Win32 codes `token_information` fails with, per class.
        query_errors: HashMap<TokenInformationClass, u32>,
    }

    pub(crate) struct MockTokenProvider {
        state: Mutex<State>,
    }

    impl MockTokenProvider {
        pub(crate) fn new() -> Self {
            Self {
                state: Mutex::new(State {
                    next_handle: 100,
                    ..State::default()
                }),
            }
        }

        /// Registers a token object and returns its raw value.
        pub(crate) fn register(&self, data: TokenData) -> RawToken {
            let mut state = self.lock();
            let raw = state.next_handle;
            state.next_handle += 4;
            state.tokens.insert(raw, data);
            RawToken(raw)
        }

        pub(crate) fn set_process_token(&self, data: TokenData) {
            self.lock().current_process_token = Some(data);
        }

        /// Makes `token_information` fail for `class` with the given Win32
        /// code; `None` restores normal behavior.
        pub(crate) fn set_query_error(&self, class: TokenInformationClass, code: Option<u32>) {
            let mut state = self.lock();
            match code {
                Some(code) => {
                    state.query_errors.insert(class, code);
                }
                None => {
                    state.query_errors.remove(&class);
                }
            }
        }

        pub(crate) fn events(&self) -> Vec<Event> {
            self.lock().events.clone()
        }

        pub(crate) fn clear_events(&self) {
            self.lock().events.clear();
        }

        pub(crate) fn is_open(&self, token: RawToken) -> bool {
            self.lock().tokens.contains_key(&token.0)
        }

        pub(crate) fn open_count(&self) -> usize {
            self.lock().tokens.len()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }

        fn data(&self, token: RawToken) -> Result<TokenData, Error> {
            self.lock()
                .tokens
                .get(&token.0)
                .cloned()
                .ok_or(Error::InvalidToken)
        }
    }

    impl TokenProvider for MockTokenProvider {
        fn open_current_token(&self, thread_only: bool) -> Result<Option<RawToken>, Error> {
            let data = {
                let state = self.lock();
                match (&state.current_thread_token, &state.current_process_token) {
                    (Some(thread), _) => thread.clone(),
                    (None, _) if thread_only => return Ok(None),
                    (None, Some(process)) => process.clone(),
                    (None, None) => return Err(Error::InvalidToken),
                }
            };
            Ok(Some(self.register(data)))
        }

        fn duplicate(&self, token: RawToken) -> Result<RawToken, Error> {
            let data = self.data(token)?;
            let dup = self.register(data);
            self.lock().events.push(Event::Duplicate {
                source: token,
                result: dup,
            });
            Ok(dup)
        }

        fn duplicate_impersonation(&self, token: RawToken) -> Result<RawToken, Error> {
            let mut data = self.data(token)?;
            data.token_type = TokenType::Impersonation;
            data.impersonation_level = 1; // identification
            let dup = self.register(data);
            self.lock().events.push(Event::Duplicate {
                source: token,
                result: dup,
            });
            Ok(dup)
        }

        fn token_information(
            &self,
            token: RawToken,
            class: TokenInformationClass,
            buf: &mut [u8],
        ) -> Result<InfoQuery, Error> {
            let data = self.data(token)?;
            if let Some(code) = self.lock().query_errors.get(&class) {
                return Err(Error::from_os_code(*code, "GetTokenInformation"));
            }
            let payload = match class {
                TokenInformationClass::User => info::encode_sid_and_attributes(&data.user),
                TokenInformationClass::Groups => info::encode_groups(&data.groups),
                TokenInformationClass::DeviceGroups => match &data.device_groups {
                    Some(groups) => info::encode_groups(groups),
                    // ERROR_INVALID_PARAMETER, the OS answer for a class
                    // the token does not carry.
                    None => return Err(Error::from_os_code(87, "GetTokenInformation")),
                },
                TokenInformationClass::PrimaryGroup => info::encode_sid(&data.primary_group),
                TokenInformationClass::Owner => info::encode_sid(&data.owner),
                TokenInformationClass::Type => u32::from(data.token_type).to_le_bytes().to_vec(),
                TokenInformationClass::ImpersonationLevel => {
                    data.impersonation_level.to_le_bytes().to_vec()
                }
                TokenInformationClass::Statistics => vec![0; 56],
            };
            if buf.len() < payload.len() {
                return Ok(InfoQuery::Needs(payload.len()));
            }
            buf[..payload.len()].copy_from_slice(&payload);
            Ok(InfoQuery::Filled(payload.len()))
        }

        fn lookup_account(&self, sid: &SecurityIdentifier) -> Result<String, Error> {
            let mut state = self.lock();
            state.events.push(Event::LookupAccount(sid.clone()));
            state
                .tokens
                .values()
                .find(|data| data.user.sid == *sid)
                .map(|data| data.account_name.clone())
                .ok_or_else(|| Error::from_os_code(1332, "LookupAccountSid"))
        }

        fn check_membership(
            &self,
            token: RawToken,
            sid: &SecurityIdentifier,
        ) -> Result<bool, Error> {
            let data = self.data(token)?;
            if data.token_type != TokenType::Impersonation {
                return Err(Error::InvalidToken);
            }
            Ok(data.memberships.contains(sid))
        }

        fn revert_to_self(&self) -> Result<(), Error> {
            self.lock().events.push(Event::RevertToSelf);
            Ok(())
        }

        fn impersonate(&self, token: RawToken) -> Result<(), Error> {
            if !self.is_open(token) {
                return Err(Error::InvalidToken);
            }
            self.lock().events.push(Event::Impersonate(token));
            Ok(())
        }

        fn close(&self, token: RawToken) -> Result<(), Error> {
            let mut state = self.lock();
            if state.tokens.remove(&token.0).is_none() {
                return Err(Error::InvalidToken);
            }
            state.events.push(Event::Close(token));
            Ok(())
        }
    }
}

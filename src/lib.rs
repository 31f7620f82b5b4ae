//! # Token-backed Windows identity
//!
//! A claims-backed security principal derived from a Windows access token.
//! The crate provides:
//! - [`TokenIdentity`]: the identity facade, with lazy claim materialization,
//!   memoized predicates (`is_authenticated`, `impersonation_level`), and
//!   `DOMAIN\name` resolution.
//! - [`token::TokenHandle`]: RAII ownership of one access-token handle with
//!   validated construction and idempotent disposal.
//! - [`token::TokenInfoReader`]: variable-length token-information queries
//!   with the size-probe/retry protocol handled internally.
//! - [`group_sid_claims`] / [`primary_sid_claim`]: pure classification of
//!   token SID entries into claims.
//! - [`impersonation`]: scoped "run as this token" regions with
//!   save/restore of the ambient impersonation state, including across
//!   workers via [`impersonation::AmbientSnapshot`].
//! - [`SecurityIdentifier`]: an owned SID value with canonical display,
//!   parsing, and the Windows binary layout.
//!
//! The OS is consumed exclusively through the [`token::TokenProvider`]
//! trait; on Windows `token::OsTokenProvider` implements it, and tests
//! run everything above the FFI boundary against in-memory providers.
//!
//! ## Examples
//! ### Work with SIDs
//! ```rust
//! use win_token_identity::SecurityIdentifier;
//!
//! let sid: SecurityIdentifier = "S-1-5-32-544".parse().unwrap();
//! assert_eq!(sid.to_string(), "S-1-5-32-544");
//! assert_eq!(sid.rid(), 544);
//! ```
//!
//! ### Classify token groups into claims
//! ```rust
//! use win_token_identity::{
//!     DEFAULT_ISSUER, SidAndAttributes, group_attributes, group_sid_claims, well_known,
//! };
//!
//! let groups = vec![SidAndAttributes {
//!     sid: well_known::builtin_users(),
//!     attributes: group_attributes::ENABLED,
//! }];
//! let claims = group_sid_claims(&well_known::builtin_users(), &groups, DEFAULT_ISSUER);
//! assert_eq!(claims.len(), 2, "the primary group yields two claims");
//! ```
//!
//! ### (Windows) Inspect the current identity
//! ```no_run
//! # #[cfg(windows)]
//! # {
//! use std::sync::Arc;
//! use win_token_identity::TokenIdentity;
//! use win_token_identity::token::{OsTokenProvider, TokenProvider};
//!
//! let provider: Arc<dyn TokenProvider> = Arc::new(OsTokenProvider::new());
//! let identity = TokenIdentity::current(provider).unwrap();
//! println!("{}", identity.name().unwrap());
//! # }
//! ```
//!
//! ### (Windows) Run a closure under another token
//! ```no_run
//! # #[cfg(windows)]
//! # {
//! use std::sync::Arc;
//! use win_token_identity::impersonation;
//! use win_token_identity::token::{OsTokenProvider, RawToken, TokenHandle, TokenProvider};
//!
//! let provider: Arc<dyn TokenProvider> = Arc::new(OsTokenProvider::new());
//! # let raw = RawToken(0);
//! let target = TokenHandle::from_raw(Arc::clone(&provider), raw).unwrap();
//! impersonation::run(&provider, Some(&target), || {
//!     // Runs under `target`; the caller's context is restored afterwards.
//! })
//! .unwrap();
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]

mod claim;
mod error;
mod group_claims;
mod identity;
pub mod impersonation;
#[cfg(feature = "serde")]
mod serde_impl;
mod sid;
mod sid_identifier_authority;
pub mod token;
pub mod well_known;

pub use claim::{Claim, ClaimsIdentity, DEFAULT_ISSUER, claim_types, claim_value_types};
pub use error::{Error, InvalidSidFormat};
pub use group_claims::{
    SidAndAttributes, device_sid_claims, group_attributes, group_sid_claims, primary_sid_claim,
};
pub use identity::{DEFAULT_AUTHENTICATION_TYPE, TokenIdentity};
pub use sid::SecurityIdentifier;
pub use sid_identifier_authority::SidIdentifierAuthority;

//! Access-token ownership, information queries, and the provider seam.

pub mod handle;
pub mod info;
pub mod provider;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub use windows::OsTokenProvider;
    }
}

pub use handle::TokenHandle;
pub use info::{ImpersonationLevel, TokenInfoReader, TokenInformationClass, TokenType};
pub use provider::{InfoQuery, RawToken, TokenProvider};

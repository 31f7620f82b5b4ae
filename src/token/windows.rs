//! The Windows implementation of [`TokenProvider`].
//!
//! All FFI stays inside this module: OS structures (`TOKEN_USER`,
//! `TOKEN_GROUPS`, …) embed `PSID` pointers into the same buffer and are
//! converted into the neutral encoding of [`crate::token::info`] before
//! leaving. `GetTokenInformation` reports `ERROR_BAD_LENGTH` instead of
//! `ERROR_INSUFFICIENT_BUFFER` for some classes; both are treated as a
//! resize request here.

use std::ptr::{null, null_mut};

use smallvec::SmallVec;
use widestring::U16Str;
use windows_sys::Win32::Foundation::{
    CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, ERROR_BAD_LENGTH,
    ERROR_INSUFFICIENT_BUFFER, ERROR_NO_TOKEN, GetLastError, HANDLE,
};
use windows_sys::Win32::Security::{
    CheckTokenMembership, DuplicateTokenEx, GetLengthSid, GetTokenInformation,
    ImpersonateLoggedOnUser, LookupAccountSidW, PSID, RevertToSelf, SID_AND_ATTRIBUTES,
    SID_NAME_USE, SecurityIdentification, TOKEN_DUPLICATE, TOKEN_GROUPS,
    TOKEN_IMPERSONATE, TOKEN_INFORMATION_CLASS, TOKEN_OWNER, TOKEN_PRIMARY_GROUP, TOKEN_QUERY,
    TOKEN_USER, TokenDeviceGroups, TokenGroups, TokenImpersonation, TokenImpersonationLevel,
    TokenOwner, TokenPrimaryGroup, TokenStatistics, TokenType, TokenUser,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentProcess, GetCurrentThread, OpenProcessToken, OpenThreadToken,
};

use crate::error::Error;
use crate::sid::SecurityIdentifier;
use crate::token::info::TokenInformationClass;
use crate::token::provider::{InfoQuery, RawToken, TokenProvider};

/// [`TokenProvider`] backed by the Windows security subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsTokenProvider;

impl OsTokenProvider {
    /// Creates the provider. Stateless; every call goes straight to the OS.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn as_handle(token: RawToken) -> HANDLE {
    token.0 as HANDLE
}

fn as_token(handle: HANDLE) -> RawToken {
    RawToken(handle as isize)
}

fn last_error(context: &str) -> Error {
    // SAFETY: GetLastError is side-effect free and can be called unconditionally.
    let code = unsafe { GetLastError() };
    Error::from_os_code(code, context)
}

const fn os_class(class: TokenInformationClass) -> TOKEN_INFORMATION_CLASS {
    match class {
        TokenInformationClass::User => TokenUser,
        TokenInformationClass::Groups => TokenGroups,
        TokenInformationClass::Owner => TokenOwner,
        TokenInformationClass::PrimaryGroup => TokenPrimaryGroup,
        TokenInformationClass::Type => TokenType,
        TokenInformationClass::ImpersonationLevel => TokenImpersonationLevel,
        TokenInformationClass::Statistics => TokenStatistics,
        TokenInformationClass::DeviceGroups => TokenDeviceGroups,
    }
}

/// Copies the binary form of the SID `psid` points at.
///
/// # Safety
/// `psid` must point at a valid SID that outlives the call.
unsafe fn sid_bytes(psid: PSID) -> Vec<u8> {
    // SAFETY: the caller guarantees `psid` is a valid SID.
    let len = unsafe { GetLengthSid(psid) };
    // SAFETY: a valid SID occupies exactly `GetLengthSid` bytes.
    unsafe { std::slice::from_raw_parts(psid.cast::<u8>(), len as usize) }.to_vec()
}

fn push_sid(out: &mut Vec<u8>, sid: &[u8]) {
    #[expect(clippy::cast_possible_truncation, reason = "SIDs are at most 68 bytes")]
    out.extend_from_slice(&(sid.len() as u32).to_le_bytes());
    out.extend_from_slice(sid);
}

/// Fetches the raw OS information block, handling the FFI-level size probe.
fn raw_payload(handle: HANDLE, class: TokenInformationClass) -> Result<Vec<u8>, Error> {
    let mut size = 0u32;
    // SAFETY: standard size-query pattern with null buffer and zero length.
    let probed =
        unsafe { GetTokenInformation(handle, os_class(class), null_mut(), 0, &raw mut size) };
    if probed == 0 {
        // SAFETY: GetLastError can be called immediately after a failing FFI call.
        let code = unsafe { GetLastError() };
        if code != ERROR_INSUFFICIENT_BUFFER && code != ERROR_BAD_LENGTH {
            return Err(Error::from_os_code(code, "GetTokenInformation"));
        }
    }

    loop {
        let mut buffer = vec![0u8; size as usize];
        // SAFETY: buffer pointer and length are consistent with the allocation.
        let filled = unsafe {
            GetTokenInformation(
                handle,
                os_class(class),
                buffer.as_mut_ptr().cast(),
                size,
                &raw mut size,
            )
        };
        if filled != 0 {
            buffer.truncate(size as usize);
            return Ok(buffer);
        }
        // SAFETY: GetLastError can be called immediately after a failing FFI call.
        let code = unsafe { GetLastError() };
        let resize = code == ERROR_INSUFFICIENT_BUFFER || code == ERROR_BAD_LENGTH;
        if !resize || size as usize <= buffer.len() {
            return Err(Error::from_os_code(code, "GetTokenInformation"));
        }
        // The block grew between the probe and the call; go around again.
    }
}

/// Converts an OS `TOKEN_GROUPS` block into the neutral group-list layout.
fn encode_os_groups(raw: &[u8]) -> Vec<u8> {
    let groups = raw.as_ptr().cast::<TOKEN_GROUPS>();
    // SAFETY: `raw` holds a TOKEN_GROUPS block returned by the OS.
    let count = unsafe { std::ptr::read_unaligned(&raw const (*groups).GroupCount) };
    // SAFETY: same block; the flexible array member starts at `Groups`.
    let first = unsafe { &raw const (*groups).Groups }.cast::<SID_AND_ATTRIBUTES>();

    let mut out = count.to_le_bytes().to_vec();
    for index in 0..count as usize {
        // SAFETY: the OS wrote `count` entries starting at `first`.
        let entry = unsafe { std::ptr::read_unaligned(first.add(index)) };
        out.extend_from_slice(&entry.Attributes.to_le_bytes());
        // SAFETY: each entry's Sid points into the same OS buffer.
        let sid = unsafe { sid_bytes(entry.Sid) };
        push_sid(&mut out, &sid);
    }
    out
}

/// Converts one raw OS block into the neutral encoding for `class`.
fn neutral_payload(handle: HANDLE, class: TokenInformationClass) -> Result<Vec<u8>, Error> {
    let raw = raw_payload(handle, class)?;
    let payload = match class {
        TokenInformationClass::User => {
            let user = raw.as_ptr().cast::<TOKEN_USER>();
            // SAFETY: `raw` holds a TOKEN_USER block returned by the OS.
            let entry = unsafe { std::ptr::read_unaligned(&raw const (*user).User) };
            let mut out = entry.Attributes.to_le_bytes().to_vec();
            // SAFETY: the entry's Sid points into the same OS buffer.
            let sid = unsafe { sid_bytes(entry.Sid) };
            push_sid(&mut out, &sid);
            out
        }
        TokenInformationClass::Groups | TokenInformationClass::DeviceGroups => {
            encode_os_groups(&raw)
        }
        TokenInformationClass::Owner => {
            let owner = raw.as_ptr().cast::<TOKEN_OWNER>();
            // SAFETY: `raw` holds a TOKEN_OWNER block returned by the OS.
            let psid = unsafe { std::ptr::read_unaligned(&raw const (*owner).Owner) };
            let mut out = Vec::new();
            // SAFETY: Owner points into the same OS buffer.
            let sid = unsafe { sid_bytes(psid) };
            push_sid(&mut out, &sid);
            out
        }
        TokenInformationClass::PrimaryGroup => {
            let group = raw.as_ptr().cast::<TOKEN_PRIMARY_GROUP>();
            // SAFETY: `raw` holds a TOKEN_PRIMARY_GROUP block returned by the OS.
            let psid = unsafe { std::ptr::read_unaligned(&raw const (*group).PrimaryGroup) };
            let mut out = Vec::new();
            // SAFETY: PrimaryGroup points into the same OS buffer.
            let sid = unsafe { sid_bytes(psid) };
            push_sid(&mut out, &sid);
            out
        }
        // Scalars and the statistics block are already pointer-free.
        TokenInformationClass::Type
        | TokenInformationClass::ImpersonationLevel
        | TokenInformationClass::Statistics => raw,
    };
    Ok(payload)
}

impl TokenProvider for OsTokenProvider {
    fn open_current_token(&self, thread_only: bool) -> Result<Option<RawToken>, Error> {
        let access = TOKEN_QUERY | TOKEN_DUPLICATE | TOKEN_IMPERSONATE;
        let mut handle: HANDLE = null_mut();
        // SAFETY: GetCurrentThread returns a pseudo-handle and cannot fail.
        let thread = unsafe { GetCurrentThread() };
        // SAFETY: FFI call; the out pointer is valid. OpenAsSelf avoids
        // failing against the impersonated identity's own ACL.
        let opened = unsafe { OpenThreadToken(thread, access, 1, &raw mut handle) };
        if opened != 0 {
            return Ok(Some(as_token(handle)));
        }
        // SAFETY: GetLastError can be called immediately after a failing FFI call.
        let code = unsafe { GetLastError() };
        if code != ERROR_NO_TOKEN {
            return Err(Error::from_os_code(code, "OpenThreadToken"));
        }
        if thread_only {
            return Ok(None);
        }

        // SAFETY: GetCurrentProcess returns a pseudo-handle and cannot fail.
        let process = unsafe { GetCurrentProcess() };
        // SAFETY: FFI call; the out pointer is valid.
        let opened = unsafe { OpenProcessToken(process, access, &raw mut handle) };
        if opened == 0 {
            return Err(last_error("OpenProcessToken"));
        }
        Ok(Some(as_token(handle)))
    }

    fn duplicate(&self, token: RawToken) -> Result<RawToken, Error> {
        let mut duplicated: HANDLE = null_mut();
        // SAFETY: GetCurrentProcess returns a pseudo-handle and cannot fail.
        let process = unsafe { GetCurrentProcess() };
        // SAFETY: FFI call; handles and the out pointer are valid.
        let ok = unsafe {
            DuplicateHandle(
                process,
                as_handle(token),
                process,
                &raw mut duplicated,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        if ok == 0 {
            return Err(last_error("DuplicateHandle"));
        }
        Ok(as_token(duplicated))
    }

    fn duplicate_impersonation(&self, token: RawToken) -> Result<RawToken, Error> {
        let mut duplicated: HANDLE = null_mut();
        // SAFETY: FFI call; handles and the out pointer are valid. Default
        // security attributes are acceptable for a query-only duplicate.
        let ok = unsafe {
            DuplicateTokenEx(
                as_handle(token),
                TOKEN_QUERY,
                null(),
                SecurityIdentification,
                TokenImpersonation,
                &raw mut duplicated,
            )
        };
        if ok == 0 {
            return Err(last_error("DuplicateTokenEx"));
        }
        Ok(as_token(duplicated))
    }

    fn token_information(
        &self,
        token: RawToken,
        class: TokenInformationClass,
        buf: &mut [u8],
    ) -> Result<InfoQuery, Error> {
        let payload = neutral_payload(as_handle(token), class)?;
        match buf.get_mut(..payload.len()) {
            Some(dest) => {
                dest.copy_from_slice(&payload);
                Ok(InfoQuery::Filled(payload.len()))
            }
            None => Ok(InfoQuery::Needs(payload.len())),
        }
    }

    fn lookup_account(&self, sid: &SecurityIdentifier) -> Result<String, Error> {
        let sid_bytes = sid.as_bytes();
        let psid: PSID = sid_bytes.as_ptr().cast_mut().cast();
        let mut name_len = 0u32;
        let mut domain_len = 0u32;
        let mut sid_type: SID_NAME_USE = 0;

        // SAFETY: standard size-query pattern with null buffers.
        let probed = unsafe {
            LookupAccountSidW(
                null(),
                psid,
                null_mut(),
                &raw mut name_len,
                null_mut(),
                &raw mut domain_len,
                &raw mut sid_type,
            )
        };
        if probed != 0 {
            return Err(Error::Platform {
                code: 0,
                message: "LookupAccountSidW size probe unexpectedly succeeded".to_owned(),
            });
        }
        // SAFETY: GetLastError can be called immediately after a failing FFI call.
        let code = unsafe { GetLastError() };
        if code != ERROR_INSUFFICIENT_BUFFER {
            return Err(Error::from_os_code(code, "LookupAccountSid"));
        }

        let mut name = SmallVec::<[u16; 256]>::with_capacity(name_len as usize);
        let mut domain = SmallVec::<[u16; 256]>::with_capacity(domain_len as usize);
        // SAFETY: buffer pointers and lengths are consistent with the allocations.
        let ok = unsafe {
            LookupAccountSidW(
                null(),
                psid,
                name.as_mut_ptr(),
                &raw mut name_len,
                domain.as_mut_ptr(),
                &raw mut domain_len,
                &raw mut sid_type,
            )
        };
        if ok == 0 {
            return Err(last_error("LookupAccountSid"));
        }
        // On success the reported lengths exclude the terminating nul.
        // SAFETY: the call filled `name_len` elements of `name`.
        unsafe { name.set_len(name_len as usize) };
        // SAFETY: the call filled `domain_len` elements of `domain`.
        unsafe { domain.set_len(domain_len as usize) };

        let name = U16Str::from_slice(&name).to_string_lossy();
        if domain.is_empty() {
            return Ok(name);
        }
        let domain = U16Str::from_slice(&domain).to_string_lossy();
        Ok(format!("{domain}\\{name}"))
    }

    fn check_membership(&self, token: RawToken, sid: &SecurityIdentifier) -> Result<bool, Error> {
        let sid_bytes = sid.as_bytes();
        let psid: PSID = sid_bytes.as_ptr().cast_mut().cast();
        let mut is_member = 0i32;
        // SAFETY: FFI call; the SID buffer and the out pointer are valid.
        let ok = unsafe { CheckTokenMembership(as_handle(token), psid, &raw mut is_member) };
        if ok == 0 {
            return Err(last_error("CheckTokenMembership"));
        }
        Ok(is_member != 0)
    }

    fn revert_to_self(&self) -> Result<(), Error> {
        // SAFETY: RevertToSelf takes no arguments; failure is reported by
        // the return value.
        let ok = unsafe { RevertToSelf() };
        if ok == 0 {
            return Err(last_error("RevertToSelf"));
        }
        Ok(())
    }

    fn impersonate(&self, token: RawToken) -> Result<(), Error> {
        // SAFETY: FFI call; the handle is live for the duration of the call.
        let ok = unsafe { ImpersonateLoggedOnUser(as_handle(token)) };
        if ok == 0 {
            return Err(last_error("ImpersonateLoggedOnUser"));
        }
        Ok(())
    }

    fn close(&self, token: RawToken) -> Result<(), Error> {
        // SAFETY: callers guarantee the handle is live and owned.
        let ok = unsafe { CloseHandle(as_handle(token)) };
        if ok == 0 {
            return Err(last_error("CloseHandle"));
        }
        Ok(())
    }
}

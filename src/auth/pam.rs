//! PAM credential oracle
//!
//! libpam is loaded at runtime (like libEGL) so a missing library is a
//! startup error instead of a link failure. The conversation callback answers
//! every prompt with the typed secret.

use anyhow::{anyhow, Context, Result};
use libc::{c_char, c_int, c_void};
use log::{debug, info, warn};
use std::ffi::{CStr, CString};
use zeroize::Zeroizing;

use super::Authenticator;

const PAM_SUCCESS: c_int = 0;
const PAM_BUF_ERR: c_int = 5;
const PAM_CONV_ERR: c_int = 19;

const PAM_PROMPT_ECHO_OFF: c_int = 1;
const PAM_PROMPT_ECHO_ON: c_int = 2;
const PAM_ERROR_MSG: c_int = 3;
const PAM_TEXT_INFO: c_int = 4;

#[repr(C)]
struct PamMessage {
    msg_style: c_int,
    msg: *const c_char,
}

#[repr(C)]
struct PamResponse {
    resp: *mut c_char,
    resp_retcode: c_int,
}

type ConvFn = unsafe extern "C" fn(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> c_int;

#[repr(C)]
struct PamConv {
    conv: ConvFn,
    appdata_ptr: *mut c_void,
}

type PamStartFn = unsafe extern "C" fn(
    service_name: *const c_char,
    user: *const c_char,
    pam_conversation: *const PamConv,
    pamh: *mut *mut c_void,
) -> c_int;
type PamAuthenticateFn = unsafe extern "C" fn(pamh: *mut c_void, flags: c_int) -> c_int;
type PamEndFn = unsafe extern "C" fn(pamh: *mut c_void, pam_status: c_int) -> c_int;
type PamStrerrorFn = unsafe extern "C" fn(pamh: *mut c_void, errnum: c_int) -> *const c_char;

/// Verifies secrets for the current user through PAM
pub struct PamAuthenticator {
    // Keeps the function pointers below valid
    _lib: libloading::Library,
    pam_start: PamStartFn,
    pam_authenticate: PamAuthenticateFn,
    pam_end: PamEndFn,
    pam_strerror: PamStrerrorFn,
    service: CString,
    user: CString,
}

impl PamAuthenticator {
    /// Load libpam and resolve the current user
    pub fn new(service: &str) -> Result<Self> {
        let lib = unsafe {
            libloading::Library::new("libpam.so.0")
                .or_else(|_| libloading::Library::new("libpam.so"))
                .context("Failed to load PAM library")?
        };

        let (pam_start, pam_authenticate, pam_end, pam_strerror) = unsafe {
            let start: libloading::Symbol<PamStartFn> =
                lib.get(b"pam_start\0").context("pam_start not found")?;
            let authenticate: libloading::Symbol<PamAuthenticateFn> = lib
                .get(b"pam_authenticate\0")
                .context("pam_authenticate not found")?;
            let end: libloading::Symbol<PamEndFn> =
                lib.get(b"pam_end\0").context("pam_end not found")?;
            let strerror: libloading::Symbol<PamStrerrorFn> =
                lib.get(b"pam_strerror\0").context("pam_strerror not found")?;
            (*start, *authenticate, *end, *strerror)
        };

        let uid = nix::unistd::getuid();
        let user = nix::unistd::User::from_uid(uid)
            .context("Failed to look up current user")?
            .ok_or_else(|| anyhow!("No passwd entry for uid {}", uid))?;

        info!("PAM: service '{}', user '{}'", service, user.name);

        Ok(Self {
            _lib: lib,
            pam_start,
            pam_authenticate,
            pam_end,
            pam_strerror,
            service: CString::new(service).context("PAM service name contains NUL")?,
            user: CString::new(user.name).context("User name contains NUL")?,
        })
    }

    fn strerror(&self, pamh: *mut c_void, code: c_int) -> String {
        let s = unsafe { (self.pam_strerror)(pamh, code) };
        if s.is_null() {
            return format!("PAM error {}", code);
        }
        unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
    }
}

impl Authenticator for PamAuthenticator {
    fn verify(&self, secret: &str) -> bool {
        if secret.as_bytes().contains(&0) {
            return false;
        }
        // NUL-terminated copy, wiped on drop
        let mut bytes = Zeroizing::new(Vec::with_capacity(secret.len() + 1));
        bytes.extend_from_slice(secret.as_bytes());
        bytes.push(0);

        let conv = PamConv {
            conv: conversation,
            appdata_ptr: bytes.as_ptr() as *mut c_void,
        };

        let mut pamh: *mut c_void = std::ptr::null_mut();
        let status = unsafe {
            (self.pam_start)(self.service.as_ptr(), self.user.as_ptr(), &conv, &mut pamh)
        };
        if status != PAM_SUCCESS {
            warn!("pam_start failed: {}", self.strerror(pamh, status));
            return false;
        }

        let status = unsafe { (self.pam_authenticate)(pamh, 0) };
        if status != PAM_SUCCESS {
            debug!("pam_authenticate: {}", self.strerror(pamh, status));
        }
        unsafe { (self.pam_end)(pamh, status) };

        status == PAM_SUCCESS
    }
}

/// PAM conversation: answer prompts with the secret in `appdata_ptr`
unsafe extern "C" fn conversation(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> c_int {
    if num_msg <= 0 || msg.is_null() || resp.is_null() || appdata_ptr.is_null() {
        return PAM_CONV_ERR;
    }
    let count = num_msg as usize;

    // PAM frees the responses with free(), so they must come from malloc
    let responses =
        libc::calloc(count, std::mem::size_of::<PamResponse>()) as *mut PamResponse;
    if responses.is_null() {
        return PAM_BUF_ERR;
    }

    let secret = appdata_ptr as *const c_char;
    for i in 0..count {
        let m = *msg.add(i);
        if m.is_null() {
            continue;
        }
        match (*m).msg_style {
            PAM_PROMPT_ECHO_OFF | PAM_PROMPT_ECHO_ON => {
                let copy = libc::strdup(secret);
                if copy.is_null() {
                    free_responses(responses, i);
                    return PAM_BUF_ERR;
                }
                (*responses.add(i)).resp = copy;
            }
            PAM_ERROR_MSG | PAM_TEXT_INFO => {
                if !(*m).msg.is_null() {
                    debug!("PAM: {}", CStr::from_ptr((*m).msg).to_string_lossy());
                }
            }
            _ => {
                free_responses(responses, i);
                return PAM_CONV_ERR;
            }
        }
    }

    *resp = responses;
    PAM_SUCCESS
}

/// Wipe and free the first `filled` responses and the array itself
unsafe fn free_responses(responses: *mut PamResponse, filled: usize) {
    for i in 0..filled {
        let r = (*responses.add(i)).resp;
        if !r.is_null() {
            std::ptr::write_bytes(r, 0, libc::strlen(r));
            libc::free(r as *mut c_void);
        }
    }
    libc::free(responses as *mut c_void);
}

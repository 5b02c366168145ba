//! Error Register
//!
//! Reads the engine's last diagnostic after a failing call and classifies it.
//!
//! A miss is recognised only by the text "not found" (any case) in that
//! diagnostic. Engines that word their misses differently will have them
//! surface as storage failures.

use std::ffi::CStr;

use super::NativeApi;

/// Copy the last diagnostic out of the engine and free the engine's buffer
///
/// Returns `None` when the engine has no message (or an empty one).
pub fn last_error(api: &NativeApi) -> Option<String> {
    // SAFETY: LastError returns null or a NUL-terminated string owned by the
    // engine, released exactly once below with FreeCString.
    unsafe {
        let ptr = (api.last_error)();
        if ptr.is_null() {
            return None;
        }
        let message = CStr::from_ptr(ptr).to_string_lossy().into_owned();
        (api.free_cstring)(ptr);
        (!message.is_empty()).then_some(message)
    }
}

/// True when a diagnostic describes a missing key
pub fn is_not_found(message: &str) -> bool {
    message.to_ascii_lowercase().contains("not found")
}

//! Dynamic library loading
//!
//! Resolves the engine symbols from a shared library with `dlopen`/`dlsym`.
//! The library is never unloaded; its function table lives for the process.

use std::path::Path;

use crate::error::{AtlasError, Result};

use super::NativeApi;

#[cfg(unix)]
pub fn load(path: &Path) -> Result<NativeApi> {
    use std::ffi::{CStr, CString};
    use std::os::unix::ffi::OsStrExt;

    use tracing::debug;

    use super::LibrarySource;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        AtlasError::Config(format!("library path contains a NUL byte: {}", path.display()))
    })?;

    // SAFETY: c_path is NUL-terminated; the handle is intentionally leaked.
    let lib = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
    if lib.is_null() {
        return Err(AtlasError::Config(format!(
            "failed to load native library {}: {}",
            path.display(),
            dl_error()
        )));
    }

    let symbol = |name: &'static [u8]| -> Option<*mut libc::c_void> {
        let name = CStr::from_bytes_with_nul(name).ok()?;
        // SAFETY: lib is a live handle from dlopen and name is NUL-terminated.
        let ptr = unsafe { libc::dlsym(lib, name.as_ptr()) };
        (!ptr.is_null()).then_some(ptr)
    };
    let required = |name: &'static [u8]| -> Result<*mut libc::c_void> {
        symbol(name).ok_or_else(|| {
            AtlasError::Config(format!(
                "native library {} does not export {}",
                path.display(),
                String::from_utf8_lossy(&name[..name.len() - 1])
            ))
        })
    };

    // SAFETY: each symbol is declared by the engine ABI with exactly the
    // signature of the function pointer type it is transmuted to.
    let api = unsafe {
        NativeApi {
            source: LibrarySource::Dynamic(path.to_path_buf()),
            open: std::mem::transmute(required(b"Open\0")?),
            close: std::mem::transmute(required(b"Close\0")?),
            set: std::mem::transmute(required(b"Set\0")?),
            get: std::mem::transmute(required(b"Get\0")?),
            delete: std::mem::transmute(required(b"Delete\0")?),
            sync: std::mem::transmute(required(b"Sync\0")?),
            scan: symbol(b"Scan\0").map(|ptr| std::mem::transmute(ptr)),
            last_error: std::mem::transmute(required(b"LastError\0")?),
            free_cstring: std::mem::transmute(required(b"FreeCString\0")?),
            free_buffer: std::mem::transmute(required(b"FreeBuffer\0")?),
        }
    };

    debug!(path = %path.display(), scan = api.scan.is_some(), "loaded native library");
    Ok(api)
}

#[cfg(not(unix))]
pub fn load(path: &Path) -> Result<NativeApi> {
    Err(AtlasError::Config(format!(
        "loading {} is not supported on this platform; use the bundled engine",
        path.display()
    )))
}

#[cfg(unix)]
fn dl_error() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated thread-local string.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "unknown dlopen error".to_string()
        } else {
            std::ffi::CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

//! C interface
//!
//! Sessions live in a process-wide registry keyed by a nonzero id that is
//! never reused. The id is what crosses the boundary, disguised as an opaque
//! pointer, so a stale or bogus handle is a failed lookup rather than a wild
//! dereference.
//!
//! No Rust panic crosses the boundary: every entry point runs under
//! `catch_unwind`. A session that panicked is dropped from the registry.

use crate::config::{RemuxConfig, RemuxOptions};
use crate::error::{RemuxError, Result};
use crate::session::Session;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::ffi::{c_char, CStr, CString};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

pub const TSREMUX_OK: i32 = 0;
pub const TSREMUX_ERR_INVALID_HANDLE: i32 = -1;
pub const TSREMUX_ERR_OUTPUT_TOO_SMALL: i32 = -2;
pub const TSREMUX_ERR_CONFIG: i32 = -3;
pub const TSREMUX_ERR_DESYNC: i32 = -4;
pub const TSREMUX_ERR_FRAME_TOO_LARGE: i32 = -5;
pub const TSREMUX_ERR_DECODE: i32 = -6;
pub const TSREMUX_ERR_ENCODE: i32 = -7;
pub const TSREMUX_ERR_CODEC_MISMATCH: i32 = -8;
pub const TSREMUX_ERR_FFMPEG: i32 = -9;
pub const TSREMUX_ERR_PANIC: i32 = -10;

/// Opaque session handle
pub struct TsRemuxSession {
    _private: [u8; 0],
}

static SESSIONS: OnceLock<DashMap<u64, Arc<Mutex<Session>>>> = OnceLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static LAST_ERROR: Mutex<Option<String>> = parking_lot::const_mutex(None);

fn sessions() -> &'static DashMap<u64, Arc<Mutex<Session>>> {
    SESSIONS.get_or_init(DashMap::new)
}

fn set_last_error(message: String) {
    *LAST_ERROR.lock() = Some(message);
}

fn clear_last_error() {
    *LAST_ERROR.lock() = None;
}

/// Conversion of a call's outcome to its C return value
trait ReturnCode {
    fn code(&self) -> isize;
}

impl ReturnCode for Result<usize> {
    fn code(&self) -> isize {
        match self {
            Ok(n) => isize::try_from(*n).unwrap_or(TSREMUX_ERR_OUTPUT_TOO_SMALL as isize),
            Err(e) => e.code() as isize,
        }
    }
}

impl ReturnCode for i32 {
    fn code(&self) -> isize {
        *self as isize
    }
}

fn return_code<C: ReturnCode, F: FnOnce() -> C>(f: F) -> isize {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(ret) => ret.code(),
        Err(_) => {
            set_last_error(RemuxError::Panic.to_string());
            RemuxError::Panic.code() as isize
        }
    }
}

/// Record a failed call in the process-wide slot.
fn record<T>(result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        set_last_error(e.to_string());
    }
    result
}

fn handle(id: u64) -> *mut TsRemuxSession {
    id as usize as *mut TsRemuxSession
}

fn parse_handle(session: *mut TsRemuxSession) -> Result<u64> {
    match session as usize {
        0 => Err(RemuxError::InvalidHandle),
        id => Ok(id as u64),
    }
}

/// # Safety
///
/// The caller must ensure that data is valid for `size` bytes for 'a.
unsafe fn parse_slice<'a>(data: *const u8, size: usize) -> Result<&'a [u8]> {
    if data.is_null() {
        if size == 0 {
            return Ok(&[]);
        }
        return Err(RemuxError::InvalidPointer);
    }
    Ok(unsafe { std::slice::from_raw_parts(data, size) })
}

/// # Safety
///
/// The caller must ensure that data is valid and writable for `size` bytes
/// for 'a.
unsafe fn parse_slice_mut<'a>(data: *mut u8, size: usize) -> Result<&'a mut [u8]> {
    if data.is_null() {
        if size == 0 {
            return Ok(&mut []);
        }
        return Err(RemuxError::InvalidPointer);
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(data, size) })
}

/// # Safety
///
/// The caller must ensure that cstr is null or a valid null-terminated
/// string for 'a.
unsafe fn parse_str<'a>(cstr: *const c_char) -> Result<Option<&'a str>> {
    if cstr.is_null() {
        return Ok(None);
    }
    let string = unsafe { CStr::from_ptr(cstr) };
    string
        .to_str()
        .map(Some)
        .map_err(|e| RemuxError::Config(format!("string is not UTF-8: {}", e)))
}

fn into_c_string(message: &str) -> *mut c_char {
    // interior NULs would truncate the message on the C side anyway
    let message = message.replace('\0', " ");
    CString::new(message).map_or(std::ptr::null_mut(), CString::into_raw)
}

fn create(sample_rate: i32, channels: i32, bitrate: i32, options: RemuxOptions) -> Result<u64> {
    let config = RemuxConfig::from_raw(sample_rate, channels, bitrate)?;
    let session = Session::new(config, options)?;
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    sessions().insert(id, Arc::new(Mutex::new(session)));
    tracing::debug!(id, "session registered");
    Ok(id)
}

fn create_handle(f: impl FnOnce() -> Result<u64>) -> *mut TsRemuxSession {
    clear_last_error();
    match std::panic::catch_unwind(AssertUnwindSafe(|| record(f()))) {
        Ok(Ok(id)) => handle(id),
        Ok(Err(_)) => std::ptr::null_mut(),
        Err(_) => {
            set_last_error(RemuxError::Panic.to_string());
            std::ptr::null_mut()
        }
    }
}

/// Run `f` on a live session. A panic inside `f` removes the session.
fn with_session<T>(
    session: *mut TsRemuxSession,
    f: impl FnOnce(&mut Session) -> Result<T>,
) -> Result<T> {
    let id = parse_handle(session)?;
    let session = sessions()
        .get(&id)
        .map(|entry| Arc::clone(entry.value()))
        .ok_or(RemuxError::InvalidHandle)?;

    let mut guard = session.lock();
    match std::panic::catch_unwind(AssertUnwindSafe(|| f(&mut guard))) {
        Ok(result) => {
            if let Some(message) = guard.last_error() {
                set_last_error(message.to_string());
            }
            result
        }
        Err(_) => {
            drop(guard);
            sessions().remove(&id);
            tracing::error!(id, "session panicked and was dropped");
            Err(RemuxError::Panic)
        }
    }
}

/// Create a session with default options.
///
/// Returns a non-null handle on success. On failure returns null and the
/// reason is available from [tsremux_last_error].
#[no_mangle]
pub extern "C" fn tsremux_init(sample_rate: i32, channels: i32, bitrate: i32) -> *mut TsRemuxSession {
    create_handle(|| create(sample_rate, channels, bitrate, RemuxOptions::default()))
}

/// Create a session with options given as a TOML document.
///
/// A null `options_toml` means default options. Unknown keys are rejected.
///
/// # Safety
/// - The caller must ensure that options_toml is null or a valid
///   null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn tsremux_init_with_options(
    sample_rate: i32,
    channels: i32,
    bitrate: i32,
    options_toml: *const c_char,
) -> *mut TsRemuxSession {
    create_handle(|| {
        let options = match unsafe { parse_str(options_toml)? } {
            Some(toml) => RemuxOptions::from_toml_str(toml)?,
            None => RemuxOptions::default(),
        };
        create(sample_rate, channels, bitrate, options)
    })
}

/// Remux one chunk of transport stream.
///
/// Returns the number of bytes written to `output`, or a negative code. On
/// [TSREMUX_ERR_OUTPUT_TOO_SMALL] the output buffer is untouched; the
/// produced bytes are kept and returned by the next call, which may pass an
/// empty input.
///
/// # Safety
/// - `input` must be valid for `input_len` bytes (or null with length 0).
/// - `output` must be valid and writable for `output_capacity` bytes (or
///   null with capacity 0).
#[no_mangle]
pub unsafe extern "C" fn tsremux_process(
    session: *mut TsRemuxSession,
    input: *const u8,
    input_len: usize,
    output: *mut u8,
    output_capacity: usize,
) -> isize {
    clear_last_error();
    return_code(|| {
        record(with_session(session, |session| {
            let input = unsafe { parse_slice(input, input_len)? };
            let output = unsafe { parse_slice_mut(output, output_capacity)? };
            session.process(input, output)
        }))
    })
}

/// Encode any queued samples at end of stream.
///
/// Returns the number of bytes written to `output`, or a negative code.
///
/// # Safety
/// - `output` must be valid and writable for `output_capacity` bytes (or
///   null with capacity 0).
#[no_mangle]
pub unsafe extern "C" fn tsremux_flush(
    session: *mut TsRemuxSession,
    output: *mut u8,
    output_capacity: usize,
) -> isize {
    clear_last_error();
    return_code(|| {
        record(with_session(session, |session| {
            let output = unsafe { parse_slice_mut(output, output_capacity)? };
            session.flush(output)
        }))
    })
}

/// Release a session. Null, unknown and already freed handles are ignored.
#[no_mangle]
pub extern "C" fn tsremux_free(session: *mut TsRemuxSession) {
    return_code(|| {
        if let Ok(id) = parse_handle(session) {
            if sessions().remove(&id).is_some() {
                tracing::debug!(id, "session freed");
            }
        }
        TSREMUX_OK
    });
}

/// Library version. The string is static and must not be freed.
#[no_mangle]
pub extern "C" fn tsremux_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Message of the most recent failure in this process, or null.
///
/// The slot is shared by all sessions and threads. The returned string is
/// owned by the caller and must be released with [tsremux_free_string].
#[no_mangle]
pub extern "C" fn tsremux_last_error() -> *mut c_char {
    match LAST_ERROR.lock().as_deref() {
        Some(message) => into_c_string(message),
        None => std::ptr::null_mut(),
    }
}

/// Message of the most recent failure of one session, or null.
///
/// Release the string with [tsremux_free_string].
#[no_mangle]
pub extern "C" fn tsremux_session_last_error(session: *mut TsRemuxSession) -> *mut c_char {
    let message = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let id = parse_handle(session).ok()?;
        let session = sessions().get(&id).map(|entry| Arc::clone(entry.value()))?;
        let message = session.lock().last_error().map(str::to_string);
        message
    }));
    match message {
        Ok(Some(message)) => into_c_string(&message),
        _ => std::ptr::null_mut(),
    }
}

/// Session counters as a JSON object, or null for an invalid handle.
///
/// Release the string with [tsremux_free_string].
#[no_mangle]
pub extern "C" fn tsremux_stats_json(session: *mut TsRemuxSession) -> *mut c_char {
    let json = std::panic::catch_unwind(AssertUnwindSafe(|| {
        with_session(session, |session| {
            serde_json::to_string(&session.stats())
                .map_err(|e| RemuxError::Config(format!("cannot serialize stats: {}", e)))
        })
    }));
    match json {
        Ok(Ok(json)) => into_c_string(&json),
        _ => std::ptr::null_mut(),
    }
}

/// Release a string returned by this library. Null is ignored.
///
/// # Safety
/// - `s` must be null or a pointer returned by [tsremux_last_error],
///   [tsremux_session_last_error] or [tsremux_stats_json] that has not been
///   released yet.
#[no_mangle]
pub unsafe extern "C" fn tsremux_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Install a `tracing` subscriber writing to stderr.
///
/// `filter` uses `RUST_LOG` syntax (e.g. "info" or "tsremux=debug"); null
/// falls back to `RUST_LOG`, then "info". Returns 0 when installed and 1 when
/// the process already had a subscriber.
///
/// # Safety
/// - The caller must ensure that filter is null or a valid null-terminated
///   C string.
#[no_mangle]
pub unsafe extern "C" fn tsremux_init_logging(filter: *const c_char) -> i32 {
    return_code(|| {
        let filter = match unsafe { parse_str(filter) } {
            Ok(filter) => filter,
            Err(e) => return e.code(),
        };
        if crate::init_logging(filter, false) {
            TSREMUX_OK
        } else {
            1
        }
    }) as i32
}

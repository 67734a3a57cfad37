//! FFmpeg module - library initialization and log routing
//!
//! This module handles:
//! - One-time FFmpeg initialization shared by every session
//! - Forwarding FFmpeg's own log lines into `tracing`
//! - Safe accessors for frame planes (see [`helpers`])

pub mod helpers;

pub use ffmpeg_next as ffmpeg;

use crate::error::FfmpegError;
use std::sync::OnceLock;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the FFmpeg library.
///
/// Safe to call from any thread and any number of times; the first call does
/// the work and later calls return the cached outcome.
pub fn init() -> Result<(), FfmpegError> {
    INIT.get_or_init(|| {
        ffmpeg::init().map_err(|e| format!("ffmpeg::init() failed: {}", e))?;
        install_log_filter();
        tracing::debug!("FFmpeg initialized");
        Ok(())
    })
    .clone()
    .map_err(FfmpegError::InitFailed)
}

/// Route FFmpeg log output through `tracing` at warning level and above.
fn install_log_filter() {
    // SAFETY: both calls only replace global FFmpeg log settings. They run
    // inside `INIT`, so exactly once and before any codec is opened.
    unsafe {
        ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_WARNING as i32);
        ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages the decoders emit for every damaged frame; the remuxer already
/// reports those through its own error path.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Header missing",
    "incomplete frame",
    "frame sync error",
    "error decoding the audio block",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg_next::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg_next::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg_next::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() || SUPPRESSED_MESSAGES.iter().any(|s| msg.contains(s)) {
        return;
    }

    if level <= ffmpeg_next::ffi::AV_LOG_ERROR as std::ffi::c_int {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::debug!(target: "ffmpeg", "{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }
}

//! MPEG-TS audio remuxer
//!
//! Replaces the MP2 or AC-3 track of a transport stream with AAC-LC (ADTS in
//! PES) while every other packet is copied through byte for byte. The engine
//! is driven chunk by chunk through a [`Session`], natively or through the C
//! interface in [`ffi`].

pub mod audio;
pub mod config;
pub mod error;
pub mod ffi;
pub mod ffmpeg;
pub mod session;
pub mod transcode;
pub mod ts;

#[cfg(test)]
pub(crate) mod tests;

pub use audio::Codec;
pub use config::{DecodeErrorPolicy, RemuxConfig, RemuxOptions};
pub use error::{FfmpegError, RemuxError, Result};
pub use session::{Session, SessionStats};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a global `tracing` subscriber writing to stderr.
///
/// `filter` takes `RUST_LOG` syntax; without one, `RUST_LOG` is used and then
/// `info`. Returns `false` when a subscriber was already installed.
pub fn init_logging(filter: Option<&str>, json: bool) -> bool {
    let filter = match filter {
        Some(filter) => tracing_subscriber::EnvFilter::try_new(filter)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info".into()),
    };

    let (text, json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok()
}

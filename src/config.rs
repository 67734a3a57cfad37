//! Session configuration
//!
//! `RemuxConfig` carries the three encoder parameters fixed at session
//! creation. `RemuxOptions` holds the tunables a host may override, loadable
//! from a TOML document.

use crate::error::{RemuxError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sample rates a legacy MP2/AC-3 source can carry and ADTS can signal.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[16000, 22050, 24000, 32000, 44100, 48000];
/// Lowest accepted AAC bitrate in bits per second
pub const MIN_BITRATE: u32 = 32_000;
/// Highest accepted AAC bitrate in bits per second
pub const MAX_BITRATE: u32 = 512_000;
/// Output is mono or stereo
pub const MAX_CHANNELS: u16 = 2;
/// Ceiling for `max_access_unit_size`; the largest AC-3 frame is 3840 bytes
pub const MAX_ACCESS_UNIT_LIMIT: usize = 64 * 1024;
/// Ceiling for `sync_scan_window`
pub const MAX_SYNC_SCAN_WINDOW: usize = 188 * 64 * 1024;
/// PIDs 0x0000..=0x000F are reserved for PSI tables
pub const FIRST_ELEMENTARY_PID: u16 = 0x0010;

/// Encoder parameters for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemuxConfig {
    /// Output sample rate in Hz (must equal the source rate)
    pub sample_rate: u32,

    /// Output channel count (1 or 2)
    pub channels: u16,

    /// AAC bitrate in bps
    pub bitrate: u32,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bitrate: 192_000,
        }
    }
}

impl RemuxConfig {
    pub fn new(sample_rate: u32, channels: u16, bitrate: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bitrate,
        }
    }

    /// Build a config from the signed integers a C host passes in.
    pub fn from_raw(sample_rate: i32, channels: i32, bitrate: i32) -> Result<Self> {
        let sample_rate = u32::try_from(sample_rate)
            .map_err(|_| RemuxError::Config(format!("invalid sample rate {}", sample_rate)))?;
        let channels = u16::try_from(channels)
            .map_err(|_| RemuxError::Config(format!("invalid channel count {}", channels)))?;
        let bitrate = u32::try_from(bitrate)
            .map_err(|_| RemuxError::Config(format!("invalid bitrate {}", bitrate)))?;
        let config = Self::new(sample_rate, channels, bitrate);
        config.validate()?;
        Ok(config)
    }

    /// Highest bitrate AAC-LC can carry at this rate and channel count
    /// (6144 bits per channel per 1024-sample frame).
    pub fn max_bitrate(&self) -> u32 {
        let limit = 6144u64 * self.channels as u64 * self.sample_rate as u64 / 1024;
        limit.min(MAX_BITRATE as u64) as u32
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(RemuxError::Config(format!(
                "unsupported sample rate {} Hz (expected one of {:?})",
                self.sample_rate, SUPPORTED_SAMPLE_RATES
            )));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(RemuxError::Config(format!(
                "unsupported channel count {} (expected 1..={})",
                self.channels, MAX_CHANNELS
            )));
        }
        if self.bitrate < MIN_BITRATE || self.bitrate > self.max_bitrate() {
            return Err(RemuxError::Config(format!(
                "bitrate {} out of range {}..={} for {} Hz, {} channel(s)",
                self.bitrate,
                MIN_BITRATE,
                self.max_bitrate(),
                self.sample_rate,
                self.channels
            )));
        }
        Ok(())
    }
}

/// What to do with an access unit the decoder rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Drop the unit; the output timeline closes up around it
    #[default]
    Skip,
    /// Substitute one frame of silence so the timeline keeps its length
    Silence,
}

/// Tunables for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemuxOptions {
    /// Handling of access units that fail to decode
    pub decode_error_policy: DecodeErrorPolicy,

    /// Largest plausible access unit in bytes
    pub max_access_unit_size: usize,

    /// Bytes scanned for a packet boundary before giving up with a desync
    pub sync_scan_window: usize,

    /// Rewrite the PMT entry of the audio stream to AAC (stream type 0x0F)
    pub rewrite_pmt: bool,

    /// Pin the audio PID instead of discovering it from the PMT
    pub audio_pid: Option<u16>,

    /// PID for the re-emitted AAC packets (defaults to the input audio PID)
    pub output_audio_pid: Option<u16>,

    /// Packets to wait for a PMT before adopting the first audio PES found
    pub fallback_after_packets: u64,
}

impl Default for RemuxOptions {
    fn default() -> Self {
        Self {
            decode_error_policy: DecodeErrorPolicy::Skip,
            max_access_unit_size: 4096,
            sync_scan_window: 188 * 16,
            rewrite_pmt: false,
            audio_pid: None,
            output_audio_pid: None,
            fallback_after_packets: 1000,
        }
    }
}

impl RemuxOptions {
    /// Parse options from a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: RemuxOptions = toml::from_str(content)
            .map_err(|e| RemuxError::Config(format!("invalid options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RemuxError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RemuxError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(128..=MAX_ACCESS_UNIT_LIMIT).contains(&self.max_access_unit_size) {
            return Err(RemuxError::Config(format!(
                "max_access_unit_size {} out of range 128..={}",
                self.max_access_unit_size, MAX_ACCESS_UNIT_LIMIT
            )));
        }
        let min_window = 2 * crate::ts::TS_PACKET_SIZE;
        if !(min_window..=MAX_SYNC_SCAN_WINDOW).contains(&self.sync_scan_window) {
            return Err(RemuxError::Config(format!(
                "sync_scan_window {} out of range {}..={}",
                self.sync_scan_window, min_window, MAX_SYNC_SCAN_WINDOW
            )));
        }
        for (name, pid) in [
            ("audio_pid", self.audio_pid),
            ("output_audio_pid", self.output_audio_pid),
        ] {
            if let Some(pid) = pid {
                if pid < FIRST_ELEMENTARY_PID || pid >= crate::ts::NULL_PID {
                    return Err(RemuxError::Config(format!("{} {:#x} is reserved", name, pid)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RemuxConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(RemuxConfig::new(0, 2, 192_000).validate().is_err());
        assert!(RemuxConfig::new(11025, 2, 64_000).validate().is_err());
        assert!(RemuxConfig::new(48000, 0, 192_000).validate().is_err());
        assert!(RemuxConfig::new(48000, 6, 192_000).validate().is_err());
        assert!(RemuxConfig::new(48000, 2, 8_000).validate().is_err());
        assert!(RemuxConfig::new(48000, 2, 1_000_000).validate().is_err());
    }

    #[test]
    fn test_bitrate_ceiling_scales_with_rate() {
        let config = RemuxConfig::new(16000, 1, 96_000);
        assert_eq!(config.max_bitrate(), 96_000);
        assert!(config.validate().is_ok());
        assert!(RemuxConfig::new(16000, 1, 128_000).validate().is_err());
        assert_eq!(RemuxConfig::new(48000, 2, 192_000).max_bitrate(), MAX_BITRATE);
    }

    #[test]
    fn test_from_raw_rejects_negative() {
        assert!(matches!(
            RemuxConfig::from_raw(-48000, 2, 192_000),
            Err(RemuxError::Config(_))
        ));
        assert!(RemuxConfig::from_raw(48000, -1, 192_000).is_err());
        let config = RemuxConfig::from_raw(44100, 1, 96_000).unwrap();
        assert_eq!(config, RemuxConfig::new(44100, 1, 96_000));
    }

    #[test]
    fn test_default_options() {
        let options = RemuxOptions::default();
        assert_eq!(options.decode_error_policy, DecodeErrorPolicy::Skip);
        assert_eq!(options.max_access_unit_size, 4096);
        assert_eq!(options.sync_scan_window, 3008);
        assert!(!options.rewrite_pmt);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_partial_toml() {
        let options = RemuxOptions::from_toml_str(
            r#"
            decode_error_policy = "silence"
            rewrite_pmt = true
            audio_pid = 257
            "#,
        )
        .unwrap();
        assert_eq!(options.decode_error_policy, DecodeErrorPolicy::Silence);
        assert!(options.rewrite_pmt);
        assert_eq!(options.audio_pid, Some(0x101));
        assert_eq!(options.max_access_unit_size, 4096);
    }

    #[test]
    fn test_options_reject_unknown_and_invalid() {
        assert!(RemuxOptions::from_toml_str("no_such_key = 1").is_err());
        assert!(RemuxOptions::from_toml_str("sync_scan_window = 10").is_err());
        assert!(RemuxOptions::from_toml_str("audio_pid = 8191").is_err());
        assert!(RemuxOptions::from_toml_str("decode_error_policy = \"retry\"").is_err());
    }

    #[test]
    fn test_options_upper_bounds() {
        let huge = format!("max_access_unit_size = {}", 1u64 << 50);
        assert!(matches!(
            RemuxOptions::from_toml_str(&huge),
            Err(RemuxError::Config(_))
        ));
        assert!(RemuxOptions::from_toml_str("max_access_unit_size = 65536").is_ok());
        assert!(RemuxOptions::from_toml_str("max_access_unit_size = 65537").is_err());
        let window = format!("sync_scan_window = {}", MAX_SYNC_SCAN_WINDOW + 1);
        assert!(RemuxOptions::from_toml_str(&window).is_err());
    }

    #[test]
    fn test_options_reject_psi_pids() {
        assert!(RemuxOptions::from_toml_str("output_audio_pid = 0").is_err());
        assert!(RemuxOptions::from_toml_str("output_audio_pid = 15").is_err());
        assert!(RemuxOptions::from_toml_str("audio_pid = 1").is_err());
        assert!(RemuxOptions::from_toml_str("output_audio_pid = 16").is_ok());
    }

    #[test]
    fn test_options_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remux.toml");
        let options = RemuxOptions {
            max_access_unit_size: 2048,
            output_audio_pid: Some(0x200),
            ..Default::default()
        };
        std::fs::write(&path, options.to_toml_string().unwrap()).unwrap();

        let loaded = RemuxOptions::from_file(&path).unwrap();
        assert_eq!(loaded, options);
        assert!(RemuxOptions::from_file(dir.path().join("missing.toml")).is_err());
    }
}

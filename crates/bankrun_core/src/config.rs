//! Kernel configuration and positional numeral encoding.
//!
//! # Responsibility
//! - Hold the fixed settings every contract path is derived from.
//! - Load settings from an optional JSON file with per-key defaults.
//!
//! # Invariants
//! - `base` is within `2..=36`; every field width is at least 1.
//! - Encoding is a pure function of value, base and width.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Default plugin discovery root, relative to the process working directory.
pub const DEFAULT_PLUGINS_ROOT: &str = "plugins";
/// Default contract output root, relative to the process working directory.
pub const DEFAULT_OUTPUT_ROOT: &str = "files/out/plugins";

/// Operating-system family that decides entry script and launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    Windows,
    Posix,
}

impl PlatformFamily {
    /// Family of the host this binary was built for.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Posix => "posix",
        }
    }
}

impl Default for PlatformFamily {
    fn default() -> Self {
        Self::host()
    }
}

/// Settings consumed by the kernel and the bank store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    /// Numeral base for bank/register/address encoding.
    pub base: u32,
    pub width_bank: usize,
    pub width_reg: usize,
    pub width_addr: usize,
    /// Symbol prepended to the encoded bank segment.
    pub bank_prefix: char,
    pub plugins_root: PathBuf,
    pub output_root: PathBuf,
    pub platform: PlatformFamily,
    /// Adds a unique attempt segment under each plugin contract directory.
    pub attempt_isolation: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            base: 10,
            width_bank: 2,
            width_reg: 2,
            width_addr: 2,
            bank_prefix: 'x',
            plugins_root: PathBuf::from(DEFAULT_PLUGINS_ROOT),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            platform: PlatformFamily::host(),
            attempt_isolation: true,
        }
    }
}

impl KernelConfig {
    /// Loads a config file; absent keys take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            source: err,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates numeric and symbol settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=36).contains(&self.base) {
            return Err(ConfigError::InvalidBase(self.base));
        }
        for (field, width) in [
            ("width_bank", self.width_bank),
            ("width_reg", self.width_reg),
            ("width_addr", self.width_addr),
        ] {
            if width == 0 {
                return Err(ConfigError::InvalidWidth(field));
            }
        }
        if !self.bank_prefix.is_ascii_graphic() {
            return Err(ConfigError::InvalidPrefix(self.bank_prefix));
        }
        Ok(())
    }

    /// Encoded bank segment including the prefix symbol, e.g. `x01`.
    pub fn encode_bank(&self, bank: u64) -> String {
        let mut out = String::with_capacity(self.width_bank + 1);
        out.push(self.bank_prefix);
        out.push_str(&to_base_n(bank, self.base, self.width_bank));
        out
    }

    pub fn encode_reg(&self, reg: u64) -> String {
        to_base_n(reg, self.base, self.width_reg)
    }

    pub fn encode_addr(&self, addr: u64) -> String {
        to_base_n(addr, self.base, self.width_addr)
    }
}

/// Encodes `value` in `base`, left-padded with zeros to at least `width`.
///
/// Values needing more digits than `width` are emitted in full.
pub fn to_base_n(mut value: u64, base: u32, width: usize) -> String {
    let base = u64::from(base.clamp(2, 36));
    let mut digits = Vec::new();
    loop {
        digits.push(DIGITS[(value % base) as usize]);
        value /= base;
        if value == 0 {
            break;
        }
    }
    while digits.len() < width {
        digits.push(b'0');
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Parses an encoded numeral in `base`; case-insensitive.
pub fn from_base_n(text: &str, base: u32) -> Option<u64> {
    if text.is_empty() || !(2..=36).contains(&base) {
        return None;
    }
    u64::from_str_radix(text, base).ok()
}

/// Config loading and validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        message: String,
    },
    InvalidBase(u32),
    InvalidWidth(&'static str),
    InvalidPrefix(char),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "invalid config `{}`: {message}", path.display())
            }
            Self::InvalidBase(value) => write!(f, "numeral base must be in 2..=36, got {value}"),
            Self::InvalidWidth(field) => write!(f, "{field} must be at least 1"),
            Self::InvalidPrefix(value) => {
                write!(f, "bank prefix must be a printable ASCII symbol, got {value:?}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{from_base_n, to_base_n, ConfigError, KernelConfig, PlatformFamily};
    use std::io::Write;

    #[test]
    fn encodes_with_zero_padding() {
        assert_eq!(to_base_n(0, 10, 3), "000");
        assert_eq!(to_base_n(7, 10, 2), "07");
        assert_eq!(to_base_n(255, 16, 4), "00FF");
        assert_eq!(to_base_n(35, 36, 1), "Z");
    }

    #[test]
    fn wide_values_are_not_truncated() {
        assert_eq!(to_base_n(12345, 10, 2), "12345");
    }

    #[test]
    fn decodes_case_insensitively() {
        assert_eq!(from_base_n("ff", 16), Some(255));
        assert_eq!(from_base_n("FF", 16), Some(255));
        assert_eq!(from_base_n("G", 16), None);
        assert_eq!(from_base_n("", 16), None);
    }

    #[test]
    fn encodes_bank_with_prefix() {
        let config = KernelConfig {
            base: 16,
            width_bank: 3,
            bank_prefix: '#',
            ..KernelConfig::default()
        };
        assert_eq!(config.encode_bank(26), "#01A");
    }

    #[test]
    fn default_config_is_valid() {
        KernelConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn rejects_out_of_range_base_and_zero_width() {
        let config = KernelConfig {
            base: 40,
            ..KernelConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBase(40))));

        let config = KernelConfig {
            width_reg: 0,
            ..KernelConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWidth("width_reg"))
        ));
    }

    #[test]
    fn loads_partial_json_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"base": 16, "platform": "windows"}}"#).expect("write config");

        let config = KernelConfig::from_json_file(file.path()).expect("config should load");
        assert_eq!(config.base, 16);
        assert_eq!(config.platform, PlatformFamily::Windows);
        assert_eq!(config.width_bank, KernelConfig::default().width_bank);
        assert!(config.attempt_isolation);
    }

    #[test]
    fn rejects_unknown_config_keys() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"radix": 16}}"#).expect("write config");

        let err = KernelConfig::from_json_file(file.path()).expect_err("unknown key must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}

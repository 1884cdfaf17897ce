//! Laser power configuration
//!
//! Power is a percentage of the laser's maximum output. It is resolved once
//! at startup from the command line (or `TL_POWER`), falling back to a TOML
//! config file. There is no default: a job cut at the wrong power is worse
//! than no job at all.

use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Highest accepted power, in percent.
pub const MAX_POWER: u8 = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid power value: {value} (expected 0-100)")]
    PowerOutOfRange { value: i64 },

    #[error(
        "laser power is not configured: pass --power, set TL_POWER or add `power` to a config file"
    )]
    MissingPower,

    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {message}", path.display())]
    Syntax {
        path: PathBuf,
        text: String,
        span: Option<Range<usize>>,
        message: String,
    },

    #[error("invalid power value in {}: {value} (expected 0-100)", path.display())]
    FilePowerOutOfRange {
        path: PathBuf,
        text: String,
        span: Range<usize>,
        value: i64,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Laser power in percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Power(u8);

impl Power {
    pub fn new(percent: i64) -> Result<Self> {
        u8::try_from(percent)
            .ok()
            .filter(|p| *p <= MAX_POWER)
            .map(Power)
            .ok_or(ConfigError::PowerOutOfRange { value: percent })
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// `S` parameter for the laser-on command, e.g. `S42`.
    pub fn token(self) -> String {
        format!("S{}", self.0)
    }
}

impl TryFrom<i64> for Power {
    type Error = ConfigError;

    fn try_from(percent: i64) -> Result<Self> {
        Power::new(percent)
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// Turn a power percentage into its G-code parameter, rejecting values
/// outside `0..=100` rather than clamping them.
pub fn format_power_token(power: i64) -> Result<String> {
    Power::new(power).map(Power::token)
}

/// Where the resolved power came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerSource {
    CommandLine,
    ConfigFile(PathBuf),
}

impl fmt::Display for PowerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerSource::CommandLine => write!(f, "command line"),
            PowerSource::ConfigFile(path) => write!(f, "config file {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub power: Power,
    pub source: PowerSource,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    power: Option<toml::Spanned<i64>>,
}

/// A parsed config file, kept together with its text so errors can point
/// into it.
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    text: String,
    power: Option<toml::Spanned<i64>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path.to_path_buf(), text)
    }

    pub fn parse(path: PathBuf, text: String) -> Result<Self> {
        match toml::from_str::<RawConfig>(&text) {
            Ok(raw) => Ok(Self {
                path,
                text,
                power: raw.power,
            }),
            Err(e) => Err(ConfigError::Syntax {
                path,
                span: e.span(),
                message: e.message().to_string(),
                text,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn power(&self) -> Option<i64> {
        self.power.as_ref().map(|p| *p.get_ref())
    }
}

/// Pick the power to cut with. A command-line value wins over the file.
pub fn resolve(flag: Option<i64>, file: Option<FileConfig>) -> Result<Resolved> {
    if let Some(value) = flag {
        return Ok(Resolved {
            power: Power::new(value)?,
            source: PowerSource::CommandLine,
        });
    }

    let file = file.ok_or(ConfigError::MissingPower)?;
    let spanned = file.power.ok_or(ConfigError::MissingPower)?;
    let span = spanned.span();
    let value = spanned.into_inner();

    match Power::new(value) {
        Ok(power) => Ok(Resolved {
            power,
            source: PowerSource::ConfigFile(file.path),
        }),
        Err(_) => Err(ConfigError::FilePowerOutOfRange {
            path: file.path,
            text: file.text,
            span,
            value,
        }),
    }
}

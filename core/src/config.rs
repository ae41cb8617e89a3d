//! Serializable filter configuration
//!
//! A [FilterConfig] describes everything needed to construct an [UnscentedKalmanFilter]: the state length, the
//! optional initial state and initial covariance diagonal, and the three tuning parameters. Configurations can be
//! read from and written to JSON, YAML or TOML files; [FilterConfig::from_file] and [FilterConfig::to_file] pick the
//! format from the file extension.
//!
//! ```
//! use ukf::config::FilterConfig;
//!
//! let cfg = FilterConfig {
//!     state_length: 2,
//!     initial_covariance: Some(vec![10.0, 1.0]),
//!     ..Default::default()
//! };
//! let ukf = cfg.build().unwrap();
//! assert_eq!(ukf.alpha(), 1.0);
//! ```
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::Result;
use crate::kalman::UnscentedKalmanFilter;
use crate::{DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_KI};

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}
fn default_beta() -> f64 {
    DEFAULT_BETA
}
fn default_ki() -> f64 {
    DEFAULT_KI
}

/// Construction parameters for an [UnscentedKalmanFilter]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of states
    pub state_length: usize,
    /// Initial state; zeros when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Vec<f64>>,
    /// Initial covariance diagonal (variances); identity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_covariance: Option<Vec<f64>>,
    /// Sigma point spread
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Prior knowledge correction
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Secondary scaling parameter
    #[serde(default = "default_ki")]
    pub ki: f64,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            state_length: 1,
            initial_state: None,
            initial_covariance: None,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            ki: DEFAULT_KI,
        }
    }
}
impl FilterConfig {
    /// Construct the filter this configuration describes.
    pub fn build(&self) -> Result<UnscentedKalmanFilter> {
        let mut ukf = UnscentedKalmanFilter::new(
            self.state_length,
            self.initial_state.as_deref(),
            self.alpha,
            self.beta,
            self.ki,
        )?;
        if let Some(variances) = &self.initial_covariance {
            ukf.set_covariance_diagonal(variances)?;
        }
        Ok(ukf)
    }
    /// Write the configuration as pretty JSON.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported(p)),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported config file extension: {}", path.display()),
    )
}

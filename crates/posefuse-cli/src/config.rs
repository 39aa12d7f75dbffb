//! Startup configuration – reads `posefuse.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use posefuse_perception::FusionConfig;
use posefuse_runtime::LogFormat;
use posefuse_types::PoseError;
use serde::Deserialize;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "posefuse.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

/// Estimator configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Tick period, seconds.
    #[serde(default = "default_dt")]
    pub dt: f64,

    /// Vehicle identifier; selects the geometry file.
    #[serde(default = "default_robot_name")]
    pub robot_name: String,

    /// `"polled"` or `"ground_truth"`. Validated at startup.
    #[serde(default = "default_system_setup")]
    pub system_setup: String,

    /// Rear-axle to centre-of-gravity distance (m), passed through for
    /// downstream consumers.
    #[serde(default = "default_lr")]
    pub lr: f64,

    /// Keep producer timestamps instead of re-stamping on arrival.
    #[serde(default)]
    pub live: bool,

    /// Root of the per-vehicle geometry directories.
    #[serde(default = "default_geometry_dir")]
    pub geometry_dir: PathBuf,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_dt() -> f64 {
    0.02
}
fn default_robot_name() -> String {
    "rhino".to_string()
}
fn default_system_setup() -> String {
    "polled".to_string()
}
fn default_lr() -> f64 {
    1.2
}
fn default_geometry_dir() -> PathBuf {
    PathBuf::from("config/vehicles")
}
fn default_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            robot_name: default_robot_name(),
            system_setup: default_system_setup(),
            lr: default_lr(),
            live: false,
            geometry_dir: default_geometry_dir(),
            fusion: FusionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Load the configuration and apply environment overrides.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
/// used when present and the built-in defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<Config, PoseError> {
    let mut cfg = match path {
        Some(p) => load_from(p)?,
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                load_from(fallback)?
            } else {
                Config::default()
            }
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse a config file, without environment overrides.
pub fn load_from(path: &Path) -> Result<Config, PoseError> {
    let raw = fs::read_to_string(path).map_err(|source| PoseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw)
        .map_err(|e| PoseError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `POSEFUSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `POSEFUSE_DT` | `dt` |
/// | `POSEFUSE_SYSTEM_SETUP` | `system_setup` |
/// | `POSEFUSE_ROBOT_NAME` | `robot_name` |
/// | `POSEFUSE_GEOMETRY_DIR` | `geometry_dir` |
/// | `POSEFUSE_LIVE` | `live` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("POSEFUSE_DT")
        && let Ok(dt) = v.parse::<f64>()
    {
        cfg.dt = dt;
    }
    if let Ok(v) = std::env::var("POSEFUSE_SYSTEM_SETUP") {
        cfg.system_setup = v;
    }
    if let Ok(v) = std::env::var("POSEFUSE_ROBOT_NAME") {
        cfg.robot_name = v;
    }
    if let Ok(v) = std::env::var("POSEFUSE_GEOMETRY_DIR") {
        cfg.geometry_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("POSEFUSE_LIVE")
        && let Ok(live) = v.parse::<bool>()
    {
        cfg.live = live;
    }
}

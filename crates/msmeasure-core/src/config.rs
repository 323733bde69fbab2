//! Service configuration.
//!
//! Settings are merged from three layers with the precedence
//! **flags > JSON file > environment**, then defaults. An empty string counts
//! as unset in every layer.
//!
//! # File format
//! ```json
//! {
//!   "name": "ms-measure",
//!   "port": 8080,
//!   "hostname": "thermo-1.local",
//!   "upstream": "http://registry:8080/devices",
//!   "randomsvc": "http://random:8080/random",
//!   "type": "thermometer",
//!   "address": "thermo-1"
//! }
//! ```
//!
//! Older files name the upstream `logger`. That key is still read, and
//! `upstream` takes precedence when a file carries both.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::device::{DeviceConfig, DeviceKind};
use crate::error::ConfigError;
use crate::outbound::Identity;
use crate::source::RandomTarget;

pub const DEFAULT_NAME: &str = "ms-measure";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOSTNAME: &str = "localhost";

/// Environment variables read by [`ConfigLayer::from_env`].
pub mod env {
    pub const NAME: &str = "MS_NAME";
    pub const HOST: &str = "MS_HOST";
    pub const PORT: &str = "MS_PORT";
    pub const HOSTNAME: &str = "MS_HOSTNAME";
    pub const ENVIRONMENT: &str = "MS_ENVIRONMENT";
    pub const UPSTREAM: &str = "MS_UPSTREAM";
    pub const RANDOM_SVC: &str = "MS_RANDOMSVC";
    pub const DEVICE_TYPE: &str = "MS_DEVICETYPE";
    pub const DEVICE_ADDRESS: &str = "MS_DEVICEADDRESS";
    pub const CONFIG: &str = "MS_CONFIG";
}

/// File form of a layer. Older files name the upstream `logger`; when both
/// keys are present `upstream` wins.
#[derive(Deserialize)]
struct FileLayer {
    #[serde(flatten)]
    layer: ConfigLayer,
    #[serde(default)]
    logger: Option<String>,
}

/// One partially filled source of settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub environment: Option<String>,
    pub upstream: Option<String>,
    pub randomsvc: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub address: Option<String>,
    #[serde(skip)]
    pub config: Option<PathBuf>,
}

impl ConfigLayer {
    /// Read the layer from environment variables through `lookup`.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        let port = match get(env::PORT) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            ),
            None => None,
        };

        Ok(Self {
            name: get(env::NAME),
            host: get(env::HOST),
            port,
            hostname: get(env::HOSTNAME),
            environment: get(env::ENVIRONMENT),
            upstream: get(env::UPSTREAM),
            randomsvc: get(env::RANDOM_SVC),
            device_type: get(env::DEVICE_TYPE),
            address: get(env::DEVICE_ADDRESS),
            config: get(env::CONFIG).map(PathBuf::from),
        })
    }

    /// Read the layer from the process environment.
    pub fn from_process_env() -> Result<Self, ConfigError> {
        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Load the layer from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileLayer =
            serde_json::from_str(&content).map_err(|source| ConfigError::ParseFile {
                path: path.to_path_buf(),
                source,
            })?;
        let mut layer = file.layer;
        layer.upstream = non_empty(layer.upstream).or(non_empty(file.logger));
        Ok(layer)
    }

    /// Fill every setting unset in `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            name: non_empty(self.name).or(non_empty(lower.name)),
            host: non_empty(self.host).or(non_empty(lower.host)),
            port: self.port.or(lower.port),
            hostname: non_empty(self.hostname).or(non_empty(lower.hostname)),
            environment: non_empty(self.environment).or(non_empty(lower.environment)),
            upstream: non_empty(self.upstream).or(non_empty(lower.upstream)),
            randomsvc: non_empty(self.randomsvc).or(non_empty(lower.randomsvc)),
            device_type: non_empty(self.device_type).or(non_empty(lower.device_type)),
            address: non_empty(self.address).or(non_empty(lower.address)),
            config: self.config.or(lower.config),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Fully resolved, validated settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub hostname: String,
    pub environment: Option<String>,
    pub upstream: Option<Url>,
    pub random_target: RandomTarget,
    pub device: DeviceConfig,
}

impl Settings {
    /// Merge `flags` over the optional config file over `env` and validate.
    ///
    /// The config file path is taken from the flags first, then the
    /// environment.
    pub fn resolve(flags: ConfigLayer, env: ConfigLayer) -> Result<Self, ConfigError> {
        let file = match flags.config.as_deref().or(env.config.as_deref()) {
            Some(path) => ConfigLayer::from_file(path)?,
            None => ConfigLayer::default(),
        };
        Self::from_layer(flags.or(file).or(env))
    }

    /// Validate a merged layer, applying defaults.
    pub fn from_layer(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let kind: DeviceKind = layer
            .device_type
            .as_deref()
            .ok_or(ConfigError::MissingDeviceKind)?
            .parse()?;

        let upstream = layer
            .upstream
            .map(|raw| {
                Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUpstream {
                    url: raw.clone(),
                    source,
                })
            })
            .transpose()?;

        let random_target = RandomTarget::parse(layer.randomsvc.as_deref().unwrap_or_default())?;

        Ok(Self {
            name: layer.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            version: crate::VERSION.to_string(),
            host: layer.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: layer.port.unwrap_or(DEFAULT_PORT),
            hostname: layer.hostname.unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            environment: layer.environment,
            upstream,
            random_target,
            device: DeviceConfig::for_kind(kind, layer.address.unwrap_or_default()),
        })
    }

    /// Public base URL of this service.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    /// Public URL of one of this service's routes, e.g. `endpoint("device")`.
    pub fn endpoint(&self, route: &str) -> String {
        format!("{}/{}", self.base_url(), route.trim_start_matches('/'))
    }

    pub fn identity(&self) -> Identity {
        Identity {
            name: self.name.clone(),
            version: self.version.clone(),
            environment: self.environment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> ConfigLayer {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigLayer::from_env(|key| map.get(key).cloned()).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let settings = Settings::resolve(
            ConfigLayer {
                device_type: Some("hygrometer".to_string()),
                ..Default::default()
            },
            ConfigLayer::default(),
        )
        .unwrap();
        assert_eq!(settings.name, DEFAULT_NAME);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.upstream, None);
        assert_eq!(settings.random_target, RandomTarget::Internal);
        assert_eq!(settings.device.kind, DeviceKind::Hygrometer);
        assert_eq!(settings.endpoint("device"), "http://localhost:8080/device");
    }

    #[test]
    fn environment_is_read() {
        let layer = env_of(&[
            (env::DEVICE_TYPE, "thermometer"),
            (env::DEVICE_ADDRESS, "t-7"),
            (env::PORT, "9001"),
            (env::UPSTREAM, "http://registry/devices"),
            (env::RANDOM_SVC, "/usr/local/bin/rnd"),
        ]);
        let settings = Settings::resolve(ConfigLayer::default(), layer).unwrap();
        assert_eq!(settings.device.address, "t-7");
        assert_eq!(settings.port, 9001);
        assert_eq!(
            settings.upstream.unwrap().as_str(),
            "http://registry/devices"
        );
        assert_eq!(
            settings.random_target,
            RandomTarget::Command("/usr/local/bin/rnd".to_string())
        );
    }

    #[test]
    fn flags_beat_file_beat_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"type": "hygrometer", "address": "from-file", "logger": "http://file-upstream/", "port": 7000}}"#
        )
        .unwrap();

        let flags = ConfigLayer {
            address: Some("from-flags".to_string()),
            device_type: Some(String::new()),
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let env = env_of(&[
            (env::DEVICE_TYPE, "thermometer"),
            (env::DEVICE_ADDRESS, "from-env"),
            (env::UPSTREAM, "http://env-upstream/"),
            (env::HOSTNAME, "env-host"),
        ]);

        let settings = Settings::resolve(flags, env).unwrap();
        assert_eq!(settings.device.address, "from-flags");
        assert_eq!(settings.device.kind, DeviceKind::Hygrometer);
        assert_eq!(settings.upstream.unwrap().as_str(), "http://file-upstream/");
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.hostname, "env-host");
    }

    #[test]
    fn missing_or_wrong_device_kind_fails() {
        assert!(matches!(
            Settings::resolve(ConfigLayer::default(), ConfigLayer::default()),
            Err(ConfigError::MissingDeviceKind)
        ));
        assert!(matches!(
            Settings::resolve(env_of(&[(env::DEVICE_TYPE, "barometer")]), ConfigLayer::default()),
            Err(ConfigError::InvalidDeviceKind(_))
        ));
    }

    #[test]
    fn bad_urls_fail() {
        let bad_upstream = env_of(&[(env::DEVICE_TYPE, "thermometer"), (env::UPSTREAM, "::nope")]);
        assert!(matches!(
            Settings::resolve(ConfigLayer::default(), bad_upstream),
            Err(ConfigError::InvalidUpstream { .. })
        ));

        let bad_random = env_of(&[(env::DEVICE_TYPE, "thermometer"), (env::RANDOM_SVC, "random svc")]);
        assert!(matches!(
            Settings::resolve(ConfigLayer::default(), bad_random),
            Err(ConfigError::InvalidRandomSvc { .. })
        ));
    }

    #[test]
    fn bad_port_in_environment_fails() {
        let result = ConfigLayer::from_env(|key| (key == env::PORT).then(|| "eighty".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidPort(p)) if p == "eighty"));
    }

    #[test]
    fn unreadable_or_invalid_file_fails() {
        let missing = ConfigLayer {
            config: Some(PathBuf::from("/nonexistent/ms-measure.json")),
            ..Default::default()
        };
        assert!(matches!(
            Settings::resolve(missing, ConfigLayer::default()),
            Err(ConfigError::ReadFile { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let broken = ConfigLayer {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            Settings::resolve(broken, ConfigLayer::default()),
            Err(ConfigError::ParseFile { .. })
        ));
    }

    #[test]
    fn upstream_key_wins_over_logger_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"logger": "http://old-upstream/", "upstream": "http://new-upstream/", "type": "thermometer"}}"#
        )
        .unwrap();

        let layer = ConfigLayer::from_file(file.path()).unwrap();
        assert_eq!(layer.upstream.as_deref(), Some("http://new-upstream/"));
        assert_eq!(layer.device_type.as_deref(), Some("thermometer"));
    }

    #[test]
    fn empty_upstream_key_falls_back_to_logger_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"upstream": "", "logger": "http://old-upstream/"}}"#).unwrap();

        let layer = ConfigLayer::from_file(file.path()).unwrap();
        assert_eq!(layer.upstream.as_deref(), Some("http://old-upstream/"));
    }
}

//! Persistent settings and credentials

use crate::{errors::GraphError, graph::DEFAULT_FAN_OUT, image::Registry};
use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Whether an account is a user or an organization
///
/// The packages API puts the two under different URL prefixes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    User,
    Org,
}

impl OwnerKind {
    /// Path prefix in the packages API
    pub fn api_prefix(&self) -> &'static str {
        match self {
            OwnerKind::User => "users",
            OwnerKind::Org => "orgs",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OwnerKind::User => "user",
            OwnerKind::Org => "org",
        })
    }
}

impl FromStr for OwnerKind {
    type Err = GraphError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(OwnerKind::User),
            "org" | "organization" => Ok(OwnerKind::Org),
            other => Err(GraphError::Config(format!(
                "owner type must be user or org, not {:?}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct OwnerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OwnerKind,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Contents of `config.toml`
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_out: Option<usize>,
}

impl Config {
    /// Determine where the configuration file lives
    ///
    /// Typically this returns `$HOME/.config/ghcrctl/config.toml`, but it may
    /// return `$XDG_CONFIG_HOME/ghcrctl/config.toml` if the per-user config
    /// directory has been set, and the location can be customized directly
    /// via the `$GHCRCTL_CONFIG` environment variable.
    pub fn default_path() -> Result<PathBuf, GraphError> {
        match env::var("GHCRCTL_CONFIG") {
            Ok(s) => Ok(Path::new(&s).to_path_buf()),
            Err(_) => {
                let mut buf = match env::var("XDG_CONFIG_HOME") {
                    Ok(s) => Ok(Path::new(&s).to_path_buf()),
                    Err(_) => match env::var("HOME") {
                        Ok(s) => Ok(Path::new(&s).join(".config")),
                        Err(_) => Err(GraphError::Config(
                            "no HOME directory to keep configuration in".to_owned(),
                        )),
                    },
                };
                if let Ok(buf) = &mut buf {
                    buf.push("ghcrctl");
                    buf.push("config.toml");
                }
                buf
            }
        }
    }

    /// Read a configuration file, or the defaults if it does not exist yet
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        match fs::read_to_string(path) {
            Ok(text) => {
                log::debug!("loaded configuration from {:?}", path);
                Ok(toml::from_str(&text)?)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no configuration at {:?}, using defaults", path);
                Ok(Config::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Write the configuration file, creating its directory if needed
    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        log::info!("saved configuration to {:?}", path);
        Ok(())
    }

    /// The file contents [Config::save] would write
    pub fn to_toml_string(&self) -> Result<String, GraphError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn set_owner(&mut self, name: &str, kind: OwnerKind) {
        self.owner = Some(OwnerConfig {
            name: name.to_owned(),
            kind,
        });
    }

    /// Configured owner type, if the configured owner is this one
    pub fn owner_kind(&self, owner: &str) -> Option<OwnerKind> {
        self.owner
            .as_ref()
            .filter(|o| o.name.eq_ignore_ascii_case(owner))
            .map(|o| o.kind)
    }

    pub fn registry(&self) -> Result<Registry, GraphError> {
        match &self.registry.url {
            None => Ok(Registry::ghcr()),
            Some(url) => {
                let host = url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/');
                Registry::parse(host)
            }
        }
    }

    pub fn fan_out(&self) -> usize {
        self.fan_out.unwrap_or(DEFAULT_FAN_OUT).max(1)
    }
}

/// The GitHub token used for every authenticated call
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(..)")
    }
}

impl Credentials {
    pub const ENV_VAR: &'static str = "GITHUB_TOKEN";

    pub fn new(token: String) -> Self {
        Credentials { token }
    }

    /// Read `GITHUB_TOKEN`, failing before any network I/O if it is unset
    pub fn from_env() -> Result<Self, GraphError> {
        match env::var(Self::ENV_VAR) {
            Ok(token) if !token.trim().is_empty() => Ok(Credentials::new(token.trim().to_owned())),
            _ => Err(GraphError::Unauthenticated),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

//! Startup configuration, read from the environment.
//!
//! [`Config::from_lookup`] does the work against any variable source, so tests
//! never have to touch the process environment. Error messages name the
//! variable but never echo its value.
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use zeroize::Zeroizing;

use crate::{
    constants::{
        DEFAULT_BIND_ADDR, DEFAULT_CACHE_TTL, DEFAULT_CLIENT_ID, DEFAULT_CONTEXT_LABEL,
        DEFAULT_DATA_DIR, DEFAULT_GROUP_ID, DEFAULT_ISSUER, DEFAULT_TREE_DEPTH,
        MIN_APP_SECRET_LENGTH,
    },
    crypto::{
        codec::EncryptionKey,
        identity::{ContextLabel, DerivationRealm, DerivationStrategy, IdentityDeriver},
    },
    error::ConfigurationError,
    group::root,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Production,
    Development,
}

impl FromStr for RunMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            _ => Err(ConfigurationError::Invalid {
                name: "RUN_MODE",
                reason: "expected `production` or `development`",
            }),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub run_mode: RunMode,
    pub encryption_key: EncryptionKey,
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

pub struct IdentityConfig {
    pub app_secret: Zeroizing<Vec<u8>>,
    pub strategy: DerivationStrategy,
    pub context_label: ContextLabel,
    pub realm: DerivationRealm,
}

impl IdentityConfig {
    pub fn deriver(&self) -> IdentityDeriver {
        IdentityDeriver::new(
            &self.app_secret,
            self.strategy,
            self.context_label.clone(),
            self.realm.clone(),
        )
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("strategy", &self.strategy)
            .field("context_label", &self.context_label)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Only used when a new group state is created.
    pub group_id: u64,
    /// Only used when a new group state is created.
    pub tree_depth: u8,
    pub cache_ttl: Duration,
}

impl StorageConfig {
    /// Default settings, storing under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            group_id: DEFAULT_GROUP_ID,
            tree_depth: DEFAULT_TREE_DEPTH,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Administrative routes are disabled without a token.
    pub admin_token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Reads one variable. Blank values count as unset.
fn var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    reason: &'static str,
    default: T,
) -> Result<T, ConfigurationError> {
    match var(lookup, name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigurationError::Invalid { name, reason }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let run_mode = match var(&lookup, "RUN_MODE") {
            Some(value) => value.parse()?,
            None => RunMode::default(),
        };

        let encryption_key = match (var(&lookup, "ENCRYPTION_KEY"), run_mode) {
            (Some(hex), _) => {
                let hex = Zeroizing::new(hex);
                EncryptionKey::from_hex(&hex).map_err(|_| ConfigurationError::Invalid {
                    name: "ENCRYPTION_KEY",
                    reason: "expected 64 hex characters of a non-zero key",
                })?
            }
            (None, RunMode::Development) => {
                tracing::warn!(
                    "ENCRYPTION_KEY is not set, using an ephemeral key. Group data will not survive a restart!"
                );
                EncryptionKey::generate()
            }
            (None, RunMode::Production) => return Err(ConfigurationError::Missing("ENCRYPTION_KEY")),
        };

        Ok(Self {
            run_mode,
            encryption_key,
            identity: Self::identity(&lookup, run_mode)?,
            storage: Self::storage(&lookup)?,
            server: Self::server(&lookup)?,
        })
    }

    fn identity(
        lookup: &impl Fn(&str) -> Option<String>,
        run_mode: RunMode,
    ) -> Result<IdentityConfig, ConfigurationError> {
        let app_secret = var(lookup, "APP_SECRET")
            .or_else(|| var(lookup, "AUTH_SECRET"))
            .map(|secret| Zeroizing::new(secret.into_bytes()))
            .ok_or(ConfigurationError::Missing("APP_SECRET"))?;

        if run_mode == RunMode::Production && app_secret.len() < MIN_APP_SECRET_LENGTH {
            return Err(ConfigurationError::Invalid {
                name: "APP_SECRET",
                reason: "must be at least 32 bytes in production",
            });
        }

        let strategy = match var(lookup, "IDENTITY_DERIVATION_STRATEGY") {
            Some(value) => value.parse()?,
            None => DerivationStrategy::default(),
        };

        let context_label = ContextLabel::parse(
            &var(lookup, "IDENTITY_CONTEXT_LABEL").unwrap_or_else(|| DEFAULT_CONTEXT_LABEL.to_string()),
        )?;

        let realm = DerivationRealm {
            issuer: var(lookup, "AUTH_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            client_id: var(lookup, "AUTH_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
        };

        Ok(IdentityConfig {
            app_secret,
            strategy,
            context_label,
            realm,
        })
    }

    fn storage(lookup: &impl Fn(&str) -> Option<String>) -> Result<StorageConfig, ConfigurationError> {
        let tree_depth = parsed(
            lookup,
            "TREE_DEPTH",
            "expected an integer between 1 and 32",
            DEFAULT_TREE_DEPTH,
        )?;
        root::capacity(tree_depth).map_err(|_| ConfigurationError::Invalid {
            name: "TREE_DEPTH",
            reason: "expected an integer between 1 and 32",
        })?;

        let cache_ttl = parsed(
            lookup,
            "GROUP_CACHE_TTL_SECS",
            "expected a whole number of seconds",
            DEFAULT_CACHE_TTL.as_secs(),
        )?;

        Ok(StorageConfig {
            data_dir: var(lookup, "DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from),
            group_id: parsed(
                lookup,
                "GROUP_ID",
                "expected a non-negative integer",
                DEFAULT_GROUP_ID,
            )?,
            tree_depth,
            cache_ttl: Duration::from_secs(cache_ttl),
        })
    }

    fn server(lookup: &impl Fn(&str) -> Option<String>) -> Result<ServerConfig, ConfigurationError> {
        let default_addr = SocketAddr::from_str(DEFAULT_BIND_ADDR).map_err(|_| ConfigurationError::Invalid {
            name: "BIND_ADDR",
            reason: "expected an address such as 127.0.0.1:3000",
        })?;

        Ok(ServerConfig {
            bind_addr: parsed(
                lookup,
                "BIND_ADDR",
                "expected an address such as 127.0.0.1:3000",
                default_addr,
            )?,
            admin_token: var(lookup, "ADMIN_TOKEN").map(|token| Zeroizing::new(token.trim().to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();

        move |name| vars.get(name).cloned()
    }

    fn production() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ENCRYPTION_KEY", KEY_HEX),
            ("APP_SECRET", "0123456789abcdef0123456789abcdef"),
        ]
    }

    #[test]
    fn defaults_apply_when_only_secrets_are_set() {
        let config = Config::from_lookup(lookup(&production())).expect("config is valid");

        assert_eq!(config.run_mode, RunMode::Production, "production by default");
        assert_eq!(
            config.identity.strategy,
            DerivationStrategy::SubjectOnly,
            "default strategy"
        );
        assert_eq!(
            config.identity.context_label.as_str(),
            DEFAULT_CONTEXT_LABEL,
            "default label"
        );
        assert_eq!(
            config.storage,
            StorageConfig::new(DEFAULT_DATA_DIR),
            "default storage settings"
        );
        assert_eq!(
            config.server.bind_addr.to_string(),
            DEFAULT_BIND_ADDR,
            "default bind address"
        );
        assert!(config.server.admin_token.is_none(), "admin routes are off by default");
    }

    #[test]
    fn every_setting_can_be_overridden() {
        let mut vars = production();
        vars.extend([
            ("IDENTITY_DERIVATION_STRATEGY", "subject_and_aux"),
            ("IDENTITY_CONTEXT_LABEL", "my-app-v4"),
            ("AUTH_ISSUER", "https://issuer.example.com"),
            ("AUTH_CLIENT_ID", "client-7"),
            ("DATA_DIR", "/var/lib/anonset"),
            ("GROUP_ID", "9"),
            ("TREE_DEPTH", "16"),
            ("GROUP_CACHE_TTL_SECS", "0"),
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("ADMIN_TOKEN", " hunter2 "),
        ]);

        let config = Config::from_lookup(lookup(&vars)).expect("config is valid");

        assert_eq!(
            config.identity.strategy,
            DerivationStrategy::SubjectAndAux,
            "strategy"
        );
        assert_eq!(config.identity.context_label.version(), 4, "label version");
        assert_eq!(config.identity.realm.client_id, "client-7", "client id");
        assert_eq!(
            config.storage,
            StorageConfig {
                data_dir: PathBuf::from("/var/lib/anonset"),
                group_id: 9,
                tree_depth: 16,
                cache_ttl: Duration::ZERO,
            },
            "storage settings"
        );
        assert_eq!(config.server.bind_addr.port(), 8080, "bind port");
        assert_eq!(
            config.server.admin_token.as_deref().map(String::as_str),
            Some("hunter2"),
            "token is trimmed"
        );
    }

    #[test]
    fn production_requires_a_key_and_a_long_secret() {
        assert_eq!(
            Config::from_lookup(lookup(&[("APP_SECRET", "0123456789abcdef0123456789abcdef")]))
                .map(|_| ()),
            Err(ConfigurationError::Missing("ENCRYPTION_KEY")),
            "no key in production"
        );
        assert_eq!(
            Config::from_lookup(lookup(&[("ENCRYPTION_KEY", KEY_HEX)])).map(|_| ()),
            Err(ConfigurationError::Missing("APP_SECRET")),
            "no secret"
        );
        assert!(
            matches!(
                Config::from_lookup(lookup(&[("ENCRYPTION_KEY", KEY_HEX), ("APP_SECRET", "short")])),
                Err(ConfigurationError::Invalid { name: "APP_SECRET", .. })
            ),
            "short secrets are refused in production"
        );
    }

    #[test]
    fn development_tolerates_missing_key_and_short_secret() {
        let config = Config::from_lookup(lookup(&[("RUN_MODE", "development"), ("AUTH_SECRET", "dev")]))
            .expect("development config is valid");

        assert_eq!(config.run_mode, RunMode::Development, "run mode");
        assert_eq!(
            config.identity.app_secret.as_slice(),
            b"dev",
            "AUTH_SECRET is the fallback for APP_SECRET"
        );
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let cases = [
            ("ENCRYPTION_KEY", "abcd"),
            ("TREE_DEPTH", "0"),
            ("TREE_DEPTH", "33"),
            ("GROUP_ID", "-1"),
            ("GROUP_CACHE_TTL_SECS", "soon"),
            ("BIND_ADDR", "localhost"),
            ("RUN_MODE", "staging"),
            ("IDENTITY_DERIVATION_STRATEGY", "email"),
            ("IDENTITY_CONTEXT_LABEL", "unversioned"),
        ];

        for (name, value) in cases {
            let mut vars = production();
            vars.retain(|(k, _)| *k != name);
            vars.push((name, value));

            match Config::from_lookup(lookup(&vars)) {
                Err(ConfigurationError::Invalid { name: reported, .. }) => {
                    assert_eq!(reported, name, "{name}={value} reports the right variable");
                }
                other => panic!("{name}={value} should be invalid, got {other:?}"),
            }
        }
    }
}

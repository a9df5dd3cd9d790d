use crate::services::fne::client::DEFAULT_FNE_API_URL;
use crate::services::fne::Issuer;
use crate::services::StatusPolicy;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub fne: FneConfig,
    pub status_policy: StatusPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FneConfig {
    pub api_url: String,
    pub timeout_secs: u64,
    pub point_of_sale: String,
    pub establishment: String,
}

impl FneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn issuer(&self) -> Issuer {
        Issuer {
            point_of_sale: self.point_of_sale.clone(),
            establishment: self.establishment.clone(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Self::from_lookup(common_config, is_prod, |key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(
        common: core_config::Config,
        is_prod: bool,
        lookup: F,
    ) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_env = |key: &str, default: Option<&str>| get_var(&lookup, key, default, is_prod);
        let issuer = Issuer::default();

        let status_policy = get_env("STATUS_POLICY", Some("permissive"))?
            .parse::<StatusPolicy>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("STATUS_POLICY: {}", e)))?;

        Ok(EngineConfig {
            common,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None)?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"))?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"))?
                    .parse()
                    .unwrap_or(1),
            },
            fne: FneConfig {
                api_url: get_env("FNE_API_URL", Some(DEFAULT_FNE_API_URL))?,
                timeout_secs: get_env("FNE_TIMEOUT_SECS", Some("30"))?
                    .parse()
                    .unwrap_or(30),
                point_of_sale: get_env("FNE_POINT_OF_SALE", Some(issuer.point_of_sale.as_str()))?,
                establishment: get_env("FNE_ESTABLISHMENT", Some(issuer.establishment.as_str()))?,
            },
            status_policy,
        })
    }
}

fn get_var<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn dev_defaults_apply() {
        let env = vars(&[("DATABASE_URL", "postgres://localhost/invoicing")]);
        let config =
            EngineConfig::from_lookup(core_config::Config::default(), false, |k| env.get(k).cloned())
                .unwrap();

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.fne.api_url, "https://api.fne.example.com");
        assert_eq!(config.fne.timeout(), Duration::from_secs(30));
        assert_eq!(config.fne.issuer(), Issuer::default());
        assert_eq!(config.status_policy, StatusPolicy::Permissive);
    }

    #[test]
    fn database_url_is_always_required() {
        let env = vars(&[]);
        let err = EngineConfig::from_lookup(core_config::Config::default(), false, |k| {
            env.get(k).cloned()
        })
        .unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn prod_requires_every_value() {
        let env = vars(&[("DATABASE_URL", "postgres://db/invoicing")]);
        let err = EngineConfig::from_lookup(core_config::Config::default(), true, |k| {
            env.get(k).cloned()
        })
        .unwrap_err();
        assert!(err.to_string().contains("required in production"));
    }

    #[test]
    fn reads_overrides() {
        let env = vars(&[
            ("DATABASE_URL", "postgres://db/invoicing"),
            ("FNE_API_URL", "https://fne.gouv.test"),
            ("FNE_TIMEOUT_SECS", "5"),
            ("STATUS_POLICY", "lifecycle"),
        ]);
        let config =
            EngineConfig::from_lookup(core_config::Config::default(), false, |k| env.get(k).cloned())
                .unwrap();
        assert_eq!(config.fne.api_url, "https://fne.gouv.test");
        assert_eq!(config.fne.timeout_secs, 5);
        assert_eq!(config.status_policy, StatusPolicy::Lifecycle);
    }

    #[test]
    fn rejects_unknown_policy() {
        let env = vars(&[("DATABASE_URL", "postgres://db"), ("STATUS_POLICY", "strict")]);
        assert!(EngineConfig::from_lookup(core_config::Config::default(), false, |k| {
            env.get(k).cloned()
        })
        .is_err());
    }
}

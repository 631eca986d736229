//! TOML configuration for the `finsight` binary.
//!
//! ```toml
//! [federation]
//! cross_validation_sources = 3
//! tolerance = 0.02
//! request_deadline_ms = 30000
//!
//! [sources.alphavantage]
//! api_key = "..."
//! rate_limit_per_minute = 5
//! overflow = "fail_fast"
//!
//! [sources.yahoo]
//! enabled = false
//! ```
//!
//! Keys that the file leaves unset are filled from the environment when the
//! registry is built.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use finsight_core::{
    FederationConfig, OverflowMode, ProviderPolicy, SourceId, SourceRegistryBuilder,
};
use serde::Deserialize;

use crate::error::CliError;

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub federation: FederationSection,
    /// Keyed by source id (`sec_edgar`, `yahoo`, `alphavantage`, `finnhub`).
    pub sources: BTreeMap<String, SourceSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FederationSection {
    pub cross_validation_sources: Option<usize>,
    pub tolerance: Option<f64>,
    pub max_concurrency: Option<usize>,
    pub call_timeout_ms: Option<u64>,
    pub request_deadline_ms: Option<u64>,
    pub health_check_deadline_ms: Option<u64>,
    pub search_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSection {
    pub enabled: Option<bool>,
    pub api_key: Option<String>,
    pub user_agent: Option<String>,
    pub base_url: Option<String>,
    /// Zero removes the limiter.
    pub rate_limit_per_minute: Option<u32>,
    pub cache_ttl_secs: Option<u64>,
    pub overflow: Option<OverflowSetting>,
    pub max_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowSetting {
    FailFast,
    Block,
}

impl SourceSection {
    fn touches_policy(&self) -> bool {
        self.rate_limit_per_minute.is_some()
            || self.cache_ttl_secs.is_some()
            || self.overflow.is_some()
            || self.max_wait_ms.is_some()
    }

    fn policy(&self, source_id: SourceId) -> ProviderPolicy {
        let mut policy = ProviderPolicy::default_for(source_id);
        match self.rate_limit_per_minute {
            Some(0) => policy = policy.without_quota(),
            Some(limit) => policy = policy.with_quota(limit, Duration::from_secs(60)),
            None => {}
        }
        if let Some(ttl) = self.cache_ttl_secs {
            policy = policy.with_cache_ttl(Duration::from_secs(ttl));
        }

        let max_wait = self
            .max_wait_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MAX_WAIT);
        match (self.overflow, self.max_wait_ms) {
            (Some(OverflowSetting::FailFast), _) => {
                policy = policy.with_overflow(OverflowMode::FailFast);
            }
            (Some(OverflowSetting::Block), _) | (None, Some(_)) => {
                policy = policy.with_overflow(OverflowMode::Block { max_wait });
            }
            (None, None) => {}
        }
        policy
    }
}

impl AppConfig {
    /// Reads `path`, or returns defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let label = path.display().to_string();
        let contents = fs::read_to_string(path).map_err(|error| CliError::Config {
            path: label.clone(),
            message: error.to_string(),
        })?;
        Self::from_toml(&contents, &label)
    }

    pub fn from_toml(contents: &str, label: &str) -> Result<Self, CliError> {
        let config: Self = toml::from_str(contents).map_err(|error| CliError::Config {
            path: label.to_owned(),
            message: error.to_string(),
        })?;
        config.check_sources(label)?;
        Ok(config)
    }

    fn check_sources(&self, label: &str) -> Result<(), CliError> {
        for (name, section) in &self.sources {
            let source_id = source_id(name, label)?;
            if section.api_key.is_some()
                && !matches!(source_id, SourceId::AlphaVantage | SourceId::Finnhub)
            {
                return Err(CliError::Config {
                    path: label.to_owned(),
                    message: format!("sources.{name}.api_key is not used by {source_id}"),
                });
            }
            if section.user_agent.is_some() && source_id != SourceId::SecEdgar {
                return Err(CliError::Config {
                    path: label.to_owned(),
                    message: format!("sources.{name}.user_agent only applies to sec_edgar"),
                });
            }
        }
        Ok(())
    }

    pub fn federation_config(&self) -> FederationConfig {
        let section = &self.federation;
        let mut config = FederationConfig::default();
        if let Some(value) = section.cross_validation_sources {
            config = config.with_cross_validation_sources(value);
        }
        if let Some(value) = section.tolerance {
            config = config.with_tolerance(value);
        }
        if let Some(value) = section.max_concurrency {
            config = config.with_max_concurrency(value);
        }
        if let Some(value) = section.call_timeout_ms {
            config = config.with_call_timeout(Duration::from_millis(value));
        }
        if let Some(value) = section.request_deadline_ms {
            config = config.with_request_deadline(Duration::from_millis(value));
        }
        if let Some(value) = section.health_check_deadline_ms {
            config.health_check_deadline = Duration::from_millis(value);
        }
        if let Some(value) = section.search_limit {
            config = config.with_search_limit(value);
        }
        config
    }

    /// Registry builder carrying the file's settings, with env fallbacks.
    pub fn registry_builder(&self) -> Result<SourceRegistryBuilder, CliError> {
        let mut builder = SourceRegistryBuilder::new();
        for (name, section) in &self.sources {
            let source_id = source_id(name, "<config>")?;
            if let Some(enabled) = section.enabled {
                builder = builder.with_enabled(source_id, enabled);
            }
            if let Some(api_key) = &section.api_key {
                builder = match source_id {
                    SourceId::AlphaVantage => builder.with_alphavantage_key(api_key.clone()),
                    SourceId::Finnhub => builder.with_finnhub_key(api_key.clone()),
                    _ => builder,
                };
            }
            if let Some(user_agent) = &section.user_agent {
                builder = builder.with_sec_user_agent(user_agent.clone());
            }
            if let Some(base_url) = &section.base_url {
                builder = builder.with_base_url(source_id, base_url.clone());
            }
            if section.touches_policy() {
                builder = builder.with_policy(section.policy(source_id));
            }
        }
        Ok(builder.with_env())
    }
}

fn source_id(name: &str, label: &str) -> Result<SourceId, CliError> {
    name.parse::<SourceId>().map_err(|error| CliError::Config {
        path: label.to_owned(),
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use finsight_core::SourceId;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn missing_path_yields_defaults() {
        let config = AppConfig::load(None).expect("defaults");
        assert!(config.sources.is_empty());
        assert_eq!(config.federation_config(), FederationConfig::default());
    }

    #[test]
    fn loads_federation_and_source_sections_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[federation]
tolerance = 0.05
cross_validation_sources = 2
request_deadline_ms = 5000

[sources.alphavantage]
api_key = "demo"
rate_limit_per_minute = 25
overflow = "block"
max_wait_ms = 250

[sources.yahoo]
enabled = false
"#
        )
        .expect("write config");

        let config = AppConfig::load(Some(file.path())).expect("config");
        let federation = config.federation_config();
        assert_eq!(federation.tolerance, 0.05);
        assert_eq!(federation.cross_validation_sources, 2);
        assert_eq!(federation.request_deadline, Duration::from_millis(5_000));
        assert_eq!(federation.max_concurrency, FederationConfig::default().max_concurrency);

        let section = &config.sources["alphavantage"];
        let policy = section.policy(SourceId::AlphaVantage);
        assert_eq!(policy.quota_limit, Some(25));
        assert_eq!(
            policy.overflow,
            OverflowMode::Block {
                max_wait: Duration::from_millis(250)
            }
        );

        let registry = config
            .registry_builder()
            .expect("builder")
            .build()
            .expect("registry");
        assert!(registry.get(SourceId::Yahoo).is_none());
        assert!(registry.get(SourceId::AlphaVantage).is_some());
        assert!(registry.get(SourceId::SecEdgar).is_some());
    }

    #[test]
    fn zero_rate_limit_removes_the_limiter() {
        let section = SourceSection {
            rate_limit_per_minute: Some(0),
            ..SourceSection::default()
        };
        assert_eq!(section.policy(SourceId::Finnhub).quota_limit, None);
    }

    #[test]
    fn unknown_source_is_a_config_error() {
        let error = AppConfig::from_toml("[sources.polygon]\nenabled = true\n", "test.toml")
            .expect_err("unknown source");
        assert!(matches!(error, CliError::Config { .. }));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn api_key_on_keyless_source_is_rejected() {
        let error = AppConfig::from_toml("[sources.yahoo]\napi_key = \"x\"\n", "test.toml")
            .expect_err("yahoo takes no key");
        assert!(error.to_string().contains("api_key"));
    }

    #[test]
    fn invalid_toml_reports_path() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "[federation\ntolerance = ").expect("write config");

        let error = AppConfig::load(Some(file.path())).expect_err("invalid toml");
        let CliError::Config { path, .. } = error else {
            panic!("expected config error");
        };
        assert_eq!(path, file.path().display().to_string());
    }
}

//! Configuration layer: typed settings with layered precedence (file → env).
//!
//! Sources, lowest precedence first:
//!
//! 1. `stash.toml` (or any extension the `config` crate understands) in the
//!    working directory, if present;
//! 2. environment variables prefixed `STASH`, nested with `__`, e.g.
//!    `STASH__CACHE__TTL_SECS=60` or `STASH__CACHE__STALE_STATUSES=500,502`.
//!
//! ```toml
//! [cache]
//! key_prefix = "api:"
//! ttl_secs = 60
//! use_stale = true
//! stale_statuses = [500, 502, 503]
//! ```

use std::{num::NonZeroUsize, time::Duration};

use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use thiserror::Error;

use crate::{Method, StatusCode, cache::CacheOptions};

const LOCAL_CONFIG_BASENAME: &str = "stash";
const ENV_PREFIX: &str = "STASH";
const DEFAULT_MEMORY_CAPACITY: usize = 1024;
/// Upper bound for `ttl_secs` and `stale_ttl_secs` (ten years).
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

const LIST_KEYS: [&str; 3] = [
    "cache.allowed_methods",
    "cache.allowed_statuses",
    "cache.stale_statuses",
];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// All settings understood by this crate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
}

/// The `[cache]` table. Unset fields fall back to [`CacheOptions`] defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub allowed_methods: Option<Vec<String>>,
    pub allowed_statuses: Option<Vec<u16>>,
    pub key_prefix: Option<String>,
    pub ttl_secs: Option<u64>,
    pub use_stale: Option<bool>,
    pub stale_statuses: Option<Vec<u16>>,
    pub stale_ttl_secs: Option<u64>,
    pub backend_timeout_ms: Option<u64>,
    /// Entry bound for [`MemoryCacher`](crate::cache::MemoryCacher).
    pub memory_capacity: Option<usize>,
}

impl CacheSettings {
    /// Validates the raw values and builds middleware options.
    ///
    /// # Errors
    ///
    /// [`LoadError::Invalid`] for unknown status codes, empty method names,
    /// zero durations, TTLs over ten years, or a stale TTL shorter than the
    /// fresh TTL.
    pub fn to_options(&self) -> Result<CacheOptions, LoadError> {
        let mut options = CacheOptions::default();

        if let Some(methods) = &self.allowed_methods {
            options.allowed_methods = methods
                .iter()
                .map(|raw| parse_method(raw))
                .collect::<Result<_, _>>()?;
        }
        if let Some(codes) = &self.allowed_statuses {
            options.allowed_statuses = parse_statuses("cache.allowed_statuses", codes)?;
        }
        if let Some(codes) = &self.stale_statuses {
            options.stale_statuses = parse_statuses("cache.stale_statuses", codes)?;
        }
        if let Some(prefix) = &self.key_prefix {
            options.key_prefix = prefix.clone();
        }
        if let Some(use_stale) = self.use_stale {
            options.use_stale = use_stale;
        }
        if let Some(secs) = self.ttl_secs {
            options.ttl = Duration::from_secs(ttl_secs(secs, "cache.ttl_secs")?);
        }
        if let Some(secs) = self.stale_ttl_secs {
            options.stale_ttl = Duration::from_secs(ttl_secs(secs, "cache.stale_ttl_secs")?);
        }
        if let Some(ms) = self.backend_timeout_ms {
            options.backend_timeout = Some(Duration::from_millis(non_zero(
                ms,
                "cache.backend_timeout_ms",
            )?));
        }

        if options.stale_ttl < options.ttl {
            return Err(LoadError::invalid(
                "cache.stale_ttl_secs",
                format!(
                    "stale TTL ({}s) must not be shorter than TTL ({}s)",
                    options.stale_ttl.as_secs(),
                    options.ttl.as_secs()
                ),
            ));
        }

        Ok(options)
    }

    /// Returns the configured in-memory backend capacity.
    ///
    /// # Errors
    ///
    /// [`LoadError::Invalid`] when set to zero.
    pub fn memory_capacity(&self) -> Result<NonZeroUsize, LoadError> {
        let capacity = self.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
        NonZeroUsize::new(capacity)
            .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))
    }
}

/// Loads settings from `stash.toml` and `STASH__*` environment variables.
pub fn load() -> Result<Settings, LoadError> {
    let builder = Config::builder()
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false))
        .add_source(environment());
    load_from(builder)
}

/// Builds and deserializes settings from caller-provided sources.
///
/// The result is validated: an invalid `[cache]` table is rejected here
/// rather than when the middleware is constructed.
pub fn load_from(builder: ConfigBuilder<DefaultState>) -> Result<Settings, LoadError> {
    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.cache.to_options()?;
    settings.cache.memory_capacity()?;
    Ok(settings)
}

fn environment() -> Environment {
    LIST_KEYS.iter().fold(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(","),
        |env, key| env.with_list_parse_key(key),
    )
}

fn parse_method(raw: &str) -> Result<Method, LoadError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid("cache.allowed_methods", "empty method name"));
    }
    let Ok(method) = trimmed.to_ascii_uppercase().parse::<Method>();
    Ok(method)
}

fn parse_statuses(key: &'static str, codes: &[u16]) -> Result<Vec<StatusCode>, LoadError> {
    codes
        .iter()
        .map(|&code| {
            StatusCode::from_u16(code)
                .ok_or_else(|| LoadError::invalid(key, format!("unsupported status code {code}")))
        })
        .collect()
}

fn ttl_secs(value: u64, key: &'static str) -> Result<u64, LoadError> {
    let value = non_zero(value, key)?;
    if value > MAX_TTL_SECS {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {MAX_TTL_SECS} seconds"),
        ));
    }
    Ok(value)
}

fn non_zero(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use config::FileFormat;

    use super::*;

    fn from_toml(raw: &str) -> Result<Settings, LoadError> {
        load_from(Config::builder().add_source(File::from_str(raw, FileFormat::Toml)))
    }

    #[test]
    fn empty_sources_use_defaults() {
        let settings = from_toml("").unwrap();
        let options = settings.cache.to_options().unwrap();

        assert_eq!(options.allowed_methods, vec![Method::Get, Method::Head]);
        assert_eq!(options.allowed_statuses, vec![StatusCode::Ok]);
        assert_eq!(options.ttl, Duration::from_secs(900));
        assert_eq!(options.stale_ttl, Duration::from_secs(86_400));
        assert!(!options.use_stale);
        assert_eq!(options.backend_timeout, None);
        assert_eq!(settings.cache.memory_capacity().unwrap().get(), 1024);
    }

    #[test]
    fn toml_table_overrides_defaults() {
        let settings = from_toml(
            r#"
            [cache]
            allowed_methods = ["get"]
            allowed_statuses = [200, 203]
            key_prefix = "api:"
            ttl_secs = 60
            use_stale = true
            stale_statuses = [500, 502]
            stale_ttl_secs = 3600
            backend_timeout_ms = 250
            memory_capacity = 64
            "#,
        )
        .unwrap();
        let options = settings.cache.to_options().unwrap();

        assert_eq!(options.allowed_methods, vec![Method::Get]);
        assert_eq!(
            options.allowed_statuses,
            vec![StatusCode::Ok, StatusCode::NonAuthoritativeInformation]
        );
        assert_eq!(options.key_prefix, "api:");
        assert_eq!(options.ttl, Duration::from_secs(60));
        assert!(options.use_stale);
        assert_eq!(
            options.stale_statuses,
            vec![StatusCode::InternalServerError, StatusCode::BadGateway]
        );
        assert_eq!(options.stale_ttl, Duration::from_secs(3600));
        assert_eq!(options.backend_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.cache.memory_capacity().unwrap().get(), 64);
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<String, String> = [
            ("STASH__CACHE__TTL_SECS", "120"),
            ("STASH__CACHE__USE_STALE", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let builder = Config::builder()
            .add_source(File::from_str("[cache]\nttl_secs = 60\n", FileFormat::Toml))
            .add_source(environment().source(Some(env)));
        let options = load_from(builder).unwrap().cache.to_options().unwrap();

        assert_eq!(options.ttl, Duration::from_secs(120));
        assert!(options.use_stale);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = from_toml("[cache]\nstale_statuses = [599]\n").unwrap_err();
        assert!(
            matches!(err, LoadError::Invalid { key: "cache.stale_statuses", .. }),
            "{err}"
        );
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = from_toml("[cache]\nttl_secs = 0\n").unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.ttl_secs", .. }), "{err}");
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let err = from_toml("[cache]\nstale_ttl_secs = 9223372036854775807\n").unwrap_err();
        assert!(
            matches!(err, LoadError::Invalid { key: "cache.stale_ttl_secs", .. }),
            "{err}"
        );

        let err = from_toml("[cache]\nttl_secs = 315360001\nstale_ttl_secs = 315360001\n")
            .unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.ttl_secs", .. }), "{err}");
    }

    #[test]
    fn ten_year_ttl_is_accepted() {
        let options = from_toml("[cache]\nttl_secs = 315360000\nstale_ttl_secs = 315360000\n")
            .unwrap()
            .cache
            .to_options()
            .unwrap();
        assert_eq!(options.stale_ttl, Duration::from_secs(MAX_TTL_SECS));
    }

    #[test]
    fn stale_ttl_shorter_than_ttl_is_rejected() {
        let err = from_toml("[cache]\nttl_secs = 600\nstale_ttl_secs = 60\n").unwrap_err();
        assert!(
            matches!(err, LoadError::Invalid { key: "cache.stale_ttl_secs", .. }),
            "{err}"
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = from_toml("[cache]\nmemory_capacity = 0\n").unwrap_err();
        assert!(
            matches!(err, LoadError::Invalid { key: "cache.memory_capacity", .. }),
            "{err}"
        );
    }

    #[test]
    fn malformed_value_is_a_build_error() {
        let err = from_toml("[cache]\nttl_secs = \"soon\"\n").unwrap_err();
        assert!(matches!(err, LoadError::Build(_)), "{err}");
    }
}

//! Environment variable configuration
//!
//! `VOWRUN_*` variables override whatever the config file says.

use std::env;

use tracing::warn;

use super::AppConfig;
use crate::output::OutputFormat;
use crate::utils::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "VOWRUN";

/// Overrides read from the environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// VOWRUN_CONCURRENCY
    pub concurrency: Option<usize>,
    /// VOWRUN_EXCLUDE, comma separated
    pub exclude: Option<Vec<String>>,
    /// VOWRUN_INCLUDE, comma separated
    pub include: Option<Vec<String>>,
    /// VOWRUN_LOG
    pub log_level: Option<LogLevel>,
    /// VOWRUN_FORMAT
    pub format: Option<OutputFormat>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            concurrency: get_env_parse("CONCURRENCY"),
            exclude: get_env_list("EXCLUDE"),
            include: get_env_list("INCLUDE"),
            log_level: get_env_parse("LOG"),
            format: get_env_parse("FORMAT"),
        }
    }

    pub fn has_any(&self) -> bool {
        self.concurrency.is_some()
            || self.exclude.is_some()
            || self.include.is_some()
            || self.log_level.is_some()
            || self.format.is_some()
    }

    /// Overlay the set variables onto `config`
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(concurrency) = self.concurrency.filter(|&n| n > 0) {
            config.max_concurrent = concurrency;
        }
        if let Some(exclude) = &self.exclude {
            config.exclude = exclude.clone();
        }
        if let Some(include) = &self.include {
            config.include = include.clone();
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = get_env(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {ENV_PREFIX}_{name}={raw}");
            None
        }
    }
}

fn get_env_list(name: &str) -> Option<Vec<String>> {
    get_env(name).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Restores environment variables on drop
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(k, _)| (k.to_string(), env::var(k).ok()))
                .collect();
            for (key, value) in vars {
                env::set_var(key, value);
            }
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());
        let mut app = AppConfig::default();
        config.apply(&mut app);
        assert_eq!(app, AppConfig::default());
    }

    #[test]
    fn test_env_load() {
        let _guard = EnvGuard::set(&[
            ("VOWRUN_CONCURRENCY", "8"),
            ("VOWRUN_EXCLUDE", "slow, flaky ,"),
            ("VOWRUN_LOG", "debug"),
            ("VOWRUN_FORMAT", "bogus"),
        ]);

        let config = EnvConfig::load();
        assert_eq!(config.concurrency, Some(8));
        assert_eq!(
            config.exclude,
            Some(vec!["slow".to_string(), "flaky".to_string()])
        );
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(config.format, None);
    }

    #[test]
    fn test_apply_overrides() {
        let overrides = EnvConfig {
            concurrency: Some(4),
            include: Some(vec!["Suite".to_string()]),
            format: Some(OutputFormat::JsonPretty),
            ..Default::default()
        };

        let mut app = AppConfig {
            exclude: vec!["kept".to_string()],
            ..Default::default()
        };
        overrides.apply(&mut app);

        assert_eq!(app.max_concurrent, 4);
        assert_eq!(app.include, vec!["Suite".to_string()]);
        assert_eq!(app.exclude, vec!["kept".to_string()]);
        assert_eq!(app.format, OutputFormat::JsonPretty);
    }

    #[test]
    fn test_zero_concurrency_ignored() {
        let mut app = AppConfig::default();
        EnvConfig {
            concurrency: Some(0),
            ..Default::default()
        }
        .apply(&mut app);
        assert_eq!(app.max_concurrent, 1000);
    }
}

use gemini_realtime::DEFAULT_MODEL;
use std::time::Duration;
use tracing::Level;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub connect_timeout: Duration,
    /// Root of the calls API. Finished calls are not recorded when unset.
    pub calls_api_url: Option<String>,
    pub calls_api_token: Option<String>,
    pub log_level: Level,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("gemini_api_key", &"<redacted>")
            .field("gemini_model", &self.gemini_model)
            .field("connect_timeout", &self.connect_timeout)
            .field("calls_api_url", &self.calls_api_url)
            .field("calls_api_token", &self.calls_api_token.as_ref().map(|_| "<redacted>"))
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Loads `.env` outside of tests.
pub fn load_dotenv() {
    // Only load from .env in non-test mode to avoid contamination
    if !cfg!(test) {
        dotenvy::dotenv().ok();
    }
}

/// Reads `RUST_LOG` as a single level, defaulting to `INFO`.
pub fn log_level_from_env() -> Result<Level, ConfigError> {
    let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
    log_level_str.parse::<Level>().map_err(|_| {
        ConfigError::InvalidValue(
            "RUST_LOG".to_string(),
            format!("'{}' is not a valid log level", log_level_str),
        )
    })
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let gemini_model = if gemini_model.starts_with("models/") {
            gemini_model
        } else {
            format!("models/{gemini_model}")
        };

        let connect_timeout = match std::env::var("CONNECT_TIMEOUT_SECS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "CONNECT_TIMEOUT_SECS".to_string(),
                        format!("'{raw}' is not a positive number of seconds"),
                    ));
                }
            },
            Err(_) => Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let calls_api_url = std::env::var("CALLS_API_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        if let Some(url) = &calls_api_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue(
                    "CALLS_API_URL".to_string(),
                    format!("'{url}' is not an http(s) URL"),
                ));
            }
        }
        let calls_api_token = std::env::var("CALLS_API_TOKEN").ok();

        let log_level = log_level_from_env()?;

        Ok(Self {
            gemini_api_key,
            gemini_model,
            connect_timeout,
            calls_api_url,
            calls_api_token,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_MODEL");
            env::remove_var("CONNECT_TIMEOUT_SECS");
            env::remove_var("CALLS_API_URL");
            env::remove_var("CALLS_API_TOKEN");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.gemini_api_key, "test-gemini-key");
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.calls_api_url, None);
        assert_eq!(config.calls_api_token, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "custom-key");
            env::set_var("GEMINI_MODEL", "gemini-live-test");
            env::set_var("CONNECT_TIMEOUT_SECS", "30");
            env::set_var("CALLS_API_URL", "http://localhost:5000/api");
            env::set_var("CALLS_API_TOKEN", "token");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.gemini_model, "models/gemini-live-test");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(
            config.calls_api_url.as_deref(),
            Some("http://localhost:5000/api")
        );
        assert_eq!(config.calls_api_token.as_deref(), Some("token"));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_gemini_key() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "  ");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(var) => assert_eq!(var, "GEMINI_API_KEY"),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_timeout() {
        for raw in ["0", "soon", "-3"] {
            clear_env_vars();
            unsafe {
                env::set_var("GEMINI_API_KEY", "test-gemini-key");
                env::set_var("CONNECT_TIMEOUT_SECS", raw);
            }

            match Config::from_env().unwrap_err() {
                ConfigError::InvalidValue(var, _) => assert_eq!(var, "CONNECT_TIMEOUT_SECS"),
                _ => panic!("Expected InvalidValue for CONNECT_TIMEOUT_SECS"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_calls_api_url() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("CALLS_API_URL", "localhost:5000");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CALLS_API_URL"),
            _ => panic!("Expected InvalidValue for CALLS_API_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("RUST_LOG", "not-a-level");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config {
            gemini_api_key: "secret".into(),
            gemini_model: DEFAULT_MODEL.into(),
            connect_timeout: Duration::from_secs(15),
            calls_api_url: None,
            calls_api_token: Some("token-secret".into()),
            log_level: Level::INFO,
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret"));
    }
}

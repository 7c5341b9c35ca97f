use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials for the outbound call-initiation API.
///
/// Optional as a whole: without them the service still bridges inbound
/// media streams, it just cannot place outbound calls.
#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Externally visible base URL; when unset, handlers fall back to the
    /// request `Host` header.
    pub public_url: Option<String>,
    pub openai_api_key: String,
    pub realtime_model: String,
    pub voice: String,
    pub twilio: Option<TwilioConfig>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let public_url = std::env::var("PUBLIC_URL").ok().filter(|v| !v.is_empty());

        let realtime_model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-12-17".to_string());
        let voice = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "ash".to_string());

        let twilio = match (
            std::env::var("TWILIO_ACCOUNT_SID"),
            std::env::var("TWILIO_AUTH_TOKEN"),
        ) {
            (Ok(account_sid), Ok(auth_token)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                phone_number: std::env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            }),
            _ => None,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            public_url,
            openai_api_key,
            realtime_model,
            voice,
            twilio,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("PUBLIC_URL");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("REALTIME_MODEL");
            env::remove_var("REALTIME_VOICE");
            env::remove_var("TWILIO_ACCOUNT_SID");
            env::remove_var("TWILIO_AUTH_TOKEN");
            env::remove_var("TWILIO_PHONE_NUMBER");
            env::remove_var("RUST_LOG");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
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
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.openai_api_key, "test-openai-key");
        assert_eq!(config.public_url, None);
        assert_eq!(config.realtime_model, "gpt-4o-realtime-preview-2024-12-17");
        assert_eq!(config.voice, "ash");
        assert!(config.twilio.is_none());
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("PUBLIC_URL", "https://bridge.example.com");
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("REALTIME_MODEL", "gpt-4o-realtime-preview");
            env::set_var("REALTIME_VOICE", "alloy");
            env::set_var("TWILIO_ACCOUNT_SID", "ACxxx");
            env::set_var("TWILIO_AUTH_TOKEN", "secret");
            env::set_var("TWILIO_PHONE_NUMBER", "+15550001111");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(
            config.public_url,
            Some("https://bridge.example.com".to_string())
        );
        assert_eq!(config.realtime_model, "gpt-4o-realtime-preview");
        assert_eq!(config.voice, "alloy");
        let twilio = config.twilio.expect("Twilio config should be present");
        assert_eq!(twilio.account_sid, "ACxxx");
        assert_eq!(twilio.auth_token, "secret");
        assert_eq!(twilio.phone_number, "+15550001111");
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_partial_twilio_credentials_disable_dialing() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("TWILIO_ACCOUNT_SID", "ACxxx");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert!(config.twilio.is_none());
    }
}

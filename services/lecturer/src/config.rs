use anyhow::Context;
use lecture_core::LectureConfig;
use std::path::{Path, PathBuf};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub gemini_api_key: String,
    /// Overrides for the lecture file's own model settings.
    pub live_model: Option<String>,
    pub live_voice: Option<String>,
    pub live_language: Option<String>,
    pub live_endpoint: Option<String>,
    pub log_level: Level,
    /// Directory for persisted resumption handles. `None` keeps them in memory.
    pub resumption_dir: Option<PathBuf>,
    pub auto_reconnect: bool,
    pub prompts_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let auto_reconnect = match std::env::var("AUTO_RECONNECT") {
            Ok(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "AUTO_RECONNECT".to_string(),
                    format!("'{}' is not a boolean", value),
                )
            })?,
            Err(_) => false,
        };

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        Ok(Self {
            gemini_api_key,
            live_model: optional_var("LIVE_MODEL"),
            live_voice: optional_var("LIVE_VOICE"),
            live_language: optional_var("LIVE_LANGUAGE"),
            live_endpoint: optional_var("LIVE_ENDPOINT"),
            log_level,
            resumption_dir: optional_var("RESUMPTION_DIR").map(PathBuf::from),
            auto_reconnect,
            prompts_path,
        })
    }

    /// Applies the environment overrides on top of a lecture's settings.
    pub fn apply_overrides(&self, config: &mut LectureConfig) {
        if let Some(model) = &self.live_model {
            config.model = model.clone();
        }
        if let Some(voice) = &self.live_voice {
            config.voice = voice.clone();
        }
        if let Some(language) = &self.live_language {
            config.language = language.clone();
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reads `system_prompt.md` from the prompts directory, if one was provided.
pub fn load_prompt_template(dir: &Path) -> anyhow::Result<Option<String>> {
    let path = dir.join("system_prompt.md");
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "No system prompt override found");
        return Ok(None);
    }
    let template = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded system prompt override");
    Ok(Some(template))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("LIVE_MODEL");
            env::remove_var("LIVE_VOICE");
            env::remove_var("LIVE_LANGUAGE");
            env::remove_var("LIVE_ENDPOINT");
            env::remove_var("RUST_LOG");
            env::remove_var("RESUMPTION_DIR");
            env::remove_var("AUTO_RECONNECT");
            env::remove_var("PROMPTS_PATH");
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
        assert_eq!(config.live_model, None);
        assert_eq!(config.live_endpoint, None);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.resumption_dir, None);
        assert!(!config.auto_reconnect);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "key");
            env::set_var("LIVE_MODEL", "models/custom");
            env::set_var("LIVE_VOICE", "Kore");
            env::set_var("RUST_LOG", "debug");
            env::set_var("RESUMPTION_DIR", "/tmp/handles");
            env::set_var("AUTO_RECONNECT", "yes");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.live_model.as_deref(), Some("models/custom"));
        assert_eq!(config.live_voice.as_deref(), Some("Kore"));
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.resumption_dir, Some(PathBuf::from("/tmp/handles")));
        assert!(config.auto_reconnect);
        assert_eq!(config.prompts_path, PathBuf::from("/custom/prompts"));

        let mut lecture_config = LectureConfig::default();
        config.apply_overrides(&mut lecture_config);
        assert_eq!(lecture_config.model, "models/custom");
        assert_eq!(lecture_config.voice, "Kore");
        assert_eq!(lecture_config.language, "en-US");
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();

        let result = Config::from_env();

        assert!(matches!(result, Err(ConfigError::MissingVar(var)) if var == "GEMINI_API_KEY"));
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "key");
            env::set_var("RUST_LOG", "loud");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "RUST_LOG"
        ));

        unsafe {
            env::remove_var("RUST_LOG");
            env::set_var("AUTO_RECONNECT", "maybe");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "AUTO_RECONNECT"
        ));
        clear_env_vars();
    }

    #[test]
    fn test_load_prompt_template() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_prompt_template(dir.path()).unwrap(), None);

        std::fs::write(dir.path().join("system_prompt.md"), "Teach in {language}.").unwrap();
        assert_eq!(
            load_prompt_template(dir.path()).unwrap().as_deref(),
            Some("Teach in {language}.")
        );
    }
}

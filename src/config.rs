use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use pagewise_core::prompt::DEFAULT_HISTORY_TURNS;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub epub: EpubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/pagewise.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_idle_timeout_secs() -> u64 {
    60
}

impl GeneratorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            fallback_message: default_fallback_message(),
        }
    }
}

fn default_history_turns() -> usize {
    DEFAULT_HISTORY_TURNS
}
fn default_fallback_message() -> String {
    "Sorry, I couldn't generate an answer just now. Please try asking again.".to_string()
}

/// How EPUB content documents are ordered into pages.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadingOrder {
    /// OPF spine order, lexicographic for members outside the spine.
    #[default]
    Spine,
    /// Plain lexicographic sort of member paths.
    Lexicographic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EpubConfig {
    #[serde(default)]
    pub reading_order: ReadingOrder,
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
}

impl Default for EpubConfig {
    fn default() -> Self {
        Self {
            reading_order: ReadingOrder::default(),
            max_entry_bytes: default_max_entry_bytes(),
        }
    }
}

/// Maximum decompressed bytes read from a single zip member (zip-bomb guard).
fn default_max_entry_bytes() -> u64 {
    50 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    match config.generator.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.generator.is_enabled() && config.generator.model.is_none() {
        anyhow::bail!(
            "generator.model must be specified when provider is '{}'",
            config.generator.provider
        );
    }

    if config.generator.connect_timeout_secs == 0 {
        anyhow::bail!("generator.connect_timeout_secs must be > 0");
    }

    if config.generator.idle_timeout_secs == 0 {
        anyhow::bail!("generator.idle_timeout_secs must be > 0");
    }

    if config.epub.max_entry_bytes == 0 {
        anyhow::bail!("epub.max_entry_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.generator.provider, "disabled");
        assert_eq!(config.session.history_turns, 6);
        assert_eq!(config.epub.reading_order, ReadingOrder::Spine);
    }

    #[test]
    fn enabled_provider_requires_model() {
        let err = parse("[generator]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("generator.model"));
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!(parse("[generator]\nprovider = \"carrier-pigeon\"\n").is_err());
    }

    #[test]
    fn lexicographic_order_parses() {
        let config = parse("[epub]\nreading_order = \"lexicographic\"\n").unwrap();
        assert_eq!(config.epub.reading_order, ReadingOrder::Lexicographic);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config_or_default(Path::new("/definitely/not/here.toml")).unwrap();
        assert!(!config.generator.is_enabled());
    }
}

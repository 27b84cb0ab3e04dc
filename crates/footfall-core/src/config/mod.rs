//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Footfall configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub data: DataConfig,
    pub retrieval: RetrievalConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Fact file (CSV or JSON Lines)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_subgraph_nodes: usize,
    pub fallback_sample_nodes: usize,
    pub top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub dataset_description: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            default_model: "compound-beta".to_string(),
            fallback_models: vec!["llama-3.3-70b-versatile".to_string()],
            temperature: 0.2,
            max_tokens: 2048,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_subgraph_nodes: 50,
            fallback_sample_nodes: 30,
            top_n: 10,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            dataset_description: "total visitor counts recorded across retail stores".to_string(),
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("FOOTFALL_API_KEY")
            .or_else(|_| env::var("GROQ_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty()))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key()
            .map(|opt| opt.map(|key| redact_key(&key)))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("FOOTFALL_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("footfall")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or fall back to defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;
        if self.retrieval.max_subgraph_nodes == 0 {
            return Err(anyhow!("retrieval.max_subgraph_nodes must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "llm.base_url" => Ok(self.llm.base_url.clone()),
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),
            "llm.max_retries" => Ok(self.llm.max_retries.to_string()),

            "data.path" => Ok(self
                .data
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string())),

            "retrieval.max_subgraph_nodes" => Ok(self.retrieval.max_subgraph_nodes.to_string()),
            "retrieval.fallback_sample_nodes" => {
                Ok(self.retrieval.fallback_sample_nodes.to_string())
            }
            "retrieval.top_n" => Ok(self.retrieval.top_n.to_string()),

            "prompt.dataset_description" => Ok(self.prompt.dataset_description.clone()),

            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use FOOTFALL_API_KEY or GROQ_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `footfall config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.base_url" => {
                self.llm.base_url = value.trim_end_matches('/').to_string();
            }
            "llm.default_model" => {
                self.llm.default_model = value.to_string();
            }
            "llm.fallback_models" => {
                self.llm.fallback_models = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }
            "llm.max_retries" => {
                self.llm.max_retries = value
                    .parse()
                    .with_context(|| format!("Invalid max_retries value: {}", value))?;
            }

            "data.path" => {
                self.data.path = Some(PathBuf::from(value));
            }

            "retrieval.max_subgraph_nodes" => {
                let max: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_subgraph_nodes value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_subgraph_nodes must be at least 1"));
                }
                self.retrieval.max_subgraph_nodes = max;
            }
            "retrieval.fallback_sample_nodes" => {
                self.retrieval.fallback_sample_nodes = value
                    .parse()
                    .with_context(|| format!("Invalid fallback_sample_nodes value: {}", value))?;
            }
            "retrieval.top_n" => {
                self.retrieval.top_n = value
                    .parse()
                    .with_context(|| format!("Invalid top_n value: {}", value))?;
            }

            "prompt.dataset_description" => {
                self.prompt.dataset_description = value.to_string();
            }

            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the FOOTFALL_API_KEY or GROQ_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `footfall config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "llm.base_url",
            "llm.default_model",
            "llm.fallback_models",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.max_retries",
            "llm.api_key",
            "data.path",
            "retrieval.max_subgraph_nodes",
            "retrieval.fallback_sample_nodes",
            "retrieval.top_n",
            "prompt.dataset_description",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Mask a key, keeping only its last four characters
fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("***{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retrieval.max_subgraph_nodes, 50);
        assert_eq!(config.retrieval.fallback_sample_nodes, 30);
        assert_eq!(config.retrieval.top_n, 10);
        assert_eq!(config.llm.default_model, "compound-beta");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("llm.temperature", "0.5").unwrap();
        config.set("retrieval.max_subgraph_nodes", "80").unwrap();
        config.set("data.path", "/tmp/visits.csv").unwrap();
        config.set("llm.fallback_models", "a, b,,c").unwrap();

        assert_eq!(config.get("llm.temperature").unwrap(), "0.5");
        assert_eq!(config.get("retrieval.max_subgraph_nodes").unwrap(), "80");
        assert_eq!(config.get("data.path").unwrap(), "/tmp/visits.csv");
        assert_eq!(config.llm.fallback_models, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("llm.temperature", "3.5").is_err());
        assert!(config.set("llm.temperature", "warm").is_err());
        assert!(config.set("retrieval.max_subgraph_nodes", "0").is_err());
        assert!(config.set("llm.api_key", "sk-secret").is_err());
        assert!(config.set("nope", "1").is_err());
    }

    #[test]
    fn test_api_key_in_file_is_rejected() {
        let toml = r#"
[llm]
api_key = "sk-secret"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
[retrieval]
max_subgraph_nodes = 20

[data]
path = "visits.jsonl"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.retrieval.max_subgraph_nodes, 20);
        assert_eq!(config.retrieval.fallback_sample_nodes, 30);
        assert_eq!(config.data.path, Some(PathBuf::from("visits.jsonl")));
        assert_eq!(config.llm.timeout_secs, 60);
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let items = config.list().unwrap();
        assert_eq!(items.len(), 13);
        assert!(items.iter().any(|(k, _)| k == "data.path"));
    }

    #[test]
    fn test_redact_key() {
        assert_eq!(redact_key("abc"), "***");
        assert_eq!(redact_key("gsk_live_1234"), "***1234");
        assert_eq!(redact_key("clé-secrète-é"), "***te-é");
        assert_eq!(redact_key("ключключ"), "***ключ");
    }
}

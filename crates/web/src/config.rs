//! Server configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vidprobe_common::Error;
use vidprobe_runner::{LlmConfig, PlaywrightConfig, WorkflowConfig};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listen address
    pub listen: String,

    /// SQLite result store
    pub db_path: PathBuf,

    /// Directory receiving step screenshots
    pub evidence_dir: PathBuf,

    /// Converter site and selectors
    pub workflow: WorkflowConfig,

    /// Browser driver
    pub browser: PlaywrightConfig,

    /// Reasoning service used for failure diagnosis
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            db_path: PathBuf::from("./testResults.db"),
            evidence_dir: PathBuf::from("./evidence"),
            workflow: WorkflowConfig::default(),
            browser: PlaywrightConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply reasoning-service settings from the environment.
    ///
    /// `OPENAI_API_KEY` only fills an unset key; the `VIDPROBE_LLM_*`
    /// variables always win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("OPENAI_API_KEY");
        }
        if let Some(url) = lookup("VIDPROBE_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = lookup("VIDPROBE_LLM_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn listen_addr(&self) -> vidprobe_common::Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("listen address '{}': {}", self.listen, e)))
    }

    /// Reject settings that can only fail at run time
    pub fn validate(&self) -> vidprobe_common::Result<()> {
        self.listen_addr()?;

        if self.workflow.converter_url.trim().is_empty() {
            return Err(Error::InvalidConfig("workflow.converter_url is empty".to_string()));
        }
        if self.workflow.completion_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "workflow.completion_timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::InvalidConfig(format!(
                "llm.temperature {} outside [0, 2]",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(Error::InvalidConfig("llm.max_tokens must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use vidprobe_runner::{Browser, LlmProvider};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.listen, "127.0.0.1:3000");
        assert_eq!(config.workflow.completion_timeout_ms, 30_000);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vidprobe.toml");
        std::fs::write(
            &path,
            r#"
listen = "0.0.0.0:8080"

[workflow]
converter_url = "https://convert.example.org"
capture_failure_evidence = true

[browser]
browser = "firefox"

[llm]
provider = "ollama"
model = "llama3.1"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert_eq!(config.workflow.converter_url, "https://convert.example.org");
        assert!(config.workflow.capture_failure_evidence);
        assert_eq!(config.workflow.input_selector, "input#video-url");
        assert_eq!(config.browser.browser, Browser::Firefox);
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.max_tokens, 2000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vidprobe.toml");

        let mut config = AppConfig::default();
        config.evidence_dir = PathBuf::from("/var/lib/vidprobe/evidence");
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.evidence_dir, config.evidence_dir);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("VIDPROBE_LLM_MODEL", "gpt-4o"),
            ("VIDPROBE_LLM_BASE_URL", ""),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let mut config = AppConfig::default();
        config.apply_env(lookup);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.base_url, None);

        // A key from the file is not replaced
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-file".to_string());
        config.apply_env(lookup);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.listen = "not-an-address".to_string();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = AppConfig::default();
        config.workflow.completion_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }
}

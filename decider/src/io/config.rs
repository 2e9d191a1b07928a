//! Decider configuration stored in `decider.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "decider.toml";

pub const ENV_PROVIDER: &str = "DECIDER_PROVIDER";
pub const ENV_MODEL: &str = "DECIDER_MODEL";
pub const ENV_ENDPOINT: &str = "DECIDER_ENDPOINT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Offline,
    Remote,
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "offline" => Ok(Provider::Offline),
            "remote" => Ok(Provider::Remote),
            other => Err(anyhow!("unknown provider `{other}` (expected offline or remote)")),
        }
    }
}

/// Decider configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below, and
/// credentials never live in this file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeciderConfig {
    /// Which backend generates stage output.
    pub provider: Provider,

    /// Upper bound on rendered prompt size; droppable sections go first.
    pub prompt_budget_bytes: usize,

    /// Directory that receives one run record per run.
    pub sessions_dir: PathBuf,

    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-call timeout; on expiry the offline backend answers instead.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            model: "qwen-plus".to_string(),
            api_key_env: "DECIDER_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Offline,
            prompt_budget_bytes: 16_000,
            sessions_dir: PathBuf::from("sessions"),
            remote: RemoteConfig::default(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Non-empty API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

impl DeciderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.sessions_dir.as_os_str().is_empty() {
            return Err(anyhow!("sessions_dir must not be empty"));
        }
        if self.remote.timeout_secs == 0 {
            return Err(anyhow!("remote.timeout_secs must be > 0"));
        }
        if self.remote.api_key_env.trim().is_empty() {
            return Err(anyhow!("remote.api_key_env must not be empty"));
        }
        if self.provider == Provider::Remote {
            if self.remote.endpoint.trim().is_empty() {
                return Err(anyhow!("remote.endpoint must be set when provider = \"remote\""));
            }
            if self.remote.model.trim().is_empty() {
                return Err(anyhow!("remote.model must be set when provider = \"remote\""));
            }
        }
        Ok(())
    }

    /// Apply `DECIDER_*` overrides using `lookup` (normally `std::env::var`).
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(provider) = present(ENV_PROVIDER) {
            self.provider = provider
                .parse()
                .with_context(|| format!("parse {ENV_PROVIDER}"))?;
        }
        if let Some(model) = present(ENV_MODEL) {
            self.remote.model = model.trim().to_string();
        }
        if let Some(endpoint) = present(ENV_ENDPOINT) {
            self.remote.endpoint = endpoint.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DeciderConfig::default()`.
pub fn load_config(path: &Path) -> Result<DeciderConfig> {
    if !path.exists() {
        let cfg = DeciderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DeciderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DeciderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

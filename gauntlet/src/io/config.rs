//! Harness configuration stored in `gauntlet.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::strategies::STRATEGY_KEYS;
use crate::tasks::TASK_KEYS;

pub const DEFAULT_CONFIG_PATH: &str = "gauntlet.toml";

/// Harness configuration (TOML).
///
/// Missing fields take the defaults below; CLI flags override file values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GauntletConfig {
    /// OpenAI-compatible endpoint root, e.g. `http://localhost:1234/v1`.
    pub base_url: String,
    pub model: String,

    /// Attempt budget per task x strategy pairing.
    pub max_attempts: u32,

    /// Wall-clock bound for one model call, in seconds.
    pub timeout_secs: u64,

    pub temperature: f64,
    pub max_tokens: u32,

    /// Task selection keys (see `gauntlet list`).
    pub tasks: Vec<String>,
    /// Strategy selection keys (see `gauntlet list`).
    pub strategies: Vec<String>,

    pub db_path: PathBuf,
    pub runs_dir: PathBuf,

    pub checker: CheckerConfig,
}

/// Settings for checker subprocesses of executable-code tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckerConfig {
    /// Python interpreter used to syntax-check and test generated code.
    pub python: String,
    pub timeout_secs: u64,
    /// Truncate checker stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_secs: 30,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for GauntletConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "liquid/lfm2.5-1.2b".to_string(),
            max_attempts: 3,
            timeout_secs: 120,
            temperature: 0.1,
            max_tokens: 2048,
            tasks: vec!["json".to_string(), "pyfunc".to_string()],
            strategies: vec!["baseline".to_string(), "critique_fix".to_string()],
            db_path: PathBuf::from("results.sqlite"),
            runs_dir: PathBuf::from("runs"),
            checker: CheckerConfig::default(),
        }
    }
}

impl GauntletConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("base_url must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(anyhow!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be > 0"));
        }
        validate_selection("tasks", &self.tasks, &TASK_KEYS)?;
        validate_selection("strategies", &self.strategies, &STRATEGY_KEYS)?;
        if self.checker.python.trim().is_empty() {
            return Err(anyhow!("checker.python must not be empty"));
        }
        if self.checker.timeout_secs == 0 {
            return Err(anyhow!("checker.timeout_secs must be > 0"));
        }
        if self.checker.output_limit_bytes == 0 {
            return Err(anyhow!("checker.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// SHA-256 (hex) of the canonical TOML form, recorded with each run.
    pub fn digest(&self) -> Result<String> {
        let canonical = toml::to_string(self).context("serialize config toml")?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }
}

fn validate_selection(field: &str, selected: &[String], known: &[&str]) -> Result<()> {
    if selected.is_empty() {
        bail!("{field} must select at least one entry");
    }
    for key in selected {
        if !known.contains(&key.as_str()) {
            bail!(
                "unknown {field} entry '{key}' (available: {})",
                known.join(", ")
            );
        }
    }
    Ok(())
}

/// Reject run ids that could escape the runs directory or break artifact paths.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty() {
        bail!("run id must not be empty");
    }
    if run_id == "." || run_id.contains("..") {
        bail!("run id '{run_id}' must not contain '..'");
    }
    if let Some(bad) = run_id
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')))
    {
        bail!("run id '{run_id}' contains invalid character {bad:?}");
    }
    Ok(())
}

/// Values supplied on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_attempts: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub tasks: Option<Vec<String>>,
    pub strategies: Option<Vec<String>>,
    pub db_path: Option<PathBuf>,
    pub runs_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn apply(self, cfg: &mut GauntletConfig) {
        if let Some(value) = self.base_url {
            cfg.base_url = value;
        }
        if let Some(value) = self.model {
            cfg.model = value;
        }
        if let Some(value) = self.max_attempts {
            cfg.max_attempts = value;
        }
        if let Some(value) = self.timeout_secs {
            cfg.timeout_secs = value;
        }
        if let Some(value) = self.temperature {
            cfg.temperature = value;
        }
        if let Some(value) = self.max_tokens {
            cfg.max_tokens = value;
        }
        if let Some(value) = self.tasks {
            cfg.tasks = value;
        }
        if let Some(value) = self.strategies {
            cfg.strategies = value;
        }
        if let Some(value) = self.db_path {
            cfg.db_path = value;
        }
        if let Some(value) = self.runs_dir {
            cfg.runs_dir = value;
        }
    }
}

/// Load config from a TOML file without validating it.
///
/// If the file is missing, returns `GauntletConfig::default()`.
pub fn load_config(path: &Path) -> Result<GauntletConfig> {
    if !path.exists() {
        return Ok(GauntletConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Load, apply CLI overrides, then validate.
pub fn resolve_config(path: &Path, overrides: ConfigOverrides) -> Result<GauntletConfig> {
    let mut cfg = load_config(path)?;
    overrides.apply(&mut cfg);
    cfg.validate()
        .with_context(|| format!("invalid configuration ({})", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GauntletConfig::default());
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_file_keeps_defaults_and_overrides_win() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gauntlet.toml");
        fs::write(
            &path,
            "model = \"qwen\"\nmax_attempts = 5\n\n[checker]\ntimeout_secs = 10\n",
        )
        .expect("write");

        let overrides = ConfigOverrides {
            max_attempts: Some(2),
            tasks: Some(vec!["json".to_string()]),
            ..ConfigOverrides::default()
        };
        let cfg = resolve_config(&path, overrides).expect("resolve");

        assert_eq!(cfg.model, "qwen");
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.tasks, vec!["json".to_string()]);
        assert_eq!(cfg.checker.timeout_secs, 10);
        assert_eq!(cfg.checker.python, "python3");
        assert_eq!(cfg.base_url, "http://localhost:1234/v1");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad = [
            GauntletConfig {
                max_attempts: 0,
                ..GauntletConfig::default()
            },
            GauntletConfig {
                temperature: 1.5,
                ..GauntletConfig::default()
            },
            GauntletConfig {
                tasks: vec![],
                ..GauntletConfig::default()
            },
            GauntletConfig {
                strategies: vec!["self_consistency".to_string()],
                ..GauntletConfig::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "expected invalid: {cfg:?}");
        }
    }

    #[test]
    fn run_id_rejects_path_escapes() {
        validate_run_id("20260101_120000").expect("timestamp id");
        validate_run_id("smoke-test.v2").expect("dotted id");
        for bad in ["", "..", "a/b", "a\\b", "../x", "with space"] {
            assert!(validate_run_id(bad).is_err(), "expected invalid: {bad:?}");
        }
    }

    #[test]
    fn digest_tracks_effective_values() {
        let base = GauntletConfig::default();
        let changed = GauntletConfig {
            max_attempts: 4,
            ..GauntletConfig::default()
        };
        let digest = base.digest().expect("digest");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, base.digest().expect("digest"));
        assert_ne!(digest, changed.digest().expect("digest"));
    }
}

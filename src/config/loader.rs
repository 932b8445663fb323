use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::app_config::AppConfig;
use crate::config::credentials::Credentials;
use crate::config::hash::config_hash;
use crate::config::policy_config::{OpaqueConfig, PolicyConfig};

pub struct LoadedConfig {
    pub app: AppConfig,
    pub policy: PolicyConfig,
    pub signals: OpaqueConfig,
    pub universe: OpaqueConfig,
    pub credentials: Credentials,
    pub config_hash: String,
    pub config_dir: PathBuf,
}

fn read_file(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
}

/// Loads `app.yaml`, `policy.yaml`, `signals.yaml`, and `universe.yaml` from
/// `config_dir`, plus exchange credentials from the environment (via
/// `.env` if present). Computes the config hash over the three
/// policy-bearing files (spec §4.12).
pub fn load(config_dir: impl AsRef<Path>) -> Result<LoadedConfig> {
    let config_dir = config_dir.as_ref().to_path_buf();

    // Loading a `.env` file is best-effort; real deployments set the
    // environment directly and credentials are env-only regardless (spec §4.1).
    let _ = dotenvy::dotenv();

    let app_bytes = read_file(&config_dir, "app.yaml")?;
    let policy_bytes = read_file(&config_dir, "policy.yaml")?;
    let signals_bytes = read_file(&config_dir, "signals.yaml")?;
    let universe_bytes = read_file(&config_dir, "universe.yaml")?;

    let app: AppConfig =
        serde_yaml::from_slice(&app_bytes).context("failed to parse app.yaml")?;
    let policy: PolicyConfig =
        serde_yaml::from_slice(&policy_bytes).context("failed to parse policy.yaml")?;
    let signals: OpaqueConfig =
        serde_yaml::from_slice(&signals_bytes).context("failed to parse signals.yaml")?;
    let universe: OpaqueConfig =
        serde_yaml::from_slice(&universe_bytes).context("failed to parse universe.yaml")?;

    let credentials = Credentials::from_env().context("failed to load exchange credentials")?;

    let hash = config_hash(&policy_bytes, &signals_bytes, &universe_bytes);

    Ok(LoadedConfig {
        app,
        policy,
        signals,
        universe,
        credentials,
        config_hash: hash,
        config_dir,
    })
}

use agentlens_types::Config;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Resolve the configuration file path by priority:
/// 1. Explicit path (with tilde expansion)
/// 2. AGENTLENS_CONFIG environment variable (with tilde expansion)
/// 3. XDG config directory
/// 4. ~/.agentlens/config.toml (fallback for systems without XDG)
pub fn resolve_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand_tilde(path));
    }
    if let Ok(env_path) = std::env::var("AGENTLENS_CONFIG") {
        return Ok(expand_tilde(&env_path));
    }
    if let Some(config_dir) = dirs::config_dir() {
        return Ok(config_dir.join("agentlens").join("config.toml"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".agentlens").join("config.toml"));
    }
    anyhow::bail!("could not determine a config path: no HOME or XDG config directory")
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// Load the TOML configuration; a missing file is the default config.
pub fn load_config(path: &PathBuf) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

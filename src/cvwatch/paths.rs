use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CvwatchPaths {
    pub home: PathBuf,
    pub state_file: PathBuf,
    pub price_table: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    env_path(var).unwrap_or(fallback)
}

pub fn resolve_paths() -> Result<CvwatchPaths> {
    let home = match env_path("CVWATCH_HOME") {
        Some(home) => home,
        None => required_home_dir()?.join(".cvwatch"),
    };

    let state_file = env_or_default_path(
        "CVWATCH_STATE_FILE",
        home.join("state").join("cvwatch_state.json"),
    );
    let price_table = env_or_default_path("CVWATCH_PRICE_TABLE", home.join("prices.json"));
    let logs_dir = env_or_default_path("CVWATCH_LOGS_DIR", home.join("logs"));
    let config_file = env_or_default_path("CVWATCH_CONFIG_PATH", home.join("cvwatch.toml"));

    Ok(CvwatchPaths {
        home,
        state_file,
        price_table,
        logs_dir,
        config_file,
    })
}

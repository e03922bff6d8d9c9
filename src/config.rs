use anyhow::Result;
use thiserror::Error;

/// Fatal startup problems. A refresh cycle never begins when one of these is raised.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),
    #[error("weight '{name}' must be between 0 and 1, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },
    #[error("playlist size must be greater than zero")]
    EmptyPlaylist,
}

/// Server credentials loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

/// Load credentials from `.env` and environment
pub fn load_config() -> Result<Config> {
    // Load `.env` file if present
    dotenv::dotenv().ok();
    Ok(Config {
        base_url: require_var("BASE_URL")?,
        username: require_var("USERNAME")?,
        password: require_var("PASSWORD")?,
    })
}

fn require_var(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingCredential(name).into()),
    }
}

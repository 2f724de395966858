use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::blockchain::digest::HASH_RATE_SAMPLES;
use crate::blockchain::ledger::MAX_DIFFICULTY;
use crate::blockchain::MiningSettings;

/// Errors that can occur while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration, read from `LEDGER_*` environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Directory for persistent storage (None = in memory)
    pub data_dir: Option<PathBuf>,

    pub mining: MiningSettings,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("LEDGER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse(&lookup, "LEDGER_PORT")?.unwrap_or(8080);
        let data_dir = lookup("LEDGER_DATA_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let genesis_difficulty = parse(&lookup, "LEDGER_GENESIS_DIFFICULTY")?.unwrap_or(2);
        if genesis_difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid {
                key: "LEDGER_GENESIS_DIFFICULTY",
                value: genesis_difficulty.to_string(),
                reason: format!("must not exceed {}", MAX_DIFFICULTY),
            });
        }

        let max_attempts = parse(&lookup, "LEDGER_MAX_ATTEMPTS")?;
        let timeout = parse::<u64, _>(&lookup, "LEDGER_MINING_TIMEOUT_SECS")?
            .map(Duration::from_secs);
        let hash_rate_samples =
            parse(&lookup, "LEDGER_HASH_RATE_SAMPLES")?.unwrap_or(HASH_RATE_SAMPLES);

        Ok(Config {
            host,
            port,
            data_dir,
            mining: MiningSettings {
                genesis_difficulty,
                max_attempts,
                timeout,
                hash_rate_samples,
            },
        })
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };

    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

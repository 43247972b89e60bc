use log::{info, warn};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

const MIN_SESSION_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("FAVFLIX_SESSION_KEY must be at least 32 bytes long")]
    SessionKeyTooShort,
}

pub struct Config {
    pub bind: String,
    /// `None` opens a temporary database.
    pub db_path: Option<String>,
    pub templates: String,
    pub session_key: Vec<u8>,
    pub seed: bool,
}

impl Config {
    pub fn load() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(var: F) -> Result<Config, ConfigError> {
        let session_key = match var("FAVFLIX_SESSION_KEY") {
            Some(key) if key.len() < MIN_SESSION_KEY_LEN => {
                return Err(ConfigError::SessionKeyTooShort)
            }
            Some(key) => key.into_bytes(),
            None => {
                warn!("FAVFLIX_SESSION_KEY not set, sessions are signed with an all-zero key");
                vec![0u8; MIN_SESSION_KEY_LEN]
            }
        };
        let db_path = var("FAVFLIX_DB_PATH");
        if db_path.is_none() {
            info!("FAVFLIX_DB_PATH not set, using a temporary database");
        }
        // A persistent database is only seeded on request.
        let seed_default = if db_path.is_none() { "true" } else { "false" };
        Ok(Config {
            bind: try_load(&var, "FAVFLIX_BIND", "127.0.0.1:8080"),
            db_path,
            templates: try_load(
                &var,
                "FAVFLIX_TEMPLATES",
                concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"),
            ),
            session_key,
            seed: try_load(&var, "FAVFLIX_SEED", seed_default),
        })
    }
}

fn try_load<T, F>(var: &F, key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{} not set, using default: {}", key, default);
        default.to_owned()
    });
    value.parse().unwrap_or_else(|e| {
        warn!("Invalid {} value {:?}: {}, using default: {}", key, value, e, default);
        default
            .parse()
            .unwrap_or_else(|_| unreachable!("default for {} does not parse", key))
    })
}

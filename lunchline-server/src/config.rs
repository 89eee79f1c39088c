//! Environment-driven configuration.
//!
//! Every knob has a default so a bare `lunchline-server` starts a working
//! instance in the current directory. Bad values warn and fall back rather
//! than abort.

use std::path::PathBuf;
use std::{
    env,
    fmt::{Debug, Display},
    str::FromStr,
};

use log::{info, warn};

pub struct Config {
    /// TCP port to listen on. `PORT`, default 3000.
    pub port: u16,
    /// Where the shared state is saved. `DATA_FILE`, default `data.json`.
    pub data_file: PathBuf,
    /// Student roster export to import at startup. `ROSTER_FILE`,
    /// default `result.json`.
    pub roster_file: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", "3000"),
            data_file: PathBuf::from(try_load::<String>("DATA_FILE", "data.json")),
            roster_file: PathBuf::from(try_load::<String>("ROSTER_FILE", "result.json")),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display + Debug,
{
    let raw = match env::var(key) {
        Ok(raw) => raw,
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default.to_string()
        }
    };

    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid {key} value {raw:?}: {e}; using default {default}");
            default.parse().expect("Default misconfigured!")
        }
    }
}

//! # Engine Configuration
//!
//! Timeouts and defaults shared by every project. The values are not meant to be tuned by
//! end users, but embedding applications may load them from a file.
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0:50051";

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for dialing a server.
    pub connect_timeout_ms: u64,
    /// Upper bound for a single RPC (and for a whole reflection exchange).
    pub call_timeout_ms: u64,
    /// Address given to the first form of a new project.
    pub default_address: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            default_address: DEFAULT_ADDRESS.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Parses a JSON document, filling every missing field with its default.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

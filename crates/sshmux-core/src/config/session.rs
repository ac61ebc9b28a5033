//! Session channel configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for accepted `session` channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell started by a `shell` request and used to run `exec` commands
    pub shell: String,

    /// Working directory for spawned processes
    pub working_dir: PathBuf,

    /// Whether `exec` requests are honored
    pub exec_enabled: bool,

    /// Environment applied before any client-supplied variables
    pub default_env: Vec<(String, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            working_dir: PathBuf::from("/tmp"),
            exec_enabled: true,
            default_env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        }
    }
}

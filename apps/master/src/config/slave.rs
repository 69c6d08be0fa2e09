use std::path::PathBuf;

use serde::Deserialize;

#[derive(Deserialize)]
pub struct SlaveConfig {
    /// SSH configuration the launcher connects with.
    #[serde(default = "default_ssh_config")]
    pub ssh_config: PathBuf,

    /// Shell script sourced on the remote before the slave binary runs.
    #[serde(default)]
    pub source_script: Option<String>,

    /// Seconds to wait for a component health check to come back.
    #[serde(default)]
    pub component_wait: Option<u64>,
}

fn default_ssh_config() -> PathBuf {
    PathBuf::from("/tmp/hyperion/ssh-config")
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            ssh_config: default_ssh_config(),
            source_script: None,
            component_wait: None,
        }
    }
}

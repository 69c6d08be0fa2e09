use config::Config;
use serde::Deserialize;

use std::path::PathBuf;

use hyperion_types::{ComponentInfo, ConfigSnapshot, DEFAULT_COMPONENT_WAIT_SECS};

mod logger;
pub use logger::LoggerConfig;

mod slave;
pub use slave::SlaveConfig;

mod ui;
pub use ui::UiConfig;

#[derive(Deserialize)]
pub struct MasterConfig {
    /// Name of this configuration, used to key remote log files.
    #[serde(default = "default_name")]
    pub name: String,

    /// Hostname slaves use to reach this master. Falls back to the
    /// `HOSTNAME` environment variable.
    #[serde(default)]
    pub hostname: Option<String>,

    pub ui: UiConfig,

    #[serde(default)]
    pub slave: SlaveConfig,

    /// Directory the per-slave log files are written under.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub logger: LoggerConfig,

    /// The supervised components, in start order.
    #[serde(default)]
    pub components: Vec<ComponentInfo>,

    #[serde(default)]
    pub shutdown_timeout: Option<u64>,
}

fn default_name() -> String {
    "hyperion".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/hyperion/log")
}

impl MasterConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn component_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.slave.component_wait.unwrap_or(DEFAULT_COMPONENT_WAIT_SECS),
        )
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            name: self.name.clone(),
            components: self.components.clone(),
        }
    }
}

use serde::Deserialize;

#[derive(Deserialize)]
pub struct UiConfig {
    /// Loopback port the UI server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    23081
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

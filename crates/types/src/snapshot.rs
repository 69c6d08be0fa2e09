use serde::{Deserialize, Serialize};

/// One supervised component, as served to UI clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Unique component id, `<name>@<host>`.
    pub id: String,
    pub name: String,
    /// Host the component is pinned to.
    pub host: String,
    /// Command the executor runs to start the component.
    pub cmd: String,
}

/// The view of the loaded configuration answered to `get_conf` queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Name of the loaded configuration, not its file name.
    pub name: String,
    pub components: Vec<ComponentInfo>,
}

//! Action names carried on the wire.
//!
//! UI clients send the query and control actions; slaves send `auth` and
//! `queue_event` and receive the per-component commands.

pub const START_ALL: &str = "start_all";
pub const STOP_ALL: &str = "stop_all";
pub const START: &str = "start";
pub const STOP: &str = "stop";
pub const CHECK: &str = "check";
pub const GET_CONF: &str = "get_conf";
pub const GET_HOST_STATES: &str = "get_host_states";
pub const GET_HOST_STATS: &str = "get_host_stats";
pub const RELOAD_CONFIG: &str = "reload_config";
pub const RECONNECT_WITH_HOST: &str = "reconnect_with_host";
pub const START_CLONE_SESSION: &str = "start_clone_session";
pub const QUIT: &str = "quit";
pub const SUSPEND: &str = "suspend";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const AUTH: &str = "auth";
pub const QUEUE_EVENT: &str = "queue_event";

/// Suffix appended to a query action to form the action of its reply.
pub const RESPONSE_SUFFIX: &str = "_response";

/// Name of the response action for `action`.
pub fn response_name(action: &str) -> String {
    format!("{action}{RESPONSE_SUFFIX}")
}

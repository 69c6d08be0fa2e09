//! Seams to the remote launcher and the per-slave log sinks.
use async_trait::async_trait;

use hyperion_types::{ExitStatus, LogRecord};

/// Starts and validates slave processes on remote hosts, typically over an
/// SSH session into a terminal multiplexer window.
#[async_trait]
pub trait RemoteLauncher: Send + Sync {
    /// Start the slave process on `host` and tell it to connect back to
    /// `master_host:port`.
    async fn launch_slave(&self, host: &str, master_host: &str, port: u16) -> eyre::Result<()>;

    /// Run the configuration pre-flight on `host` and report its outcome.
    async fn validate(&self, host: &str, config_path: &str) -> eyre::Result<ExitStatus>;
}

/// Receives the structured log records a slave ships to the master.
/// Formatting and rotation live behind this seam.
pub trait LogSink: Send + Sync {
    fn handle(&self, record: LogRecord);
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub RemoteLauncher {}

    #[async_trait]
    impl RemoteLauncher for RemoteLauncher {
        async fn launch_slave(&self, host: &str, master_host: &str, port: u16) -> eyre::Result<()>;
        async fn validate(&self, host: &str, config_path: &str) -> eyre::Result<ExitStatus>;
    }
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub LogSink {}

    impl LogSink for LogSink {
        fn handle(&self, record: LogRecord);
    }
}

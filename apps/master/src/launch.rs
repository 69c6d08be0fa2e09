//! SSH-based slave launcher and the file sinks for shipped slave logs.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use hyperion_server::{LogSink, RemoteLauncher};
use hyperion_types::{ExitStatus, LogRecord};

use crate::config::SlaveConfig;

/// Launches slave processes through `ssh`, inside a detached terminal
/// multiplexer session on the remote.
pub struct SshLauncher {
    ssh_config: PathBuf,
    source_script: Option<String>,
    session: String,
}

impl SshLauncher {
    pub fn new(config: &SlaveConfig, config_name: &str) -> Self {
        Self {
            ssh_config: config.ssh_config.clone(),
            source_script: config.source_script.clone(),
            session: format!("{config_name}-slave"),
        }
    }

    /// Wrap a remote command with the configured environment script.
    fn remote_cmd(&self, cmd: String) -> String {
        match &self.source_script {
            Some(script) => format!("source {script} && {cmd}"),
            None => cmd,
        }
    }

    async fn ssh(&self, host: &str, cmd: &str) -> eyre::Result<std::process::Output> {
        debug!("Running on '{}': {}", host, cmd);

        let output = Command::new("ssh")
            .arg("-F")
            .arg(&self.ssh_config)
            .arg(host)
            .arg(cmd)
            .output()
            .await?;

        Ok(output)
    }
}

#[async_trait]
impl RemoteLauncher for SshLauncher {
    async fn launch_slave(&self, host: &str, master_host: &str, port: u16) -> eyre::Result<()> {
        let cmd = self.remote_cmd(format!("hyperion slave -H {master_host} -p {port}"));
        let tmux = format!("tmux new -d -s \"{}\" \"{}\"", self.session, cmd);

        let output = self.ssh(host, &tmux).await?;
        if !output.status.success() {
            eyre::bail!(
                "starting the slave on '{}' failed: {}",
                host,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(())
    }

    async fn validate(&self, host: &str, config_path: &str) -> eyre::Result<ExitStatus> {
        let cmd = self.remote_cmd(format!("hyperion validate --config {config_path}"));

        let output = self.ssh(host, &cmd).await?;
        let status = ExitStatus::from_code(output.status.code());

        if !status.is_fine() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let details = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout)
            } else {
                stderr
            };
            error!("Validation on '{}' reported: {}", host, details.trim_end());
        }

        Ok(status)
    }
}

/// Appends shipped slave records to `<log_dir>/remote/slave/<name>@<host>.log`.
pub struct FileLogSink {
    file: Mutex<fs::File>,
}

impl FileLogSink {
    /// Open the sink's log file, rotating the previous run's file once.
    pub fn create(log_dir: &Path, config_name: &str, host: &str) -> eyre::Result<Self> {
        let dir = log_dir.join("remote").join("slave");
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{config_name}@{host}.log"));
        if path.exists() {
            fs::rename(&path, path.with_extension("log.1"))?;
        }

        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn handle(&self, record: LogRecord) {
        let mut file = self.file.lock().expect("log file lock");

        writeln!(
            file,
            "{:.3}: {} [{}]:\t{}",
            record.created, record.name, record.level, record.message
        )
        .ok();
    }
}

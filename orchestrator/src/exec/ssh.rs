//! Executor running commands on a remote host over ssh

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::exec::{with_timeout, ExecOptions, ExecOutput, RemoteExecutor};
use crate::utils::shell_quote;

/// ssh connection parameters
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
}

impl SshTarget {
    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Runs each command as one non-interactive `ssh` invocation.
///
/// A control master keeps one multiplexed connection open between
/// `connect` and `disconnect`.
pub struct SshExecutor {
    target: SshTarget,
    control_path: PathBuf,
    channel: Mutex<()>,
}

impl SshExecutor {
    pub fn new(target: SshTarget) -> Self {
        let control_path =
            std::env::temp_dir().join(format!("fleetdeploy-ssh-{}", crate::utils::generate_uuid()));
        Self {
            target,
            control_path,
            channel: Mutex::new(()),
        }
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()));
        if let Some(port) = self.target.port {
            command.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.target.identity_file {
            command.arg("-i").arg(identity);
        }
        command.kill_on_drop(true);
        command
    }

    async fn run(&self, mut command: Command, stdin: Option<&str>) -> Result<ExecOutput, DeployError> {
        command
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn target(&self) -> String {
        self.target.destination()
    }

    async fn connect(&self) -> Result<(), DeployError> {
        let _channel = self.channel.lock().await;
        info!("Connecting to {}", self.target.destination());

        let mut command = self.base_command();
        command
            .args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes", "-N", "-f"])
            .arg(self.target.destination());

        let output = with_timeout(
            std::time::Duration::from_secs(30),
            self.run(command, None),
        )
        .await?;
        if !output.success() {
            return Err(DeployError::RemoteCommandFailed {
                command: "ssh connect".to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        let _channel = self.channel.lock().await;
        debug!("Disconnecting from {}", self.target.destination());

        let mut command = self.base_command();
        command
            .args(["-O", "exit"])
            .arg(self.target.destination());
        // Closing an already closed master is not an error
        let _ = with_timeout(std::time::Duration::from_secs(10), self.run(command, None)).await;
        Ok(())
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecOutput, DeployError> {
        let _channel = self.channel.lock().await;
        debug!("{}$ {}", self.target.destination(), command);

        let mut ssh = self.base_command();
        ssh.arg(self.target.destination()).arg("--").arg(command);
        with_timeout(opts.timeout, self.run(ssh, None)).await
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), DeployError> {
        let _channel = self.channel.lock().await;
        debug!("{} write {}", self.target.destination(), path);

        let quoted = shell_quote(path);
        let remote = format!(
            "mkdir -p \"$(dirname {path})\" && cat > {path}.tmp && mv {path}.tmp {path}",
            path = quoted
        );
        let mut ssh = self.base_command();
        ssh.arg(self.target.destination()).arg("--").arg(&remote);

        let output = with_timeout(
            std::time::Duration::from_secs(60),
            self.run(ssh, Some(content)),
        )
        .await?;
        if !output.success() {
            return Err(DeployError::RemoteCommandFailed {
                command: format!("write {}", path),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

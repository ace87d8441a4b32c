//! Executor running commands on the orchestrator's own host

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::DeployError;
use crate::exec::{with_timeout, ExecOptions, ExecOutput, RemoteExecutor};

/// Runs commands through `sh -c` on the local host
#[derive(Debug, Default)]
pub struct LocalExecutor {
    channel: Mutex<()>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    fn target(&self) -> String {
        "localhost".to_string()
    }

    async fn connect(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecOutput, DeployError> {
        let _channel = self.channel.lock().await;
        debug!("local$ {}", command);

        with_timeout(opts.timeout, async {
            let output = Command::new("sh")
                .args(["-c", command])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;

            Ok::<_, DeployError>(ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
        .await
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), DeployError> {
        let _channel = self.channel.lock().await;
        debug!("local write {}", path);
        crate::filesys::file::File::new(path)
            .write_atomic(content.as_bytes())
            .await
    }
}

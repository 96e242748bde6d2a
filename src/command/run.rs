//! Short-lived helper containers.
//!
//! Volume contents are only reachable through the daemon, so reads and
//! writes inside volumes run a disposable container with the volume
//! mounted and a small shell script as its command. The helper image
//! ships `sh`, `tar` and `find`; `zstd` is installed on demand.

use crate::command::{CommandExecutor, CommandOutput, DockerCommand};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A volume mount for a helper container
#[derive(Debug, Clone)]
pub struct HelperMount {
    /// Volume name
    pub volume: String,
    /// Mount path inside the container
    pub target: String,
    /// Mount read-only
    pub read_only: bool,
}

impl HelperMount {
    fn to_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.volume, self.target)
        } else {
            format!("{}:{}", self.volume, self.target)
        }
    }
}

/// Docker run command for helper containers
#[derive(Debug, Clone)]
pub struct RunCommand {
    image: String,
    mounts: Vec<HelperMount>,
    interactive: bool,
    script: Option<String>,
    /// Command executor
    pub executor: CommandExecutor,
}

impl RunCommand {
    /// Create a new helper run command
    #[must_use]
    pub fn new(image: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            image: image.into(),
            mounts: Vec::new(),
            interactive: false,
            script: None,
            executor,
        }
    }

    /// Mount a volume read-write
    #[must_use]
    pub fn mount(mut self, volume: impl Into<String>, target: impl Into<String>) -> Self {
        self.mounts.push(HelperMount {
            volume: volume.into(),
            target: target.into(),
            read_only: false,
        });
        self
    }

    /// Mount a volume read-only
    #[must_use]
    pub fn mount_ro(mut self, volume: impl Into<String>, target: impl Into<String>) -> Self {
        self.mounts.push(HelperMount {
            volume: volume.into(),
            target: target.into(),
            read_only: true,
        });
        self
    }

    /// Keep stdin open (`-i`), required when piping data into the helper
    #[must_use]
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Run the given script via `sh -c`
    #[must_use]
    pub fn script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Stream the helper's stdout into a writer until it exits.
    ///
    /// # Errors
    ///
    /// `External` when the helper exits non-zero, `Canceled` on token fire.
    pub async fn stream_stdout_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let args = self.build_command_args();
        crate::stream::stream_stdout(&self.executor, &args, writer).await
    }

    /// Stream a reader into the helper's stdin and wait for it to exit.
    ///
    /// # Errors
    ///
    /// `External` when the helper exits non-zero, `Canceled` on token fire.
    pub async fn stream_stdin_from<R>(&self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        if !self.interactive {
            return Err(Error::invalid_input(
                "docker.run",
                "stdin streaming requires interactive()",
            ));
        }
        let args = self.build_command_args();
        crate::stream::stream_stdin(&self.executor, &args, reader).await
    }
}

#[async_trait]
impl DockerCommand for RunCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if self.interactive {
            args.push("--interactive".to_string());
        }
        for mount in &self.mounts {
            args.push("--volume".to_string());
            args.push(mount.to_arg());
        }
        args.push(self.image.clone());
        if let Some(ref script) = self.script {
            args.push("sh".to_string());
            args.push("-c".to_string());
            args.push(script.clone());
        }
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        self.execute_command().await
    }
}

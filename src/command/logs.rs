//! Docker logs command.

use crate::command::{CommandExecutor, CommandOutput, DockerCommand};
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncWrite;

/// Docker logs command builder
#[derive(Debug, Clone)]
pub struct LogsCommand {
    container: String,
    follow: bool,
    tail: Option<String>,
    since: Option<String>,
    timestamps: bool,
    /// Command executor
    pub executor: CommandExecutor,
}

impl LogsCommand {
    /// Create a new logs command
    #[must_use]
    pub fn new(container: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            container: container.into(),
            follow: false,
            tail: None,
            since: None,
            timestamps: false,
            executor,
        }
    }

    /// Follow log output
    #[must_use]
    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }

    /// Number of lines to show from the end of the logs
    #[must_use]
    pub fn tail(mut self, lines: impl Into<String>) -> Self {
        self.tail = Some(lines.into());
        self
    }

    /// Show logs since a timestamp (RFC3339 or relative like `42m`)
    #[must_use]
    pub fn since(mut self, timestamp: impl Into<String>) -> Self {
        self.since = Some(timestamp.into());
        self
    }

    /// Prefix lines with timestamps
    #[must_use]
    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    /// Stream log output into the given writer until EOF or cancellation.
    ///
    /// Used with [`follow`](Self::follow) for live views; the child is
    /// killed when the executor's cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be spawned or the copy fails.
    pub async fn stream_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let args = self.build_command_args();
        crate::stream::stream_stdout(&self.executor, &args, writer).await
    }
}

#[async_trait]
impl DockerCommand for LogsCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["logs".to_string()];
        if self.follow {
            args.push("--follow".to_string());
        }
        if let Some(ref tail) = self.tail {
            args.push("--tail".to_string());
            args.push(tail.clone());
        }
        if let Some(ref since) = self.since {
            args.push("--since".to_string());
            args.push(since.clone());
        }
        if self.timestamps {
            args.push("--timestamps".to_string());
        }
        args.push(self.container.clone());
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        self.execute_command().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_args() {
        let cmd = LogsCommand::new("web-1", CommandExecutor::new())
            .follow()
            .tail("100")
            .since("10m");
        assert_eq!(
            cmd.build_command_args(),
            vec!["logs", "--follow", "--tail", "100", "--since", "10m", "web-1"]
        );
    }

    #[test]
    fn test_logs_args_minimal() {
        let cmd = LogsCommand::new("web-1", CommandExecutor::new());
        assert_eq!(cmd.build_command_args(), vec!["logs", "web-1"]);
    }
}

use crate::entry::{IptEntry, Operation};
use crate::error::{IptmError, Result};
use npm_core::IptablesSettings;
use std::future::Future;
use tokio::process::Command;

/// Raw result of running an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
}

/// Process boundary: the only thing that actually spawns the filtering tool.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = std::io::Result<CommandOutput>> + Send;
}

/// Runs commands on the host.
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output().await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            code: output.status.code(),
            output: combined,
        })
    }
}

/// Exit status classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The rule or chain named by the command does not exist.
    NotFound,
    Failed { code: Option<i32> },
}

impl Outcome {
    pub fn classify(code: Option<i32>, not_found_code: i32) -> Self {
        match code {
            Some(0) => Outcome::Success,
            Some(code) if code == not_found_code => Outcome::NotFound,
            code => Outcome::Failed { code },
        }
    }
}

/// One finished invocation.
#[derive(Debug, Clone)]
pub struct Execution {
    pub command_line: String,
    pub code: Option<i32>,
    pub output: String,
    pub outcome: Outcome,
}

impl Execution {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn into_error(self) -> IptmError {
        IptmError::Command {
            command: self.command_line,
            code: self.code,
            output: self.output.trim_end().to_string(),
        }
    }

    /// Captured output on success, any other outcome as an error.
    pub fn into_result(self) -> Result<String> {
        match self.outcome {
            Outcome::Success => Ok(self.output),
            _ => Err(self.into_error()),
        }
    }
}

pub struct Executor<R> {
    runner: R,
    settings: IptablesSettings,
}

impl<R: CommandRunner> Executor<R> {
    pub fn new(runner: R, settings: IptablesSettings) -> Self {
        Self { runner, settings }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn settings(&self) -> &IptablesSettings {
        &self.settings
    }

    /// Run `op` against `entry`. Checks log at debug: they run constantly and
    /// fail as a matter of course.
    pub async fn execute(&self, op: Operation, entry: &IptEntry) -> Result<Execution> {
        let program = entry
            .command
            .clone()
            .unwrap_or_else(|| self.settings.tool.clone());
        let args = entry.args(op, self.settings.lock_wait_seconds);

        if op.is_check() {
            tracing::debug!(command = %program, args = ?args, "Checking iptables entry");
        } else {
            tracing::info!(command = %program, args = ?args, "Executing iptables command");
        }

        self.spawn(program, args).await
    }

    /// Numbered listing of `chain` in the configured table.
    pub async fn list_numbered(&self, chain: &str) -> Result<Execution> {
        let args = vec![
            "-t".to_string(),
            self.settings.table.clone(),
            "-n".to_string(),
            "--list".to_string(),
            chain.to_string(),
            "--line-numbers".to_string(),
        ];

        tracing::debug!(chain, "Listing iptables chain");
        self.spawn(self.settings.tool.clone(), args).await
    }

    async fn spawn(&self, program: String, args: Vec<String>) -> Result<Execution> {
        let raw = self
            .runner
            .run(&program, &args)
            .await
            .map_err(|source| IptmError::Spawn {
                program: program.clone(),
                source,
            })?;

        let outcome = Outcome::classify(raw.code, self.settings.not_found_exit_code);
        let command_line = std::iter::once(program)
            .chain(args)
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Execution {
            command_line,
            code: raw.code,
            output: raw.output,
            outcome,
        })
    }
}

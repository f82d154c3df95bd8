use crate::entry::{IptEntry, Operation};
use crate::error::Result;
use crate::executor::{CommandRunner, Execution, Executor, Outcome};
use npm_core::{IptmConfig, is_drops_chain};
use npm_metrics::{IptmMetrics, Timer};
use std::sync::Arc;

/// Subsystem identifier used for error metrics.
pub const IPTM_ID: &str = "iptm";

pub(crate) const CHAIN_EXISTS_MSG: &str = "Chain already exists";

/// Owns the managed chains in the kernel filter table.
///
/// Holds no per-call state, so one instance can be shared across tasks.
pub struct IptablesManager<R> {
    pub(crate) executor: Executor<R>,
    pub(crate) forward_chain: String,
    pub(crate) peer_chain: String,
    pub(crate) metrics: Arc<IptmMetrics>,
}

impl<R: CommandRunner> IptablesManager<R> {
    pub fn new(runner: R, config: &IptmConfig, metrics: Arc<IptmMetrics>) -> Self {
        Self {
            executor: Executor::new(runner, config.iptables.clone()),
            forward_chain: config.forward_chain.clone(),
            peer_chain: config.peer_chain.clone(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &IptmMetrics {
        &self.metrics
    }

    pub fn runner(&self) -> &R {
        self.executor.runner()
    }

    pub(crate) fn report(&self, msg: impl std::fmt::Display) {
        self.metrics.send_error_log_and_metric(IPTM_ID, msg);
    }

    /// Execute and report hard failures of mutating commands.
    pub(crate) async fn run(&self, op: Operation, entry: &IptEntry) -> Result<Execution> {
        let done = self.executor.execute(op, entry).await?;

        if let Outcome::Failed { code } = done.outcome {
            let benign_create =
                op == Operation::NewChain && done.output.contains(CHAIN_EXISTS_MSG);
            if !op.is_check() && !benign_create {
                self.report(format!(
                    "Error: There was an error running command: [{}] Stderr: [{:?}, {}]",
                    done.command_line,
                    code,
                    done.output.trim_end()
                ));
            }
        }

        Ok(done)
    }

    /// Whether `entry` is present. A missing rule or chain is `Ok(false)`;
    /// any other failure is an error and says nothing about presence.
    pub async fn exists(&self, entry: &IptEntry) -> Result<bool> {
        let done = self.run(Operation::Check, entry).await?;
        match done.outcome {
            Outcome::Success => Ok(true),
            Outcome::NotFound => Ok(false),
            Outcome::Failed { .. } => Err(done.into_error()),
        }
    }

    /// Install `entry`. Drops chains end in a pass-through RETURN, so their rules
    /// are appended beneath it; everywhere else the newest rule goes first.
    pub async fn add(&self, entry: &IptEntry) -> Result<()> {
        let timer = Timer::start();

        tracing::info!(chain = %entry.chain, specs = ?entry.specs, "Adding iptables entry");

        let op = if is_drops_chain(&entry.chain) {
            Operation::Append
        } else {
            Operation::Insert
        };

        let done = self.run(op, entry).await?;
        if !done.is_success() {
            self.report("Error: failed to create iptables rules.");
            return Err(done.into_error());
        }

        self.metrics.inc_rule_count();
        self.metrics.record_add_rule_latency(timer);

        Ok(())
    }

    /// Remove `entry` if present; absent rules are a no-op.
    pub async fn delete(&self, entry: &IptEntry) -> Result<()> {
        tracing::info!(chain = %entry.chain, specs = ?entry.specs, "Deleting iptables entry");

        if !self.exists(entry).await? {
            return Ok(());
        }

        let done = self.run(Operation::Delete, entry).await?;
        if !done.is_success() {
            self.report("Error: failed to delete iptables rules.");
            return Err(done.into_error());
        }

        self.metrics.dec_rule_count();

        Ok(())
    }
}

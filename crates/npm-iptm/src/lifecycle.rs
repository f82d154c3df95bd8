use crate::entry::{IptEntry, Operation};
use crate::error::{IptmError, Result};
use crate::executor::{CommandRunner, Outcome};
use crate::manager::IptablesManager;
use npm_core::{
    AZURE_CHAIN, AZURE_CHAINS, ChainStatus, ForwardLinkStatus, IptmStatus, default_rules,
    teardown_chains,
};

impl<R: CommandRunner> IptablesManager<R> {
    /// Create the managed chains, hook the entry chain into the forward chain
    /// and install the default rules. Safe to call again after a partial run.
    pub async fn init(&self) -> Result<()> {
        tracing::info!("Initializing {} chains.", AZURE_CHAIN);

        self.create_all_chains().await?;

        // A missing hook leaves the rest of the setup useful; the periodic
        // reconciler will retry it.
        if let Err(e) = self.reconcile_forward_link().await {
            self.report(format!(
                "Error: failed to add {} chain to {} chain. {}",
                AZURE_CHAIN, self.forward_chain, e
            ));
        }

        self.add_default_rules().await
    }

    /// Append each default rule that is not already present.
    pub async fn add_default_rules(&self) -> Result<()> {
        for rule in default_rules() {
            let entry = IptEntry::new(rule.chain).with_specs(rule.specs.iter().cloned());

            if self.exists(&entry).await? {
                continue;
            }

            let done = self.run(Operation::Append, &entry).await?;
            if !done.is_success() {
                self.report(format!(
                    "Error: failed to add {} to parent chain {}",
                    rule.label(),
                    rule.chain
                ));
                return Err(IptmError::DefaultRule {
                    chain: rule.chain.to_string(),
                    label: rule.label().to_string(),
                    source: Box::new(done.into_error()),
                });
            }
        }

        Ok(())
    }

    /// Unhook, flush and delete every managed chain, including names left by
    /// older releases. Flush failures are reported and that chain is left in
    /// place; a delete failure after a clean flush stops teardown.
    pub async fn uninit(&self) -> Result<()> {
        let jump = IptEntry::jump(&self.forward_chain, AZURE_CHAIN);
        let done = self.run(Operation::Delete, &jump).await?;
        if let Outcome::Failed { .. } = done.outcome {
            self.report(format!(
                "Error: failed to remove {} jump from {} chain.",
                AZURE_CHAIN, self.forward_chain
            ));
            return Err(done.into_error());
        }

        let mut flushed = Vec::new();
        for chain in teardown_chains() {
            match self.flush_chain(chain).await {
                Ok(Outcome::Success | Outcome::NotFound) => flushed.push(chain),
                Ok(Outcome::Failed { .. }) => {
                    self.report(format!("Error: failed to flush iptables chain {}.", chain));
                }
                Err(e) => {
                    self.report(format!(
                        "Error: failed to flush iptables chain {}. {}",
                        chain, e
                    ));
                }
            }
        }

        for chain in flushed {
            self.destroy_chain(chain).await?;
        }

        Ok(())
    }

    /// Snapshot of chain presence and forward-chain ordering.
    pub async fn status(&self) -> Result<IptmStatus> {
        let mut chains = Vec::with_capacity(AZURE_CHAINS.len());
        for chain in AZURE_CHAINS {
            chains.push(ChainStatus {
                name: chain.to_string(),
                present: self.chain_exists(chain).await?,
            });
        }

        let forward = ForwardLinkStatus {
            forward_chain: self.forward_chain.clone(),
            peer_chain: self.peer_chain.clone(),
            peer_line: self
                .chain_line_number(&self.peer_chain, &self.forward_chain)
                .await?,
            entry_line: self
                .chain_line_number(AZURE_CHAIN, &self.forward_chain)
                .await?,
        };

        Ok(IptmStatus { chains, forward })
    }
}

use crate::entry::{IptEntry, Operation};
use crate::error::Result;
use crate::executor::{CommandRunner, Outcome};
use crate::manager::{CHAIN_EXISTS_MSG, IptablesManager};
use npm_core::AZURE_CHAINS;

const CHAIN_REFERENCED_MSG: &str = "Too many links";

impl<R: CommandRunner> IptablesManager<R> {
    /// Create `chain`; an existing chain is success.
    pub async fn create_chain(&self, chain: &str) -> Result<()> {
        let done = self.run(Operation::NewChain, &IptEntry::new(chain)).await?;

        match done.outcome {
            Outcome::Success => Ok(()),
            Outcome::NotFound => {
                tracing::info!(chain, "Chain already exists");
                Ok(())
            }
            Outcome::Failed { .. } if done.output.contains(CHAIN_EXISTS_MSG) => {
                tracing::info!(chain, "Chain already exists");
                Ok(())
            }
            Outcome::Failed { .. } => {
                self.report(format!("Error: failed to create iptables chain {}.", chain));
                Err(done.into_error())
            }
        }
    }

    /// Delete `chain`; a missing chain is success. The chain must already be empty.
    pub async fn destroy_chain(&self, chain: &str) -> Result<()> {
        let done = self.run(Operation::DeleteChain, &IptEntry::new(chain)).await?;

        match done.outcome {
            Outcome::Success => Ok(()),
            // iptables shares exit 1 between a missing chain and one still jumped to
            Outcome::NotFound if done.output.contains(CHAIN_REFERENCED_MSG) => {
                tracing::warn!(chain, "Chain still referenced; left in place");
                Ok(())
            }
            Outcome::NotFound => {
                tracing::info!(chain, "Chain doesn't exist");
                Ok(())
            }
            Outcome::Failed { .. } => {
                self.report(format!("Error: failed to delete iptables chain {}.", chain));
                Err(done.into_error())
            }
        }
    }

    /// Flush every rule from `chain`, leaving the verdict to the caller.
    pub async fn flush_chain(&self, chain: &str) -> Result<Outcome> {
        let done = self.run(Operation::FlushChain, &IptEntry::new(chain)).await?;
        Ok(done.outcome)
    }

    /// Read-only probe; lists the chain instead of trying to create it.
    pub async fn chain_exists(&self, chain: &str) -> Result<bool> {
        let done = self.executor.list_numbered(chain).await?;
        match done.outcome {
            Outcome::Success => Ok(true),
            Outcome::NotFound => Ok(false),
            Outcome::Failed { .. } => Err(done.into_error()),
        }
    }

    /// Create every managed chain, stopping at the first failure. Chains
    /// already created stay in place.
    pub async fn create_all_chains(&self) -> Result<()> {
        for chain in AZURE_CHAINS {
            self.create_chain(chain).await?;
        }
        Ok(())
    }
}

use crate::entry::{IptEntry, Operation};
use crate::error::Result;
use crate::executor::{CommandRunner, Outcome};
use crate::manager::IptablesManager;
use npm_core::AZURE_CHAIN;
use regex::Regex;
use std::num::NonZeroU32;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

// "<num> <target> <prot> <opt> <source> <destination> [extra]"
static LISTING_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+(\S+)").expect("listing row pattern"));

const MIN_RECONCILE_PERIOD: Duration = Duration::from_secs(1);

/// What a forward-link reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Inserted { position: u32 },
    AlreadyOrdered,
    Repaired { from: u32, to: u32 },
}

/// Line number of the first row in a `--line-numbers` listing whose target is
/// `chain`, or 0 when there is none.
pub fn parse_line_number(listing: &str, chain: &str) -> u32 {
    listing
        .lines()
        .filter_map(|line| LISTING_ROW.captures(line))
        .find(|caps| &caps[2] == chain)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

impl<R: CommandRunner> IptablesManager<R> {
    /// Line of the jump to `chain` inside `parent`; 0 when either is absent.
    pub async fn chain_line_number(&self, chain: &str, parent: &str) -> Result<u32> {
        let done = self.executor.list_numbered(parent).await?;
        match done.outcome {
            Outcome::Success => Ok(parse_line_number(&done.output, chain)),
            Outcome::NotFound => Ok(0),
            Outcome::Failed { .. } => Err(done.into_error()),
        }
    }

    /// Make sure the forward chain jumps to the entry chain directly after the
    /// peer chain's jump, repairing the order when something moved it above.
    pub async fn reconcile_forward_link(&self) -> Result<ReconcileAction> {
        if !self.chain_exists(AZURE_CHAIN).await? {
            self.create_chain(AZURE_CHAIN).await?;
        }

        let jump = IptEntry::jump(&self.forward_chain, AZURE_CHAIN);

        let peer_line = self.line_or_report(&self.peer_chain).await?;
        let mut index = NonZeroU32::MIN.saturating_add(peer_line);

        if !self.exists(&jump).await? {
            self.insert_jump(&jump, index).await?;
            return Ok(ReconcileAction::Inserted {
                position: index.get(),
            });
        }

        let entry_line = self.line_or_report(AZURE_CHAIN).await?;

        if peer_line < entry_line || peer_line == 0 {
            return Ok(ReconcileAction::AlreadyOrdered);
        }

        tracing::warn!(
            peer_line,
            entry_line,
            "Reconciler deleting and re-adding {} in {} table",
            AZURE_CHAIN,
            self.forward_chain
        );

        let done = self.run(Operation::Delete, &jump).await?;
        if !done.is_success() {
            self.report(format!(
                "Error: failed to delete {} chain from {} chain with error code {:?}.",
                AZURE_CHAIN, self.forward_chain, done.code
            ));
            return Err(done.into_error());
        }

        // The removed jump sat above the peer, so everything below shifted up
        // by exactly one row.
        if index.get() > 1 {
            index = NonZeroU32::new(index.get() - 1).unwrap_or(NonZeroU32::MIN);
        }
        self.insert_jump(&jump, index).await?;

        Ok(ReconcileAction::Repaired {
            from: entry_line,
            to: index.get(),
        })
    }

    /// One pass of the periodic reconciler; failures are reported, not returned.
    pub async fn reconcile_tick(&self) -> Option<ReconcileAction> {
        match self.reconcile_forward_link().await {
            Ok(action) => {
                if action != ReconcileAction::AlreadyOrdered {
                    tracing::info!(?action, "Reconciled {} link", self.forward_chain);
                }
                Some(action)
            }
            Err(e) => {
                self.report(format!(
                    "Error: failed to reconcile {} in {} chain: {}",
                    AZURE_CHAIN, self.forward_chain, e
                ));
                None
            }
        }
    }

    /// Reconcile every `period` (at least one second) until the task is
    /// dropped. The first pass waits a full period, as init has just reconciled.
    pub async fn run_reconcile_loop(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period.max(MIN_RECONCILE_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.reconcile_tick().await;
        }
    }

    async fn line_or_report(&self, chain: &str) -> Result<u32> {
        self.chain_line_number(chain, &self.forward_chain)
            .await
            .inspect_err(|e| {
                self.report(format!(
                    "Error: failed to get index of {} in {} chain with error: {}",
                    chain, self.forward_chain, e
                ))
            })
    }

    async fn insert_jump(&self, jump: &IptEntry, position: NonZeroU32) -> Result<()> {
        let done = self
            .run(Operation::Insert, &jump.clone().at_position(position))
            .await?;
        if !done.is_success() {
            self.report(format!(
                "Error: failed to add {} chain to {} chain.",
                AZURE_CHAIN, self.forward_chain
            ));
            return Err(done.into_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::IPTM_ID;
    use crate::manager::tests::manager_with;
    use crate::testing::FakeIptables;

    const PEER: &str = "KUBE-SERVICES";

    #[test]
    fn parses_first_matching_target_row() {
        let listing = "\
Chain FORWARD (policy DROP)
num  target     prot opt source               destination
1    KUBE-FORWARD  all  --  0.0.0.0/0            0.0.0.0/0            /* kubernetes forwarding rules */
2    DOCKER-USER  all  --  0.0.0.0/0            0.0.0.0/0            /* AZURE-NPM hook */
11   KUBE-SERVICES  all  --  0.0.0.0/0            0.0.0.0/0            ctstate NEW
12   AZURE-NPM  all  --  0.0.0.0/0            0.0.0.0/0
13   AZURE-NPM-INGRESS  all  --  0.0.0.0/0            0.0.0.0/0
";
        assert_eq!(parse_line_number(listing, PEER), 11);
        assert_eq!(parse_line_number(listing, AZURE_CHAIN), 12);
        assert_eq!(parse_line_number(listing, "CILIUM-FORWARD"), 0);
        assert_eq!(parse_line_number("", PEER), 0);
    }

    #[tokio::test]
    async fn missing_parent_chain_reads_as_line_zero() {
        let mgr = manager_with(FakeIptables::new());
        assert_eq!(mgr.chain_line_number(PEER, "NO-SUCH").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn inserts_at_head_without_peer() {
        let mgr = manager_with(FakeIptables::new());

        let action = mgr.reconcile_forward_link().await.unwrap();

        assert_eq!(action, ReconcileAction::Inserted { position: 1 });
        assert!(mgr.runner().has_chain(AZURE_CHAIN));
        assert_eq!(mgr.runner().line_of("FORWARD", AZURE_CHAIN), Some(1));
    }

    #[tokio::test]
    async fn inserts_after_peer_then_converges() {
        let fake =
            FakeIptables::with_forward_jumps(&["KUBE-FORWARD", "DOCKER-USER", PEER, "ACCEPT"]);
        let mgr = manager_with(fake.with_chains(&[AZURE_CHAIN]));

        let action = mgr.reconcile_forward_link().await.unwrap();
        assert_eq!(action, ReconcileAction::Inserted { position: 4 });
        assert_eq!(mgr.runner().line_of("FORWARD", PEER), Some(3));
        assert_eq!(mgr.runner().line_of("FORWARD", AZURE_CHAIN), Some(4));

        mgr.runner().clear_calls();
        let again = mgr.reconcile_forward_link().await.unwrap();
        assert_eq!(again, ReconcileAction::AlreadyOrdered);
        assert!(mgr.runner().mutations().is_empty());
    }

    #[tokio::test]
    async fn repairs_entry_above_peer() {
        let fake = FakeIptables::with_forward_jumps(&["KUBE-FORWARD", AZURE_CHAIN, "A", "B", PEER]);
        let mgr = manager_with(fake.with_chains(&[AZURE_CHAIN]));

        let action = mgr.reconcile_forward_link().await.unwrap();

        assert_eq!(action, ReconcileAction::Repaired { from: 2, to: 5 });
        assert_eq!(mgr.runner().line_of("FORWARD", PEER), Some(4));
        assert_eq!(mgr.runner().line_of("FORWARD", AZURE_CHAIN), Some(5));
        assert_eq!(mgr.runner().calls_with_flag("-D").len(), 1);
        assert_eq!(mgr.runner().rules("FORWARD").len(), 5);

        mgr.runner().clear_calls();
        assert_eq!(
            mgr.reconcile_forward_link().await.unwrap(),
            ReconcileAction::AlreadyOrdered
        );
        assert!(mgr.runner().mutations().is_empty());
    }

    #[tokio::test]
    async fn repairs_entry_at_head_directly_above_peer() {
        let fake = FakeIptables::with_forward_jumps(&[AZURE_CHAIN, PEER]);
        let mgr = manager_with(fake.with_chains(&[AZURE_CHAIN]));

        let action = mgr.reconcile_forward_link().await.unwrap();

        assert_eq!(action, ReconcileAction::Repaired { from: 1, to: 2 });
        assert_eq!(mgr.runner().line_of("FORWARD", PEER), Some(1));
        assert_eq!(mgr.runner().line_of("FORWARD", AZURE_CHAIN), Some(2));
    }

    #[tokio::test]
    async fn entry_anywhere_is_fine_without_peer() {
        let fake = FakeIptables::with_forward_jumps(&["DOCKER-USER", AZURE_CHAIN]);
        let mgr = manager_with(fake.with_chains(&[AZURE_CHAIN]));

        assert_eq!(
            mgr.reconcile_forward_link().await.unwrap(),
            ReconcileAction::AlreadyOrdered
        );
        assert!(mgr.runner().mutations().is_empty());
    }

    #[tokio::test]
    async fn honours_injected_peer_chain() {
        let fake = FakeIptables::with_forward_jumps(&["CILIUM-FORWARD", PEER]);
        let metrics = std::sync::Arc::new(npm_metrics::IptmMetrics::new().unwrap());
        let config = npm_core::IptmConfig {
            peer_chain: "CILIUM-FORWARD".into(),
            ..Default::default()
        };
        let mgr = IptablesManager::new(fake, &config, metrics);

        let action = mgr.reconcile_forward_link().await.unwrap();
        assert_eq!(action, ReconcileAction::Inserted { position: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn loop_waits_a_period_then_reconciles_each_tick() {
        let mgr = manager_with(FakeIptables::with_forward_jumps(&[PEER]));

        let ran = tokio::time::timeout(
            Duration::from_secs(250),
            mgr.run_reconcile_loop(Duration::from_secs(100)),
        )
        .await;

        assert!(ran.is_err());
        assert_eq!(mgr.runner().calls_with_flag("-C").len(), 2);
        assert_eq!(mgr.runner().calls_with_flag("-I").len(), 1);
        assert_eq!(mgr.runner().line_of("FORWARD", AZURE_CHAIN), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_loop_runs_at_the_minimum_period() {
        let mgr = manager_with(FakeIptables::new());

        let ran = tokio::time::timeout(
            Duration::from_millis(2500),
            mgr.run_reconcile_loop(Duration::ZERO),
        )
        .await;

        assert!(ran.is_err());
        assert_eq!(mgr.runner().calls_with_flag("-C").len(), 2);
        assert_eq!(mgr.runner().line_of("FORWARD", AZURE_CHAIN), Some(1));
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let mgr = manager_with(FakeIptables::new().with_chains(&[AZURE_CHAIN]));
        mgr.runner()
            .fail("--list", "FORWARD", 4, "iptables: Permission denied.\n");

        assert!(mgr.reconcile_forward_link().await.is_err());
        assert!(mgr.runner().calls_with_flag("-I").is_empty());
        assert_eq!(mgr.metrics().error_count(IPTM_ID), 1);

        assert_eq!(mgr.reconcile_tick().await, None);
        assert_eq!(mgr.metrics().error_count(IPTM_ID), 3);
    }
}

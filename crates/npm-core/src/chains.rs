// Chain names, packet marks and the default rule table shared by the
// iptables manager and the CLI.

pub const AZURE_CHAIN: &str = "AZURE-NPM";
pub const AZURE_ACCEPT_CHAIN: &str = "AZURE-NPM-ACCEPT";
pub const AZURE_INGRESS_CHAIN: &str = "AZURE-NPM-INGRESS";
pub const AZURE_EGRESS_CHAIN: &str = "AZURE-NPM-EGRESS";
pub const AZURE_INGRESS_PORT_CHAIN: &str = "AZURE-NPM-INGRESS-PORT";
pub const AZURE_INGRESS_FROM_CHAIN: &str = "AZURE-NPM-INGRESS-FROM";
pub const AZURE_EGRESS_PORT_CHAIN: &str = "AZURE-NPM-EGRESS-PORT";
pub const AZURE_EGRESS_TO_CHAIN: &str = "AZURE-NPM-EGRESS-TO";
pub const AZURE_INGRESS_DROPS_CHAIN: &str = "AZURE-NPM-INGRESS-DROPS";
pub const AZURE_EGRESS_DROPS_CHAIN: &str = "AZURE-NPM-EGRESS-DROPS";

/// Only ever torn down, never created.
pub const AZURE_TARGET_SETS_CHAIN: &str = "AZURE-NPM-TARGET-SETS";
/// Misspelled name shipped by older releases; must stay byte-for-byte.
pub const AZURE_INGRESS_WRONG_DROPS_CHAIN: &str = "AZURE-NPM-INRGESS-DROPS";

/// Every chain owned by the manager, in creation order.
pub const AZURE_CHAINS: [&str; 10] = [
    AZURE_CHAIN,
    AZURE_ACCEPT_CHAIN,
    AZURE_INGRESS_CHAIN,
    AZURE_EGRESS_CHAIN,
    AZURE_INGRESS_PORT_CHAIN,
    AZURE_INGRESS_FROM_CHAIN,
    AZURE_EGRESS_PORT_CHAIN,
    AZURE_EGRESS_TO_CHAIN,
    AZURE_INGRESS_DROPS_CHAIN,
    AZURE_EGRESS_DROPS_CHAIN,
];

pub const LEGACY_CHAINS: [&str; 2] = [AZURE_TARGET_SETS_CHAIN, AZURE_INGRESS_WRONG_DROPS_CHAIN];

pub const INGRESS_ALLOW_MARK: &str = "0x2000";
pub const EGRESS_ALLOW_MARK: &str = "0x1000";
pub const ALLOW_ALL_MARK: &str = "0x3000";
pub const CLEAR_MARK: &str = "0x0";

pub const JUMP_FLAG: &str = "-j";

/// Chains whose trailing rules must be appended below the pass-through RETURN.
pub fn is_drops_chain(chain: &str) -> bool {
    chain == AZURE_INGRESS_DROPS_CHAIN || chain == AZURE_EGRESS_DROPS_CHAIN
}

/// All chains removed during teardown: the live set followed by legacy names.
pub fn teardown_chains() -> Vec<&'static str> {
    AZURE_CHAINS.iter().chain(LEGACY_CHAINS.iter()).copied().collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRule {
    pub chain: &'static str,
    pub specs: Vec<String>,
}

impl DefaultRule {
    fn new(chain: &'static str, specs: &[&str]) -> Self {
        Self {
            chain,
            specs: specs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Human label used in diagnostics: the comment when present, else the jump target.
    pub fn label(&self) -> &str {
        if let Some(idx) = self.specs.iter().position(|s| s == "--comment") {
            if let Some(comment) = self.specs.get(idx + 1) {
                return comment;
            }
        }

        self.jump_target().unwrap_or("<no target>")
    }

    pub fn jump_target(&self) -> Option<&str> {
        self.specs
            .iter()
            .position(|s| s == JUMP_FLAG)
            .and_then(|idx| self.specs.get(idx + 1))
            .map(String::as_str)
    }
}

/// Rules appended at init, in order. Each drops chain opens with the RETURN for
/// its allow mark so that later drop rules land beneath it.
pub fn default_rules() -> Vec<DefaultRule> {
    vec![
        DefaultRule::new(
            AZURE_CHAIN,
            &[
                "-m",
                "conntrack",
                "--ctstate",
                "RELATED,ESTABLISHED",
                "-j",
                "ACCEPT",
                "-m",
                "comment",
                "--comment",
                "ACCEPT-on-connection-state",
            ],
        ),
        DefaultRule::new(AZURE_CHAIN, &["-j", AZURE_INGRESS_CHAIN]),
        DefaultRule::new(AZURE_CHAIN, &["-j", AZURE_EGRESS_CHAIN]),
        DefaultRule::new(
            AZURE_CHAIN,
            &[
                "-m",
                "mark",
                "--mark",
                ALLOW_ALL_MARK,
                "-j",
                AZURE_ACCEPT_CHAIN,
                "-m",
                "comment",
                "--comment",
                "ACCEPT-on-INGRESS-and-EGRESS-mark-0x3000",
            ],
        ),
        DefaultRule::new(
            AZURE_CHAIN,
            &[
                "-m",
                "mark",
                "--mark",
                INGRESS_ALLOW_MARK,
                "-j",
                AZURE_ACCEPT_CHAIN,
                "-m",
                "comment",
                "--comment",
                "ACCEPT-on-INGRESS-mark-0x2000",
            ],
        ),
        DefaultRule::new(
            AZURE_CHAIN,
            &[
                "-m",
                "mark",
                "--mark",
                EGRESS_ALLOW_MARK,
                "-j",
                AZURE_ACCEPT_CHAIN,
                "-m",
                "comment",
                "--comment",
                "ACCEPT-on-EGRESS-mark-0x1000",
            ],
        ),
        DefaultRule::new(
            AZURE_ACCEPT_CHAIN,
            &[
                "-j",
                "MARK",
                "--set-mark",
                CLEAR_MARK,
                "-m",
                "comment",
                "--comment",
                "Clear-AZURE-NPM-MARKS",
            ],
        ),
        DefaultRule::new(
            AZURE_ACCEPT_CHAIN,
            &["-j", "ACCEPT", "-m", "comment", "--comment", "ACCEPT-All-packets"],
        ),
        DefaultRule::new(AZURE_INGRESS_CHAIN, &["-j", AZURE_INGRESS_PORT_CHAIN]),
        DefaultRule::new(AZURE_INGRESS_PORT_CHAIN, &["-j", AZURE_INGRESS_FROM_CHAIN]),
        DefaultRule::new(AZURE_INGRESS_CHAIN, &["-j", AZURE_INGRESS_DROPS_CHAIN]),
        DefaultRule::new(
            AZURE_INGRESS_DROPS_CHAIN,
            &[
                "-m",
                "mark",
                "--mark",
                INGRESS_ALLOW_MARK,
                "-j",
                "RETURN",
                "-m",
                "comment",
                "--comment",
                "RETURN-on-INGRESS-mark-0x2000",
            ],
        ),
        DefaultRule::new(AZURE_EGRESS_CHAIN, &["-j", AZURE_EGRESS_PORT_CHAIN]),
        DefaultRule::new(AZURE_EGRESS_PORT_CHAIN, &["-j", AZURE_EGRESS_TO_CHAIN]),
        DefaultRule::new(AZURE_EGRESS_CHAIN, &["-j", AZURE_EGRESS_DROPS_CHAIN]),
        DefaultRule::new(
            AZURE_EGRESS_DROPS_CHAIN,
            &[
                "-m",
                "mark",
                "--mark",
                EGRESS_ALLOW_MARK,
                "-j",
                "RETURN",
                "-m",
                "comment",
                "--comment",
                "RETURN-on-EGRESS-mark-0x1000",
            ],
        ),
        DefaultRule::new(
            AZURE_EGRESS_DROPS_CHAIN,
            &[
                "-m",
                "mark",
                "--mark",
                ALLOW_ALL_MARK,
                "-j",
                "RETURN",
                "-m",
                "comment",
                "--comment",
                "RETURN-on-EGRESS-and-INGRESS-mark-0x3000",
            ],
        ),
    ]
}

use serde::{Deserialize, Serialize};

/// Point-in-time view of the managed chains, read back from the kernel table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IptmStatus {
    pub chains: Vec<ChainStatus>,
    pub forward: ForwardLinkStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardLinkStatus {
    pub forward_chain: String,
    pub peer_chain: String,
    /// 0 when the peer jump is absent.
    pub peer_line: u32,
    /// 0 when the entry jump is absent.
    pub entry_line: u32,
}

impl ForwardLinkStatus {
    /// The entry jump exists and nothing it depends on sits below it.
    pub fn is_ordered(&self) -> bool {
        self.entry_line > 0 && self.peer_line < self.entry_line
    }
}

impl IptmStatus {
    pub fn missing_chains(&self) -> Vec<&str> {
        self.chains
            .iter()
            .filter(|c| !c.present)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn display(&self) {
        println!("Chains ({}):", self.chains.len());
        for chain in &self.chains {
            let mark = if chain.present { "present" } else { "missing" };
            println!("  • {} [{}]", chain.name, mark);
        }

        let fwd = &self.forward;
        println!("\n{} traversal:", fwd.forward_chain);
        println!("  {} jump at line {}", fwd.peer_chain, fwd.peer_line);
        println!("  entry jump at line {}", fwd.entry_line);
        println!(
            "  ordering: {}",
            if fwd.is_ordered() { "ok" } else { "NEEDS RECONCILE" }
        );
    }
}

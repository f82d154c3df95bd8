// In-memory stand-in for the iptables binary, honouring its exit code contract.
use crate::executor::{CommandOutput, CommandRunner};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

const NO_SUCH: &str = "iptables: No chain/target/match by that name.\n";
const BAD_RULE: &str = "iptables: Bad rule (does a matching rule exist in that chain?).\n";
const CHAIN_EXISTS: &str = "iptables: Chain already exists.\n";
const TOO_MANY_LINKS: &str = "iptables: Too many links.\n";

#[derive(Default)]
struct FakeState {
    chains: BTreeMap<String, Vec<Vec<String>>>,
    calls: Vec<(String, Vec<String>)>,
    failures: HashMap<(String, String), (i32, String)>,
}

pub(crate) struct FakeIptables {
    state: Mutex<FakeState>,
}

impl FakeIptables {
    /// Empty filter table with only the built-in FORWARD chain.
    pub fn new() -> Self {
        let mut state = FakeState::default();
        state.chains.insert("FORWARD".to_string(), Vec::new());
        Self {
            state: Mutex::new(state),
        }
    }

    /// FORWARD pre-populated with one jump per target, in order.
    pub fn with_forward_jumps(targets: &[&str]) -> Self {
        let fake = Self::new();
        {
            let mut state = fake.state.lock().unwrap();
            let forward = state.chains.get_mut("FORWARD").unwrap();
            for target in targets {
                forward.push(vec!["-j".to_string(), target.to_string()]);
            }
        }
        fake
    }

    /// Adds empty user chains.
    pub fn with_chains(self, chains: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for chain in chains {
                state.chains.insert(chain.to_string(), Vec::new());
            }
        }
        self
    }

    /// Make every `flag` invocation on `chain` exit with `code`. Listings use `--list`.
    pub fn fail(&self, flag: &str, chain: &str, code: i32, output: &str) {
        self.state.lock().unwrap().failures.insert(
            (flag.to_string(), chain.to_string()),
            (code, output.to_string()),
        );
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Argument vectors of every recorded invocation using `flag`.
    pub fn calls_with_flag(&self, flag: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .map(|(_, args)| args)
            .filter(|args| args.get(2).map(String::as_str) == Some(flag))
            .collect()
    }

    /// Invocations that change the table.
    pub fn mutations(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .map(|(_, args)| args)
            .filter(|args| {
                matches!(
                    args.get(2).map(String::as_str),
                    Some("-A" | "-I" | "-D" | "-N" | "-X" | "-F")
                )
            })
            .collect()
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.state.lock().unwrap().chains.contains_key(chain)
    }

    pub fn rules(&self, chain: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .chains
            .get(chain)
            .cloned()
            .unwrap_or_default()
    }

    /// 1-based line of the first `-j target` rule in `chain`.
    pub fn line_of(&self, chain: &str, target: &str) -> Option<usize> {
        self.rules(chain)
            .iter()
            .position(|rule| jump_target(rule) == Some(target))
            .map(|idx| idx + 1)
    }

    fn apply(&self, program: &str, args: &[String]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        state.calls.push((program.to_string(), args.to_vec()));

        if args.first().map(String::as_str) == Some("-t") {
            let chain = args.get(4).cloned().unwrap_or_default();
            if let Some((code, output)) = state.failures.get(&("--list".to_string(), chain.clone()))
            {
                return out(Some(*code), output);
            }
            return match state.chains.get(&chain) {
                Some(rules) => out(Some(0), &render_listing(&chain, rules)),
                None => out(Some(1), NO_SUCH),
            };
        }

        let flag = args[2].clone();
        let chain = args[3].clone();
        let rest: Vec<String> = args[4..].to_vec();

        if let Some((code, output)) = state.failures.get(&(flag.clone(), chain.clone())) {
            return out(Some(*code), output);
        }

        match flag.as_str() {
            "-N" => {
                if state.chains.contains_key(&chain) {
                    return out(Some(1), CHAIN_EXISTS);
                }
                state.chains.insert(chain, Vec::new());
                out(Some(0), "")
            }
            "-X" => {
                let referenced = state.chains.iter().any(|(name, rules)| {
                    *name != chain && rules.iter().any(|r| jump_target(r) == Some(chain.as_str()))
                });
                if referenced {
                    return out(Some(1), TOO_MANY_LINKS);
                }
                match state.chains.remove(&chain) {
                    Some(_) => out(Some(0), ""),
                    None => out(Some(1), NO_SUCH),
                }
            }
            "-F" => match state.chains.get_mut(&chain) {
                Some(rules) => {
                    rules.clear();
                    out(Some(0), "")
                }
                None => out(Some(1), NO_SUCH),
            },
            "-C" => match state.chains.get(&chain) {
                Some(rules) if rules.contains(&rest) => out(Some(0), ""),
                Some(_) => out(Some(1), BAD_RULE),
                None => out(Some(1), NO_SUCH),
            },
            "-A" => match state.chains.get_mut(&chain) {
                Some(rules) => {
                    rules.push(rest);
                    out(Some(0), "")
                }
                None => out(Some(1), NO_SUCH),
            },
            "-I" => {
                let (position, spec) = match rest.first().and_then(|s| s.parse::<usize>().ok()) {
                    Some(position) => (position, rest[1..].to_vec()),
                    None => (1, rest),
                };
                match state.chains.get_mut(&chain) {
                    Some(_) if position == 0 => {
                        out(Some(2), "iptables: Invalid rule number `0'.\n")
                    }
                    Some(rules) if position > rules.len() + 1 => {
                        out(Some(1), "iptables: Index of insertion too big.\n")
                    }
                    Some(rules) => {
                        rules.insert(position - 1, spec);
                        out(Some(0), "")
                    }
                    None => out(Some(1), NO_SUCH),
                }
            }
            "-D" => match state.chains.get_mut(&chain) {
                Some(rules) => match rules.iter().position(|r| *r == rest) {
                    Some(idx) => {
                        rules.remove(idx);
                        out(Some(0), "")
                    }
                    None => out(Some(1), BAD_RULE),
                },
                None => out(Some(1), NO_SUCH),
            },
            other => out(Some(2), &format!("iptables: unknown option {}\n", other)),
        }
    }
}

impl CommandRunner for FakeIptables {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        Ok(self.apply(program, args))
    }
}

fn out(code: Option<i32>, output: &str) -> CommandOutput {
    CommandOutput {
        code,
        output: output.to_string(),
    }
}

fn jump_target(rule: &[String]) -> Option<&str> {
    rule.iter()
        .position(|s| s == "-j")
        .and_then(|idx| rule.get(idx + 1))
        .map(String::as_str)
}

fn render_listing(chain: &str, rules: &[Vec<String>]) -> String {
    let mut listing = format!(
        "Chain {} (policy ACCEPT)\nnum  target     prot opt source               destination\n",
        chain
    );
    for (idx, rule) in rules.iter().enumerate() {
        let target = jump_target(rule).unwrap_or("");
        let comment = rule
            .iter()
            .position(|s| s == "--comment")
            .and_then(|i| rule.get(i + 1))
            .map(|c| format!(" /* {} */", c))
            .unwrap_or_default();
        listing.push_str(&format!(
            "{:<4} {:<10} all  --  0.0.0.0/0            0.0.0.0/0{}\n",
            idx + 1,
            target,
            comment
        ));
    }
    listing
}

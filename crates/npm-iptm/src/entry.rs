use std::fmt;
use std::num::NonZeroU32;

pub const WAIT_FLAG: &str = "-w";

/// What a single tool invocation does to its chain.
///
/// Passed alongside the entry on every call rather than held by the manager,
/// so concurrent callers sharing one manager cannot observe each other's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Append,
    Insert,
    Delete,
    Check,
    NewChain,
    DeleteChain,
    FlushChain,
}

impl Operation {
    pub fn flag(self) -> &'static str {
        match self {
            Operation::Append => "-A",
            Operation::Insert => "-I",
            Operation::Delete => "-D",
            Operation::Check => "-C",
            Operation::NewChain => "-N",
            Operation::DeleteChain => "-X",
            Operation::FlushChain => "-F",
        }
    }

    pub fn is_check(self) -> bool {
        matches!(self, Operation::Check)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Append => "append",
            Operation::Insert => "insert",
            Operation::Delete => "delete",
            Operation::Check => "check",
            Operation::NewChain => "new-chain",
            Operation::DeleteChain => "delete-chain",
            Operation::FlushChain => "flush-chain",
        };
        f.write_str(name)
    }
}

/// One iptables directive: a chain plus the opaque match/jump tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IptEntry {
    /// Tool override; `None` uses the configured binary.
    pub command: Option<String>,
    pub chain: String,
    /// 1-based rule number, honoured by inserts only.
    pub position: Option<NonZeroU32>,
    pub lock_wait_seconds: Option<u32>,
    pub specs: Vec<String>,
}

impl IptEntry {
    pub fn new(chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            ..Default::default()
        }
    }

    /// `-j <target>` in `chain`
    pub fn jump(chain: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(chain).with_specs([npm_core::JUMP_FLAG.to_string(), target.into()])
    }

    pub fn with_specs<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specs = specs.into_iter().map(Into::into).collect();
        self
    }

    pub fn at_position(mut self, position: NonZeroU32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_lock_wait(mut self, seconds: u32) -> Self {
        self.lock_wait_seconds = Some(seconds);
        self
    }

    /// Argument vector for `op`: `-w <wait> <flag> <chain> [position] [specs...]`.
    pub fn args(&self, op: Operation, default_wait: u32) -> Vec<String> {
        let wait = self.lock_wait_seconds.unwrap_or(default_wait);
        let mut args = vec![
            WAIT_FLAG.to_string(),
            wait.to_string(),
            op.flag().to_string(),
            self.chain.clone(),
        ];

        if op == Operation::Insert {
            if let Some(position) = self.position {
                args.push(position.to_string());
            }
        }

        args.extend(self.specs.iter().cloned());
        args
    }
}

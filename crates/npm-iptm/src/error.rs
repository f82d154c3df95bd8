use thiserror::Error;

#[derive(Debug, Error)]
pub enum IptmError {
    /// The tool could not be started at all
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited non-zero
    #[error("command `{command}` failed with exit code {code:?}: {output}")]
    Command {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("failed to add {label} to parent chain {chain}: {source}")]
    DefaultRule {
        chain: String,
        label: String,
        #[source]
        source: Box<IptmError>,
    },
}

impl IptmError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            IptmError::Command { code, .. } => *code,
            IptmError::DefaultRule { source, .. } => source.exit_code(),
            IptmError::Spawn { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IptmError>;

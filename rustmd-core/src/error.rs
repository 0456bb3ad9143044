//! Error types for rustmd-core.

use thiserror::Error;

/// Result type alias for rustmd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for rustmd operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed dimension description.
    #[error("invalid dimension '{name}': {reason}")]
    InvalidDimension { name: String, reason: String },

    /// Unit pair that cannot be converted.
    #[error("cannot convert units from {from} to {to}")]
    IncompatibleUnits { from: String, to: String },

    /// A parameter required by the energy mode is missing.
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// A valid spectrum has no event list in the input workspace.
    #[error("no event list for workspace index {0}")]
    MissingEventList(usize),

    /// The box tree invariant was violated.
    #[error("box tree invariant violated: {0}")]
    BoxTreeInvariant(String),

    /// More experiment runs than a u16 run index can address.
    #[error("too many runs attached to workspace (max {max})")]
    TooManyRuns { max: usize },

    /// Not enough memory for the requested box structure.
    #[error("insufficient memory: {required_kb:.0} kB needed, {available_kb} kB available")]
    InsufficientMemory { required_kb: f64, available_kb: u64 },

    /// The run was cancelled by the caller.
    #[error("conversion cancelled after {events_added} events")]
    Cancelled { events_added: usize },

    /// The run failed part way through.
    #[error("conversion aborted after {events_added} events: {source}")]
    Aborted {
        events_added: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns true if the error is a user cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if the output workspace holds a partial result.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Aborted { .. })
    }

    /// Number of events inserted before the run stopped, if it stopped part way.
    #[must_use]
    pub fn events_added(&self) -> Option<usize> {
        match self {
            Self::Cancelled { events_added } | Self::Aborted { events_added, .. } => {
                Some(*events_added)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_flags() {
        let cancelled = Error::Cancelled { events_added: 12 };
        assert!(cancelled.is_cancelled());
        assert!(cancelled.is_partial());
        assert_eq!(cancelled.events_added(), Some(12));

        let aborted = Error::Aborted {
            events_added: 3,
            source: Box::new(Error::MissingEventList(7)),
        };
        assert!(!aborted.is_cancelled());
        assert!(aborted.is_partial());
        assert!(aborted.to_string().contains("workspace index 7"));

        let config = Error::Config("bad".to_string());
        assert!(!config.is_partial());
        assert_eq!(config.events_added(), None);
    }
}

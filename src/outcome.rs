//! Outcome labels returned by a task's routing phase.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Label chosen by a task after it runs.
///
/// The flow looks the label up in the current task's successor table.
/// `End` and `Error` stop the flow; every other label, including
/// `Default`, is an ordinary edge.
///
/// Outcomes compare by label, so `Label("end".into())` behaves exactly
/// like `End`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Outcome {
    /// The `"default"` edge.
    Default,
    /// Stop the flow normally.
    End,
    /// Stop the flow because the task failed or chose to fail.
    Error,
    /// Any other named edge.
    Label(String),
}

impl Outcome {
    pub const DEFAULT: &'static str = "default";
    pub const END: &'static str = "end";
    pub const ERROR: &'static str = "error";

    /// Build an outcome from a label, mapping the sentinel names to their variants.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        match label.as_str() {
            Self::DEFAULT => Self::Default,
            Self::END => Self::End,
            Self::ERROR => Self::Error,
            _ => Self::Label(label),
        }
    }

    /// The label as the successor table stores it.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => Self::DEFAULT,
            Self::End => Self::END,
            Self::Error => Self::ERROR,
            Self::Label(label) => label,
        }
    }

    /// Returns true if a flow stops on this outcome without consulting successors.
    pub fn is_terminal(&self) -> bool {
        matches!(self.as_str(), Self::END | Self::ERROR)
    }

    /// Returns true for `default`, `end` and `error`.
    pub fn is_sentinel(&self) -> bool {
        matches!(self.as_str(), Self::DEFAULT | Self::END | Self::ERROR)
    }
}

impl PartialEq for Outcome {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Outcome {}

impl Hash for Outcome {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Outcome {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for Outcome {
    fn from(label: String) -> Self {
        Self::new(label)
    }
}

impl From<Outcome> for String {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Label(label) => label,
            other => other.as_str().to_string(),
        }
    }
}

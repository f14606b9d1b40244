use serde::{Deserialize, Serialize};
use std::fmt;

/// Case lifecycle states matching the incident workflow phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseState {
    /// Initial state, waiting to be picked up
    Pending,
    /// Gathering evidence and context
    Investigating,
    /// Checking findings against policies and rules
    Validating,
    /// Taking corrective action
    Remediating,
    /// Successfully handled
    Resolved,
    /// Could not be resolved
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl CaseState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Failed | Self::Cancelled)
    }

    /// States reachable from this one. Any edge not listed here is invalid.
    pub fn allowed_targets(&self) -> &'static [CaseState] {
        match self {
            Self::Pending => &[Self::Investigating, Self::Cancelled],
            Self::Investigating => &[Self::Validating, Self::Failed, Self::Cancelled],
            Self::Validating => &[Self::Remediating, Self::Failed, Self::Cancelled],
            Self::Remediating => &[Self::Resolved, Self::Failed, Self::Cancelled],
            Self::Resolved | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Check whether the edge `self -> to` is in the transition table.
    pub fn can_transition_to(&self, to: CaseState) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// The next state along the forward progress chain
    /// (Pending -> Investigating -> Validating -> Remediating -> Resolved),
    /// or `None` from terminal states.
    pub fn next_forward(&self) -> Option<CaseState> {
        match self {
            Self::Pending => Some(Self::Investigating),
            Self::Investigating => Some(Self::Validating),
            Self::Validating => Some(Self::Remediating),
            Self::Remediating => Some(Self::Resolved),
            Self::Resolved | Self::Failed | Self::Cancelled => None,
        }
    }

    /// Position along the forward chain, used to compare lifecycle progress.
    pub fn progress_rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Investigating => 1,
            Self::Validating => 2,
            Self::Remediating => 3,
            Self::Resolved | Self::Failed | Self::Cancelled => 4,
        }
    }
}

impl Default for CaseState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Investigating => write!(f, "INVESTIGATING"),
            Self::Validating => write!(f, "VALIDATING"),
            Self::Remediating => write!(f, "REMEDIATING"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for CaseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "INVESTIGATING" => Ok(Self::Investigating),
            "VALIDATING" => Ok(Self::Validating),
            "REMEDIATING" => Ok(Self::Remediating),
            "RESOLVED" => Ok(Self::Resolved),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid case state: {s}")),
        }
    }
}

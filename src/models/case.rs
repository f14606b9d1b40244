use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::models::transition::StateTransition;
use crate::state_machine::states::CaseState;

/// Kinds of incidents the platform tracks as cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    /// A CI/CD pipeline failure routed for automated analysis
    CiFailure,
    /// A spam signal raised against content or an account
    SpamIncident,
    /// A scam/fraud signal raised against content or an account
    ScamIncident,
    /// A security or compliance flag
    SecurityAlert,
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CiFailure => write!(f, "ci_failure"),
            Self::SpamIncident => write!(f, "spam_incident"),
            Self::ScamIncident => write!(f, "scam_incident"),
            Self::SecurityAlert => write!(f, "security_alert"),
        }
    }
}

impl std::str::FromStr for CaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ci_failure" => Ok(Self::CiFailure),
            "spam_incident" => Ok(Self::SpamIncident),
            "scam_incident" => Ok(Self::ScamIncident),
            "security_alert" => Ok(Self::SecurityAlert),
            _ => Err(format!("Invalid case type: {s}")),
        }
    }
}

/// Case urgency tiers. Lower numeric value dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePriority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
}

impl CasePriority {
    /// Numeric tier used for queue ordering (1 = most urgent)
    pub fn tier(&self) -> u8 {
        *self as u8
    }

    /// Build a priority from a numeric tier, clamping out-of-range values
    /// to the nearest tier rather than rejecting them.
    pub fn from_tier(tier: u8) -> Self {
        match tier {
            0 | 1 => Self::Critical,
            2 => Self::High,
            3 => Self::Normal,
            _ => Self::Low,
        }
    }
}

impl Default for CasePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for CasePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One incident tracked through its full lifecycle.
///
/// Owned exclusively by the state machine: `current_state` and `history` are
/// mutated only through validated transitions, never directly by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: Uuid,
    pub case_type: CaseType,
    /// Opaque structured input supplied at submission
    pub payload: Value,
    pub priority: CasePriority,
    pub current_state: CaseState,
    pub created_at: DateTime<Utc>,
    /// Propagated through tasks and logs for tracing
    pub correlation_id: Uuid,
    /// Append-only transition log, retained for audit after terminal states
    pub history: Vec<StateTransition>,
}

impl Case {
    /// Create a new case in the initial `Pending` state.
    pub fn new(case_type: CaseType, payload: Value, priority: CasePriority) -> Self {
        Self {
            case_id: Uuid::new_v4(),
            case_type,
            payload,
            priority,
            current_state: CaseState::default(),
            created_at: Utc::now(),
            correlation_id: Uuid::new_v4(),
            history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Seconds since the case entered its current state.
    pub fn seconds_in_current_state(&self) -> f64 {
        let since = match self.history.last() {
            Some(transition) => transition.timestamp,
            None => self.created_at,
        };
        (Utc::now() - since).num_milliseconds() as f64 / 1000.0
    }

    /// Total seconds since the case was created.
    pub fn age_seconds(&self) -> f64 {
        (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0
    }
}

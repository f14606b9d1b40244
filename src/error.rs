use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TriageError {
    StateTransitionError(String),
    OrchestrationError(String),
    QueueError(String),
    RegistryError(String),
    EventError(String),
    ValidationError(String),
    ConfigurationError(String),
}

impl fmt::Display for TriageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriageError::StateTransitionError(msg) => write!(f, "State transition error: {msg}"),
            TriageError::OrchestrationError(msg) => write!(f, "Orchestration error: {msg}"),
            TriageError::QueueError(msg) => write!(f, "Queue error: {msg}"),
            TriageError::RegistryError(msg) => write!(f, "Registry error: {msg}"),
            TriageError::EventError(msg) => write!(f, "Event error: {msg}"),
            TriageError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            TriageError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for TriageError {}

pub type Result<T> = std::result::Result<T, TriageError>;

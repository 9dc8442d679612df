// ADAPT ERROR TAXONOMY
// CONTRACT VIOLATIONS INSIDE THE CORE (BAD CONFIGURATION INDEX, BAD MEASURE
// INDEX) PANIC. EVERYTHING BELOW IS RETURNED TO THE CALLER, WHO DECIDES
// WHETHER TO ABORT, RELAX CONSTRAINTS, OR KEEP SERVING A DEGRADED CONFIGURATION.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdaptError {
    // --- INTENT / CONFIGURATION VALIDATION ---
    #[error("intent `{intent}` declares no reachable configurations")]
    EmptyDomain { intent: String },

    #[error("configuration space has {size} points, limit is {limit}")]
    DomainTooLarge { size: usize, limit: usize },

    #[error("unknown measure `{0}`")]
    UnknownMeasure(String),

    #[error("unknown knob `{0}`")]
    UnknownKnob(String),

    #[error("invalid range for knob `{knob}`: {reason}")]
    InvalidRange { knob: String, reason: String },

    #[error("quantization needs at least 2 levels, got {0}")]
    InvalidQuantization(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // --- FUNCTION BODY OUTPUT ---
    #[error("function body returned no value for measure `{0}`")]
    MissingMeasure(String),

    #[error("function body returned {value} for measure `{measure}`")]
    NonFiniteMeasure { measure: String, value: f64 },

    // --- PLANNING ---
    #[error(transparent)]
    Planning(#[from] PlanningError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanningError {
    #[error("nothing to plan over: the configuration space is empty")]
    EmptyDomain,

    #[error("no plan satisfies the constraint set")]
    Infeasible,

    #[error("solver did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("solver failed: {0}")]
    Solver(String),
}

pub type Result<T> = std::result::Result<T, AdaptError>;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("invalid distribution for {context}: {reason}")]
    InvalidDistribution { context: String, reason: String },

    #[error("event series '{event}' references unknown series '{reference}'")]
    DanglingEventReference { event: String, reference: String },

    #[error("event series '{event}' has a cyclic start reference")]
    CyclicEventReference { event: String },

    #[error("{kind} '{name}' is defined more than once")]
    DuplicateName { kind: String, name: String },

    #[error("investment '{investment}' has unknown investment type '{investment_type}'")]
    UnknownInvestmentType {
        investment: String,
        investment_type: String,
    },

    #[error("malformed allocation in event series '{event}': {reason}")]
    MalformedAllocation { event: String, reason: String },

    #[error("{strategy} strategy references unknown entry '{reference}'")]
    DanglingStrategyReference { strategy: String, reference: String },

    #[error("sweep override cannot be applied to event series '{event}': {reason}")]
    InvalidSweepTarget { event: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("scenario data unavailable: {0}")]
    DataUnavailable(String),

    #[error("insufficient funds in '{holding}': requested {requested:.2}, available {available:.2}")]
    InsufficientFunds {
        holding: String,
        requested: f64,
        available: f64,
    },

    #[error("trial worker failed: {0}")]
    WorkerFailed(String),
}

pub type SimResult<T> = Result<T, SimulationError>;

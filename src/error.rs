use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum PosError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Insufficient stock for {name}: requested {requested}, available {available}")]
    InsufficientStock {
        name: String,
        requested: i64,
        available: i64,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Credit of {credit_amount} requires approval for patient {patient_id}")]
    CreditApprovalRequired {
        patient_id: i64,
        credit_amount: Decimal,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PosError {
    pub fn validation(message: impl Into<String>) -> Self {
        PosError::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        PosError::NotFound(what.into())
    }
}

// Tauri commands surface errors to the UI as plain strings.
impl From<PosError> for String {
    fn from(err: PosError) -> Self {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, PosError>;

use thiserror::Error;

pub type LoyaltyResult<T> = Result<T, LoyaltyError>;

#[derive(Error, Debug)]
pub enum LoyaltyError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Loyalty card not found: {0}")]
    CardNotFound(String),

    #[error("No threshold configuration found")]
    ThresholdsNotFound,

    #[error("Loyalty card is inactive: {0}")]
    CardInactive(String),

    #[error("Loyalty card has expired: {0}")]
    CardExpired(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LoyaltyError {
    /// Rejected input; safe to retry with corrected values.
    pub fn is_validation(&self) -> bool {
        matches!(self, LoyaltyError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LoyaltyError::UserNotFound(_)
                | LoyaltyError::CardNotFound(_)
                | LoyaltyError::ThresholdsNotFound
        )
    }
}

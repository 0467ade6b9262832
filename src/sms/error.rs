use thiserror::Error;

use crate::error::ApiError;

/// Error taxonomy for the SMS core.
///
/// Unauthorized / InvalidRequest / NoRecipients abort a dispatch request as a
/// whole. Normalization / Transport / Provider are per-recipient and only
/// affect that recipient's delivery attempt and the aggregate counts.
/// Configuration is raised at gateway construction time.
#[derive(Debug, Error)]
pub enum SmsError {
    #[error("caller is not allowed to dispatch SMS")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no recipients matched the requested scope")]
    NoRecipients,

    #[error("phone number rejected: {0}")]
    Normalization(String),

    #[error("gateway unreachable: {0}")]
    Transport(String),

    #[error("provider rejected message: {0}")]
    Provider(String),

    #[error("sms configuration error: {0}")]
    Configuration(String),

    #[error("db error: {0}")]
    Db(#[from] sqlx::Error),
}

impl From<SmsError> for ApiError {
    fn from(err: SmsError) -> Self {
        match err {
            SmsError::Unauthorized => {
                ApiError::Forbidden("FORBIDDEN", "admin/nurse only".into())
            }
            SmsError::InvalidRequest(msg) => ApiError::BadRequest("VALIDATION_ERROR", msg),
            SmsError::NoRecipients => ApiError::BadRequest(
                "NO_RECIPIENTS",
                "no recipients matched the requested scope".into(),
            ),
            SmsError::Normalization(msg) => ApiError::BadRequest("VALIDATION_ERROR", msg),
            SmsError::Transport(msg) => ApiError::Internal(format!("gateway unreachable: {msg}")),
            SmsError::Provider(msg) => ApiError::Internal(format!("provider error: {msg}")),
            SmsError::Configuration(msg) => ApiError::Internal(format!("sms config error: {msg}")),
            SmsError::Db(e) => ApiError::Internal(format!("db error: {e}")),
        }
    }
}

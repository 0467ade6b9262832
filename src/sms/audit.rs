use async_trait::async_trait;
use uuid::Uuid;

use crate::sms::error::SmsError;
use crate::sms::template::MessageKind;

/// One row bound for sms_log. Recorded for every recipient the pipeline
/// touches, including those that never reach a gateway because their phone
/// number failed normalization.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// None for ad-hoc sends that are not tied to a child record.
    pub child_id: Option<Uuid>,
    /// The number as attempted (normalized when normalization succeeded,
    /// raw otherwise).
    pub phone: String,
    pub message: String,
    pub provider_response: Option<String>,
    pub success: bool,
    pub kind: MessageKind,
}

/// Append-only sink for delivery attempts. Implementations must not
/// deduplicate or update in place.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), SmsError>;
}

pub struct PgAttemptStore {
    pool: sqlx::PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), SmsError> {
        sqlx::query(
            r#"
            INSERT INTO sms_log (child_id, phone, message, provider_response, status, message_kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(attempt.child_id)
        .bind(&attempt.phone)
        .bind(&attempt.message)
        .bind(&attempt.provider_response)
        .bind(if attempt.success { 1i16 } else { 0i16 })
        .bind(attempt.kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Collects attempts in memory; can be told to fail every write to
    /// exercise the audit-failure path.
    pub struct MockAttemptStore {
        records: Mutex<Vec<DeliveryAttempt>>,
        fail_writes: bool,
    }

    impl MockAttemptStore {
        pub fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_writes: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_writes: true,
            }
        }

        pub fn recorded(&self) -> Vec<DeliveryAttempt> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AttemptStore for MockAttemptStore {
        async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), SmsError> {
            if self.fail_writes {
                return Err(SmsError::InvalidRequest("audit store unavailable".into()));
            }
            self.records.lock().unwrap().push(attempt.clone());
            Ok(())
        }
    }
}

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::sms::error::SmsError;

/// Which children a broadcast goes to. Parsed from the request's
/// `scope` / `child_ids` pair, never constructed from raw user input
/// anywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Specific(Vec<Uuid>),
}

impl Scope {
    /// `all` ignores any id list; `specific` requires a non-empty one.
    pub fn parse(scope: &str, child_ids: Option<Vec<Uuid>>) -> Result<Self, SmsError> {
        match scope {
            "all" => Ok(Scope::All),
            "specific" => {
                let ids = child_ids.unwrap_or_default();
                if ids.is_empty() {
                    return Err(SmsError::InvalidRequest(
                        "scope 'specific' requires a non-empty child_ids list".into(),
                    ));
                }
                Ok(Scope::Specific(ids))
            }
            other => Err(SmsError::InvalidRequest(format!(
                "scope must be 'all' or 'specific', got '{other}'"
            ))),
        }
    }
}

/// One deliverable child record: active, with a non-blank guardian phone.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Recipient {
    pub child_id: Uuid,
    pub full_name: String,
    pub guardian_name: String,
    pub phone: String,
}

/// Source of broadcast recipients. The contract is that `resolve` never
/// returns an empty list; a scope that matches nothing is `NoRecipients`.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn resolve(&self, scope: &Scope) -> Result<Vec<Recipient>, SmsError>;
}

pub struct PgRecipientSource {
    pool: sqlx::PgPool,
}

impl PgRecipientSource {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientSource for PgRecipientSource {
    async fn resolve(&self, scope: &Scope) -> Result<Vec<Recipient>, SmsError> {
        // Unknown ids in a Specific scope simply match no row and are
        // dropped; the caller learns about them only through the counts.
        let recipients: Vec<Recipient> = match scope {
            Scope::All => {
                sqlx::query_as::<_, Recipient>(
                    r#"
                    SELECT child_id, full_name, guardian_name, phone
                    FROM child
                    WHERE status = 0 AND btrim(phone) <> ''
                    ORDER BY full_name ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
            Scope::Specific(ids) => {
                sqlx::query_as::<_, Recipient>(
                    r#"
                    SELECT child_id, full_name, guardian_name, phone
                    FROM child
                    WHERE status = 0 AND btrim(phone) <> '' AND child_id = ANY($1)
                    ORDER BY full_name ASC
                    "#,
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?
            }
        };

        if recipients.is_empty() {
            return Err(SmsError::NoRecipients);
        }
        Ok(recipients)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Hands back a fixed recipient list, or `NoRecipients` when empty.
    pub struct MockRecipientSource {
        recipients: Vec<Recipient>,
    }

    impl MockRecipientSource {
        pub fn with(recipients: Vec<Recipient>) -> Self {
            Self { recipients }
        }

        pub fn empty() -> Self {
            Self {
                recipients: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl RecipientSource for MockRecipientSource {
        async fn resolve(&self, _scope: &Scope) -> Result<Vec<Recipient>, SmsError> {
            if self.recipients.is_empty() {
                return Err(SmsError::NoRecipients);
            }
            Ok(self.recipients.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_ignores_ids() {
        let scope = Scope::parse("all", Some(vec![Uuid::new_v4()])).unwrap();
        assert_eq!(scope, Scope::All);
    }

    #[test]
    fn parse_specific_requires_ids() {
        assert!(Scope::parse("specific", None).is_err());
        assert!(Scope::parse("specific", Some(vec![])).is_err());

        let id = Uuid::new_v4();
        assert_eq!(
            Scope::parse("specific", Some(vec![id])).unwrap(),
            Scope::Specific(vec![id])
        );
    }

    #[test]
    fn parse_rejects_unknown_scope() {
        assert!(Scope::parse("everyone", None).is_err());
        assert!(Scope::parse("", None).is_err());
    }
}

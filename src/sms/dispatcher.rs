use crate::sms::audit::{AttemptStore, DeliveryAttempt};
use crate::sms::error::SmsError;
use crate::sms::gateway::SmsGateway;
use crate::sms::phone::{self, PhonePolicy};
use crate::sms::recipients::{RecipientSource, Scope};
use crate::sms::template::{self, MessageKind, SimpleValues};

/// How a finished batch is classified. `Partial` and `AllSucceeded` both
/// report success to the caller; clients have always keyed off the counts
/// in the message text, so the flat flag stays forgiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    AllSucceeded,
    Partial,
    AllFailed,
}

/// Aggregate of one broadcast run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub sent: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

impl BatchOutcome {
    pub fn status(&self) -> BatchStatus {
        if self.failed == 0 {
            BatchStatus::AllSucceeded
        } else if self.sent == 0 {
            BatchStatus::AllFailed
        } else {
            BatchStatus::Partial
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.status(), BatchStatus::AllSucceeded | BatchStatus::Partial)
    }

    pub fn message(&self) -> String {
        match self.status() {
            BatchStatus::AllSucceeded => {
                format!("SMS sent to {} recipient(s)", self.sent)
            }
            BatchStatus::Partial => format!(
                "SMS sent to {} recipient(s), {} failed",
                self.sent, self.failed
            ),
            BatchStatus::AllFailed => match &self.last_error {
                Some(detail) => format!(
                    "failed to send SMS to all {} recipient(s): {detail}",
                    self.failed
                ),
                None => format!("failed to send SMS to all {} recipient(s)", self.failed),
            },
        }
    }
}

/// Sequential broadcast pipeline: resolve recipients, personalize, normalize,
/// send, audit. One recipient at a time; a failure never aborts the batch.
pub struct Dispatcher<'a> {
    recipients: &'a dyn RecipientSource,
    gateway: &'a dyn SmsGateway,
    audit: &'a dyn AttemptStore,
    policy: PhonePolicy,
    strict_templates: bool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        recipients: &'a dyn RecipientSource,
        gateway: &'a dyn SmsGateway,
        audit: &'a dyn AttemptStore,
        policy: PhonePolicy,
        strict_templates: bool,
    ) -> Self {
        Self {
            recipients,
            gateway,
            audit,
            policy,
            strict_templates,
        }
    }

    pub async fn dispatch(
        &self,
        body: &str,
        scope: &Scope,
        kind: MessageKind,
    ) -> Result<BatchOutcome, SmsError> {
        if body.trim().is_empty() {
            return Err(SmsError::InvalidRequest("message body is empty".into()));
        }
        if self.strict_templates {
            template::ensure_no_unbound_named(body)?;
        }

        let recipients = self.recipients.resolve(scope).await?;

        let mut outcome = BatchOutcome {
            sent: 0,
            failed: 0,
            last_error: None,
        };

        for recipient in &recipients {
            let rendered = template::render_simple(
                body,
                SimpleValues {
                    guardian_name: Some(&recipient.guardian_name),
                    child_name: Some(&recipient.full_name),
                },
                self.strict_templates,
            )?;

            let attempt = match phone::normalize(&recipient.phone, self.policy) {
                Ok(msisdn) => {
                    let delivery = self.gateway.send(&msisdn, &rendered, kind).await;
                    if delivery.success {
                        outcome.sent += 1;
                    } else {
                        outcome.failed += 1;
                        outcome.last_error = delivery.error_detail.clone();
                    }
                    DeliveryAttempt {
                        child_id: Some(recipient.child_id),
                        phone: msisdn,
                        message: rendered,
                        provider_response: delivery
                            .provider_message_id
                            .or(delivery.error_detail),
                        success: delivery.success,
                        kind,
                    }
                }
                // Bad number: audit the attempt with the raw phone and move
                // on without touching the gateway.
                Err(e) => {
                    let detail = e.to_string();
                    outcome.failed += 1;
                    outcome.last_error = Some(detail.clone());
                    DeliveryAttempt {
                        child_id: Some(recipient.child_id),
                        phone: recipient.phone.clone(),
                        message: rendered,
                        provider_response: Some(detail),
                        success: false,
                        kind,
                    }
                }
            };

            if let Err(e) = self.audit.record(&attempt).await {
                tracing::warn!(
                    phone = %phone::mask(&attempt.phone),
                    error = %e,
                    "failed to write sms_log row"
                );
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::sms::audit::mock::MockAttemptStore;
    use crate::sms::gateway::mock::MockGateway;
    use crate::sms::gateway::DeliveryOutcome;
    use crate::sms::recipients::mock::MockRecipientSource;
    use crate::sms::recipients::Recipient;

    fn recipient(full_name: &str, guardian_name: &str, phone: &str) -> Recipient {
        Recipient {
            child_id: Uuid::new_v4(),
            full_name: full_name.to_string(),
            guardian_name: guardian_name.to_string(),
            phone: phone.to_string(),
        }
    }

    #[tokio::test]
    async fn all_success_batch_counts_and_personalizes() {
        let source = MockRecipientSource::with(vec![
            recipient("Amani", "Mary", "+254712345678"),
            recipient("Baraka", "Jane", "+254722000111"),
        ]);
        let gateway = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::E164, false);

        let outcome = dispatcher
            .dispatch(
                "Dear [PARENT_NAME], [CHILD_NAME] has a clinic visit.",
                &Scope::All,
                MessageKind::Reminder,
            )
            .await
            .unwrap();

        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.status(), BatchStatus::AllSucceeded);
        assert!(outcome.success());

        let sent = gateway.sent();
        assert!(sent[0].message.contains("Mary"));
        assert!(sent[0].message.contains("Amani"));
        assert!(sent[1].message.contains("Jane"));
        assert_ne!(sent[0].message, sent[1].message);

        let attempts = audit.recorded();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| a.success));
    }

    #[tokio::test]
    async fn bad_phone_is_audited_but_never_sent() {
        let source = MockRecipientSource::with(vec![
            recipient("Amani", "Mary", "0712345678"),
            recipient("Baraka", "Jane", "12345"),
            recipient("Chausiku", "Grace", "0733000222"),
        ]);
        let gateway = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::KenyaLocal, false);

        let outcome = dispatcher
            .dispatch("Clinic visit due.", &Scope::All, MessageKind::Reminder)
            .await
            .unwrap();

        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.status(), BatchStatus::Partial);
        assert!(outcome.success());

        // The gateway only saw the two normalizable numbers.
        assert_eq!(gateway.send_count(), 2);
        assert!(gateway.sent().iter().all(|m| m.to.starts_with("+254")));

        // The audit trail still has all three.
        let attempts = audit.recorded();
        assert_eq!(attempts.len(), 3);
        let failed: Vec<_> = attempts.iter().filter(|a| !a.success).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].phone, "12345");
    }

    #[tokio::test]
    async fn all_failed_batch_reports_last_error() {
        let source = MockRecipientSource::with(vec![recipient("Amani", "Mary", "+254712345678")]);
        let gateway = MockGateway::failing("gateway unreachable: connect refused");
        let audit = MockAttemptStore::new();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::E164, false);

        let outcome = dispatcher
            .dispatch("Hello", &Scope::All, MessageKind::Custom)
            .await
            .unwrap();

        assert_eq!(outcome.status(), BatchStatus::AllFailed);
        assert!(!outcome.success());
        assert!(outcome.last_error.as_deref().unwrap().contains("unreachable"));
        assert!(outcome.message().contains("failed to send SMS to all 1"));
    }

    #[tokio::test]
    async fn scripted_partial_failure_stays_success() {
        let source = MockRecipientSource::with(vec![
            recipient("Amani", "Mary", "+254712345678"),
            recipient("Baraka", "Jane", "+254722000111"),
        ]);
        let gateway = MockGateway::scripted(vec![
            DeliveryOutcome::delivered(Some("id-1".into())),
            DeliveryOutcome::failed("InvalidPhoneNumber"),
        ]);
        let audit = MockAttemptStore::new();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::E164, false);

        let outcome = dispatcher
            .dispatch("Hello", &Scope::All, MessageKind::Custom)
            .await
            .unwrap();

        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.success());
        assert!(outcome.message().contains("1 failed"));
    }

    #[tokio::test]
    async fn empty_scope_propagates_without_attempts() {
        let source = MockRecipientSource::empty();
        let gateway = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::E164, false);

        let err = dispatcher
            .dispatch("Hello", &Scope::All, MessageKind::Custom)
            .await;

        assert!(matches!(err, Err(SmsError::NoRecipients)));
        assert_eq!(gateway.send_count(), 0);
        assert!(audit.recorded().is_empty());
    }

    #[tokio::test]
    async fn strict_mode_rejects_unbound_named_before_any_send() {
        let source = MockRecipientSource::with(vec![recipient("Amani", "Mary", "+254712345678")]);
        let gateway = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::E164, true);

        let err = dispatcher
            .dispatch(
                "Dose of {vaccine_name} is due",
                &Scope::All,
                MessageKind::Reminder,
            )
            .await;

        assert!(matches!(err, Err(SmsError::InvalidRequest(_))));
        assert_eq!(gateway.send_count(), 0);
    }

    #[tokio::test]
    async fn audit_write_failure_does_not_flip_the_outcome() {
        let source = MockRecipientSource::with(vec![
            recipient("Amani", "Mary", "+254712345678"),
            recipient("Baraka", "Jane", "+254722000111"),
        ]);
        let gateway = MockGateway::succeeding();
        let audit = MockAttemptStore::failing();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::E164, false);

        let outcome = dispatcher
            .dispatch("Hello", &Scope::All, MessageKind::Custom)
            .await
            .unwrap();

        assert_eq!(outcome.sent, 2);
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let source = MockRecipientSource::with(vec![recipient("Amani", "Mary", "+254712345678")]);
        let gateway = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let dispatcher =
            Dispatcher::new(&source, &gateway, &audit, PhonePolicy::E164, false);

        let err = dispatcher
            .dispatch("   ", &Scope::All, MessageKind::Custom)
            .await;
        assert!(matches!(err, Err(SmsError::InvalidRequest(_))));
    }
}

use chrono::NaiveDate;
use uuid::Uuid;

use crate::sms::audit::{AttemptStore, DeliveryAttempt};
use crate::sms::gateway::{DeliveryOutcome, SmsGateway};
use crate::sms::phone::{self, PhonePolicy};
use crate::sms::template::{self, MessageKind, ScheduleEntry};

/// Two-leg delivery for registration messages: try the gateway
/// microservice, then the direct provider if one is configured.
///
/// Registration confirmations ride on a child-registration request that has
/// already committed, so this type never bubbles an error up; the caller
/// gets an outcome and the audit trail gets a row per leg attempted.
pub struct FallbackCoordinator<'a> {
    primary: &'a dyn SmsGateway,
    secondary: Option<&'a dyn SmsGateway>,
    audit: &'a dyn AttemptStore,
    policy: PhonePolicy,
}

impl<'a> FallbackCoordinator<'a> {
    pub fn new(
        primary: &'a dyn SmsGateway,
        secondary: Option<&'a dyn SmsGateway>,
        audit: &'a dyn AttemptStore,
        policy: PhonePolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            audit,
            policy,
        }
    }

    pub async fn send_registration(
        &self,
        child_id: Uuid,
        guardian_name: &str,
        child_name: &str,
        raw_phone: &str,
        entries: &[ScheduleEntry],
        today: NaiveDate,
    ) -> DeliveryOutcome {
        let message = template::render_registration(guardian_name, child_name, entries, today);

        let msisdn = match phone::normalize(raw_phone, self.policy) {
            Ok(m) => m,
            Err(e) => {
                let detail = e.to_string();
                self.record(child_id, raw_phone, &message, &DeliveryOutcome::failed(&detail))
                    .await;
                return DeliveryOutcome::failed(detail);
            }
        };

        let first = self.primary.send(&msisdn, &message, MessageKind::Registration).await;
        self.record(child_id, &msisdn, &message, &first).await;
        if first.success {
            return first;
        }

        let Some(secondary) = self.secondary else {
            tracing::warn!(
                phone = %phone::mask(&msisdn),
                gateway = self.primary.name(),
                "registration SMS failed and no fallback gateway is configured"
            );
            return first;
        };

        tracing::warn!(
            phone = %phone::mask(&msisdn),
            from = self.primary.name(),
            to = secondary.name(),
            "registration SMS failed, retrying on fallback gateway"
        );

        let second = secondary.send(&msisdn, &message, MessageKind::Registration).await;
        self.record(child_id, &msisdn, &message, &second).await;
        if !second.success {
            tracing::error!(
                phone = %phone::mask(&msisdn),
                "registration SMS failed on both gateways"
            );
        }
        second
    }

    async fn record(
        &self,
        child_id: Uuid,
        phone: &str,
        message: &str,
        outcome: &DeliveryOutcome,
    ) {
        let attempt = DeliveryAttempt {
            child_id: Some(child_id),
            phone: phone.to_string(),
            message: message.to_string(),
            provider_response: outcome
                .provider_message_id
                .clone()
                .or_else(|| outcome.error_detail.clone()),
            success: outcome.success,
            kind: MessageKind::Registration,
        };
        if let Err(e) = self.audit.record(&attempt).await {
            tracing::warn!(
                phone = %phone::mask(&attempt.phone),
                error = %e,
                "failed to write sms_log row"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sms::audit::mock::MockAttemptStore;
    use crate::sms::gateway::mock::MockGateway;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn primary_success_leaves_fallback_untouched() {
        let primary = MockGateway::succeeding();
        let secondary = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let coordinator = FallbackCoordinator::new(
            &primary,
            Some(&secondary),
            &audit,
            PhonePolicy::KenyaLocal,
        );

        let outcome = coordinator
            .send_registration(Uuid::new_v4(), "Mary", "Amani", "0712345678", &[], today())
            .await;

        assert!(outcome.success);
        assert_eq!(primary.send_count(), 1);
        assert_eq!(secondary.send_count(), 0);
        assert_eq!(audit.recorded().len(), 1);
        assert_eq!(primary.sent()[0].to, "+254712345678");
        assert_eq!(primary.sent()[0].kind, MessageKind::Registration);
    }

    #[tokio::test]
    async fn primary_failure_engages_fallback() {
        let primary = MockGateway::failing("gateway unreachable: timeout");
        let secondary = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let coordinator = FallbackCoordinator::new(
            &primary,
            Some(&secondary),
            &audit,
            PhonePolicy::KenyaLocal,
        );

        let outcome = coordinator
            .send_registration(Uuid::new_v4(), "Mary", "Amani", "0712345678", &[], today())
            .await;

        assert!(outcome.success);
        assert_eq!(primary.send_count(), 1);
        assert_eq!(secondary.send_count(), 1);

        let attempts = audit.recorded();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].success);
        assert!(attempts[1].success);
    }

    #[tokio::test]
    async fn both_legs_failing_returns_the_second_failure() {
        let primary = MockGateway::failing("gateway unreachable: timeout");
        let secondary = MockGateway::failing("provider status: InsufficientBalance");
        let audit = MockAttemptStore::new();
        let coordinator = FallbackCoordinator::new(
            &primary,
            Some(&secondary),
            &audit,
            PhonePolicy::KenyaLocal,
        );

        let outcome = coordinator
            .send_registration(Uuid::new_v4(), "Mary", "Amani", "0712345678", &[], today())
            .await;

        assert!(!outcome.success);
        assert!(outcome
            .error_detail
            .as_deref()
            .unwrap()
            .contains("InsufficientBalance"));
        assert_eq!(audit.recorded().len(), 2);
    }

    #[tokio::test]
    async fn no_fallback_configured_returns_primary_failure() {
        let primary = MockGateway::failing("gateway unreachable: timeout");
        let audit = MockAttemptStore::new();
        let coordinator =
            FallbackCoordinator::new(&primary, None, &audit, PhonePolicy::KenyaLocal);

        let outcome = coordinator
            .send_registration(Uuid::new_v4(), "Mary", "Amani", "0712345678", &[], today())
            .await;

        assert!(!outcome.success);
        assert_eq!(audit.recorded().len(), 1);
    }

    #[tokio::test]
    async fn unnormalizable_phone_never_reaches_a_gateway() {
        let primary = MockGateway::succeeding();
        let secondary = MockGateway::succeeding();
        let audit = MockAttemptStore::new();
        let coordinator = FallbackCoordinator::new(
            &primary,
            Some(&secondary),
            &audit,
            PhonePolicy::KenyaLocal,
        );

        let outcome = coordinator
            .send_registration(Uuid::new_v4(), "Mary", "Amani", "12345", &[], today())
            .await;

        assert!(!outcome.success);
        assert_eq!(primary.send_count(), 0);
        assert_eq!(secondary.send_count(), 0);

        let attempts = audit.recorded();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].phone, "12345");
    }
}

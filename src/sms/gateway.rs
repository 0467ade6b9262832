use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::sms::error::SmsError;
use crate::sms::template::MessageKind;

// Timeouts mirror the gateway microservice's own client settings.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a single delivery attempt. Transport failures are folded into
/// `success = false` rather than surfaced as errors so that a batch can keep
/// going past a dead gateway.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error_detail: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            provider_message_id,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// A thing that can push one SMS to one phone number.
///
/// `send` never returns `Err`: anything that goes wrong on the wire is a
/// failed outcome for that recipient only. Construction-time problems
/// (missing credentials, bad base URL) are `SmsError::Configuration` and
/// belong to the constructors.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, message: &str, kind: MessageKind) -> DeliveryOutcome;

    fn name(&self) -> &'static str;

    async fn is_healthy(&self) -> bool {
        true
    }
}

// ============================================================
// Microservice gateway (primary path)
// ============================================================

/// Envelope returned by the gateway microservice for POST /send-sms.
#[derive(Debug, Deserialize)]
struct MicroserviceReply {
    status: String,
    #[serde(rename = "messageId")]
    message_id: Option<String>,
    #[allow(dead_code)]
    cost: Option<String>,
    message: Option<String>,
}

/// HTTP client for the Node SMS gateway microservice.
pub struct MicroserviceGateway {
    client: reqwest::Client,
    base_url: String,
}

impl MicroserviceGateway {
    pub fn new(base_url: &str) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| SmsError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SmsGateway for MicroserviceGateway {
    async fn send(&self, to: &str, message: &str, kind: MessageKind) -> DeliveryOutcome {
        let url = format!("{}/send-sms", self.base_url);
        let body = json!({
            "to": to,
            "message": message,
            "messageType": kind.as_str(),
        });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                return DeliveryOutcome::failed(SmsError::Transport(e.to_string()).to_string());
            }
        };

        let http_status = response.status();
        let reply = match response.json::<MicroserviceReply>().await {
            Ok(r) => r,
            Err(e) => {
                return DeliveryOutcome::failed(format!(
                    "gateway returned {http_status} with unreadable body: {e}"
                ));
            }
        };

        if reply.status == "success" {
            DeliveryOutcome::delivered(reply.message_id)
        } else {
            let detail = reply
                .message
                .unwrap_or_else(|| format!("status={}", reply.status));
            DeliveryOutcome::failed(SmsError::Provider(detail).to_string())
        }
    }

    fn name(&self) -> &'static str {
        "microservice"
    }

    /// GET /health with the short timeout; a slow gateway counts as down.
    async fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

// ============================================================
// Direct provider gateway (fallback path)
// ============================================================

const PROVIDER_SEND_URL: &str = "https://api.africastalking.com/version1/messaging";

#[derive(Debug, Deserialize)]
struct ProviderReply {
    #[serde(rename = "SMSMessageData")]
    sms_message_data: ProviderMessageData,
}

#[derive(Debug, Deserialize)]
struct ProviderMessageData {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Recipients", default)]
    recipients: Vec<ProviderRecipient>,
}

#[derive(Debug, Deserialize)]
struct ProviderRecipient {
    status: String,
    #[serde(rename = "messageId")]
    message_id: Option<String>,
    #[allow(dead_code)]
    cost: Option<String>,
}

/// Talks to the SMS provider's REST API directly, bypassing the gateway
/// microservice. Used as the fallback leg for registration messages.
pub struct DirectProviderGateway {
    client: reqwest::Client,
    username: String,
    api_key: String,
    sender_id: Option<String>,
    send_url: String,
}

impl DirectProviderGateway {
    /// Fails fast when either credential is absent; a half-configured
    /// fallback is treated as a deployment mistake, not a soft-disable.
    pub fn from_config(config: &Config) -> Result<Self, SmsError> {
        let username = config
            .sms_provider_username
            .clone()
            .ok_or_else(|| SmsError::Configuration("SMS_PROVIDER_USERNAME is not set".into()))?;
        let api_key = config
            .sms_provider_api_key
            .clone()
            .ok_or_else(|| SmsError::Configuration("SMS_PROVIDER_API_KEY is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| SmsError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            username,
            api_key,
            sender_id: config.sms_sender_id.clone(),
            send_url: PROVIDER_SEND_URL.to_string(),
        })
    }
}

#[async_trait]
impl SmsGateway for DirectProviderGateway {
    async fn send(&self, to: &str, message: &str, _kind: MessageKind) -> DeliveryOutcome {
        let mut form = vec![
            ("username", self.username.as_str()),
            ("to", to),
            ("message", message),
        ];
        if let Some(sender) = &self.sender_id {
            form.push(("from", sender.as_str()));
        }

        let response = match self
            .client
            .post(&self.send_url)
            .header("apiKey", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return DeliveryOutcome::failed(SmsError::Transport(e.to_string()).to_string());
            }
        };

        let http_status = response.status();
        let reply = match response.json::<ProviderReply>().await {
            Ok(r) => r,
            Err(e) => {
                return DeliveryOutcome::failed(format!(
                    "provider returned {http_status} with unreadable body: {e}"
                ));
            }
        };

        match reply.sms_message_data.recipients.first() {
            Some(r) if r.status == "Success" => DeliveryOutcome::delivered(r.message_id.clone()),
            Some(r) => {
                DeliveryOutcome::failed(SmsError::Provider(r.status.clone()).to_string())
            }
            None => DeliveryOutcome::failed(
                SmsError::Provider(format!(
                    "accepted no recipients: {}",
                    reply.sms_message_data.message
                ))
                .to_string(),
            ),
        }
    }

    fn name(&self) -> &'static str {
        "direct_provider"
    }
}

// ============================================================
// Test double
// ============================================================

#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct SentMessage {
        pub to: String,
        pub message: String,
        pub kind: MessageKind,
    }

    /// Records every send and replays scripted outcomes in order. Once the
    /// script runs dry it keeps returning the default outcome.
    pub struct MockGateway {
        calls: Mutex<Vec<SentMessage>>,
        script: Mutex<VecDeque<DeliveryOutcome>>,
        default_outcome: DeliveryOutcome,
        healthy: bool,
    }

    impl MockGateway {
        pub fn succeeding() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(VecDeque::new()),
                default_outcome: DeliveryOutcome::delivered(Some("mock-id".into())),
                healthy: true,
            }
        }

        pub fn failing(detail: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(VecDeque::new()),
                default_outcome: DeliveryOutcome::failed(detail),
                healthy: false,
            }
        }

        pub fn scripted(outcomes: Vec<DeliveryOutcome>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(outcomes.into()),
                default_outcome: DeliveryOutcome::delivered(Some("mock-id".into())),
                healthy: true,
            }
        }

        pub fn sent(&self) -> Vec<SentMessage> {
            self.calls.lock().unwrap().clone()
        }

        pub fn send_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SmsGateway for MockGateway {
        async fn send(&self, to: &str, message: &str, kind: MessageKind) -> DeliveryOutcome {
            self.calls.lock().unwrap().push(SentMessage {
                to: to.to_string(),
                message: message.to_string(),
                kind,
            });
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default_outcome.clone())
        }

        fn name(&self) -> &'static str {
            "mock"
        }

        async fn is_healthy(&self) -> bool {
            self.healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sms::phone::PhonePolicy;

    fn config_without_credentials() -> Config {
        Config {
            database_url: "postgres://unused".into(),
            bind_addr: "127.0.0.1:0".into(),
            session_ttl_hours: 24,
            sms_gateway_base_url: "http://127.0.0.1:3100".into(),
            sms_provider_username: None,
            sms_provider_api_key: None,
            sms_sender_id: None,
            sms_phone_policy: PhonePolicy::E164,
            sms_strict_templates: false,
        }
    }

    #[test]
    fn outcome_constructors_set_flags() {
        let ok = DeliveryOutcome::delivered(Some("abc".into()));
        assert!(ok.success);
        assert_eq!(ok.provider_message_id.as_deref(), Some("abc"));
        assert!(ok.error_detail.is_none());

        let bad = DeliveryOutcome::failed("timeout");
        assert!(!bad.success);
        assert_eq!(bad.error_detail.as_deref(), Some("timeout"));
    }

    #[test]
    fn microservice_reply_parses_success_shape() {
        let reply: MicroserviceReply = serde_json::from_str(
            r#"{"status":"success","messageId":"ATXid_123","cost":"KES 0.80"}"#,
        )
        .unwrap();
        assert_eq!(reply.status, "success");
        assert_eq!(reply.message_id.as_deref(), Some("ATXid_123"));
    }

    #[test]
    fn microservice_reply_parses_error_shape() {
        let reply: MicroserviceReply =
            serde_json::from_str(r#"{"status":"error","message":"InvalidPhoneNumber"}"#).unwrap();
        assert_eq!(reply.status, "error");
        assert_eq!(reply.message.as_deref(), Some("InvalidPhoneNumber"));
    }

    #[test]
    fn provider_reply_parses_recipient_list() {
        let reply: ProviderReply = serde_json::from_str(
            r#"{"SMSMessageData":{"Message":"Sent to 1/1","Recipients":[
                {"status":"Success","messageId":"ATXid_9","cost":"KES 0.80","number":"+254712345678","statusCode":101}
            ]}}"#,
        )
        .unwrap();
        let first = reply.sms_message_data.recipients.first().unwrap();
        assert_eq!(first.status, "Success");
        assert_eq!(first.message_id.as_deref(), Some("ATXid_9"));
    }

    #[test]
    fn provider_reply_tolerates_empty_recipients() {
        let reply: ProviderReply = serde_json::from_str(
            r#"{"SMSMessageData":{"Message":"InvalidSenderId","Recipients":[]}}"#,
        )
        .unwrap();
        assert!(reply.sms_message_data.recipients.is_empty());
    }

    #[test]
    fn direct_gateway_requires_both_credentials() {
        let mut config = config_without_credentials();
        assert!(matches!(
            DirectProviderGateway::from_config(&config),
            Err(SmsError::Configuration(_))
        ));

        config.sms_provider_username = Some("sandbox".into());
        assert!(matches!(
            DirectProviderGateway::from_config(&config),
            Err(SmsError::Configuration(_))
        ));

        config.sms_provider_api_key = Some("atsk_test".into());
        let gateway = DirectProviderGateway::from_config(&config).unwrap();
        assert_eq!(gateway.name(), "direct_provider");
    }
}

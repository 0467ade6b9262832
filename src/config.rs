use std::env;

use crate::sms::phone::PhonePolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,

    /// Base URL of the SMS gateway microservice, e.g. http://127.0.0.1:3100
    pub sms_gateway_base_url: String,
    /// Provider account username for the direct fallback path.
    pub sms_provider_username: Option<String>,
    /// Provider API key for the direct fallback path.
    pub sms_provider_api_key: Option<String>,
    /// Optional registered sender short-code.
    pub sms_sender_id: Option<String>,
    /// Normalization policy used by the broadcast path.
    pub sms_phone_policy: PhonePolicy,
    /// When true, a template rendered with an unbound placeholder is rejected
    /// instead of substituting the empty string.
    pub sms_strict_templates: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);

        let sms_gateway_base_url = env::var("SMS_GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3100".to_string());
        let sms_provider_username = env::var("SMS_PROVIDER_USERNAME").ok().filter(|s| !s.is_empty());
        let sms_provider_api_key = env::var("SMS_PROVIDER_API_KEY").ok().filter(|s| !s.is_empty());
        let sms_sender_id = env::var("SMS_SENDER_ID").ok().filter(|s| !s.is_empty());

        let sms_phone_policy = match env::var("SMS_PHONE_POLICY").ok().as_deref() {
            Some(s) => s
                .parse::<PhonePolicy>()
                .map_err(|e| anyhow::anyhow!("SMS_PHONE_POLICY: {e}"))?,
            None => PhonePolicy::E164,
        };

        let sms_strict_templates = env::var("SMS_STRICT_TEMPLATES")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(false);

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            sms_gateway_base_url,
            sms_provider_username,
            sms_provider_api_key,
            sms_sender_id,
            sms_phone_policy,
            sms_strict_templates,
        })
    }
}

use std::sync::Arc;

use crate::config::Config;
use crate::models::{ROLE_ADMIN, ROLE_NURSE};

pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod phone;
pub mod recipients;
pub mod template;

use error::SmsError;
use gateway::{DirectProviderGateway, MicroserviceGateway, SmsGateway};
use phone::PhonePolicy;

/// Everything the SMS routes need, wired once at startup and shared
/// through AppState.
pub struct SmsContext {
    pub gateway: Arc<dyn SmsGateway>,
    pub direct_gateway: Option<Arc<dyn SmsGateway>>,
    pub phone_policy: PhonePolicy,
    pub strict_templates: bool,
}

impl SmsContext {
    /// Half-configured provider credentials are a hard error, not a
    /// missing fallback.
    pub fn from_config(config: &Config) -> Result<Self, SmsError> {
        let gateway: Arc<dyn SmsGateway> =
            Arc::new(MicroserviceGateway::new(&config.sms_gateway_base_url)?);

        let direct_gateway: Option<Arc<dyn SmsGateway>> = match (
            &config.sms_provider_username,
            &config.sms_provider_api_key,
        ) {
            (Some(_), Some(_)) => Some(Arc::new(DirectProviderGateway::from_config(config)?)),
            (None, None) => {
                tracing::warn!(
                    "no SMS provider credentials configured; registration messages have no fallback gateway"
                );
                None
            }
            _ => {
                return Err(SmsError::Configuration(
                    "SMS_PROVIDER_USERNAME and SMS_PROVIDER_API_KEY must be set together".into(),
                ));
            }
        };

        Ok(Self {
            gateway,
            direct_gateway,
            phone_policy: config.sms_phone_policy,
            strict_templates: config.sms_strict_templates,
        })
    }
}

/// Only admins and nurses may trigger SMS dispatch.
pub fn ensure_dispatch_role(role: i16) -> Result<(), SmsError> {
    if role == ROLE_ADMIN || role == ROLE_NURSE {
        Ok(())
    } else {
        Err(SmsError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: "postgres://unused".into(),
            bind_addr: "127.0.0.1:0".into(),
            session_ttl_hours: 24,
            sms_gateway_base_url: "http://127.0.0.1:3100".into(),
            sms_provider_username: None,
            sms_provider_api_key: None,
            sms_sender_id: None,
            sms_phone_policy: PhonePolicy::KenyaLocal,
            sms_strict_templates: true,
        }
    }

    #[test]
    fn context_without_credentials_has_no_fallback() {
        let ctx = SmsContext::from_config(&base_config()).unwrap();
        assert!(ctx.direct_gateway.is_none());
        assert_eq!(ctx.phone_policy, PhonePolicy::KenyaLocal);
        assert!(ctx.strict_templates);
    }

    #[test]
    fn context_with_both_credentials_builds_fallback() {
        let mut config = base_config();
        config.sms_provider_username = Some("sandbox".into());
        config.sms_provider_api_key = Some("atsk_test".into());
        let ctx = SmsContext::from_config(&config).unwrap();
        assert!(ctx.direct_gateway.is_some());
    }

    #[test]
    fn context_with_half_credentials_is_a_configuration_error() {
        let mut config = base_config();
        config.sms_provider_username = Some("sandbox".into());
        assert!(matches!(
            SmsContext::from_config(&config),
            Err(SmsError::Configuration(_))
        ));
    }

    #[test]
    fn dispatch_role_gate() {
        assert!(ensure_dispatch_role(ROLE_ADMIN).is_ok());
        assert!(ensure_dispatch_role(ROLE_NURSE).is_ok());
        assert!(ensure_dispatch_role(0).is_err());
        assert!(ensure_dispatch_role(7).is_err());
    }
}

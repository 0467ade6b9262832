use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sms::error::SmsError;

// Kenya country calling code; local numbers start with trunk "0" or bare "7".
const KE_COUNTRY_CODE: &str = "254";
const KE_MSISDN_DIGITS: usize = 12; // "254" + 9 subscriber digits

/// How a raw phone string is turned into a gateway-acceptable number.
///
/// The two policies are intentionally separate: `E164` is the generic
/// "+ and 10-15 digits" check, `KenyaLocal` rewrites trunk/subscriber
/// prefixes against the 254 calling code. Callers pick one; they are
/// never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhonePolicy {
    E164,
    KenyaLocal,
}

impl FromStr for PhonePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "e164" => Ok(PhonePolicy::E164),
            "kenya" | "kenya_local" => Ok(PhonePolicy::KenyaLocal),
            other => Err(format!("unknown phone policy: {other}")),
        }
    }
}

pub fn normalize(raw: &str, policy: PhonePolicy) -> Result<String, SmsError> {
    match policy {
        PhonePolicy::E164 => normalize_e164(raw),
        PhonePolicy::KenyaLocal => normalize_kenya(raw),
    }
}

/// Keep digits and a leading `+`, drop everything else (spaces, dashes,
/// parentheses, dots).
fn compact(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.char_indices() {
        if c == '+' && i == 0 {
            out.push(c);
        } else if c.is_ascii_digit() {
            out.push(c);
        }
    }
    out
}

fn normalize_e164(raw: &str) -> Result<String, SmsError> {
    let s = compact(raw);
    if s.is_empty() || s == "+" {
        return Err(SmsError::Normalization(
            "phone number contains no digits".into(),
        ));
    }

    let candidate = if s.starts_with('+') { s } else { format!("+{s}") };

    let digits = &candidate[1..];
    if digits.len() < 10 || digits.len() > 15 {
        return Err(SmsError::Normalization(format!(
            "phone number must have 10-15 digits, got {}",
            digits.len()
        )));
    }

    Ok(candidate)
}

fn normalize_kenya(raw: &str) -> Result<String, SmsError> {
    let s = compact(raw);
    let digits = s.strip_prefix('+').unwrap_or(&s);
    if digits.is_empty() {
        return Err(SmsError::Normalization(
            "phone number contains no digits".into(),
        ));
    }

    let rewritten = if let Some(rest) = digits.strip_prefix(KE_COUNTRY_CODE) {
        format!("{KE_COUNTRY_CODE}{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("{KE_COUNTRY_CODE}{rest}")
    } else if digits.starts_with('7') {
        format!("{KE_COUNTRY_CODE}{digits}")
    } else {
        return Err(SmsError::Normalization(format!(
            "unrecognized Kenyan number shape: {}",
            mask(raw)
        )));
    };

    if rewritten.len() != KE_MSISDN_DIGITS {
        return Err(SmsError::Normalization(format!(
            "Kenyan number must have {KE_MSISDN_DIGITS} digits after rewriting, got {}",
            rewritten.len()
        )));
    }

    Ok(format!("+{rewritten}"))
}

/// Mask a phone number for log output, keeping the last 4 digits.
pub fn mask(phone: &str) -> String {
    if phone.len() <= 4 {
        return "*".repeat(phone.len());
    }
    let visible = &phone[phone.len() - 4..];
    format!("{}{}", "*".repeat(phone.len() - 4), visible)
}

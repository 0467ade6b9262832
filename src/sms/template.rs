use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::sms::error::SmsError;

// Simple-template tokens (legacy bracket style).
pub const PARENT_NAME: &str = "[PARENT_NAME]";
pub const CHILD_NAME: &str = "[CHILD_NAME]";

/// Message category. Stored in sms_log.message_kind as smallint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum MessageKind {
    Registration = 0,
    Reminder = 1,
    Missed = 2,
    Rescheduled = 3,
    Custom = 4,
}

impl MessageKind {
    /// Wire name used by the gateway microservice `messageType` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Registration => "registration",
            MessageKind::Reminder => "reminder",
            MessageKind::Missed => "missed",
            MessageKind::Rescheduled => "rescheduled",
            MessageKind::Custom => "custom",
        }
    }

    /// Map the admin UI template selector to a kind. `upcoming` is the UI
    /// name for reminder messages; registration is not selectable from the
    /// broadcast form.
    pub fn from_selector(selector: &str) -> Result<Self, SmsError> {
        match selector {
            "missed" => Ok(MessageKind::Missed),
            "upcoming" => Ok(MessageKind::Reminder),
            "rescheduled" => Ok(MessageKind::Rescheduled),
            "custom" => Ok(MessageKind::Custom),
            other => Err(SmsError::InvalidRequest(format!(
                "unknown template selector: {other}"
            ))),
        }
    }
}

/// Per-recipient values for the simple bracket templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleValues<'a> {
    pub guardian_name: Option<&'a str>,
    pub child_name: Option<&'a str>,
}

/// Literal find/replace of `[PARENT_NAME]` / `[CHILD_NAME]`. Case-sensitive,
/// every occurrence, no escaping. A missing value substitutes the empty
/// string unless `strict` is set, in which case the render is rejected as a
/// template-configuration defect.
pub fn render_simple(
    body: &str,
    values: SimpleValues<'_>,
    strict: bool,
) -> Result<String, SmsError> {
    if strict {
        if body.contains(PARENT_NAME) && values.guardian_name.is_none() {
            return Err(SmsError::InvalidRequest(format!(
                "no value bound for {PARENT_NAME}"
            )));
        }
        if body.contains(CHILD_NAME) && values.child_name.is_none() {
            return Err(SmsError::InvalidRequest(format!(
                "no value bound for {CHILD_NAME}"
            )));
        }
    }

    Ok(body
        .replace(PARENT_NAME, values.guardian_name.unwrap_or(""))
        .replace(CHILD_NAME, values.child_name.unwrap_or("")))
}

/// Reject a body that still carries a brace-style `{placeholder}` token.
/// The broadcast flow binds no named values, so any such token would reach
/// the gateway unresolved. Only checked in strict mode; legacy behavior lets
/// the literal token through.
pub fn ensure_no_unbound_named(body: &str) -> Result<(), SmsError> {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = body[i + 1..].find('}') {
                let inner = &body[i + 1..i + 1 + close];
                if !inner.is_empty()
                    && inner
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c == '_')
                {
                    return Err(SmsError::InvalidRequest(format!(
                        "unbound placeholder {{{inner}}} in message body"
                    )));
                }
                i += close + 2;
                continue;
            }
        }
        i += 1;
    }
    Ok(())
}

/// One row of a child's vaccination schedule, as rendered into the
/// registration message.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub vaccine_name: String,
    pub dose_number: i32,
    pub target_disease: String,
    pub due_date: NaiveDate,
}

const MAX_RENDERED_DATES: usize = 2;

/// Build the multi-line "registration with schedule" message.
///
/// Future-dated entries (due_date >= today, calendar comparison) are grouped
/// by date ascending; at most the first two dates are rendered in full and
/// any remainder collapses to a "+N more" line. An empty schedule and an
/// all-past schedule each substitute their own fallback sentence.
pub fn render_registration(
    guardian_name: &str,
    child_name: &str,
    entries: &[ScheduleEntry],
    today: NaiveDate,
) -> String {
    let mut message = format!(
        "Dear {guardian_name}, {child_name} has been registered for immunization."
    );

    if entries.is_empty() {
        message.push_str(
            " A vaccination schedule will be provided by a healthcare worker at your next visit.",
        );
        return message;
    }

    let mut by_date: BTreeMap<NaiveDate, Vec<&ScheduleEntry>> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.due_date >= today) {
        by_date.entry(entry.due_date).or_default().push(entry);
    }

    if by_date.is_empty() {
        message.push_str(
            " All scheduled doses are past due. Please consult your health facility for an updated schedule.",
        );
        return message;
    }

    message.push_str(" Upcoming vaccinations:");
    for (date, group) in by_date.iter().take(MAX_RENDERED_DATES) {
        let doses = group
            .iter()
            .map(|e| {
                format!(
                    "{} (Dose {}, {})",
                    e.vaccine_name, e.dose_number, e.target_disease
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        message.push_str(&format!(" {}: {}.", date.format("%d %b %Y"), doses));
    }

    let omitted = by_date.len().saturating_sub(MAX_RENDERED_DATES);
    if omitted > 0 {
        message.push_str(&format!(" +{omitted} more visit date(s) to follow."));
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(vaccine: &str, dose: i32, disease: &str, due: NaiveDate) -> ScheduleEntry {
        ScheduleEntry {
            vaccine_name: vaccine.to_string(),
            dose_number: dose,
            target_disease: disease.to_string(),
            due_date: due,
        }
    }

    #[test]
    fn simple_render_is_idempotent_without_placeholders() {
        let body = "Clinic open on Monday.";
        let out = render_simple(body, SimpleValues::default(), false).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn simple_render_replaces_every_occurrence() {
        let body = "Hi [PARENT_NAME], [CHILD_NAME] is due. Thanks, [PARENT_NAME]!";
        let out = render_simple(
            body,
            SimpleValues {
                guardian_name: Some("Mary"),
                child_name: Some("Amani"),
            },
            false,
        )
        .unwrap();
        assert_eq!(out, "Hi Mary, Amani is due. Thanks, Mary!");
    }

    #[test]
    fn simple_render_substitutes_empty_for_missing_value() {
        let body = "Hi [PARENT_NAME]";
        let out = render_simple(body, SimpleValues::default(), false).unwrap();
        assert_eq!(out, "Hi ");
    }

    #[test]
    fn strict_mode_rejects_missing_value() {
        let body = "Hi [PARENT_NAME]";
        let err = render_simple(body, SimpleValues::default(), true);
        assert!(err.is_err());
    }

    #[test]
    fn unbound_named_placeholder_detected() {
        assert!(ensure_no_unbound_named("Dose of {vaccine_name} due").is_err());
        assert!(ensure_no_unbound_named("No placeholders here").is_ok());
        // Braces around non-token text are left alone.
        assert!(ensure_no_unbound_named("Set {Limit} to 5").is_ok());
    }

    #[test]
    fn registration_empty_schedule_uses_worker_fallback() {
        let out = render_registration("Mary", "Amani", &[], date(2025, 6, 1));
        assert!(out.contains("provided by a healthcare worker"));
    }

    #[test]
    fn registration_all_past_advises_consultation() {
        let entries = vec![entry("BCG", 1, "Tuberculosis", date(2024, 1, 10))];
        let out = render_registration("Mary", "Amani", &entries, date(2025, 6, 1));
        assert!(out.contains("consult your health facility"));
    }

    #[test]
    fn registration_renders_first_two_dates_and_counts_rest() {
        let today = date(2025, 6, 1);
        let entries = vec![
            entry("OPV", 2, "Polio", date(2025, 7, 1)),
            entry("BCG", 1, "Tuberculosis", date(2025, 6, 15)),
            entry("Measles", 1, "Measles", date(2025, 9, 1)),
        ];
        let out = render_registration("Mary", "Amani", &entries, today);

        // First two dates chronologically.
        assert!(out.contains("15 Jun 2025"));
        assert!(out.contains("BCG (Dose 1, Tuberculosis)"));
        assert!(out.contains("01 Jul 2025"));
        // Third date collapses to the counter.
        assert!(!out.contains("01 Sep 2025"));
        assert!(out.contains("+1 more"));
    }

    #[test]
    fn registration_groups_same_day_doses_on_one_line() {
        let today = date(2025, 6, 1);
        let entries = vec![
            entry("OPV", 1, "Polio", date(2025, 6, 15)),
            entry("BCG", 1, "Tuberculosis", date(2025, 6, 15)),
        ];
        let out = render_registration("Mary", "Amani", &entries, today);
        assert!(out.contains("BCG (Dose 1, Tuberculosis); OPV (Dose 1, Polio)"));
        assert!(!out.contains("+"));
    }

    #[test]
    fn selector_maps_to_kind() {
        assert_eq!(
            MessageKind::from_selector("upcoming").unwrap(),
            MessageKind::Reminder
        );
        assert_eq!(
            MessageKind::from_selector("missed").unwrap(),
            MessageKind::Missed
        );
        assert!(MessageKind::from_selector("registration").is_err());
    }
}

//! Structured telemetry events for the call pipeline.
//!
//! Phone numbers never reach the log stream raw: they are obfuscated for
//! display and hashed for correlation.

use serde::Serialize;
use tracing::{info, warn};

use crate::crypto::{hash, obfuscate_phone_number};

pub(crate) const TARGET: &str = "telemetry::call_pipeline";
pub(crate) const EVENT_DIAL_REJECTED: &str = "dial_rejected";
pub(crate) const EVENT_SESSION_COMPLETED: &str = "session_completed";
pub(crate) const EVENT_RECORD_CREATED: &str = "record_created";
pub(crate) const EVENT_RECORD_CLASSIFIED: &str = "record_classified";
pub(crate) const EVENT_TRANSCRIPTION_FALLBACK: &str = "transcription_fallback";

const NUMBER_DIGEST_LEN: usize = 12;

fn number_digest(phone_number: &str) -> String {
    let mut digest = hash(phone_number);
    digest.truncate(NUMBER_DIGEST_LEN);
    digest
}

#[derive(Debug, Serialize)]
struct DialRejectedEvent {
    number: String,
    number_digest: String,
    reason: &'static str,
}

#[derive(Debug, Serialize)]
struct SessionCompletedEvent {
    session_id: String,
    number: String,
    number_digest: String,
    duration_seconds: u64,
}

#[derive(Debug, Serialize)]
struct RecordCreatedEvent {
    record_id: String,
    number: String,
    duration_seconds: u64,
}

#[derive(Debug, Serialize)]
struct RecordClassifiedEvent {
    record_id: String,
    category: &'static str,
    flagged: bool,
}

fn emit(event_name: &'static str, payload: impl Serialize) {
    match serde_json::to_string(&payload) {
        Ok(encoded) => info!(
            target: TARGET,
            event = event_name,
            payload = %encoded
        ),
        Err(err) => warn!(
            target: TARGET,
            event = event_name,
            %err,
            "failed to encode telemetry event"
        ),
    }
}

pub fn record_dial_rejected(phone_number: &str, reason: &'static str) {
    emit(
        EVENT_DIAL_REJECTED,
        DialRejectedEvent {
            number: obfuscate_phone_number(phone_number),
            number_digest: number_digest(phone_number),
            reason,
        },
    );
}

pub fn record_session_completed(session_id: &str, phone_number: &str, duration_seconds: u64) {
    emit(
        EVENT_SESSION_COMPLETED,
        SessionCompletedEvent {
            session_id: session_id.to_string(),
            number: obfuscate_phone_number(phone_number),
            number_digest: number_digest(phone_number),
            duration_seconds,
        },
    );
}

pub fn record_record_created(record_id: &str, phone_number: &str, duration_seconds: u64) {
    emit(
        EVENT_RECORD_CREATED,
        RecordCreatedEvent {
            record_id: record_id.to_string(),
            number: obfuscate_phone_number(phone_number),
            duration_seconds,
        },
    );
}

pub fn record_record_classified(record_id: &str, category: &'static str, flagged: bool) {
    emit(
        EVENT_RECORD_CLASSIFIED,
        RecordClassifiedEvent {
            record_id: record_id.to_string(),
            category,
            flagged,
        },
    );
}

pub fn record_transcription_fallback(error: &str) {
    warn!(
        target: TARGET,
        event = EVENT_TRANSCRIPTION_FALLBACK,
        error,
        "primary transcription unavailable, fallback engaged"
    );
}

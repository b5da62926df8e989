//! Finalized call records and their asynchronous classification.
//!
//! Records are created only for calls that meet the recording threshold.
//! Classification runs as a background task and writes its verdict exactly
//! once; the stored transcript stays encrypted at rest.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{classify, CallCategory};
use crate::session::RecordingSession;
use crate::telemetry::events::{record_record_classified, record_record_created};
use crate::transcription::{Artifact, TranscriptionAdapter};

/// Minimum call duration, in seconds, required to retain a call as a record.
pub const RECORDING_THRESHOLD_SECS: u64 = 180;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    pub phone_number: String,
    pub date: DateTime<Utc>,
    pub duration_seconds: u64,
    pub category: CallCategory,
    pub transcript: String,
    pub transcript_encrypted: bool,
    pub language: String,
    pub analyzed: bool,
    pub flagged: bool,
}

/// Store notifications surfaced to observers (UI, auto-blacklist policy).
#[derive(Debug, Clone)]
pub enum RecordEvent {
    Created {
        record_id: String,
    },
    Classified {
        record_id: String,
        category: CallCategory,
        flagged: bool,
    },
}

pub struct CallRecordStore {
    records: Mutex<Vec<CallRecord>>,
    in_flight: Mutex<HashSet<String>>,
    adapter: Arc<TranscriptionAdapter>,
    events_tx: broadcast::Sender<RecordEvent>,
}

impl CallRecordStore {
    pub fn new(adapter: Arc<TranscriptionAdapter>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            records: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            adapter,
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events_tx.subscribe()
    }

    /// Creates a record for the completed session when its duration meets
    /// the recording threshold. Short calls leave no trace.
    pub fn create_if_qualifying(
        &self,
        session: &RecordingSession,
        artifact: &Artifact,
    ) -> Option<CallRecord> {
        if session.duration_seconds < RECORDING_THRESHOLD_SECS {
            debug!(
                target: "call_records",
                duration = session.duration_seconds,
                threshold = RECORDING_THRESHOLD_SECS,
                "session below recording threshold, discarding artifact"
            );
            return None;
        }

        let record = CallRecord {
            id: Uuid::new_v4().to_string(),
            phone_number: session.phone_number.clone(),
            date: Utc::now(),
            duration_seconds: session.duration_seconds,
            category: CallCategory::Unknown,
            transcript: artifact.text.clone(),
            transcript_encrypted: artifact.encrypted,
            language: artifact.language.clone(),
            analyzed: false,
            flagged: false,
        };

        self.records
            .lock()
            .expect("records lock poisoned")
            .push(record.clone());
        record_record_created(&record.id, &record.phone_number, record.duration_seconds);
        let _ = self.events_tx.send(RecordEvent::Created {
            record_id: record.id.clone(),
        });
        Some(record)
    }

    /// Spawns the classification task for a record. Scheduling the same
    /// record twice is a no-op after the first completion.
    pub fn schedule_classification(self: &Arc<Self>, record_id: &str) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let record_id = record_id.to_string();
        tokio::spawn(async move {
            store.classify_record(&record_id);
        })
    }

    fn classify_record(&self, record_id: &str) {
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
            if !in_flight.insert(record_id.to_string()) {
                debug!(
                    target: "call_records",
                    record_id,
                    "classification already in flight"
                );
                return;
            }
        }

        self.classify_record_inner(record_id);

        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(record_id);
    }

    fn classify_record_inner(&self, record_id: &str) {
        let snapshot = {
            let records = self.records.lock().expect("records lock poisoned");
            match records.iter().find(|record| record.id == record_id) {
                Some(record) if record.analyzed => {
                    debug!(target: "call_records", record_id, "record already analyzed");
                    return;
                }
                Some(record) => Artifact {
                    audio: Bytes::new(),
                    text: record.transcript.clone(),
                    confidence: 0.0,
                    language: record.language.clone(),
                    encrypted: record.transcript_encrypted,
                },
                None => {
                    warn!(target: "call_records", record_id, "record not found");
                    return;
                }
            }
        };

        let revealed = match self.adapter.reveal(snapshot) {
            Ok(artifact) => artifact,
            Err(err) => {
                // Leave the record unanalyzed; a later schedule may succeed
                // once the token is available again.
                warn!(
                    target: "call_records",
                    record_id,
                    %err,
                    "could not reveal transcript for classification"
                );
                return;
            }
        };

        let verdict = classify(&revealed.text);

        {
            let mut records = self.records.lock().expect("records lock poisoned");
            let Some(record) = records.iter_mut().find(|record| record.id == record_id) else {
                return;
            };
            if record.analyzed {
                return;
            }
            record.category = verdict.category;
            record.flagged = verdict.flagged;
            record.analyzed = true;
        }

        info!(
            target: "call_records",
            record_id,
            category = verdict.category.as_str(),
            flagged = verdict.flagged,
            "record classified"
        );
        record_record_classified(record_id, verdict.category.as_str(), verdict.flagged);
        let _ = self.events_tx.send(RecordEvent::Classified {
            record_id: record_id.to_string(),
            category: verdict.category,
            flagged: verdict.flagged,
        });
    }

    pub fn list(&self) -> Vec<CallRecord> {
        self.records.lock().expect("records lock poisoned").clone()
    }

    pub fn get(&self, record_id: &str) -> Option<CallRecord> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .iter()
            .find(|record| record.id == record_id)
            .cloned()
    }

    /// Manual flag override from the operator.
    pub fn flag(&self, record_id: &str, flagged: bool) -> bool {
        let mut records = self.records.lock().expect("records lock poisoned");
        match records.iter_mut().find(|record| record.id == record_id) {
            Some(record) => {
                record.flagged = flagged;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, record_id: &str) -> bool {
        let mut records = self.records.lock().expect("records lock poisoned");
        let before = records.len();
        records.retain(|record| record.id != record_id);
        records.len() != before
    }

    pub fn clear(&self) {
        self.records.lock().expect("records lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{SecurityTokenStore, StaticVerifier};
    use crate::transcription::SampleTranscriber;
    use tokio::time::{timeout, Duration};

    fn session(duration_seconds: u64) -> RecordingSession {
        RecordingSession {
            id: Uuid::new_v4().to_string(),
            phone_number: "+15555550100".to_string(),
            start_time: Utc::now(),
            duration_seconds,
            is_active: false,
        }
    }

    fn adapter_with_token() -> (Arc<TranscriptionAdapter>, Arc<SecurityTokenStore>) {
        let tokens = Arc::new(SecurityTokenStore::in_memory());
        tokens
            .ensure_token(&StaticVerifier(true))
            .expect("token creation");
        let adapter = Arc::new(TranscriptionAdapter::with_engines(
            None,
            SampleTranscriber::with_seed(5),
            Arc::clone(&tokens),
        ));
        (adapter, tokens)
    }

    #[test]
    fn threshold_is_inclusive() {
        let (adapter, _tokens) = adapter_with_token();
        let store = CallRecordStore::new(adapter);
        let artifact = Artifact {
            audio: Bytes::new(),
            text: "plain".to_string(),
            confidence: 0.9,
            language: "en-US".to_string(),
            encrypted: false,
        };

        assert!(store
            .create_if_qualifying(&session(RECORDING_THRESHOLD_SECS - 1), &artifact)
            .is_none());
        assert!(store
            .create_if_qualifying(&session(RECORDING_THRESHOLD_SECS), &artifact)
            .is_some());
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn classification_reveals_and_writes_back_once() {
        let (adapter, tokens) = adapter_with_token();
        let store = Arc::new(CallRecordStore::new(Arc::clone(&adapter)));
        let token = tokens.token().expect("token present");

        let artifact = Artifact {
            audio: Bytes::new(),
            text: crate::crypto::encrypt("breaking news headlines", token.as_bytes())
                .expect("encrypt"),
            confidence: 0.9,
            language: "en-US".to_string(),
            encrypted: true,
        };
        let record = store
            .create_if_qualifying(&session(200), &artifact)
            .expect("record should qualify");
        assert!(!record.analyzed);
        assert_eq!(record.category, CallCategory::Unknown);

        let mut events = store.subscribe();
        store
            .schedule_classification(&record.id)
            .await
            .expect("classification task");

        let event = timeout(Duration::from_millis(500), events.recv())
            .await
            .expect("event timed out")
            .expect("event channel closed");
        match event {
            RecordEvent::Classified {
                record_id,
                category,
                flagged,
            } => {
                assert_eq!(record_id, record.id);
                assert_eq!(category, CallCategory::News);
                assert!(flagged);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let stored = store.get(&record.id).expect("record present");
        assert!(stored.analyzed);
        assert_eq!(stored.category, CallCategory::News);
        assert!(stored.flagged);
        // Transcript stays encrypted at rest.
        assert!(stored.transcript_encrypted);
        assert_ne!(stored.transcript, "breaking news headlines");
    }

    #[tokio::test]
    async fn reclassification_is_a_no_op() {
        let (adapter, tokens) = adapter_with_token();
        let store = Arc::new(CallRecordStore::new(adapter));
        let token = tokens.token().expect("token present");

        let artifact = Artifact {
            audio: Bytes::new(),
            text: crate::crypto::encrypt("the final score was great", token.as_bytes())
                .expect("encrypt"),
            confidence: 0.9,
            language: "en-US".to_string(),
            encrypted: true,
        };
        let record = store
            .create_if_qualifying(&session(181), &artifact)
            .expect("record should qualify");

        store
            .schedule_classification(&record.id)
            .await
            .expect("first classification");
        assert!(store.flag(&record.id, false));

        store
            .schedule_classification(&record.id)
            .await
            .expect("second classification");

        let stored = store.get(&record.id).expect("record present");
        // The second run must not re-apply the verdict over the manual flag.
        assert!(stored.analyzed);
        assert!(!stored.flagged);
        assert_eq!(stored.category, CallCategory::Sports);
    }

    #[tokio::test]
    async fn failed_reveal_leaves_record_unanalyzed() {
        let tokens = Arc::new(SecurityTokenStore::in_memory());
        tokens
            .ensure_token(&StaticVerifier(true))
            .expect("token creation");
        let adapter = Arc::new(TranscriptionAdapter::with_engines(
            None,
            SampleTranscriber::with_seed(5),
            tokens,
        ));
        let store = Arc::new(CallRecordStore::new(adapter));

        let artifact = Artifact {
            audio: Bytes::new(),
            text: "not a valid ciphertext".to_string(),
            confidence: 0.9,
            language: "en-US".to_string(),
            encrypted: true,
        };
        let record = store
            .create_if_qualifying(&session(240), &artifact)
            .expect("record should qualify");

        store
            .schedule_classification(&record.id)
            .await
            .expect("classification task");

        let stored = store.get(&record.id).expect("record present");
        assert!(!stored.analyzed);
        assert_eq!(stored.category, CallCategory::Unknown);
    }

    #[tokio::test]
    async fn remove_and_clear_round_out_the_store() {
        let (adapter, _tokens) = adapter_with_token();
        let store = CallRecordStore::new(adapter);
        let artifact = Artifact {
            audio: Bytes::new(),
            text: "plain".to_string(),
            confidence: 0.9,
            language: "en-US".to_string(),
            encrypted: false,
        };

        let first = store
            .create_if_qualifying(&session(190), &artifact)
            .expect("first record");
        store
            .create_if_qualifying(&session(200), &artifact)
            .expect("second record");

        assert!(store.remove(&first.id));
        assert!(!store.remove(&first.id));
        assert_eq!(store.list().len(), 1);

        store.clear();
        assert!(store.list().is_empty());
    }
}

//! Outgoing-call session manager.
//!
//! One dial attempt walks a fixed gate sequence (permission, security,
//! blacklist) before it may go active; at most one attempt holds the active
//! slot at a time. Leaving the active phase finalizes the call: audio is
//! captured, transcribed and encrypted, and a record is created when the
//! call met the recording threshold.

pub mod lifecycle;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{CallAudioSource, MockCallAudio};
use crate::blacklist::BlacklistGuard;
use crate::crypto::obfuscate_phone_number;
use crate::permission::{GrantAllBackend, PermissionGate, PermissionState};
use crate::records::{CallRecordStore, RECORDING_THRESHOLD_SECS};
use crate::security::{EnvironmentVerifier, HostEnvironmentVerifier, SecurityTokenStore};
use crate::telemetry::events::{record_dial_rejected, record_session_completed};
use crate::transcription::{TranscriptionAdapter, TranscriptionError, TranscriptionOptions};

use self::lifecycle::{DialPhase, SessionLifecycleUpdate};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Snapshot of one recording session, live or completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: String,
    pub phone_number: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub is_active: bool,
}

/// Pipeline tuning. The timer tick is the wall-clock length of one accrued
/// call second; tests shrink it so long calls replay in milliseconds.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub timer_tick: Duration,
    pub transcription: TranscriptionOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timer_tick: Duration::from_secs(1),
            transcription: TranscriptionOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DialError {
    #[error("recording is disabled")]
    RecordingDisabled,
    #[error("recording permission denied")]
    PermissionDenied,
    #[error("security check failed")]
    SecurityCheckFailed,
    #[error("number is blacklisted")]
    NumberBlacklisted,
    #[error("another session is already active")]
    SessionAlreadyActive,
    #[error("call audio capture failed: {0}")]
    AudioCapture(String),
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
}

impl DialError {
    /// Stable machine-readable reason, used in lifecycle updates and
    /// telemetry.
    pub fn reason(&self) -> &'static str {
        match self {
            DialError::RecordingDisabled => "recording_disabled",
            DialError::PermissionDenied => "permission_denied",
            DialError::SecurityCheckFailed => "security_failed",
            DialError::NumberBlacklisted => "blacklisted",
            DialError::SessionAlreadyActive => "session_in_progress",
            DialError::AudioCapture(_) => "audio_capture_failed",
            DialError::Transcription(_) => "encryption_failed",
        }
    }
}

/// Result of an admitted dial. `record_id` is set only when the call met
/// the recording threshold.
#[derive(Debug, Clone)]
pub struct DialOutcome {
    pub session: RecordingSession,
    pub record_id: Option<String>,
}

struct ActiveCall {
    session_id: String,
    phone_number: String,
    started_at: DateTime<Utc>,
    duration: Arc<AtomicU64>,
    stop_tx: watch::Sender<bool>,
}

pub struct CallSessionManager {
    config: PipelineConfig,
    permissions: Arc<PermissionGate>,
    tokens: Arc<SecurityTokenStore>,
    verifier: Arc<dyn EnvironmentVerifier>,
    blacklist: Arc<BlacklistGuard>,
    adapter: Arc<TranscriptionAdapter>,
    records: Arc<CallRecordStore>,
    audio: Arc<dyn CallAudioSource>,
    recording_enabled: AtomicBool,
    active: Mutex<Option<ActiveCall>>,
    lifecycle_tx: broadcast::Sender<SessionLifecycleUpdate>,
}

impl CallSessionManager {
    /// Builds the default production wiring: file-backed token store under
    /// the user data directory, host environment verifier, and whatever
    /// speech engine the environment configures.
    pub fn new() -> Result<Self> {
        let tokens = Arc::new(
            SecurityTokenStore::file(default_token_path())
                .context("failed to open security token store")?,
        );
        let adapter = Arc::new(TranscriptionAdapter::new(Arc::clone(&tokens)));
        Ok(Self::with_components(
            PipelineConfig::default(),
            Arc::new(PermissionGate::new(Arc::new(GrantAllBackend))),
            tokens,
            Arc::new(HostEnvironmentVerifier),
            Arc::new(BlacklistGuard::new()),
            Arc::clone(&adapter),
            Arc::new(CallRecordStore::new(adapter)),
            Arc::new(MockCallAudio),
        ))
    }

    /// Wires the manager from externally constructed components. The shell
    /// embedding this core swaps in real OS backends here.
    #[allow(clippy::too_many_arguments)]
    pub fn with_components(
        config: PipelineConfig,
        permissions: Arc<PermissionGate>,
        tokens: Arc<SecurityTokenStore>,
        verifier: Arc<dyn EnvironmentVerifier>,
        blacklist: Arc<BlacklistGuard>,
        adapter: Arc<TranscriptionAdapter>,
        records: Arc<CallRecordStore>,
        audio: Arc<dyn CallAudioSource>,
    ) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            config,
            permissions,
            tokens,
            verifier,
            blacklist,
            adapter,
            records,
            audio,
            recording_enabled: AtomicBool::new(false),
            active: Mutex::new(None),
            lifecycle_tx,
        }
    }

    /// Startup hook: logs the pipeline's readiness so operators can see the
    /// gate states before the first dial.
    pub async fn run(&self) -> Result<()> {
        info!(
            target: "session_manager",
            permission = self.permission_state_str(),
            token_present = self.tokens.has_token(),
            recording_enabled = self.recording_enabled(),
            "call pipeline ready"
        );
        Ok(())
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionLifecycleUpdate> {
        self.lifecycle_tx.subscribe()
    }

    pub fn blacklist(&self) -> Arc<BlacklistGuard> {
        Arc::clone(&self.blacklist)
    }

    pub fn records(&self) -> Arc<CallRecordStore> {
        Arc::clone(&self.records)
    }

    pub fn permission_state(&self) -> PermissionState {
        self.permissions.check_permission()
    }

    /// Runs the host grant flow outside of a dial, mirroring an explicit
    /// "grant permissions" action in the shell.
    pub async fn request_permission(&self) -> bool {
        self.permissions.request_permission().await
    }

    pub fn security_ready(&self) -> bool {
        self.tokens.has_token()
    }

    pub fn recording_enabled(&self) -> bool {
        self.recording_enabled.load(Ordering::SeqCst)
    }

    pub fn set_recording_enabled(&self, enabled: bool) {
        self.recording_enabled.store(enabled, Ordering::SeqCst);
        info!(target: "session_manager", enabled, "recording toggle changed");
    }

    /// Snapshot of the in-flight session, if any. The duration advances as
    /// the call timer ticks.
    pub fn active_session(&self) -> Option<RecordingSession> {
        self.active
            .lock()
            .expect("active slot lock poisoned")
            .as_ref()
            .map(|call| RecordingSession {
                id: call.session_id.clone(),
                phone_number: call.phone_number.clone(),
                start_time: call.started_at,
                duration_seconds: call.duration.load(Ordering::SeqCst),
                is_active: true,
            })
    }

    /// Requests early termination of the active call. Returns whether a
    /// call was active; repeated calls are harmless.
    pub fn stop_active(&self) -> bool {
        let guard = self.active.lock().expect("active slot lock poisoned");
        match guard.as_ref() {
            Some(call) => {
                debug!(
                    target: "session_manager",
                    session_id = %call.session_id,
                    "stop requested for active session"
                );
                let _ = call.stop_tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Admits and runs one outgoing call end to end. Resolves once the call
    /// ends (target duration reached or [`stop_active`](Self::stop_active)
    /// called) and any qualifying record has been created.
    pub async fn dial(
        &self,
        phone_number: &str,
        target_duration_secs: u64,
    ) -> Result<DialOutcome, DialError> {
        if !self.recording_enabled() {
            return Err(self.reject(None, phone_number, DialError::RecordingDisabled));
        }

        let attempt_id = Uuid::new_v4().to_string();
        info!(
            target: "session_manager",
            session_id = %attempt_id,
            number = %obfuscate_phone_number(phone_number),
            target_duration_secs,
            "dial intent received"
        );

        // Fail fast while another call is live, before any gate runs: a
        // busy line must not prompt the permission backend or leak a
        // gate-specific rejection for the second number.
        if self
            .active
            .lock()
            .expect("active slot lock poisoned")
            .is_some()
        {
            return Err(self.reject(
                Some(&attempt_id),
                phone_number,
                DialError::SessionAlreadyActive,
            ));
        }

        // Gate walk. A previously granted permission skips the prompt phase;
        // a prior denial re-enters it.
        let mut phase = if self.permission_state() == PermissionState::Granted {
            DialPhase::SecurityPending
        } else {
            DialPhase::PermissionPending
        };

        while phase != DialPhase::Active {
            self.emit(SessionLifecycleUpdate::new(&attempt_id, phase));
            phase = match phase {
                DialPhase::PermissionPending => {
                    if self.permissions.request_permission().await {
                        DialPhase::SecurityPending
                    } else {
                        return Err(self.reject(
                            Some(&attempt_id),
                            phone_number,
                            DialError::PermissionDenied,
                        ));
                    }
                }
                DialPhase::SecurityPending => {
                    match self.tokens.ensure_token(self.verifier.as_ref()) {
                        Ok(_) => DialPhase::BlacklistCheck,
                        Err(err) => {
                            warn!(target: "session_manager", %err, "security gate refused dial");
                            return Err(self.reject(
                                Some(&attempt_id),
                                phone_number,
                                DialError::SecurityCheckFailed,
                            ));
                        }
                    }
                }
                DialPhase::BlacklistCheck => {
                    if self.blacklist.is_blocked(phone_number) {
                        return Err(self.reject(
                            Some(&attempt_id),
                            phone_number,
                            DialError::NumberBlacklisted,
                        ));
                    }
                    DialPhase::Active
                }
                // The gate walk only visits the three pending phases.
                DialPhase::Idle
                | DialPhase::Active
                | DialPhase::Finalizing
                | DialPhase::Rejected => break,
            };
        }

        // Claim the single active slot. A concurrent dial that lost the race
        // fails fast instead of queueing.
        let (stop_tx, stop_rx) = watch::channel(false);
        let duration = Arc::new(AtomicU64::new(0));
        let started_at = Utc::now();
        {
            let mut slot = self.active.lock().expect("active slot lock poisoned");
            if slot.is_some() {
                drop(slot);
                return Err(self.reject(
                    Some(&attempt_id),
                    phone_number,
                    DialError::SessionAlreadyActive,
                ));
            }
            *slot = Some(ActiveCall {
                session_id: attempt_id.clone(),
                phone_number: phone_number.to_string(),
                started_at,
                duration: Arc::clone(&duration),
                stop_tx,
            });
        }

        self.emit(SessionLifecycleUpdate::new(&attempt_id, DialPhase::Active));
        info!(target: "session_manager", session_id = %attempt_id, "call active, recording");

        let timer = tokio::spawn(run_timer(
            self.config.timer_tick,
            target_duration_secs,
            Arc::clone(&duration),
            stop_rx,
        ));
        let final_duration = match timer.await {
            Ok(elapsed) => elapsed,
            Err(err) => {
                warn!(target: "session_manager", %err, "call timer task failed");
                duration.load(Ordering::SeqCst)
            }
        };

        // Release the slot before any fallible finalization so a failure
        // cannot wedge the machine in the active phase.
        self.active
            .lock()
            .expect("active slot lock poisoned")
            .take();
        self.emit(SessionLifecycleUpdate::new(&attempt_id, DialPhase::Finalizing));

        let session = RecordingSession {
            id: attempt_id.clone(),
            phone_number: phone_number.to_string(),
            start_time: started_at,
            duration_seconds: final_duration,
            is_active: false,
        };
        record_session_completed(&session.id, phone_number, final_duration);

        let record_id = if final_duration >= RECORDING_THRESHOLD_SECS {
            let audio = match self.audio.capture(phone_number, final_duration).await {
                Ok(audio) => audio,
                Err(err) => {
                    return Err(self.reject(
                        Some(&attempt_id),
                        phone_number,
                        DialError::AudioCapture(err.to_string()),
                    ));
                }
            };
            let artifact = match self
                .adapter
                .transcribe(audio, &self.config.transcription)
                .await
            {
                Ok(artifact) => artifact,
                Err(err) => {
                    return Err(self.reject(Some(&attempt_id), phone_number, err.into()));
                }
            };
            self.records
                .create_if_qualifying(&session, &artifact)
                .map(|record| {
                    self.records.schedule_classification(&record.id);
                    record.id
                })
        } else {
            debug!(
                target: "session_manager",
                session_id = %attempt_id,
                duration = final_duration,
                threshold = RECORDING_THRESHOLD_SECS,
                "call below recording threshold, nothing kept"
            );
            None
        };

        self.emit(SessionLifecycleUpdate::completed(
            &attempt_id,
            session.clone(),
            record_id.clone(),
        ));
        Ok(DialOutcome { session, record_id })
    }

    fn reject(&self, attempt_id: Option<&str>, phone_number: &str, err: DialError) -> DialError {
        warn!(
            target: "session_manager",
            number = %obfuscate_phone_number(phone_number),
            reason = err.reason(),
            "dial attempt rejected"
        );
        record_dial_rejected(phone_number, err.reason());
        if let Some(id) = attempt_id {
            self.emit(SessionLifecycleUpdate::rejected(id, err.reason()));
        }
        err
    }

    fn emit(&self, update: SessionLifecycleUpdate) {
        let _ = self.lifecycle_tx.send(update);
    }

    fn permission_state_str(&self) -> &'static str {
        match self.permission_state() {
            PermissionState::Unknown => "unknown",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        }
    }
}

/// Drives the call clock. One tick accrues one second; the timer ends at the
/// target duration or as soon as the stop channel flips.
async fn run_timer(
    tick: Duration,
    target_seconds: u64,
    duration: Arc<AtomicU64>,
    mut stop_rx: watch::Receiver<bool>,
) -> u64 {
    if target_seconds == 0 {
        return 0;
    }

    let mut interval = tokio::time::interval(tick);
    // The first interval tick completes immediately; consume it so every
    // subsequent tick represents one elapsed second.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let elapsed = duration.fetch_add(1, Ordering::SeqCst) + 1;
                if elapsed >= target_seconds {
                    break;
                }
            }
            changed = stop_rx.changed() => {
                match changed {
                    Ok(()) if *stop_rx.borrow() => break,
                    Ok(()) => {}
                    // Sender dropped: the session owner is gone.
                    Err(_) => break,
                }
            }
        }
    }

    duration.load(Ordering::SeqCst)
}

/// Token file under the user data directory, with a relative fallback when
/// neither `XDG_DATA_HOME` nor `HOME` is set.
fn default_token_path() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".local").join("share"))
        })
        .map(|dir| dir.join("callshield"))
        .unwrap_or_else(|| PathBuf::from(".callshield"))
        .join("security_token")
}

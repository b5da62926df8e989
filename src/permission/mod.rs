//! Permission gate for the capability set required to record calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Capabilities the recording pipeline needs from the host OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    AudioCapture,
    CallStateRead,
    CallLogRead,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AudioCapture => "record_audio",
            Capability::CallStateRead => "read_phone_state",
            Capability::CallLogRead => "read_call_log",
        }
    }
}

/// Everything [`PermissionGate::request_permission`] asks the backend for.
pub const REQUIRED_CAPABILITIES: [Capability; 3] = [
    Capability::AudioCapture,
    Capability::CallStateRead,
    Capability::CallLogRead,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Unknown,
    Granted,
    Denied,
}

/// Drives the host's grant flow. Object-safe so tests can program outcomes.
#[async_trait]
pub trait PermissionBackend: Send + Sync {
    async fn request(&self, capabilities: &[Capability]) -> Result<bool>;
}

/// Backend used when no OS integration is wired in. Grants everything.
#[derive(Default)]
pub struct GrantAllBackend;

#[async_trait]
impl PermissionBackend for GrantAllBackend {
    async fn request(&self, _capabilities: &[Capability]) -> Result<bool> {
        Ok(true)
    }
}

struct GateState {
    state: PermissionState,
    held: HashSet<Capability>,
}

pub struct PermissionGate {
    backend: Arc<dyn PermissionBackend>,
    state: Mutex<GateState>,
}

impl PermissionGate {
    pub fn new(backend: Arc<dyn PermissionBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(GateState {
                state: PermissionState::Unknown,
                held: HashSet::new(),
            }),
        }
    }

    /// Pure query; never triggers a grant flow.
    pub fn check_permission(&self) -> PermissionState {
        self.state.lock().expect("permission lock poisoned").state
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let guard = self.state.lock().expect("permission lock poisoned");
        let mut held: Vec<Capability> = guard.held.iter().copied().collect();
        held.sort_by_key(Capability::as_str);
        held
    }

    /// Runs the grant flow and records the outcome. Idempotent after a
    /// grant: further calls return true without re-prompting. After a
    /// denial the backend is prompted again.
    pub async fn request_permission(&self) -> bool {
        if self.check_permission() == PermissionState::Granted {
            return true;
        }

        match self.backend.request(&REQUIRED_CAPABILITIES).await {
            Ok(true) => {
                let mut guard = self.state.lock().expect("permission lock poisoned");
                guard.state = PermissionState::Granted;
                guard.held = REQUIRED_CAPABILITIES.iter().copied().collect();
                info!(target: "permission", "recording capabilities granted");
                true
            }
            Ok(false) => {
                let mut guard = self.state.lock().expect("permission lock poisoned");
                guard.state = PermissionState::Denied;
                guard.held.clear();
                info!(target: "permission", "recording capabilities denied");
                false
            }
            Err(err) => {
                warn!(
                    target: "permission",
                    %err,
                    "permission request failed, treating as denied"
                );
                let mut guard = self.state.lock().expect("permission lock poisoned");
                guard.state = PermissionState::Denied;
                guard.held.clear();
                false
            }
        }
    }
}

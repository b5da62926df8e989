//! Security token store and environment verification.
//!
//! The token is the process-wide secret that keys every at-rest artifact.
//! It is created exactly once, and only after the environment verifier has
//! approved the host. Losing the token makes previously encrypted artifacts
//! permanently unreadable; that trade-off is accepted.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tracing::{info, warn};

use crate::crypto;

/// Environment variable that forces [`HostEnvironmentVerifier`] to fail.
/// Stands in for debugger/emulator/tamper detection on a real device.
pub const BLOCK_RECORDING_ENV: &str = "CALLSHIELD_BLOCK_RECORDING";

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("security token must not be empty")]
    EmptyToken,
    #[error("environment verification failed")]
    CheckFailed,
    #[error("persisted token is corrupt")]
    Corrupt,
    #[error("token storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque symmetric key material. Non-empty by construction.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityToken(Vec<u8>);

impl SecurityToken {
    pub fn new(bytes: Vec<u8>) -> Result<Self, SecurityError> {
        if bytes.is_empty() {
            return Err(SecurityError::EmptyToken);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityToken({} bytes)", self.0.len())
    }
}

/// Pluggable environment integrity check. Returns false under any condition
/// that should block recording.
pub trait EnvironmentVerifier: Send + Sync {
    fn verify(&self) -> bool;
}

/// Default verifier. Approves the host unless an explicit block marker is
/// present in the process environment.
#[derive(Default)]
pub struct HostEnvironmentVerifier;

impl EnvironmentVerifier for HostEnvironmentVerifier {
    fn verify(&self) -> bool {
        if std::env::var_os(BLOCK_RECORDING_ENV).is_some() {
            warn!(
                target: "security",
                marker = BLOCK_RECORDING_ENV,
                "environment block marker present, refusing verification"
            );
            return false;
        }
        true
    }
}

/// Fixed-outcome verifier for tests and forced-degraded deployments.
pub struct StaticVerifier(pub bool);

impl EnvironmentVerifier for StaticVerifier {
    fn verify(&self) -> bool {
        self.0
    }
}

enum TokenBacking {
    File(PathBuf),
    Memory,
}

/// Process-wide store for the security token. File-backed in production,
/// in-memory for tests.
pub struct SecurityTokenStore {
    backing: TokenBacking,
    cached: Mutex<Option<SecurityToken>>,
}

impl SecurityTokenStore {
    /// Opens a file-backed store, loading any previously persisted token.
    pub fn file(path: PathBuf) -> Result<Self, SecurityError> {
        let cached = Self::load_from(&path)?;
        Ok(Self {
            backing: TokenBacking::File(path),
            cached: Mutex::new(cached),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backing: TokenBacking::Memory,
            cached: Mutex::new(None),
        }
    }

    pub fn has_token(&self) -> bool {
        self.cached.lock().expect("token lock poisoned").is_some()
    }

    pub fn token(&self) -> Option<SecurityToken> {
        self.cached.lock().expect("token lock poisoned").clone()
    }

    pub fn set_token(&self, token: SecurityToken) -> Result<(), SecurityError> {
        if let TokenBacking::File(path) = &self.backing {
            Self::persist_to(path, &token)?;
        }
        *self.cached.lock().expect("token lock poisoned") = Some(token);
        Ok(())
    }

    /// Returns the current token, creating one on first use. Token creation
    /// is gated on the environment verifier; a failed check leaves the store
    /// empty.
    pub fn ensure_token(
        &self,
        verifier: &dyn EnvironmentVerifier,
    ) -> Result<SecurityToken, SecurityError> {
        if let Some(token) = self.token() {
            return Ok(token);
        }

        if !verifier.verify() {
            return Err(SecurityError::CheckFailed);
        }

        let token = SecurityToken::new(crypto::generate_token())?;
        self.set_token(token.clone())?;
        info!(target: "security", "security token created and persisted");
        Ok(token)
    }

    fn load_from(path: &Path) -> Result<Option<SecurityToken>, SecurityError> {
        if !path.exists() {
            return Ok(None);
        }
        let encoded = fs::read_to_string(path)?;
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(SecurityError::Corrupt);
        }
        let bytes = BASE64
            .decode(trimmed.as_bytes())
            .map_err(|_| SecurityError::Corrupt)?;
        SecurityToken::new(bytes)
            .map(Some)
            .map_err(|_| SecurityError::Corrupt)
    }

    fn persist_to(path: &Path, token: &SecurityToken) -> Result<(), SecurityError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = BASE64.encode(token.as_bytes());
        let mut tmp = path.to_path_buf();
        tmp.set_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(encoded.as_bytes())?;
            file.flush()?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(tmp, path)?;
        Ok(())
    }
}

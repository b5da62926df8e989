//! CallShield Core Library
//!
//! This crate provides the core functionality for the CallShield service:
//! outgoing call gating, recording, encrypted transcription, content
//! classification and call record management.

pub mod audio;
pub mod blacklist;
pub mod classify;
pub mod crypto;
pub mod permission;
pub mod records;
pub mod security;
pub mod session;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod test_support;
pub mod transcription;

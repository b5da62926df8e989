//! Call audio capture seam.
//!
//! No real telephony integration exists in this core; the default source
//! synthesises a placeholder payload sized to the call length so the rest
//! of the pipeline exercises real byte handling.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait CallAudioSource: Send + Sync {
    async fn capture(&self, phone_number: &str, duration_seconds: u64) -> Result<Bytes>;
}

/// Placeholder source standing in for the device's call audio tap.
#[derive(Default)]
pub struct MockCallAudio;

const WAV_STUB_HEADER: &[u8] = b"RIFF\0\0\0\0WAVEfmt ";

#[async_trait]
impl CallAudioSource for MockCallAudio {
    async fn capture(&self, _phone_number: &str, duration_seconds: u64) -> Result<Bytes> {
        let mut payload = Vec::with_capacity(WAV_STUB_HEADER.len() + duration_seconds as usize);
        payload.extend_from_slice(WAV_STUB_HEADER);
        payload.resize(payload.len() + duration_seconds as usize, 0);
        Ok(Bytes::from(payload))
    }
}

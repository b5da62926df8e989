//! Speech-to-text adapter with a primary cloud engine and a built-in
//! fallback, plus at-rest encryption of the resulting transcript.
//!
//! The primary engine speaks the Google Cloud Speech-to-Text request shape.
//! Any primary failure, including missing credentials, falls back to a
//! sample-text generator so the rest of the pipeline keeps working in
//! demos and tests. Encryption failures never degrade to plaintext.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto::{self, CryptoError};
use crate::security::SecurityTokenStore;
use crate::telemetry::events::record_transcription_fallback;

/// Environment variable holding the cloud speech API key.
pub const SPEECH_API_KEY_ENV: &str = "CALLSHIELD_SPEECH_API_KEY";
const SPEECH_ENDPOINT: &str = "https://speech.googleapis.com/v1/speech:recognize";

#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Encryption was requested but could not be performed. Fatal: the
    /// artifact must not persist as plaintext labelled encrypted.
    #[error("transcript encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("transcript decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("no security token available")]
    NoToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOptions {
    pub language_code: String,
    pub alternative_language_code: String,
    pub punctuation: bool,
    pub filter_profanity: bool,
    pub encrypt: bool,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            language_code: "he-IL".to_string(),
            alternative_language_code: "en-US".to_string(),
            punctuation: true,
            filter_profanity: true,
            encrypt: true,
        }
    }
}

/// Audio/transcript bundle produced for one completed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(skip, default)]
    pub audio: Bytes,
    pub text: String,
    pub confidence: f32,
    pub language: String,
    pub encrypted: bool,
}

/// Raw engine output before language annotation and encryption.
#[derive(Debug, Clone)]
pub struct RawTranscription {
    pub text: String,
    pub confidence: f32,
}

#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: Bytes,
        options: &TranscriptionOptions,
    ) -> Result<RawTranscription>;
}

/// Primary engine backed by the Google Cloud Speech-to-Text REST API.
pub struct CloudSpeechTranscriber {
    api_key: String,
    endpoint: String,
}

impl CloudSpeechTranscriber {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            endpoint: SPEECH_ENDPOINT.to_string(),
        }
    }

    /// Reads the API key from the environment. `None` means no credentials
    /// are configured and the adapter will use the fallback engine.
    pub fn from_env() -> Option<Self> {
        std::env::var(SPEECH_API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl SpeechTranscriber for CloudSpeechTranscriber {
    async fn transcribe(
        &self,
        audio: Bytes,
        options: &TranscriptionOptions,
    ) -> Result<RawTranscription> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let request = serde_json::json!({
            "config": {
                "languageCode": options.language_code,
                "alternativeLanguageCodes": [options.alternative_language_code],
                "enableAutomaticPunctuation": options.punctuation,
                "profanityFilter": options.filter_profanity,
                "audioChannelCount": 1,
                "maxAlternatives": 1,
            },
            "audio": { "content": BASE64.encode(&audio) },
        });

        // ureq is blocking; keep it off the runtime threads.
        let response = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
            let response = ureq::post(&url)
                .send_json(request)
                .context("speech api request failed")?;
            response
                .into_json::<serde_json::Value>()
                .context("speech api returned malformed json")
        })
        .await
        .context("speech api task panicked")??;

        let alternative = response
            .pointer("/results/0/alternatives/0")
            .ok_or_else(|| anyhow!("speech api response has no alternatives"))?;
        let text = alternative
            .get("transcript")
            .and_then(|value| value.as_str())
            .ok_or_else(|| anyhow!("speech api response has no transcript"))?
            .to_string();
        let confidence = alternative
            .get("confidence")
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0) as f32;

        Ok(RawTranscription { text, confidence })
    }
}

/// Bilingual sample corpus used by the fallback engine. Mirrors the demo
/// transcripts the classifier rules were tuned against.
const SAMPLE_TRANSCRIPTS: [&str; 12] = [
    "שלום, אני מתקשר בנוגע למנוי שלך לשירות החדשות שלנו. יש לנו הצעה מיוחדת עבורך היום.",
    "תודה שהתקשרת למערכת האוטומטית שלנו. הקש 1 למכירות, הקש 2 לתמיכה, או המתן על הקו.",
    "המשחק אתמול היה מדהים! ראית את השער בדקה האחרונה? הפרשנים הספורטיביים השתגעו.",
    "רציתי להודיע לך על שירות התוכן הפרימיום שלנו שיש לו חיוב חודשי שיתווסף לחשבון שלך.",
    "זוהי שיחה רגילה ללא תוכן ספציפי שיפעיל את הפילטרים שלנו.",
    "שלום, זוהי שיחת מעקב שגרתית כדי לאשר את הפגישה שלך לשבוע הבא.",
    "Hi there, I'm calling about your subscription to our news service. We have a special offer for you today.",
    "Thank you for calling our automated system. Press 1 for sales, press 2 for support, or stay on the line.",
    "The game last night was amazing! Did you see that last-minute goal? The sports commentators went wild.",
    "I wanted to let you know about our premium content service that has a monthly charge added to your bill.",
    "This is a normal call with no specific content that would trigger our filters.",
    "Hello, this is just a routine follow-up call to confirm your appointment for next week.",
];

/// Fallback engine: picks a sample transcript at random. Seedable so tests
/// are reproducible. Demonstration/testing only; never fails.
pub struct SampleTranscriber {
    rng: Mutex<StdRng>,
}

impl SampleTranscriber {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn next_sample(&self) -> RawTranscription {
        let mut rng = self.rng.lock().expect("sample rng lock poisoned");
        let index = rng.gen_range(0..SAMPLE_TRANSCRIPTS.len());
        let confidence = 0.85 + rng.gen::<f32>() * 0.1;
        RawTranscription {
            text: SAMPLE_TRANSCRIPTS[index].to_string(),
            confidence,
        }
    }
}

impl Default for SampleTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

/// Annotates the transcript language by inspecting its script. Hebrew block
/// is U+0590..=U+05FF.
pub fn detect_language(text: &str) -> &'static str {
    if text.chars().any(|c| ('\u{0590}'..='\u{05FF}').contains(&c)) {
        "he-IL"
    } else {
        "en-US"
    }
}

/// Converts captured call audio into an [`Artifact`], encrypting the text
/// with the current security token when requested.
pub struct TranscriptionAdapter {
    primary: Option<Arc<dyn SpeechTranscriber>>,
    fallback: SampleTranscriber,
    tokens: Arc<SecurityTokenStore>,
}

impl TranscriptionAdapter {
    /// Wires the primary engine from the environment when credentials are
    /// configured; otherwise runs fallback-only.
    pub fn new(tokens: Arc<SecurityTokenStore>) -> Self {
        let primary = CloudSpeechTranscriber::from_env()
            .map(|engine| Arc::new(engine) as Arc<dyn SpeechTranscriber>);
        Self::with_engines(primary, SampleTranscriber::new(), tokens)
    }

    pub fn with_engines(
        primary: Option<Arc<dyn SpeechTranscriber>>,
        fallback: SampleTranscriber,
        tokens: Arc<SecurityTokenStore>,
    ) -> Self {
        Self {
            primary,
            fallback,
            tokens,
        }
    }

    pub async fn transcribe(
        &self,
        audio: Bytes,
        options: &TranscriptionOptions,
    ) -> Result<Artifact, TranscriptionError> {
        let raw = match &self.primary {
            Some(engine) => match engine.transcribe(audio.clone(), options).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(
                        target: "transcription",
                        %err,
                        "primary transcription failed, using fallback"
                    );
                    record_transcription_fallback(&err.to_string());
                    self.fallback.next_sample()
                }
            },
            None => {
                debug!(
                    target: "transcription",
                    "no primary transcription engine configured, using fallback"
                );
                self.fallback.next_sample()
            }
        };

        let language = detect_language(&raw.text).to_string();
        let mut artifact = Artifact {
            audio,
            text: raw.text,
            confidence: raw.confidence,
            language,
            encrypted: false,
        };

        if options.encrypt {
            let token = self.tokens.token().ok_or(TranscriptionError::NoToken)?;
            artifact.text = crypto::encrypt(&artifact.text, token.as_bytes())
                .map_err(|err: CryptoError| {
                    TranscriptionError::EncryptionFailed(err.to_string())
                })?;
            artifact.encrypted = true;
        }

        Ok(artifact)
    }

    /// Decrypts an encrypted artifact's text. Idempotent on already
    /// decrypted input.
    pub fn reveal(&self, artifact: Artifact) -> Result<Artifact, TranscriptionError> {
        if !artifact.encrypted {
            return Ok(artifact);
        }

        let token = self.tokens.token().ok_or(TranscriptionError::NoToken)?;
        let text = crypto::decrypt(&artifact.text, token.as_bytes())
            .map_err(|err| TranscriptionError::DecryptionFailed(err.to_string()))?;

        Ok(Artifact {
            text,
            encrypted: false,
            ..artifact
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::StaticVerifier;

    fn store_with_token() -> Arc<SecurityTokenStore> {
        let store = Arc::new(SecurityTokenStore::in_memory());
        store
            .ensure_token(&StaticVerifier(true))
            .expect("token creation");
        store
    }

    struct ProgrammedTranscriber {
        result: std::sync::Mutex<Option<Result<RawTranscription>>>,
    }

    impl ProgrammedTranscriber {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                result: std::sync::Mutex::new(Some(Ok(RawTranscription {
                    text: text.to_string(),
                    confidence: 0.9,
                }))),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                result: std::sync::Mutex::new(Some(Err(anyhow!(message.to_string())))),
            })
        }
    }

    #[async_trait]
    impl SpeechTranscriber for ProgrammedTranscriber {
        async fn transcribe(
            &self,
            _audio: Bytes,
            _options: &TranscriptionOptions,
        ) -> Result<RawTranscription> {
            self.result
                .lock()
                .expect("result lock poisoned")
                .take()
                .unwrap_or_else(|| Err(anyhow!("exhausted")))
        }
    }

    #[tokio::test]
    async fn primary_result_is_used_when_available() {
        let adapter = TranscriptionAdapter::with_engines(
            Some(ProgrammedTranscriber::ok("breaking news headlines")),
            SampleTranscriber::with_seed(7),
            store_with_token(),
        );

        let artifact = adapter
            .transcribe(Bytes::from_static(b"pcm"), &TranscriptionOptions::default())
            .await
            .expect("transcription should succeed");

        assert!(artifact.encrypted);
        let revealed = adapter.reveal(artifact).expect("reveal should succeed");
        assert_eq!(revealed.text, "breaking news headlines");
        assert_eq!(revealed.language, "en-US");
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_sample_corpus() {
        let adapter = TranscriptionAdapter::with_engines(
            Some(ProgrammedTranscriber::failing("api unreachable")),
            SampleTranscriber::with_seed(7),
            store_with_token(),
        );

        let mut options = TranscriptionOptions::default();
        options.encrypt = false;
        let artifact = adapter
            .transcribe(Bytes::from_static(b"pcm"), &options)
            .await
            .expect("fallback should recover the failure");

        assert!(!artifact.encrypted);
        assert!(SAMPLE_TRANSCRIPTS.contains(&artifact.text.as_str()));
        assert!(artifact.confidence >= 0.85 && artifact.confidence <= 0.95);
    }

    #[tokio::test]
    async fn seeded_fallback_is_reproducible() {
        let first = SampleTranscriber::with_seed(42).next_sample();
        let second = SampleTranscriber::with_seed(42).next_sample();
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn language_is_annotated_from_script() {
        assert_eq!(detect_language("שלום, זוהי שיחת מעקב"), "he-IL");
        assert_eq!(detect_language("routine follow-up call"), "en-US");

        let adapter = TranscriptionAdapter::with_engines(
            Some(ProgrammedTranscriber::ok("שלום, זוהי שיחת מעקב שגרתית")),
            SampleTranscriber::with_seed(1),
            store_with_token(),
        );
        let mut options = TranscriptionOptions::default();
        options.encrypt = false;
        let artifact = adapter
            .transcribe(Bytes::new(), &options)
            .await
            .expect("transcription should succeed");
        assert_eq!(artifact.language, "he-IL");
    }

    #[tokio::test]
    async fn missing_token_makes_encryption_fatal() {
        let adapter = TranscriptionAdapter::with_engines(
            None,
            SampleTranscriber::with_seed(3),
            Arc::new(SecurityTokenStore::in_memory()),
        );

        let err = adapter
            .transcribe(Bytes::new(), &TranscriptionOptions::default())
            .await
            .expect_err("encryption without a token must fail");
        assert!(matches!(err, TranscriptionError::NoToken));
    }

    #[tokio::test]
    async fn reveal_is_idempotent_on_decrypted_artifacts() {
        let adapter = TranscriptionAdapter::with_engines(
            None,
            SampleTranscriber::with_seed(11),
            store_with_token(),
        );

        let artifact = adapter
            .transcribe(Bytes::new(), &TranscriptionOptions::default())
            .await
            .expect("transcription should succeed");

        let once = adapter.reveal(artifact).expect("first reveal");
        let twice = adapter.reveal(once.clone()).expect("second reveal");
        assert_eq!(once.text, twice.text);
        assert!(!twice.encrypted);
    }

    #[test]
    fn cloud_engine_requires_a_non_empty_key() {
        // Mutates the process environment: hold the shared lock.
        let _env = crate::test_support::env_guard();
        std::env::remove_var(SPEECH_API_KEY_ENV);
        assert!(CloudSpeechTranscriber::from_env().is_none());
        std::env::set_var(SPEECH_API_KEY_ENV, "  ");
        assert!(CloudSpeechTranscriber::from_env().is_none());
        std::env::remove_var(SPEECH_API_KEY_ENV);
    }
}

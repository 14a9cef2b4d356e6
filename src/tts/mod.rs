//! Text-to-speech seam.

pub mod elevenlabs;

use crate::error::Result;
use async_trait::async_trait;

/// Atomic text-to-audio synthesis. The returned string is the
/// client-facing artifact reference (`/audio/<id>`).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one chunk of text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call or artifact storage fails.
    async fn synthesize(&self, text: &str) -> Result<String>;
}

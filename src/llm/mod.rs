//! Language model seam and prompt construction.

pub mod gemini;
pub mod prompt;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// A stream of text deltas from the model.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming text generation seam.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Open a streaming completion for the prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be opened; mid-stream
    /// failures surface as `Err` items on the stream.
    async fn stream(&self, prompt: &str) -> Result<TokenStream>;
}

//! Chat backend trait.
//!
//! Concrete clients (OpenAI-compatible streaming) live in the `kbase` app
//! crate. The pipeline only needs a lazy stream of text fragments, which it
//! concatenates in full before parsing citations.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::KbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Lazily produced answer fragments.
pub type TextStream = BoxStream<'static, Result<String, KbError>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start a chat completion and return its fragments as they arrive.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<TextStream, KbError>;
}

/// Drain a [`TextStream`] into one string, stopping at the first error.
pub async fn collect_text(mut stream: TextStream) -> Result<String, KbError> {
    let mut out = String::new();
    while let Some(fragment) = stream.next().await {
        out.push_str(&fragment?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Backend;
    use futures::executor::block_on;
    use futures::stream;

    #[test]
    fn test_collect_concatenates_fragments() {
        let s: TextStream = stream::iter(vec![Ok("Hel".to_string()), Ok("lo".to_string())]).boxed();
        assert_eq!(block_on(collect_text(s)).unwrap(), "Hello");
    }

    #[test]
    fn test_collect_stops_on_error() {
        let s: TextStream = stream::iter(vec![
            Ok("partial".to_string()),
            Err(KbError::upstream(Backend::Generation, "connection reset")),
            Ok("never".to_string()),
        ])
        .boxed();
        let err = block_on(collect_text(s)).unwrap_err();
        assert!(matches!(err, KbError::Upstream { .. }));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::system("x")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"x"}"#);
    }
}

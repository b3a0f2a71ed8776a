//! OpenAI-compatible streaming chat client.
//!
//! Sends `POST {base_url}/chat/completions` with `"stream": true` and turns
//! the server-sent event body into a [`TextStream`] of content deltas.
//! Requests are not retried.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use kbase_core::generation::{ChatBackend, ChatMessage, TextStream};
use kbase_core::{Backend, KbError};
use tracing::debug;

use crate::config::{Credential, GenerationConfig};

fn upstream(message: impl Into<String>) -> KbError {
    KbError::upstream(Backend::Generation, message)
}

pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    /// Fails with [`KbError::MissingCredential`] when no API key was resolved.
    pub fn new(config: &GenerationConfig, credential: &Credential) -> Result<Self, KbError> {
        let api_key = match credential {
            Credential::Key(k) => k.clone(),
            Credential::Missing { env_var } => {
                return Err(KbError::MissingCredential {
                    backend: Backend::Generation,
                    hint: format!("set {} or generation.api_key in the config file", env_var),
                })
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| upstream(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<TextStream, KbError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        debug!(model = %self.model, messages = messages.len(), "starting chat completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(upstream(format!("HTTP {}: {}", status, body_text)));
        }

        let bytes = response
            .bytes_stream()
            .map(|r| r.map_err(|e| upstream(e.to_string())))
            .boxed();
        Ok(sse_fragments(bytes))
    }
}

/// One parsed line of a chat-completion event stream.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    Delta(String),
    Done,
    Ignore,
    Error(String),
}

/// Interpret a single `data:` line from the event stream.
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let data = match line.strip_prefix("data:") {
        Some(d) => d.trim_start(),
        None => return SseLine::Ignore,
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }

    let json: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return SseLine::Error(format!("malformed stream event: {}", e)),
    };

    if let Some(err) = json.get("error") {
        let msg = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return SseLine::Error(msg);
    }

    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(s) if !s.is_empty() => SseLine::Delta(s.to_string()),
        _ => SseLine::Ignore,
    }
}

struct SseState {
    bytes: BoxStream<'static, Result<Bytes, KbError>>,
    buf: Vec<u8>,
    pending: VecDeque<Result<String, KbError>>,
    done: bool,
}

impl SseState {
    fn take_line(&mut self, line: &[u8]) {
        if self.done {
            return;
        }
        match parse_sse_line(&String::from_utf8_lossy(line)) {
            SseLine::Delta(s) => self.pending.push_back(Ok(s)),
            SseLine::Done => self.done = true,
            SseLine::Ignore => {}
            SseLine::Error(msg) => {
                self.pending.push_back(Err(upstream(msg)));
                self.done = true;
            }
        }
    }

    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.take_line(&line);
        }
    }
}

/// Turn a raw SSE byte stream into content fragments.
///
/// Lines may be split across network chunks; bytes are buffered until a
/// newline arrives so multi-byte characters are never cut.
pub fn sse_fragments(bytes: BoxStream<'static, Result<Bytes, KbError>>) -> TextStream {
    let state = SseState {
        bytes,
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(&chunk);
                    st.drain_complete_lines();
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    let rest = std::mem::take(&mut st.buf);
                    st.take_line(&rest);
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbase_core::generation::collect_text;

    fn byte_stream(parts: &[&str]) -> BoxStream<'static, Result<Bytes, KbError>> {
        let owned: Vec<Result<Bytes, KbError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.as_bytes().to_vec())))
            .collect();
        stream::iter(owned).boxed()
    }

    #[test]
    fn test_parse_delta_and_done() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            SseLine::Delta("Hi".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Ignore);
        assert_eq!(parse_sse_line(""), SseLine::Ignore);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Ignore
        );
    }

    #[test]
    fn test_parse_error_event() {
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"quota exceeded"}}"#),
            SseLine::Error("quota exceeded".into())
        );
        assert!(matches!(parse_sse_line("data: {not json"), SseLine::Error(_)));
    }

    #[tokio::test]
    async fn test_fragments_across_chunk_boundaries() {
        let event1 = "data: {\"choices\":[{\"delta\":{\"content\":\"向量\"}}]}\n\n";
        let event2 = "data: {\"choices\":[{\"delta\":{\"content\":\"检索 [1]\"}}]}\n\n";
        let whole = format!("{}{}data: [DONE]\n\n", event1, event2);
        let bytes = whole.as_bytes();
        // Split inside a multi-byte character.
        let cut = event1.find("向").unwrap() + 1;
        let parts: Vec<Result<Bytes, KbError>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..cut])),
            Ok(Bytes::copy_from_slice(&bytes[cut..])),
        ];
        let text = collect_text(sse_fragments(stream::iter(parts).boxed()))
            .await
            .unwrap();
        assert_eq!(text, "向量检索 [1]");
    }

    #[tokio::test]
    async fn test_events_after_done_ignored() {
        let s = byte_stream(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        ]);
        assert_eq!(collect_text(sse_fragments(s)).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_error_event_fails_stream() {
        let s = byte_stream(&["data: {\"error\":{\"message\":\"boom\"}}\n"]);
        let err = collect_text(sse_fragments(s)).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let s = byte_stream(&["data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}"]);
        assert_eq!(collect_text(sse_fragments(s)).await.unwrap(), "tail");
    }

    #[test]
    fn test_missing_credential() {
        let err = OpenAiChat::new(
            &GenerationConfig::default(),
            &Credential::Missing {
                env_var: "KB_CHAT_KEY".into(),
            },
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
    }
}

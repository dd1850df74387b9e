//! OpenAI-compatible chat-completions client.
//!
//! Text calls go to `text_model`; calls carrying images go to `vision_model`
//! with a bounded `max_tokens`. Streaming variants set `stream: true` and
//! decode the SSE body lazily. Nothing here retries.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::sse::{parse_chunk, SseDecoder, StreamDelta};
use crate::{GatewayConfig, GatewayError, GenerationGateway, ImagePayload, TextStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Gateway backed by an OpenAI-compatible HTTP endpoint.
pub struct OpenAiGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl OpenAiGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate().map_err(GatewayError::Configuration)?;
        if config.api_key.trim().is_empty() {
            return Err(GatewayError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn text_request<'a>(&'a self, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.text_model,
            messages: vec![ChatMessage {
                role: "user",
                content: MessageContent::Text(prompt),
            }],
            max_tokens: None,
            stream,
        }
    }

    fn vision_request<'a>(
        &'a self,
        prompt: &'a str,
        images: &[ImagePayload],
        stream: bool,
    ) -> ChatRequest<'a> {
        build_vision_request(
            &self.config.vision_model,
            self.config.vision_max_tokens,
            prompt,
            images,
            stream,
        )
    }

    async fn send(
        &self,
        body: &ChatRequest<'_>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, GatewayError> {
        debug!(
            model = body.model,
            stream = body.stream,
            "sending generation request"
        );
        let mut request = self
            .http
            .post(self.config.chat_completions_url())
            .bearer_auth(&self.config.api_key)
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            warn!(?retry_after, "generation rate limited");
            return Err(GatewayError::RateLimited { retry_after });
        }
        Err(GatewayError::Status {
            status: status.as_u16(),
            body: text,
        })
    }

    async fn complete_request(&self, body: ChatRequest<'_>) -> Result<String, GatewayError> {
        let start = Instant::now();
        let response = self
            .send(&body, Some(self.config.request_timeout()))
            .await?;
        let envelope: ChatResponse = response.json().await?;
        let text = extract_content(envelope)?;
        debug!(
            model = body.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "generation complete"
        );
        trace!(completion = %text);
        Ok(text)
    }

    async fn stream_request(&self, body: ChatRequest<'_>) -> Result<TextStream, GatewayError> {
        // No whole-request deadline: the consumer decides how long to read.
        let response = self.send(&body, None).await?;
        Ok(decode_sse(response.bytes_stream()))
    }
}

#[async_trait]
impl GenerationGateway for OpenAiGateway {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.complete_request(self.text_request(prompt, false)).await
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, GatewayError> {
        self.stream_request(self.text_request(prompt, true)).await
    }

    async fn complete_with_images(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<String, GatewayError> {
        self.complete_request(self.vision_request(prompt, images, false))
            .await
    }

    async fn complete_with_images_stream(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<TextStream, GatewayError> {
        self.stream_request(self.vision_request(prompt, images, true))
            .await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn build_vision_request<'a>(
    model: &'a str,
    max_tokens: u32,
    prompt: &'a str,
    images: &[ImagePayload],
    stream: bool,
) -> ChatRequest<'a> {
    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(ContentPart::Text { text: prompt });
    parts.extend(images.iter().map(|img| ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: img.data_url(),
        },
    }));
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: MessageContent::Parts(parts),
        }],
        max_tokens: Some(max_tokens),
        stream,
    }
}

fn extract_content(envelope: ChatResponse) -> Result<String, GatewayError> {
    envelope
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(GatewayError::EmptyCompletion)
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0 && *secs < 300)
        .map(Duration::from_secs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyPhase {
    Open,
    Eof,
    Closed,
}

struct SseState<B, E> {
    body: BoxStream<'static, Result<B, E>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    phase: BodyPhase,
}

/// Turn a raw SSE byte stream into ordered text chunks.
///
/// The stream yields `Ok(chunk)` per non-empty delta, ends (`None`) after the
/// `[DONE]` sentinel, and yields a single `Err` if the body fails or closes
/// without the sentinel. Dropping the returned stream drops the body.
pub fn decode_sse<S, B, E>(body: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        body: body.boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        phase: BodyPhase::Open,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.phase == BodyPhase::Closed {
                return None;
            }

            if let Some(payload) = st.pending.pop_front() {
                match parse_chunk(&payload) {
                    Ok(StreamDelta::Text(text)) => return Some((Ok(text), st)),
                    Ok(StreamDelta::Skip) => continue,
                    Ok(StreamDelta::Done) => return None,
                    Err(e) => {
                        st.phase = BodyPhase::Closed;
                        return Some((Err(e), st));
                    }
                }
            }

            if st.phase == BodyPhase::Eof {
                st.phase = BodyPhase::Closed;
                return Some((
                    Err(GatewayError::Stream(
                        "body ended before [DONE]".to_string(),
                    )),
                    st,
                ));
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(bytes.as_ref());
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.phase = BodyPhase::Closed;
                    return Some((Err(GatewayError::Stream(e.to_string())), st));
                }
                None => {
                    st.phase = BodyPhase::Eof;
                    if let Some(tail) = st.decoder.finish() {
                        st.pending.push_back(tail);
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&str]) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        futures::stream::iter(owned)
    }

    #[test]
    fn text_request_serializes_plain_content() {
        let req = ChatRequest {
            model: "o4-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: MessageContent::Text("hi"),
            }],
            max_tokens: None,
            stream: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "o4-mini");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert!(json.get("stream").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn vision_request_carries_image_parts() {
        let images = vec![ImagePayload::new("image/png", b"abc".to_vec())];
        let req = build_vision_request("gpt-4o", 1024, "describe", &images, true);
        let json = serde_json::to_value(&req).unwrap();
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "describe");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,YWJj");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn extract_content_rejects_blank() {
        let envelope: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert!(matches!(
            extract_content(envelope),
            Err(GatewayError::EmptyCompletion)
        ));
    }

    #[test]
    fn extract_content_returns_first_choice() {
        let envelope: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"ok"}},{"message":{"content":"no"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(envelope).unwrap(), "ok");
    }

    #[tokio::test]
    async fn decode_sse_yields_chunks_in_order() {
        let stream = decode_sse(body(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":",
            "{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]));
        let items: Vec<_> = stream.collect().await;
        let texts: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn decode_sse_errors_without_done() {
        let stream = decode_sse(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(items[1], Err(GatewayError::Stream(_))));
    }

    #[tokio::test]
    async fn decode_sse_stops_after_error_frame() {
        let stream = decode_sse(body(&[
            "data: {\"error\":{\"message\":\"boom\"}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn decode_sse_handles_done_without_trailing_blank_line() {
        let stream = decode_sse(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
            "data: [DONE]",
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "x");
    }

    #[test]
    fn missing_api_key_rejected() {
        let cfg = GatewayConfig {
            api_key: String::new(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            OpenAiGateway::new(cfg),
            Err(GatewayError::MissingApiKey)
        ));
    }
}

//! Claude Messages API gateway with server-sent-event streaming.

use futures::StreamExt;
use serde::Deserialize;

use super::{CompletionGateway, CompletionRequest, FragmentStream};
use crate::error::GatewayError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Streaming Claude API client.
pub struct AnthropicGateway {
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
    http: reqwest::Client,
}

impl AnthropicGateway {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            endpoint: API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Point at a different Messages endpoint (proxies, local mocks).
    pub fn with_endpoint(mut self, url: &str) -> Self {
        self.endpoint = url.to_string();
        self
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "system": &request.instruction,
            "messages": [{"role": "user", "content": request.context.render()}],
        })
    }
}

impl CompletionGateway for AnthropicGateway {
    fn stream(&self, request: CompletionRequest) -> FragmentStream {
        let body = self.body(&request);
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let speaker = request.speaker;

        Box::pin(async_stream::stream! {
            let resp = http
                .post(&endpoint)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await;
            let resp = match resp {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(GatewayError::Http(e.to_string()));
                    return;
                }
            };

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                yield Err(GatewayError::Api { status: status.as_u16(), body });
                return;
            }

            tracing::debug!(%speaker, "Completion stream opened");
            let mut bytes = resp.bytes_stream();
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GatewayError::Stream(e.to_string()));
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    match interpret(&event) {
                        Ok(Step::Text(text)) => yield Ok(text),
                        Ok(Step::Stop) => return,
                        Ok(Step::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            // Body ended without message_stop.
            yield Err(GatewayError::Stream("connection closed before message_stop".to_string()));
        })
    }
}

// ── SSE decoding ───────────────────────────────────────────────────────

/// A single server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder. Chunks may split events (and UTF-8 sequences)
/// at arbitrary byte offsets.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk, returning every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block[..pos]) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

// ── Messages API stream events ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ApiErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Text(String),
    Stop,
    Skip,
}

fn interpret(event: &SseEvent) -> Result<Step, GatewayError> {
    if event.data.trim().is_empty() {
        return Ok(Step::Skip);
    }
    let parsed: ApiEvent = serde_json::from_str(&event.data)
        .map_err(|e| GatewayError::Decode(format!("{e}: {}", event.data)))?;
    match parsed {
        ApiEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        } => Ok(Step::Text(text)),
        ApiEvent::ContentBlockDelta { .. } | ApiEvent::Other => Ok(Step::Skip),
        ApiEvent::MessageStop => Ok(Step::Stop),
        ApiEvent::Error { error } => Err(GatewayError::Api {
            status: 200,
            body: format!("{}: {}", error.kind, error.message),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: ping\nda").is_empty());
        let events = decoder.push(b"ta: {\"type\":\"ping\"}\n\nevent: message_stop\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("ping".to_string()),
                data: "{\"type\":\"ping\"}".to_string(),
            }]
        );
        let events = decoder.push(b"data: {\"type\":\"message_stop\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_stop"));
    }

    #[test]
    fn decoder_accepts_crlf_and_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keepalive\r\n\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: None,
                data: "a\nb".to_string(),
            }]
        );
    }

    #[test]
    fn decoder_survives_split_utf8() {
        let payload = "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"héllo\"}}\n\n";
        let bytes = payload.as_bytes();
        let split = payload.find('é').unwrap() + 1; // inside the two-byte sequence
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let events = decoder.push(&bytes[split..]);
        assert_eq!(interpret(&events[0]), Ok(Step::Text("héllo".to_string())));
    }

    #[test]
    fn interprets_message_api_events() {
        let delta = SseEvent {
            event: Some("content_block_delta".into()),
            data: r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#.into(),
        };
        assert_eq!(interpret(&delta), Ok(Step::Text("Hi".to_string())));

        let start = SseEvent {
            event: Some("message_start".into()),
            data: r#"{"type":"message_start","message":{"id":"msg_1"}}"#.into(),
        };
        assert_eq!(interpret(&start), Ok(Step::Skip));

        let json_delta = SseEvent {
            event: None,
            data: r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#.into(),
        };
        assert_eq!(interpret(&json_delta), Ok(Step::Skip));

        let stop = SseEvent {
            event: Some("message_stop".into()),
            data: r#"{"type":"message_stop"}"#.into(),
        };
        assert_eq!(interpret(&stop), Ok(Step::Stop));
    }

    #[test]
    fn error_events_end_the_stream() {
        let overloaded = SseEvent {
            event: Some("error".into()),
            data: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#.into(),
        };
        match interpret(&overloaded) {
            Err(GatewayError::Api { body, .. }) => assert_eq!(body, "overloaded_error: Overloaded"),
            other => panic!("expected API error, got {other:?}"),
        }

        let garbage = SseEvent {
            event: None,
            data: "not json".into(),
        };
        assert!(matches!(interpret(&garbage), Err(GatewayError::Decode(_))));
    }

    #[test]
    fn request_body_streams_with_role_instruction() {
        let gateway = AnthropicGateway::new("k".into())
            .with_model("claude-test")
            .with_max_tokens(64);
        let request = CompletionRequest {
            speaker: "planner".into(),
            instruction: "You plan.".into(),
            context: crate::prompt::TurnContext {
                task: "t".into(),
                window: vec![],
                directive: "You are Planner.".into(),
            },
        };
        let body = gateway.body(&request);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "You plan.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .ends_with("You are Planner."));
    }
}

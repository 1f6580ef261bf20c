//! OpenAI-compatible chat completions over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::ChatProvider;
use crate::pipeline::types::{ChatTurn, ContentBlock, Role};

const PROVIDER: &str = "openai";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: WireContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
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
    content: Option<String>,
}

fn build_request<'a>(
    model: &'a str,
    system_prompt: Option<&'a str>,
    turns: &'a [ChatTurn],
) -> ChatRequest<'a> {
    let system = system_prompt.map(|prompt| WireMessage {
        role: "system",
        content: WireContent::Text(prompt),
    });
    let history = turns.iter().map(|turn| WireMessage {
        role: match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        content: WireContent::Parts(
            turn.content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => WirePart::Text { text },
                    ContentBlock::Image { uri } => WirePart::ImageUrl {
                        image_url: ImageUrl { url: uri },
                    },
                })
                .collect(),
        ),
    });

    ChatRequest {
        model,
        messages: system.into_iter().chain(history).collect(),
    }
}

fn parse_reply(body: &[u8]) -> Result<String, LlmError> {
    let response: ChatResponse = serde_json::from_slice(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "response has no message content".into(),
        })
}

// ── Provider ────────────────────────────────────────────────────────

/// Chat provider for OpenAI and compatible servers.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    system_prompt: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, LlmError> {
        let request = build_request(&self.model, self.system_prompt.as_deref(), turns);
        debug!(model = %self.model, turns = turns.len(), "Sending chat completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.into(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.into(),
                retry_after,
            });
        }

        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("HTTP {status}: {}", String::from_utf8_lossy(&body)),
            });
        }

        parse_reply(&body)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn turns() -> Vec<ChatTurn> {
        vec![
            ChatTurn::user(vec![
                ContentBlock::text("What is this?"),
                ContentBlock::image("data:image/png;base64,AQ=="),
            ]),
            ChatTurn::assistant("A pixel."),
            ChatTurn::user(vec![ContentBlock::text("Thanks")]),
        ]
    }

    // ── Wire format ─────────────────────────────────────────────────

    #[test]
    fn request_maps_blocks_to_parts() {
        let turns = turns();
        let json = serde_json::to_value(build_request("gpt-4o", None, &turns)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "user", "content": [
                        {"type": "text", "text": "What is this?"},
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,AQ=="}}
                    ]},
                    {"role": "assistant", "content": [{"type": "text", "text": "A pixel."}]},
                    {"role": "user", "content": [{"type": "text", "text": "Thanks"}]}
                ]
            })
        );
    }

    #[test]
    fn system_prompt_leads_messages() {
        let turns = turns();
        let json = serde_json::to_value(build_request("m", Some("Be brief."), &turns)).unwrap();
        assert_eq!(
            json["messages"][0],
            serde_json::json!({"role": "system", "content": "Be brief."})
        );
        assert_eq!(json["messages"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn reply_is_trimmed() {
        let body = br#"{"choices":[{"message":{"role":"assistant","content":"  Hello!\n"}}]}"#;
        assert_eq!(parse_reply(body).unwrap(), "Hello!");
    }

    #[test]
    fn empty_choices_is_invalid() {
        assert!(matches!(
            parse_reply(br#"{"choices":[]}"#),
            Err(LlmError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn null_content_is_invalid() {
        assert!(matches!(
            parse_reply(br#"{"choices":[{"message":{"content":null}}]}"#),
            Err(LlmError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn malformed_body_is_json_error() {
        assert!(matches!(parse_reply(b"<html>"), Err(LlmError::Json(_))));
    }

    // ── HTTP ────────────────────────────────────────────────────────

    /// Serve one canned HTTP response and return the raw request text.
    async fn one_shot_server(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (base, handle)
    }

    fn http_response(status: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
            body.len()
        )
    }

    fn provider(base: &str) -> OpenAiChat {
        OpenAiChat::new(&LlmConfig {
            api_key: SecretString::from("sk-test"),
            api_base: base.to_string(),
            model: "gpt-4o".into(),
            system_prompt: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn complete_posts_and_returns_reply() {
        let (base, server) = one_shot_server(http_response(
            "200 OK",
            "",
            r#"{"choices":[{"message":{"content":"Hi back"}}]}"#,
        ))
        .await;

        let reply = provider(&base).complete(&turns()).await.unwrap();
        assert_eq!(reply, "Hi back");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains("\"image_url\""));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let (base, _server) = one_shot_server(http_response(
            "429 Too Many Requests",
            "Retry-After: 7\r\n",
            r#"{"error":"slow down"}"#,
        ))
        .await;

        let err = provider(&base).complete(&turns()).await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(7)
        ));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_failed() {
        let (base, _server) =
            one_shot_server(http_response("401 Unauthorized", "", "{}")).await;
        let err = provider(&base).complete(&turns()).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[tokio::test]
    async fn server_error_maps_to_request_failed() {
        let (base, _server) =
            one_shot_server(http_response("500 Internal Server Error", "", r#"{"error":"boom"}"#))
                .await;
        let err = provider(&base).complete(&turns()).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { ref reason, .. } if reason.contains("boom")));
    }
}

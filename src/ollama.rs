//! Client for the local Ollama chat endpoint.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::OllamaConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    max_prompt_chars: usize,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn from_config(config: &OllamaConfig) -> Self {
        OllamaClient {
            base_url: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_prompt_chars: config.max_prompt_chars,
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt and wait for the complete reply.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let prompt = truncate_prompt(prompt, self.max_prompt_chars);
        debug!("sending prompt to {} ({} chars)", self.model, prompt.len());

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.describe_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama API error ({}): {}", status, body));
        }

        let chat: ChatResponse = response.json().await?;
        let text = chat.message.content.trim().to_string();

        if text.is_empty() {
            return Err(anyhow!(
                "model returned an empty response; try rephrasing the question"
            ));
        }

        debug!("received {} chars from {}", text.len(), self.model);
        Ok(text)
    }

    /// One-shot reachability check against the tags endpoint.
    pub async fn probe(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.describe_transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!(
                "Ollama server at {} answered with {}",
                self.base_url,
                response.status()
            ))
        }
    }

    fn describe_transport_error(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_connect() || e.is_timeout() {
            anyhow!(
                "Ollama server not reachable at {} (is it running?)",
                self.base_url
            )
        } else {
            e.into()
        }
    }
}

fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    match prompt.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &prompt[..idx]),
        None => prompt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(host: &str) -> OllamaClient {
        OllamaClient::from_config(&OllamaConfig {
            host: host.to_string(),
            ..OllamaConfig::default()
        })
    }

    #[test]
    fn short_prompts_pass_through() {
        assert_eq!(truncate_prompt("hello", 1000), "hello");
    }

    #[test]
    fn long_prompts_are_truncated() {
        let long = "a".repeat(1200);
        let truncated = truncate_prompt(&long, 1000);
        assert_eq!(truncated.len(), 1003);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let prompt = "héllo wörld".repeat(200);
        let truncated = truncate_prompt(&prompt, 100);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 103);
    }

    #[test]
    fn request_wire_shape() {
        let request = ChatRequest {
            model: "llama3.2:1b".to_string(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "llama3.2:1b");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn generate_returns_reply_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.2:1b",
                "message": {"role": "assistant", "content": "  hello from the model  "},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = test_client(&server.uri()).generate("hi").await.unwrap();
        assert_eq!(reply, "hello from the model");
    }

    #[tokio::test]
    async fn generate_truncates_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_string_contains("aaaaa..."))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "ok"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::from_config(&OllamaConfig {
            host: server.uri(),
            max_prompt_chars: 5,
            ..OllamaConfig::default()
        });
        client.generate(&"a".repeat(50)).await.unwrap();
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "   "},
                "done": true
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).generate("hi").await.unwrap_err();
        assert!(err.to_string().contains("empty"), "got: {err}");
    }

    #[tokio::test]
    async fn server_error_carries_the_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model blew up"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).generate("hi").await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("500"), "got: {text}");
        assert!(text.contains("model blew up"), "got: {text}");
    }

    #[tokio::test]
    async fn unreachable_server_is_reported_as_such() {
        // Grab a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = test_client(&format!("http://127.0.0.1:{port}"))
            .generate("hi")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not reachable"), "got: {err}");
    }

    #[tokio::test]
    async fn probe_succeeds_against_tags_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        test_client(&server.uri()).probe().await.unwrap();
    }

    #[tokio::test]
    async fn probe_reports_unreachable_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = test_client(&format!("http://127.0.0.1:{port}"))
            .probe()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not reachable"), "got: {err}");
    }
}

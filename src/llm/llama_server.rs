//! [`ModelRuntime`] backed by a local llama-server process.
//!
//! Generation uses the native `/completion` endpoint with `stream: true`,
//! which answers with server-sent events of the form
//! `data: {"content": "...", "stop": false}`.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::images::ImageInput;
use crate::llm::error::LlmError;
use crate::llm::session::{ModelRuntime, Partial, PartialStream};

#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    n_predict: u32,
    top_k: u32,
    top_p: f32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_data: Vec<ImageData>,
}

/// Base64 image referenced from the prompt as `[img-{id}]`.
#[derive(Debug, Serialize)]
struct ImageData {
    data: String,
    id: usize,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<serde_json::Value>,
}

/// Client for a llama-server instance.
pub struct LlamaServerRuntime {
    client: reqwest::blocking::Client,
    base_url: Option<String>,
    config: Option<LlmConfig>,
}

impl LlamaServerRuntime {
    pub fn new() -> Result<Self, LlmError> {
        // Generations may run for minutes; only the health probe is bounded.
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            client,
            base_url: None,
            config: None,
        })
    }

    fn base_url(&self) -> Result<&str, LlmError> {
        self.base_url.as_deref().ok_or(LlmError::NotInitialized)
    }

    fn connection_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_connect() || e.is_timeout() {
            LlmError::ServerNotRunning(self.base_url.clone().unwrap_or_default())
        } else {
            LlmError::Http(e)
        }
    }

    /// Check that the server is up and has finished loading its model.
    pub fn check_health(&self) -> Result<(), LlmError> {
        let url = format!("{}/health", self.base_url()?);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .map_err(|e| self.connection_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            Err(LlmError::Api(format!("{}: {}", status, text)))
        }
    }
}

impl ModelRuntime for LlamaServerRuntime {
    fn initialize(&mut self, config: &LlmConfig) -> Result<(), LlmError> {
        self.base_url = Some(config.server_url.trim_end_matches('/').to_string());
        if let Err(e) = self.check_health() {
            self.base_url = None;
            return Err(e);
        }
        self.config = Some(config.clone());
        tracing::info!("Connected to llama-server at {}", config.server_url);
        Ok(())
    }

    fn token_count(&self, text: &str) -> Result<usize, LlmError> {
        let url = format!("{}/tokenize", self.base_url()?);
        let response = self
            .client
            .post(&url)
            .json(&TokenizeRequest { content: text })
            .send()
            .map_err(|e| self.connection_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(LlmError::Api(format!("{}: {}", status, text)));
        }
        let tokens: TokenizeResponse = response.json()?;
        Ok(tokens.tokens.len())
    }

    fn generate<'a>(
        &'a mut self,
        prompt: &str,
        images: &[ImageInput],
    ) -> Result<PartialStream<'a>, LlmError> {
        let config = self.config.as_ref().ok_or(LlmError::NotInitialized)?;
        let request = completion_request(config, prompt, images);
        let url = format!("{}/completion", self.base_url()?);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| self.connection_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(LlmError::Api(format!("{}: {}", status, text)));
        }

        Ok(Box::new(SseEvents::new(BufReader::new(response))))
    }

    fn dispose(&mut self) {
        self.base_url = None;
        self.config = None;
    }
}

fn completion_request(config: &LlmConfig, prompt: &str, images: &[ImageInput]) -> CompletionRequest {
    let engine = base64::engine::general_purpose::STANDARD;
    let image_data: Vec<ImageData> = images
        .iter()
        .enumerate()
        .map(|(id, image)| ImageData {
            data: engine.encode(&image.bytes),
            id,
        })
        .collect();

    let mut full_prompt = String::new();
    for image in &image_data {
        full_prompt.push_str(&format!("[img-{}]\n", image.id));
    }
    full_prompt.push_str(prompt);

    CompletionRequest {
        prompt: full_prompt,
        n_predict: config.max_tokens,
        top_k: config.top_k,
        top_p: config.top_p,
        temperature: config.temperature,
        stream: true,
        image_data,
    }
}

/// Iterator over the `data:` events of a streamed completion.
pub struct SseEvents<R> {
    reader: R,
    line: String,
    finished: bool,
}

impl<R: BufRead> SseEvents<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for SseEvents<R> {
    type Item = Result<Partial, LlmError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }

            let Some(payload) = self.line.trim_end().strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                self.finished = true;
                return Some(Ok(Partial::new("", true)));
            }

            let chunk = match serde_json::from_str::<CompletionChunk>(payload) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            };
            if let Some(error) = chunk.error {
                self.finished = true;
                return Some(Err(LlmError::Api(error.to_string())));
            }
            if chunk.stop {
                self.finished = true;
            }
            return Some(Ok(Partial::new(chunk.content, chunk.stop)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn events(body: &str) -> Vec<Result<Partial, LlmError>> {
        SseEvents::new(Cursor::new(body.as_bytes().to_vec())).collect()
    }

    #[test]
    fn test_sse_chunks_until_stop() {
        let body = "data: {\"content\":\"{\\\"a\\\"\",\"stop\":false}\n\n\
                    : keep-alive\n\
                    data: {\"content\":\":1}\",\"stop\":false}\n\n\
                    data: {\"content\":\"\",\"stop\":true,\"timings\":{}}\n\n\
                    data: {\"content\":\"ignored\",\"stop\":false}\n";
        let parts: Vec<Partial> = events(body).into_iter().map(|p| p.unwrap()).collect();
        assert_eq!(
            parts,
            vec![
                Partial::new("{\"a\"", false),
                Partial::new(":1}", false),
                Partial::new("", true),
            ]
        );
    }

    #[test]
    fn test_sse_truncated_stream_just_ends() {
        let parts = events("data: {\"content\":\"x\",\"stop\":false}\n");
        assert_eq!(parts.len(), 1);
        assert!(!parts[0].as_ref().unwrap().done);
    }

    #[test]
    fn test_sse_error_event() {
        let parts = events("data: {\"error\":{\"message\":\"context full\"}}\n");
        assert!(matches!(parts.as_slice(), [Err(LlmError::Api(msg))] if msg.contains("context full")));
    }

    #[test]
    fn test_sse_garbage_payload() {
        let parts = events("data: not json\n");
        assert!(matches!(parts.as_slice(), [Err(LlmError::Json(_))]));
    }

    #[test]
    fn test_completion_request_references_images() {
        let config = LlmConfig::default();
        let images = vec![ImageInput {
            path: "a.png".into(),
            bytes: b"hi".to_vec(),
        }];
        let request = completion_request(&config, "entry", &images);
        assert_eq!(request.prompt, "[img-0]\nentry");
        assert_eq!(request.image_data[0].data, "aGk=");
        assert_eq!(request.n_predict, config.max_tokens);
        assert!(request.stream);

        let json = serde_json::to_value(completion_request(&config, "p", &[])).unwrap();
        assert!(json.get("image_data").is_none());
    }

    #[test]
    fn test_calls_before_initialize_fail() {
        let runtime = LlamaServerRuntime::new().unwrap();
        assert!(matches!(runtime.token_count("x"), Err(LlmError::NotInitialized)));
        assert!(matches!(runtime.check_health(), Err(LlmError::NotInitialized)));
    }
}

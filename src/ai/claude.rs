use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{http_client, AiBackend, ChatPrompt};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
    system: &'a str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
}

impl ClaudeClient {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl AiBackend for ClaudeClient {
    fn provider(&self) -> &'static str {
        "claude"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        prompt: &ChatPrompt,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens,
            temperature,
            messages: vec![Message {
                role: "user",
                content: &prompt.user,
            }],
            system: &prompt.system,
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AppError::Ai(format!("API error: {}", error_text)));
        }

        let message_response: MessageResponse = response.json().await?;

        let text = message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(AppError::Ai("empty completion".to_string()));
        }
        Ok(text.trim().to_string())
    }
}

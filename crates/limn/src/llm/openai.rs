// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use async_trait::async_trait;
use chrono::Utc;
use diagram_contracts::{
    ChatRequest, ChatResponse, LLMError, LLMResult, Message, MessageContent, Usage,
};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ApiClient;
use crate::config::ModelSettings;

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model_name: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAIClient {
    pub fn new(settings: &ModelSettings) -> Self {
        let timeout = Duration::from_secs(settings.timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key: settings.api_key.clone(),
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            model_name: settings.model_name.clone(),
            timeout,
            max_retries: settings.max_retries,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn content_value(message: &Message) -> Value {
        let has_image = message
            .content
            .iter()
            .any(|part| matches!(part, MessageContent::Image { .. }));

        if !has_image {
            return json!(message.text());
        }

        let parts: Vec<Value> = message
            .content
            .iter()
            .map(|part| match part {
                MessageContent::Text { text } => json!({ "type": "text", "text": text }),
                MessageContent::Image { media_type, data } => json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{media_type};base64,{data}"),
                        "detail": "auto"
                    }
                }),
            })
            .collect();

        json!(parts)
    }

    fn build_openai_payload(&self, request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages.iter().map(|msg| {
                json!({
                    "role": msg.role,
                    "content": Self::content_value(msg)
                })
            }).collect::<Vec<_>>()
        });

        let generation = &request.generation_config;
        if let Some(max_tokens) = generation.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = generation.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = generation.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &generation.stop_sequences {
            payload["stop"] = json!(stop);
        }

        payload
    }

    fn parse_openai_response(
        &self,
        request: &ChatRequest,
        response_data: Value,
    ) -> LLMResult<ChatResponse> {
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from OpenAI response".to_string())
            })?;

        let usage = if let Some(usage_data) = response_data.get("usage") {
            Usage {
                prompt_tokens: usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: usage_data["total_tokens"].as_u64().unwrap_or(0) as u32,
            }
        } else {
            Usage::default()
        };

        let finish_reason = response_data["choices"][0]["finish_reason"]
            .as_str()
            .map(|s| s.to_string());

        Ok(ChatResponse {
            request_id: request.id,
            content: content.to_string(),
            model: request.model.clone(),
            usage,
            finish_reason,
            raw_response: response_data,
            created_at: Utc::now(),
        })
    }

    async fn execute_request_with_retry(&self, payload: Value) -> LLMResult<Value> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(
                attempt = attempt + 1,
                max_attempts = self.max_retries + 1,
                "Sending request to chat completions endpoint"
            );

            match tokio::time::timeout(
                self.timeout,
                self.client
                    .post(&self.endpoint)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&payload)
                    .send(),
            )
            .await
            {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            LLMError::Serialisation(format!("Failed to parse response: {e}"))
                        });
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());

                    if status == 429 {
                        warn!("Rate limited by the model endpoint");
                        last_error = Some(LLMError::RateLimit);
                    } else {
                        last_error = Some(LLMError::Provider(format!(
                            "OpenAI API error {status}: {body}"
                        )));
                        if status.is_client_error() {
                            break;
                        }
                    }
                }
                Ok(Err(e)) => {
                    last_error = Some(LLMError::Network(format!("Request failed: {e}")));
                }
                Err(_) => {
                    warn!(
                        "Request timed out after {} seconds",
                        self.timeout.as_secs()
                    );
                    last_error = Some(LLMError::Timeout);
                }
            }

            if attempt < self.max_retries {
                let wait_time = Duration::from_secs(2_u64.pow(attempt.min(3)));
                tokio::time::sleep(wait_time).await;
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ChatRequest) -> LLMResult<ChatResponse> {
        info!(request_id = %request.id, model = %request.model, "Processing chat request");
        let payload = self.build_openai_payload(&request);
        let response_data = self.execute_request_with_retry(payload).await?;
        let response = self.parse_openai_response(&request, response_data)?;
        debug!(
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "Chat request completed"
        );
        Ok(response)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn health_check(&self) -> LLMResult<()> {
        let request = ChatRequest::new(self.model_name.clone(), vec![Message::user("Hi")])
            .with_generation_config(diagram_contracts::GenerationConfig {
                max_tokens: Some(10),
                temperature: Some(0.0),
                top_p: None,
                stop_sequences: None,
            });

        self.send_request(request).await?;
        Ok(())
    }
}

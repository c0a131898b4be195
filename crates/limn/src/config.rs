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

use diagram_contracts::{GenerationConfig, LLMError, LLMResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl ModelSettings {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model_name: model_name.into(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn from_env() -> LLMResult<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            LLMError::Configuration("OPENAI_API_KEY not set in the environment".to_string())
        })?;
        let model_name =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self::new(base_url, api_key, model_name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub model: ModelSettings,
    #[serde(default = "default_renderer_command")]
    pub renderer_command: String,
}

impl PipelineConfig {
    pub fn new(model: ModelSettings) -> Self {
        Self {
            model,
            renderer_command: default_renderer_command(),
        }
    }

    pub fn with_renderer_command(mut self, command: impl Into<String>) -> Self {
        self.renderer_command = command.into();
        self
    }
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_renderer_command() -> String {
    "plantuml".to_string()
}

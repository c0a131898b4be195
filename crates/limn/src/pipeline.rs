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

use crate::config::PipelineConfig;
use crate::correction::CorrectionLoop;
use crate::extract;
use crate::llm::{ApiClient, OpenAIClient};
use crate::oracle::{DiagramRenderer, PlantUml};
use crate::prompts::{PromptBuilder, PromptContext, DESCRIBE_DIAGRAM_IMAGE, DIAGRAM_TO_PLANTUML};
use crate::state::WorkflowState;
use crate::{PipelineError, PipelineResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use diagram_contracts::{ChatRequest, DiagramDescription, GenerationConfig, Message};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub enum PipelineInput {
    Image(Vec<u8>),
    Description(DiagramDescription),
}

pub struct Pipeline {
    client: Arc<dyn ApiClient>,
    renderer: Arc<dyn DiagramRenderer>,
    prompts: Arc<PromptBuilder>,
    model_name: String,
    generation: GenerationConfig,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        let client = Arc::new(OpenAIClient::new(&config.model));
        let renderer = Arc::new(PlantUml::new(config.renderer_command.clone()));
        Self::with_collaborators(
            client,
            renderer,
            config.model.model_name.clone(),
            config.model.generation.clone(),
        )
    }

    pub fn with_collaborators(
        client: Arc<dyn ApiClient>,
        renderer: Arc<dyn DiagramRenderer>,
        model_name: impl Into<String>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            client,
            renderer,
            prompts: Arc::new(PromptBuilder::with_diagram_templates()),
            model_name: model_name.into(),
            generation,
        }
    }

    // One fresh WorkflowState per invocation; nothing survives across runs.
    pub async fn run(&self, input: PipelineInput) -> PipelineResult<String> {
        let mut state = WorkflowState::new();

        self.describe(input, &mut state).await?;
        self.generate(&mut state).await?;

        let correction = CorrectionLoop::new(
            self.client.clone(),
            self.renderer.clone(),
            self.prompts.clone(),
            self.model_name.clone(),
            self.generation.clone(),
        );
        correction.run(&mut state).await
    }

    async fn describe(&self, input: PipelineInput, state: &mut WorkflowState) -> PipelineResult<()> {
        match input {
            PipelineInput::Image(bytes) => {
                info!("Describing diagram image via the vision model");
                let prompt = self
                    .prompts
                    .build_prompt(DESCRIBE_DIAGRAM_IMAGE, &PromptContext::new())?;
                let message =
                    Message::user_with_image(prompt, "image/png", BASE64.encode(&bytes));
                let request =
                    ChatRequest::new(self.model_name.clone(), vec![message])
                        .with_generation_config(self.generation.clone());

                let response = self.client.send_request(request).await?;
                let diagram = extract::parse_description(&response.content)?;
                debug!(
                    diagram_type = %diagram.diagram_type,
                    participants = diagram.participants.len(),
                    "Parsed diagram description"
                );
                state.install_description(diagram);
            }
            PipelineInput::Description(diagram) => {
                // Caller already supplies the structured form; no model call.
                debug!(diagram_type = %diagram.diagram_type, "Using supplied diagram description");
                state.install_description(diagram);
            }
        }
        Ok(())
    }

    async fn generate(&self, state: &mut WorkflowState) -> PipelineResult<()> {
        let diagram = state
            .diagram()
            .ok_or_else(|| PipelineError::Internal("no diagram provided".to_string()))?;

        let mut context = PromptContext::new();
        context.insert(
            "diagram_description".to_string(),
            serde_json::to_value(diagram).unwrap_or_else(|_| json!({})),
        );
        let prompt = self.prompts.build_prompt(DIAGRAM_TO_PLANTUML, &context)?;

        info!("Translating diagram description to PlantUML");
        let request = ChatRequest::new(self.model_name.clone(), vec![Message::system(prompt)])
            .with_generation_config(self.generation.clone());
        let response = self.client.send_request(request).await?;

        let source = extract::extract_source(&response.content)?;
        state.push_attempt(source);
        Ok(())
    }
}

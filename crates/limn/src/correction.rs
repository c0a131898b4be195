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

use crate::extract;
use crate::llm::ApiClient;
use crate::oracle::{DiagramRenderer, ErrorClass, ValidationOutcome};
use crate::prompts::{PromptBuilder, PromptContext, REVIEW_PLANTUML};
use crate::state::WorkflowState;
use crate::{PipelineError, PipelineResult};
use diagram_contracts::{ChatRequest, GenerationConfig, Message};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Evaluating,
    Reviewing,
    Accepted,
    GivenUp,
}

// Transition function for the evaluated state. The two give-up guards are the
// loop's only termination sources besides acceptance: an execution error means
// the renderer itself could not run, and an unchanged revision means the model
// is not converging.
pub fn route_evaluation(outcome: &ValidationOutcome, last_two_equal: bool) -> LoopState {
    match outcome {
        ValidationOutcome::Ok => LoopState::Accepted,
        ValidationOutcome::Error {
            report,
            class: ErrorClass::Execution,
        } => {
            warn!("evaluation execution error: [{}]", report);
            LoopState::GivenUp
        }
        ValidationOutcome::Error { .. } if last_two_equal => {
            warn!("correction failed!");
            LoopState::GivenUp
        }
        ValidationOutcome::Error { .. } => LoopState::Reviewing,
    }
}

pub struct CorrectionLoop {
    client: Arc<dyn ApiClient>,
    renderer: Arc<dyn DiagramRenderer>,
    prompts: Arc<PromptBuilder>,
    model_name: String,
    generation: GenerationConfig,
}

impl CorrectionLoop {
    pub fn new(
        client: Arc<dyn ApiClient>,
        renderer: Arc<dyn DiagramRenderer>,
        prompts: Arc<PromptBuilder>,
        model_name: impl Into<String>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            client,
            renderer,
            prompts,
            model_name: model_name.into(),
            generation,
        }
    }

    pub async fn run(&self, state: &mut WorkflowState) -> PipelineResult<String> {
        let mut loop_state = LoopState::Evaluating;

        loop {
            match loop_state {
                LoopState::Evaluating => {
                    let source = state.last_attempt().ok_or_else(|| {
                        PipelineError::Internal("no diagram code provided".to_string())
                    })?;
                    let outcome = self.renderer.validate(source).await?;
                    let next = route_evaluation(&outcome, state.last_two_attempts_equal());
                    state.record_evaluation(outcome);
                    loop_state = next;
                }
                LoopState::Reviewing => {
                    let revised = self.review(state).await?;
                    state.push_attempt(revised);
                    loop_state = LoopState::Evaluating;
                }
                LoopState::Accepted => {
                    let source = state
                        .last_attempt()
                        .ok_or_else(|| {
                            PipelineError::Internal("accepted without an attempt".to_string())
                        })?
                        .to_string();
                    info!(attempts = state.attempts().len(), "Diagram accepted");
                    return Ok(source);
                }
                LoopState::GivenUp => {
                    let report = state
                        .last_error_report()
                        .unwrap_or("unknown evaluation error")
                        .to_string();
                    return Err(PipelineError::GivenUp { report });
                }
            }
        }
    }

    async fn review(&self, state: &WorkflowState) -> PipelineResult<String> {
        let diagram_code = state
            .last_attempt()
            .ok_or_else(|| PipelineError::Internal("no diagram code provided".to_string()))?;
        let evaluation_error = state
            .last_error_report()
            .ok_or_else(|| PipelineError::Internal("no evaluation error provided".to_string()))?;

        let mut context = PromptContext::new();
        context.insert("diagram_code".to_string(), json!(diagram_code));
        context.insert("evaluation_error".to_string(), json!(evaluation_error));
        let prompt = self.prompts.build_prompt(REVIEW_PLANTUML, &context)?;

        debug!("Requesting diagram revision from the model");
        let request = ChatRequest::new(self.model_name.clone(), vec![Message::system(prompt)])
            .with_generation_config(self.generation.clone());
        let response = self.client.send_request(request).await?;

        extract::extract_source(&response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_error() -> ValidationOutcome {
        ValidationOutcome::Error {
            report: "Syntax Error?".to_string(),
            class: ErrorClass::Syntax,
        }
    }

    #[test]
    fn test_ok_routes_to_accepted() {
        assert_eq!(
            route_evaluation(&ValidationOutcome::Ok, false),
            LoopState::Accepted
        );
        // Equality of attempts is irrelevant once the oracle accepts.
        assert_eq!(
            route_evaluation(&ValidationOutcome::Ok, true),
            LoopState::Accepted
        );
    }

    #[test]
    fn test_execution_error_routes_to_given_up() {
        let outcome = ValidationOutcome::Error {
            report: "Dot executable does not exist".to_string(),
            class: ErrorClass::Execution,
        };
        assert_eq!(route_evaluation(&outcome, false), LoopState::GivenUp);
    }

    #[test]
    fn test_unchanged_revision_routes_to_given_up() {
        assert_eq!(route_evaluation(&content_error(), true), LoopState::GivenUp);
    }

    #[test]
    fn test_content_error_routes_to_reviewing() {
        assert_eq!(
            route_evaluation(&content_error(), false),
            LoopState::Reviewing
        );
    }
}

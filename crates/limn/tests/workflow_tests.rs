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
    ChatRequest, ChatResponse, DiagramDescription, GenerationConfig, LLMError, LLMResult,
    Participant, Relation, Usage,
};
use limn::{
    ApiClient, DiagramRenderer, ErrorClass, Pipeline, PipelineError, PipelineInput,
    PipelineResult, ValidationOutcome,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn send_request(&self, request: ChatRequest) -> LLMResult<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::Internal("no scripted response left".to_string()))?;

        Ok(ChatResponse {
            request_id: request.id,
            content,
            model: request.model.clone(),
            usage: Usage::default(),
            finish_reason: Some("stop".to_string()),
            raw_response: serde_json::Value::Null,
            created_at: Utc::now(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    async fn health_check(&self) -> LLMResult<()> {
        Ok(())
    }
}

struct ScriptedRenderer {
    outcomes: Mutex<VecDeque<ValidationOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedRenderer {
    fn new(outcomes: Vec<ValidationOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagramRenderer for ScriptedRenderer {
    async fn validate(&self, _source: &str) -> PipelineResult<ValidationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| {
                PipelineError::ValidationInfrastructure("no scripted outcome left".to_string())
            })
    }
}

fn login_description() -> DiagramDescription {
    DiagramDescription {
        diagram_type: "sequence".to_string(),
        title: "Login".to_string(),
        participants: vec![
            Participant {
                name: "Browser".to_string(),
                shape: "actor".to_string(),
                description: "end user".to_string(),
            },
            Participant {
                name: "AuthService".to_string(),
                shape: "component".to_string(),
                description: String::new(),
            },
        ],
        relations: vec![Relation {
            source: "Browser".to_string(),
            target: "AuthService".to_string(),
            description: "POST /login".to_string(),
        }],
        containers: vec![],
        description: vec!["user authentication flow".to_string()],
    }
}

fn syntax_error() -> ValidationOutcome {
    ValidationOutcome::Error {
        report: "Syntax Error? (line 2)".to_string(),
        class: ErrorClass::Syntax,
    }
}

fn fenced(code: &str) -> String {
    format!("Here is the diagram:\n```plantuml\n{code}\n```")
}

const BROKEN: &str = "@startuml\nBrowser => AuthService\n@enduml";
const FIXED: &str = "@startuml\nBrowser -> AuthService : POST /login\n@enduml";

fn pipeline(client: Arc<ScriptedClient>, renderer: Arc<ScriptedRenderer>) -> Pipeline {
    Pipeline::with_collaborators(client, renderer, "gpt-test", GenerationConfig::default())
}

#[tokio::test]
async fn test_valid_first_generation_is_accepted_without_correction() {
    let client = ScriptedClient::new(vec![fenced(FIXED)]);
    let renderer = ScriptedRenderer::new(vec![ValidationOutcome::Ok]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Description(login_description()))
        .await
        .unwrap();

    assert_eq!(result, FIXED);
    assert_eq!(client.calls(), 1);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn test_invalid_generation_is_corrected_once() {
    let client = ScriptedClient::new(vec![fenced(BROKEN), fenced(FIXED)]);
    let renderer = ScriptedRenderer::new(vec![syntax_error(), ValidationOutcome::Ok]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Description(login_description()))
        .await
        .unwrap();

    assert_eq!(result, FIXED);
    // One generation call plus exactly one correction call.
    assert_eq!(client.calls(), 2);
    assert_eq!(renderer.calls(), 2);
}

#[tokio::test]
async fn test_unchanged_revision_gives_up_after_one_correction() {
    let client = ScriptedClient::new(vec![fenced(BROKEN), fenced(BROKEN)]);
    let renderer = ScriptedRenderer::new(vec![syntax_error(), syntax_error()]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Description(login_description()))
        .await;

    match result {
        Err(PipelineError::GivenUp { report }) => {
            assert!(report.contains("Syntax Error?"));
        }
        other => panic!("expected GivenUp, got {other:?}"),
    }
    assert_eq!(client.calls(), 2);
    assert_eq!(renderer.calls(), 2);
}

#[tokio::test]
async fn test_execution_error_gives_up_without_correction() {
    let client = ScriptedClient::new(vec![fenced(BROKEN)]);
    let renderer = ScriptedRenderer::new(vec![ValidationOutcome::Error {
        report: "Dot executable does not exist".to_string(),
        class: ErrorClass::Execution,
    }]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Description(login_description()))
        .await;

    match result {
        Err(PipelineError::GivenUp { report }) => {
            assert!(report.contains("Dot executable"));
        }
        other => panic!("expected GivenUp, got {other:?}"),
    }
    // The generation call happened, but no correction call was issued.
    assert_eq!(client.calls(), 1);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn test_image_reply_without_fence_fails_before_generation() {
    let client = ScriptedClient::new(vec!["I cannot see a diagram in this image, sorry.".to_string()]);
    let renderer = ScriptedRenderer::new(vec![]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Image(vec![0x89, 0x50, 0x4e, 0x47]))
        .await;

    assert!(matches!(result, Err(PipelineError::Extraction(_))));
    // Only the vision call was made; generation never started.
    assert_eq!(client.calls(), 1);
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn test_image_mode_describes_then_generates() {
    let description_json = serde_json::to_string_pretty(&login_description()).unwrap();
    let vision_reply = format!("The image shows a login flow.\n```json\n{description_json}\n```");
    let client = ScriptedClient::new(vec![vision_reply, fenced(FIXED)]);
    let renderer = ScriptedRenderer::new(vec![ValidationOutcome::Ok]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Image(vec![0x89, 0x50, 0x4e, 0x47]))
        .await
        .unwrap();

    assert_eq!(result, FIXED);
    assert_eq!(client.calls(), 2);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn test_schema_mismatch_in_vision_reply_is_surfaced() {
    let client =
        ScriptedClient::new(vec!["```json\n{ \"participants\": \"not a list\" }\n```".to_string()]);
    let renderer = ScriptedRenderer::new(vec![]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Image(vec![1, 2, 3]))
        .await;

    assert!(matches!(result, Err(PipelineError::Schema(_))));
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn test_infrastructure_failure_aborts_the_run() {
    let client = ScriptedClient::new(vec![fenced(BROKEN)]);
    // An empty script makes the renderer report an infrastructure failure.
    let renderer = ScriptedRenderer::new(vec![]);

    let result = pipeline(client.clone(), renderer.clone())
        .run(PipelineInput::Description(login_description()))
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::ValidationInfrastructure(_))
    ));
    assert_eq!(client.calls(), 1);
}

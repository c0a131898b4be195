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

pub mod config;
pub mod correction;
pub mod extract;
pub mod llm;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod state;

pub use config::{ModelSettings, PipelineConfig};
pub use correction::{route_evaluation, CorrectionLoop, LoopState};
pub use extract::{extract_fenced_block, extract_source, parse_description};
pub use llm::{ApiClient, OpenAIClient};
pub use oracle::{DiagramRenderer, ErrorClass, PlantUml, ValidationOutcome};
pub use pipeline::{Pipeline, PipelineInput};
pub use prompts::{PromptBuilder, PromptContext, PromptTemplate};
pub use state::WorkflowState;

use diagram_contracts::LLMError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no diagram provided in text:\n{0}")]
    Extraction(String),

    #[error("diagram description does not match the expected shape: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("model invocation failed: {0}")]
    ModelInvocation(#[from] LLMError),

    #[error("prompt template error: {0}")]
    Template(String),

    #[error("diagram renderer unavailable: {0}")]
    ValidationInfrastructure(String),

    #[error("diagram correction given up: {report}")]
    GivenUp { report: String },

    #[error("internal pipeline error: {0}")]
    Internal(String),
}

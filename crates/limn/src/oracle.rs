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

use crate::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Syntax,
    Execution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Ok,
    Error { report: String, class: ErrorClass },
}

impl ValidationOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ValidationOutcome::Ok)
    }

    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            ValidationOutcome::Error {
                class: ErrorClass::Execution,
                ..
            }
        )
    }

    pub fn report(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Ok => None,
            ValidationOutcome::Error { report, .. } => Some(report),
        }
    }
}

#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn validate(&self, source: &str) -> PipelineResult<ValidationOutcome>;
}

#[derive(Debug, Clone)]
pub struct PlantUml {
    command: String,
}

impl PlantUml {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run_renderer(&self, args: &[&str], source: &str) -> PipelineResult<std::process::Output> {
        let mut child = Command::new(&self.command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::ValidationInfrastructure(format!(
                    "failed to spawn renderer '{}': {e}",
                    self.command
                ))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            PipelineError::ValidationInfrastructure("renderer stdin unavailable".to_string())
        })?;
        stdin.write_all(source.as_bytes()).await.map_err(|e| {
            PipelineError::ValidationInfrastructure(format!("failed to feed renderer: {e}"))
        })?;
        drop(stdin);

        child.wait_with_output().await.map_err(|e| {
            PipelineError::ValidationInfrastructure(format!("renderer did not complete: {e}"))
        })
    }

    async fn render_error_report(&self, source: &str, fallback: &str) -> PipelineResult<String> {
        let output = self.run_renderer(&["-pipe", "-tutxt"], source).await?;
        let report = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if report.is_empty() {
            Ok(fallback.to_string())
        } else {
            Ok(report)
        }
    }
}

pub fn count_diagram_units(source: &str) -> usize {
    source
        .lines()
        .filter(|line| line.trim_start().starts_with("@start"))
        .count()
}

pub fn classify_error(message: &str) -> ErrorClass {
    const EXECUTION_MARKERS: [&str; 5] = [
        "has crashed",
        "cannot run",
        "dot executable",
        "graphviz",
        "installation problem",
    ];

    let lowered = message.to_lowercase();
    if EXECUTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        ErrorClass::Execution
    } else {
        ErrorClass::Syntax
    }
}

#[async_trait]
impl DiagramRenderer for PlantUml {
    async fn validate(&self, source: &str) -> PipelineResult<ValidationOutcome> {
        if count_diagram_units(source) != 1 {
            return Ok(ValidationOutcome::Error {
                report: "Invalid PlantUML code: expected exactly one @start..@end unit"
                    .to_string(),
                class: ErrorClass::Syntax,
            });
        }

        let output = self.run_renderer(&["-pipe", "-syntax"], source).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let verdict = stdout.trim();

        if verdict.starts_with("ERROR") || !output.status.success() {
            let diagnostic = if stderr.trim().is_empty() {
                verdict.to_string()
            } else {
                format!("{verdict}\n{}", stderr.trim())
            };
            let report = self.render_error_report(source, &diagnostic).await?;
            let class = classify_error(&diagnostic);
            debug!(?class, "Diagram failed validation");
            return Ok(ValidationOutcome::Error { report, class });
        }

        debug!(
            diagram_kind = verdict.lines().next().unwrap_or(""),
            "Diagram validated"
        );
        Ok(ValidationOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_diagram_units() {
        assert_eq!(count_diagram_units("@startuml\nA -> B\n@enduml"), 1);
        assert_eq!(
            count_diagram_units("@startuml\n@enduml\n@startuml\n@enduml"),
            2
        );
        assert_eq!(count_diagram_units("A -> B"), 0);
        assert_eq!(count_diagram_units("  @startmindmap\n@endmindmap"), 1);
    }

    #[test]
    fn test_classify_syntax_error() {
        assert_eq!(
            classify_error("ERROR\n3\nSyntax Error?"),
            ErrorClass::Syntax
        );
    }

    #[test]
    fn test_classify_execution_error() {
        assert_eq!(
            classify_error("Dot executable does not exist"),
            ErrorClass::Execution
        );
        assert_eq!(
            classify_error("PlantUML has crashed while rendering"),
            ErrorClass::Execution
        );
        assert_eq!(
            classify_error("Cannot find Graphviz"),
            ErrorClass::Execution
        );
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = ValidationOutcome::Ok;
        assert!(ok.is_ok());
        assert!(!ok.is_execution_error());
        assert_eq!(ok.report(), None);

        let error = ValidationOutcome::Error {
            report: "boom".to_string(),
            class: ErrorClass::Execution,
        };
        assert!(!error.is_ok());
        assert!(error.is_execution_error());
        assert_eq!(error.report(), Some("boom"));
    }
}

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
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const DESCRIBE_DIAGRAM_IMAGE: &str = "describe_diagram_image";
pub const DIAGRAM_TO_PLANTUML: &str = "diagram_to_plantuml";
pub const REVIEW_PLANTUML: &str = "review_plantuml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub description: String,
    pub template: String,

    pub variables: Vec<String>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            template: template.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = variables;
        self
    }
}

pub type PromptContext = HashMap<String, Value>;

#[derive(Debug, Default)]
pub struct PromptBuilder {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diagram_templates() -> Self {
        let mut builder = Self::new();
        builder.add_diagram_templates();
        builder
    }

    pub fn add_template(&mut self, template: PromptTemplate) -> &mut Self {
        self.templates.insert(template.name.clone(), template);
        self
    }

    pub fn build_prompt(
        &self,
        template_name: &str,
        context: &PromptContext,
    ) -> PipelineResult<String> {
        let template = self.templates.get(template_name).ok_or_else(|| {
            PipelineError::Template(format!("Template '{template_name}' not found"))
        })?;

        self.validate_context(template_name, context)?;
        let prompt = self.substitute_variables(&template.template, context);

        debug!(
            "Built prompt from template '{}' with {} context variables",
            template_name,
            context.len()
        );
        Ok(prompt)
    }

    pub fn list_templates(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn get_template(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    pub fn validate_context(
        &self,
        template_name: &str,
        context: &PromptContext,
    ) -> PipelineResult<()> {
        let template = self.templates.get(template_name).ok_or_else(|| {
            PipelineError::Template(format!("Template '{template_name}' not found"))
        })?;

        let missing_vars: Vec<&String> = template
            .variables
            .iter()
            .filter(|var| !context.contains_key(*var))
            .collect();

        if !missing_vars.is_empty() {
            return Err(PipelineError::Template(format!(
                "Missing required variables for template '{template_name}': {missing_vars:?}"
            )));
        }

        Ok(())
    }

    fn substitute_variables(&self, template: &str, context: &PromptContext) -> String {
        let mut result = template.to_string();

        for (key, value) in context {
            let placeholder = format!("{{{{{key}}}}}");
            let substitution = self.value_to_string(value);
            result = result.replace(&placeholder, &substitution);
        }

        if result.contains("{{") && result.contains("}}") {
            warn!("Template contains unsubstituted placeholders: {}", result);
        }

        result
    }

    fn value_to_string(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| "invalid_json".to_string())
            }
        }
    }

    pub fn add_diagram_templates(&mut self) {
        self.add_template(
            PromptTemplate::new(
                DESCRIBE_DIAGRAM_IMAGE,
                include_str!("templates/describe_diagram_image.txt"),
            )
            .with_description("Ask a vision model for a structured description of a diagram image"),
        );

        self.add_template(
            PromptTemplate::new(
                DIAGRAM_TO_PLANTUML,
                include_str!("templates/diagram_to_plantuml.txt"),
            )
            .with_description("Translate a structured diagram description into PlantUML")
            .with_variables(vec!["diagram_description".to_string()]),
        );

        self.add_template(
            PromptTemplate::new(
                REVIEW_PLANTUML,
                include_str!("templates/review_plantuml.txt"),
            )
            .with_description("Revise PlantUML source given the renderer's error report")
            .with_variables(vec![
                "diagram_code".to_string(),
                "evaluation_error".to_string(),
            ]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_template_creation() {
        let template = PromptTemplate::new("test_template", "Please help with {{task}}")
            .with_description("A test template")
            .with_variables(vec!["task".to_string()]);

        assert_eq!(template.name, "test_template");
        assert_eq!(template.description, "A test template");
        assert_eq!(template.variables, vec!["task"]);
    }

    #[test]
    fn test_prompt_builder_substitution() {
        let mut builder = PromptBuilder::new();
        builder.add_template(
            PromptTemplate::new("greeting", "Hello {{name}}, translate {{task}}.")
                .with_variables(vec!["name".to_string(), "task".to_string()]),
        );

        let mut context = PromptContext::new();
        context.insert("name".to_string(), json!("Alice"));
        context.insert("task".to_string(), json!("this diagram"));

        let prompt = builder.build_prompt("greeting", &context).unwrap();
        assert_eq!(prompt, "Hello Alice, translate this diagram.");
    }

    #[test]
    fn test_diagram_templates_registered() {
        let builder = PromptBuilder::with_diagram_templates();
        let templates = builder.list_templates();

        assert!(templates.contains(&DESCRIBE_DIAGRAM_IMAGE.to_string()));
        assert!(templates.contains(&DIAGRAM_TO_PLANTUML.to_string()));
        assert!(templates.contains(&REVIEW_PLANTUML.to_string()));
    }

    #[test]
    fn test_missing_variable_is_rejected() {
        let builder = PromptBuilder::with_diagram_templates();
        let context = PromptContext::new();

        assert!(builder
            .build_prompt(REVIEW_PLANTUML, &context)
            .is_err());

        let mut context = PromptContext::new();
        context.insert("diagram_code".to_string(), json!("@startuml\n@enduml"));
        context.insert("evaluation_error".to_string(), json!("syntax error"));
        let prompt = builder.build_prompt(REVIEW_PLANTUML, &context).unwrap();
        assert!(prompt.contains("@startuml"));
        assert!(prompt.contains("syntax error"));
    }

    #[test]
    fn test_object_values_render_as_json() {
        let mut builder = PromptBuilder::new();
        builder.add_template(
            PromptTemplate::new("show", "Description:\n{{diagram_description}}")
                .with_variables(vec!["diagram_description".to_string()]),
        );

        let mut context = PromptContext::new();
        context.insert(
            "diagram_description".to_string(),
            json!({ "type": "sequence", "title": "Login" }),
        );

        let prompt = builder.build_prompt("show", &context).unwrap();
        assert!(prompt.contains("\"type\": \"sequence\""));
    }
}

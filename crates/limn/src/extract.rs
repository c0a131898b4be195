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
use diagram_contracts::DiagramDescription;
use tracing::debug;

pub fn extract_fenced_block(raw: &str) -> PipelineResult<(Option<String>, String)> {
    let mut lines = raw.lines();

    while let Some(line) = lines.next() {
        if !line.trim().starts_with("```") {
            continue;
        }

        let language = {
            let lang_str = line.trim().strip_prefix("```").unwrap_or("").trim();
            if lang_str.is_empty() {
                None
            } else {
                Some(lang_str.to_string())
            }
        };

        let mut content = String::new();
        let mut closed = false;
        for code_line in lines.by_ref() {
            if code_line.trim().starts_with("```") {
                closed = true;
                break;
            }
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(code_line);
        }

        if closed {
            debug!(
                language = language.as_deref().unwrap_or("<none>"),
                "Extracted fenced block from model output"
            );
            return Ok((language, content));
        }
        break;
    }

    Err(PipelineError::Extraction(raw.to_string()))
}

pub fn parse_description(raw: &str) -> PipelineResult<DiagramDescription> {
    let (language, content) = extract_fenced_block(raw)?;

    if let Some(lang) = &language {
        if lang != "json" {
            return Err(PipelineError::Extraction(raw.to_string()));
        }
    }

    serde_json::from_str(&content).map_err(PipelineError::Schema)
}

pub fn extract_source(raw: &str) -> PipelineResult<String> {
    let (_, content) = extract_fenced_block(raw)?;
    Ok(content)
}

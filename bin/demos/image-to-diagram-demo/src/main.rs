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

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use diagram_contracts::DiagramDescription;
use limn::{ModelSettings, Pipeline, PipelineConfig, PipelineInput};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let matches = Command::new("image-to-diagram-demo")
        .version("1.0.0")
        .about("Turns a diagram image or a structured description into PlantUML")
        .arg(
            Arg::new("input")
                .help("Path to a PNG diagram image or a diagram description JSON file")
                .required(true),
        )
        .arg(
            Arg::new("image")
                .long("image")
                .action(ArgAction::SetTrue)
                .help("Treat the input file as an image regardless of its extension"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .help("OpenAI-compatible endpoint base URL (defaults to OPENAI_BASE_URL)"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .short('m')
                .help("Model identifier (defaults to OPENAI_MODEL)"),
        )
        .arg(
            Arg::new("plantuml")
                .long("plantuml")
                .help("PlantUML renderer command")
                .default_value("plantuml"),
        )
        .get_matches();

    let input_path = matches.get_one::<String>("input").expect("required");
    let plantuml = matches.get_one::<String>("plantuml").expect("defaulted");

    let mut settings = ModelSettings::from_env()?;
    if let Some(base_url) = matches.get_one::<String>("base-url") {
        settings.base_url = base_url.clone();
    }
    if let Some(model) = matches.get_one::<String>("model") {
        settings.model_name = model.clone();
    }

    let config = PipelineConfig::new(settings).with_renderer_command(plantuml.as_str());
    let pipeline = Pipeline::new(&config);

    let is_image = matches.get_flag("image")
        || [".png", ".jpg", ".jpeg"]
            .iter()
            .any(|ext| input_path.to_lowercase().ends_with(ext));

    let input = if is_image {
        let bytes = std::fs::read(input_path)
            .with_context(|| format!("failed to read image file {input_path}"))?;
        PipelineInput::Image(bytes)
    } else {
        let text = std::fs::read_to_string(input_path)
            .with_context(|| format!("failed to read description file {input_path}"))?;
        let description: DiagramDescription = serde_json::from_str(&text)
            .with_context(|| format!("{input_path} is not a valid diagram description"))?;
        PipelineInput::Description(description)
    };

    let source = pipeline.run(input).await?;
    println!("{source}");
    Ok(())
}

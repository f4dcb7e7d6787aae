//! Example: a layer backed by a local Ollama server.
//!
//! Requires Ollama running on localhost:11434 with `llama3.2:3b` pulled.
//!
//! Run with: `cargo run --example ollama_layer`

use lmflow::{BackoffConfig, Layer, LlmConfig, OllamaBackend, PromptSet, Schema, TypeSpec};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let backend = OllamaBackend::new("http://localhost:11434", "llama3.2:3b")
        .with_config(LlmConfig::default().with_temperature(0.2))
        .with_backoff(BackoffConfig::interactive());

    let layer = Layer::builder(Arc::new(backend))
        .name("summarize")
        .input(
            Schema::new()
                .field("text", TypeSpec::Str)
                .field("points", TypeSpec::Int),
        )
        .prompt("Summarize the following text in at most [$points$] key points:\n\n[$text$]")
        .output(
            Schema::new()
                .field("summary", TypeSpec::Str)
                .field("key_points", TypeSpec::list(TypeSpec::Str)),
        )
        .prompts(PromptSet::reasoning())
        .max_tries(4)
        .build()?;

    let input = json!({
        "text": "Rust is a systems programming language focused on safety and performance. \
                 Its ownership model rules out data races at compile time.",
        "points": 3,
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    println!("Running layer...");
    let output = layer.invoke(&input).await?;

    println!("Summary: {}", output["summary"]);
    if let Some(points) = output["key_points"].as_array() {
        for point in points {
            println!("  - {}", point.as_str().unwrap_or_default());
        }
    }

    Ok(())
}

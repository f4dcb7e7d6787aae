//! Example: a self-correcting layer driven by a scripted backend.
//!
//! The first reply breaks the output schema, the second fixes it. No live
//! LLM is needed.
//!
//! Run with: `cargo run --example mock_layer`

use lmflow::{Event, FnEventHandler, Layer, MockBackend, Schema, TypeSpec};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct MovieReview {
    title: String,
    rating: f64,
    tags: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mock = Arc::new(MockBackend::new(vec![
        r#"Let me think. {"title": "Inception", "rating": "great", "tags": ["dreams"]}"#.into(),
        r#"{"title": "Inception", "rating": 9.2, "tags": ["dreams", "heist"]}"#.into(),
    ]));

    let layer = Layer::builder(mock.clone())
        .name("review")
        .input(Schema::new().field("movie", TypeSpec::Str))
        .prompt("Review the movie [$movie$].")
        .output(
            Schema::new()
                .field("title", TypeSpec::Str)
                .field("rating", TypeSpec::Float)
                .field("tags", TypeSpec::list(TypeSpec::Str)),
        )
        .event_handler(Arc::new(FnEventHandler(|event: Event| {
            if let Event::ValidationFailed { attempt, reason, .. } = event {
                println!("attempt {} rejected: {}", attempt, reason);
            }
        })))
        .build()?;

    let input = json!({"movie": "Inception"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    let output = layer.invoke_detailed(&input, 3).await?;

    let review: MovieReview = output.parse_as()?;
    println!("Movie: {}", review.title);
    println!("Rating: {}/10", review.rating);
    println!("Tags: {}", review.tags.join(", "));
    println!("Attempts: {}", output.attempts);
    println!("Backend calls: {}", mock.call_count());

    Ok(())
}

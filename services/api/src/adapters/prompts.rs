//! services/api/src/adapters/prompts.rs
//!
//! Prompt text shared by the vision adapters, and parsing of the analysis reply.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use visualize_core::domain::{Component, Difficulty, ImageAnalysis, TapPoint};

/// Sent alongside the image at the start of every conversation.
pub const IMAGE_INTRO: &str = "Here is the image we are discussing.";

pub fn level_guidance(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Novice => {
            "Explain like you would to a curious child: simple words, everyday analogies, no jargon."
        }
        Difficulty::Beginner => {
            "Use basic technical terms and explain each one with a clear, concrete example."
        }
        Difficulty::Intermediate => {
            "Give balanced detail suited to a hobbyist: name the parts properly and explain how they work together."
        }
        Difficulty::Advanced => {
            "Give an in-depth technical analysis: mechanisms, trade-offs and relevant numbers."
        }
        Difficulty::Expert => {
            "Answer at expert level: precise terminology, specifications and the underlying theory."
        }
    }
}

pub fn system_instructions(difficulty: Difficulty) -> String {
    format!(
        "You are Visualize.AI, a patient tutor who explains what is shown in images and how it works.\n\
         Explanation level: {} ({}/5). {}\n\
         Stay grounded in what is visible in the image. If something cannot be determined from the image, say so.",
        difficulty,
        difficulty.level(),
        level_guidance(difficulty),
    )
}

pub fn analysis_prompt() -> String {
    "Analyze this image. Describe what it shows, its main components and how they relate to each other.\n\n\
     After the description, list the main visible components as a fenced JSON block:\n\
     ```json\n\
     [{\"name\": \"component name\", \"x\": 50, \"y\": 50}]\n\
     ```\n\
     where x and y are the component's approximate center as a percentage (0-100) of the image width and height."
        .to_string()
}

pub fn follow_up_prompt(question: &str, tap_point: Option<TapPoint>) -> String {
    match tap_point {
        Some(point) => format!(
            "The user tapped the image at about x={:.0}%, y={:.0}% and asks about that spot.\n\nQuestion: {}",
            point.x, point.y, question
        ),
        None => format!("Question: {}", question),
    }
}

pub fn what_if_prompt(scenario: &str) -> String {
    format!(
        "WHAT-IF MODE. The user poses a hypothetical scenario about the thing in the image. \
         Reason through what would realistically change, what would stay the same, and why.\n\n\
         Scenario: What if {}",
        scenario
    )
}

#[derive(Deserialize)]
struct RawComponent {
    name: String,
    x: f64,
    y: f64,
}

fn json_block() -> &'static Regex {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    BLOCK.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").expect("static regex is valid"))
}

/// Splits a raw analysis reply into prose and component labels.
///
/// A reply without a readable JSON block yields no components; the prose is
/// kept either way.
pub fn parse_analysis(raw: &str) -> ImageAnalysis {
    let Some(captures) = json_block().captures(raw) else {
        return ImageAnalysis {
            analysis: raw.trim().to_string(),
            components: Vec::new(),
        };
    };

    let components = serde_json::from_str::<Vec<RawComponent>>(&captures[1])
        .map(|parsed| {
            parsed
                .into_iter()
                .filter(|c| !c.name.trim().is_empty() && c.x.is_finite() && c.y.is_finite())
                .map(|c| Component {
                    name: c.name.trim().to_string(),
                    x: c.x.clamp(0.0, 100.0),
                    y: c.y.clamp(0.0, 100.0),
                })
                .collect()
        })
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Component block in analysis was not valid JSON");
            Vec::new()
        });

    let analysis = json_block().replace(raw, "").trim().to_string();
    ImageAnalysis {
        analysis,
        components,
    }
}

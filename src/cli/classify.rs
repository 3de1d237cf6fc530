//! Classify command for cortex.
//!
//! Shows which pool the rule classifier would pick for a piece of text,
//! without storing anything.

use serde::Serialize;

use crate::cli::{render, Workspace};
use crate::core::{BulletKind, Pool};
use crate::learning::{Classification, HemisphereClassifier};

/// Options for the classify command.
#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub json: bool,
    pub quiet: bool,
    pub text: String,
    pub kind: BulletKind,
    /// Pool used when the scores are too close to call.
    pub hint: Pool,
    pub tags: Vec<String>,
}

impl ClassifyOptions {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            json: false,
            quiet: false,
            text: text.into(),
            kind: BulletKind::Heuristic,
            hint: Pool::Left,
            tags: Vec::new(),
        }
    }
}

/// Output format for the classify command.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyOutput {
    pub success: bool,
    pub text: String,
    #[serde(flatten)]
    pub classification: Classification,
}

/// The classify command implementation.
pub struct ClassifyCommand {
    classifier: HemisphereClassifier,
}

impl ClassifyCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            classifier: HemisphereClassifier::new(workspace.config()),
        }
    }

    pub fn run(&self, options: &ClassifyOptions) -> ClassifyOutput {
        let classification =
            self.classifier
                .classify_rules(&options.text, options.kind, options.hint, &options.tags);
        ClassifyOutput {
            success: true,
            text: options.text.clone(),
            classification,
        }
    }

    pub fn format_output(&self, output: &ClassifyOutput, options: &ClassifyOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &ClassifyOutput) -> String {
    let c = &output.classification;
    let mut lines = vec![format!(
        "{} (confidence {:.2}{})",
        c.pool,
        c.confidence,
        if c.ambiguous { ", needs review" } else { "" }
    )];
    lines.push(format!(
        "  scores: left {:.2}, right {:.2}",
        c.left_score, c.right_score
    ));
    if !c.matched_rules.is_empty() {
        lines.push(format!("  rules: {}", c.matched_rules.join(", ")));
    }
    lines.push(format!("  {}", c.reasoning));
    lines.join("\n")
}

//! Add command for cortex.
//!
//! Stores a manual bullet, optionally letting the hemisphere classifier
//! pick the pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, BulletInfo, Workspace};
use crate::core::{BulletKind, BulletStatus, Pool};
use crate::learning::{Classification, HemisphereClassifier};
use crate::memory::{KnowledgeStore, NewBullet};

/// Options for the add command.
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub json: bool,
    pub quiet: bool,
    pub text: String,
    /// Target pool, or the classifier's fallback hint with `classify`.
    pub pool: Pool,
    pub kind: BulletKind,
    pub tags: Vec<String>,
    pub confidence: Option<f64>,
    /// Store as active instead of quarantined.
    pub active: bool,
    /// Let the rule classifier choose between left and right.
    pub classify: bool,
}

impl AddOptions {
    pub fn new(text: impl Into<String>, pool: Pool) -> Self {
        Self {
            json: false,
            quiet: false,
            text: text.into(),
            pool,
            kind: BulletKind::Heuristic,
            tags: Vec::new(),
            confidence: None,
            active: false,
            classify: false,
        }
    }
}

/// Output format for the add command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bullet: Option<BulletInfo>,
    /// Pool chosen by the classifier, when it was consulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classified_pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AddOutput {
    pub fn success(bullet: BulletInfo, classification: Option<&Classification>) -> Self {
        Self {
            success: true,
            bullet: Some(bullet),
            classified_pool: classification.map(|c| c.pool.to_string()),
            classification_reasoning: classification.map(|c| c.reasoning.clone()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            bullet: None,
            classified_pool: None,
            classification_reasoning: None,
            error: Some(error.into()),
        }
    }
}

/// The add command implementation.
pub struct AddCommand {
    store: Arc<KnowledgeStore>,
    classifier: HemisphereClassifier,
}

impl AddCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            store: Arc::clone(workspace.store()),
            classifier: HemisphereClassifier::new(workspace.config()),
        }
    }

    pub async fn run(&self, options: &AddOptions) -> AddOutput {
        if options.text.trim().is_empty() {
            return AddOutput::failure("bullet text is empty");
        }

        let classification = options.classify.then(|| {
            self.classifier
                .classify_rules(&options.text, options.kind, options.pool, &options.tags)
        });
        let pool = classification.as_ref().map_or(options.pool, |c| c.pool);

        let mut new = NewBullet::new(&options.text, pool, options.kind)
            .with_tags(options.tags.clone());
        if let Some(confidence) = options.confidence {
            new = new.with_confidence(confidence);
        }
        if options.active {
            new = new.with_status(BulletStatus::Active);
        }

        match self.store.add(new).await {
            Ok(bullet) => AddOutput::success(BulletInfo::from_bullet(&bullet), classification.as_ref()),
            Err(e) => AddOutput::failure(e.to_string()),
        }
    }

    pub fn format_output(&self, output: &AddOutput, options: &AddOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &AddOutput) -> String {
    if !output.success {
        return format!(
            "Failed to add bullet: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    let mut lines = Vec::new();
    if let Some(bullet) = &output.bullet {
        lines.push(format!("Added to {} pool:", bullet.pool));
        lines.push(format!("  {}", bullet.line()));
    }
    if let Some(reasoning) = &output.classification_reasoning {
        lines.push(format!("  Classifier: {}", reasoning));
    }
    lines.join("\n")
}

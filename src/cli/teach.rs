//! Teach command for cortex.
//!
//! Queues a bullet or free text as a suggestion for another pool. Delivery
//! happens later through `deliver`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, Workspace};
use crate::core::Pool;
use crate::teaching::{Suggestion, TeachingApi};

/// Options for the teach command.
#[derive(Debug, Clone)]
pub struct TeachOptions {
    pub json: bool,
    pub quiet: bool,
    pub from: Pool,
    pub to: Pool,
    /// Existing bullet to teach. Takes precedence over `text`.
    pub bullet_id: Option<String>,
    pub text: Option<String>,
    /// Tags for free text (bullets keep their own).
    pub tags: Vec<String>,
    /// Soften absolute wording for the target pool.
    pub translate: bool,
    pub reason: Option<String>,
}

impl TeachOptions {
    pub fn new(from: Pool, to: Pool) -> Self {
        Self {
            json: false,
            quiet: false,
            from,
            to,
            bullet_id: None,
            text: None,
            tags: Vec::new(),
            translate: false,
            reason: None,
        }
    }
}

/// Output format for the teach command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TeachOutput {
    pub fn success(suggestion: Suggestion) -> Self {
        Self {
            success: true,
            suggestion: Some(suggestion),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            suggestion: None,
            error: Some(error.into()),
        }
    }
}

/// The teach command implementation.
pub struct TeachCommand {
    api: TeachingApi,
}

impl TeachCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            api: TeachingApi::new(
                Arc::clone(workspace.store()),
                Arc::clone(workspace.suggestions()),
            ),
        }
    }

    pub fn run(&self, options: &TeachOptions) -> TeachOutput {
        let reason = options.reason.as_deref().unwrap_or(crate::teaching::teach::DEFAULT_REASON);
        let result = match (&options.bullet_id, &options.text) {
            (Some(id), _) => {
                self.api
                    .teach_bullet(options.from, options.to, id, options.translate, reason)
            }
            (None, Some(text)) if !text.trim().is_empty() => self.api.teach_text(
                options.from,
                options.to,
                text,
                options.tags.clone(),
                options.translate,
                reason,
            ),
            _ => return TeachOutput::failure("nothing to teach: give a bullet id or text"),
        };
        match result {
            Ok(suggestion) => TeachOutput::success(suggestion),
            Err(e) => TeachOutput::failure(e.to_string()),
        }
    }

    pub fn format_output(&self, output: &TeachOutput, options: &TeachOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &TeachOutput) -> String {
    match (&output.suggestion, &output.error) {
        (Some(s), _) => format!(
            "Queued suggestion {} ({} -> {}): {}",
            s.id, s.from_pool, s.to_pool, s.text
        ),
        (None, error) => format!(
            "Teach failed: {}",
            error.as_deref().unwrap_or("unknown error")
        ),
    }
}

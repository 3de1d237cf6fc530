//! Deliver command for cortex.
//!
//! Moves pending suggestions into their target pools. From the command line
//! the caller stands in for the controller, so the tick profile defaults to
//! idle with no pressure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, Workspace};
use crate::config::SuggestionsConfig;
use crate::core::Pool;
use crate::meta::TickProfile;
use crate::teaching::{can_deliver, Suggestion, SuggestionDelivery, SuggestionStore};

/// Options for the deliver command.
#[derive(Debug, Clone, Default)]
pub struct DeliverOptions {
    pub json: bool,
    pub quiet: bool,
    pub to_pool: Option<Pool>,
    /// Overrides the configured delivery budget.
    pub limit: Option<usize>,
    /// Controller pressure to report; delivery needs it under the configured maximum.
    pub pressure: f64,
    pub busy: bool,
}

impl DeliverOptions {
    fn profile(&self) -> TickProfile {
        TickProfile {
            is_idle: !self.busy,
            pressure: self.pressure,
            ..Default::default()
        }
    }
}

/// Output format for the deliver command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverOutput {
    pub success: bool,
    /// False when the profile kept the gate closed.
    pub gate_open: bool,
    pub delivered: Vec<Suggestion>,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliverOutput {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            gate_open: false,
            delivered: Vec::new(),
            pending: 0,
            error: Some(error.into()),
        }
    }
}

/// The deliver command implementation.
pub struct DeliverCommand {
    delivery: SuggestionDelivery,
    suggestions: Arc<SuggestionStore>,
    config: SuggestionsConfig,
}

impl DeliverCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            delivery: SuggestionDelivery::new(
                Arc::clone(workspace.store()),
                Arc::clone(workspace.suggestions()),
                workspace.config(),
            ),
            suggestions: Arc::clone(workspace.suggestions()),
            config: workspace.config().suggestions.clone(),
        }
    }

    pub async fn run(&self, options: &DeliverOptions) -> DeliverOutput {
        let profile = options.profile();
        let gate_open = can_deliver(&profile, &self.config);
        let delivered = match self
            .delivery
            .deliver_pending(&profile, options.to_pool, options.limit)
            .await
        {
            Ok(delivered) => delivered,
            Err(e) => return DeliverOutput::failure(e.to_string()),
        };
        let pending = match self.suggestions.list_pending(options.to_pool) {
            Ok(pending) => pending.len(),
            Err(e) => return DeliverOutput::failure(e.to_string()),
        };
        DeliverOutput {
            success: true,
            gate_open,
            delivered,
            pending,
            error: None,
        }
    }

    pub fn format_output(&self, output: &DeliverOutput, options: &DeliverOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &DeliverOutput) -> String {
    if let Some(error) = &output.error {
        return format!("Delivery failed: {}", error);
    }
    if !output.gate_open {
        return format!(
            "Delivery gate closed; {} suggestion(s) still pending",
            output.pending
        );
    }

    let mut lines = vec![format!(
        "Delivered {} suggestion(s), {} pending",
        output.delivered.len(),
        output.pending
    )];
    for s in &output.delivered {
        lines.push(format!(
            "  {} -> {} as {}: {}",
            s.id,
            s.to_pool,
            s.delivered_bullet_id.as_deref().unwrap_or("-"),
            s.text
        ));
    }
    lines.join("\n")
}

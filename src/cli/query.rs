//! Query command for cortex.
//!
//! Retrieves bullets for a task from one pool (plus shared) and optionally
//! renders them as a prompt playbook.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, BulletInfo, Workspace};
use crate::core::Pool;
use crate::memory::{KnowledgeStore, Query};

/// Options for the query command.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub json: bool,
    pub quiet: bool,
    pub text: String,
    pub pool: Pool,
    /// Own-pool result count (default: the pool's configured k).
    pub k: Option<usize>,
    pub min_confidence: f64,
    pub no_shared: bool,
    pub tags: Vec<String>,
    /// Print the playbook instead of a listing.
    pub playbook: bool,
}

impl QueryOptions {
    pub fn new(text: impl Into<String>, pool: Pool) -> Self {
        Self {
            json: false,
            quiet: false,
            text: text.into(),
            pool,
            k: None,
            min_confidence: 0.0,
            no_shared: false,
            tags: Vec::new(),
            playbook: false,
        }
    }
}

/// Output format for the query command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub success: bool,
    pub count: usize,
    pub bullets: Vec<BulletInfo>,
    /// Ids that count as used for a later `outcome`.
    pub used_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutput {
    pub fn success(bullets: Vec<BulletInfo>, used_ids: Vec<String>, playbook: Option<String>) -> Self {
        Self {
            success: true,
            count: bullets.len(),
            bullets,
            used_ids,
            playbook,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            count: 0,
            bullets: Vec::new(),
            used_ids: Vec::new(),
            playbook: None,
            error: Some(error.into()),
        }
    }
}

/// The query command implementation.
pub struct QueryCommand {
    store: Arc<KnowledgeStore>,
}

impl QueryCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            store: Arc::clone(workspace.store()),
        }
    }

    pub async fn run(&self, options: &QueryOptions) -> QueryOutput {
        let mut query = Query::new(&options.text, options.pool)
            .with_min_confidence(options.min_confidence)
            .with_tags(options.tags.clone());
        if let Some(k) = options.k {
            query = query.with_k(k);
        }
        if options.no_shared {
            query = query.without_shared();
        }

        match self.store.query(&query).await {
            Ok(result) => {
                let playbook = options
                    .playbook
                    .then(|| self.store.format_for_prompt(&result.bullets, None));
                let bullets = result.bullets.iter().map(BulletInfo::from_bullet).collect();
                QueryOutput::success(bullets, result.used_ids, playbook)
            }
            Err(e) => QueryOutput::failure(e.to_string()),
        }
    }

    pub fn format_output(&self, output: &QueryOutput, options: &QueryOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &QueryOutput) -> String {
    if !output.success {
        return format!(
            "Query failed: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(playbook) = &output.playbook {
        return playbook.clone();
    }
    if output.bullets.is_empty() {
        return "No matching bullets.".to_string();
    }

    let mut lines = vec![format!("Found {} bullet(s):", output.count)];
    for bullet in &output.bullets {
        lines.push(format!("  {} ({})", bullet.line(), bullet.pool));
    }
    lines.join("\n")
}

//! Suggestions command for cortex.
//!
//! Lists cross-pool suggestions and resolves or expires them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, Workspace};
use crate::core::Pool;
use crate::error::Result;
use crate::teaching::{Suggestion, SuggestionStatus, SuggestionStore};

/// Actions available in suggestions.
#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionsAction {
    List {
        status: Option<String>,
        to_pool: Option<Pool>,
    },
    Accept {
        id: String,
        reason: String,
    },
    Reject {
        id: String,
        reason: String,
    },
    /// Expire active suggestions older than `days` (configured expiry when unset).
    Expire {
        days: Option<u32>,
    },
}

/// Options for the suggestions command.
#[derive(Debug, Clone, Default)]
pub struct SuggestionsOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Output format for the suggestions command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionsOutput {
    pub success: bool,
    pub action: String,
    pub count: usize,
    pub suggestions: Vec<Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuggestionsOutput {
    pub fn success(action: &str, suggestions: Vec<Suggestion>) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            count: suggestions.len(),
            suggestions,
            expired: None,
            error: None,
        }
    }

    pub fn failure(action: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            count: 0,
            suggestions: Vec::new(),
            expired: None,
            error: Some(error.into()),
        }
    }
}

/// The suggestions command implementation.
pub struct SuggestionsCommand {
    suggestions: Arc<SuggestionStore>,
    expiry_days: u32,
}

impl SuggestionsCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            suggestions: Arc::clone(workspace.suggestions()),
            expiry_days: workspace.config().suggestions.expiry_days,
        }
    }

    pub fn run(&self, action: &SuggestionsAction, _options: &SuggestionsOptions) -> SuggestionsOutput {
        let name = match action {
            SuggestionsAction::List { .. } => "list",
            SuggestionsAction::Accept { .. } => "accept",
            SuggestionsAction::Reject { .. } => "reject",
            SuggestionsAction::Expire { .. } => "expire",
        };
        match self.execute(name, action) {
            Ok(output) => output,
            Err(e) => SuggestionsOutput::failure(name, e.to_string()),
        }
    }

    fn execute(&self, name: &str, action: &SuggestionsAction) -> Result<SuggestionsOutput> {
        match action {
            SuggestionsAction::List { status, to_pool } => {
                let status = status
                    .as_deref()
                    .map(str::parse::<SuggestionStatus>)
                    .transpose()?;
                let mut items = self.suggestions.list(status)?;
                if let Some(pool) = to_pool {
                    items.retain(|s| s.to_pool == *pool);
                }
                Ok(SuggestionsOutput::success(name, items))
            }
            SuggestionsAction::Accept { id, reason } => {
                let resolved = self.suggestions.resolve(id, true, reason)?;
                Ok(SuggestionsOutput::success(name, vec![resolved]))
            }
            SuggestionsAction::Reject { id, reason } => {
                let resolved = self.suggestions.resolve(id, false, reason)?;
                Ok(SuggestionsOutput::success(name, vec![resolved]))
            }
            SuggestionsAction::Expire { days } => {
                let expired = self.suggestions.expire_old(days.unwrap_or(self.expiry_days))?;
                Ok(SuggestionsOutput {
                    expired: Some(expired),
                    ..SuggestionsOutput::success(name, Vec::new())
                })
            }
        }
    }

    pub fn format_output(&self, output: &SuggestionsOutput, options: &SuggestionsOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &SuggestionsOutput) -> String {
    if !output.success {
        return format!(
            "Suggestion {} failed: {}",
            output.action,
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(expired) = output.expired {
        return format!("Expired {} suggestion(s)", expired);
    }
    if output.action != "list" {
        return output
            .suggestions
            .iter()
            .map(|s| format!("Suggestion {} {}", s.id, s.status))
            .collect::<Vec<_>>()
            .join("\n");
    }
    if output.suggestions.is_empty() {
        return "No suggestions.".to_string();
    }

    let mut lines = vec![format!("{} suggestion(s):", output.count)];
    for s in &output.suggestions {
        lines.push(format!(
            "  [{}] {} -> {} ({}): {}",
            s.id, s.from_pool, s.to_pool, s.status, s.text
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::workspace::tests::test_workspace;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn seed(ws: &Workspace) -> (String, String) {
        let a = ws
            .suggestions()
            .create(Suggestion::new(Pool::Left, Pool::Right, "", "Validate configs early"))
            .unwrap();
        let b = ws
            .suggestions()
            .create(Suggestion::new(Pool::Right, Pool::Left, "", "Try a spike first"))
            .unwrap();
        (a.id, b.id)
    }

    #[test]
    fn test_list_filters() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        seed(&ws);
        let cmd = SuggestionsCommand::new(&ws);
        let options = SuggestionsOptions::default();

        let all = cmd.run(
            &SuggestionsAction::List {
                status: None,
                to_pool: None,
            },
            &options,
        );
        assert_eq!(all.count, 2);

        let to_left = cmd.run(
            &SuggestionsAction::List {
                status: Some("pending".to_string()),
                to_pool: Some(Pool::Left),
            },
            &options,
        );
        assert_eq!(to_left.count, 1);
        assert_eq!(to_left.suggestions[0].text, "Try a spike first");
    }

    #[test]
    fn test_accept_and_reject() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let (a, b) = seed(&ws);
        let cmd = SuggestionsCommand::new(&ws);
        let options = SuggestionsOptions::default();

        let accepted = cmd.run(
            &SuggestionsAction::Accept {
                id: a.clone(),
                reason: "fits".to_string(),
            },
            &options,
        );
        assert!(accepted.success);
        assert_eq!(accepted.suggestions[0].status, SuggestionStatus::Accepted);

        let rejected = cmd.run(
            &SuggestionsAction::Reject {
                id: b,
                reason: String::new(),
            },
            &options,
        );
        assert_eq!(rejected.suggestions[0].status, SuggestionStatus::Rejected);

        // Resolving twice is an error.
        let again = cmd.run(
            &SuggestionsAction::Reject {
                id: a,
                reason: String::new(),
            },
            &options,
        );
        assert!(!again.success);
    }

    #[test]
    fn test_expire() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        ws.suggestions()
            .create(
                Suggestion::new(Pool::Left, Pool::Right, "", "Old advice")
                    .with_created_at(Utc::now() - Duration::days(40)),
            )
            .unwrap();
        seed(&ws);

        let cmd = SuggestionsCommand::new(&ws);
        let options = SuggestionsOptions::default();
        let output = cmd.run(&SuggestionsAction::Expire { days: Some(30) }, &options);
        assert_eq!(output.expired, Some(1));
        assert_eq!(cmd.format_output(&output, &options), "Expired 1 suggestion(s)");

        // Configured expiry of zero never expires.
        let none = cmd.run(&SuggestionsAction::Expire { days: None }, &options);
        assert_eq!(none.expired, Some(0));
    }
}

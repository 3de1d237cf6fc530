//! CLI commands for cortex.
//!
//! Every command follows the same shape: an `XOptions` struct filled from
//! clap, an `XOutput` that serializes to JSON, and an `XCommand` whose
//! `run` never fails (errors land in `output.error`). Commands are grouped
//! into:
//! - **Knowledge**: add, query, list, stats, outcome
//! - **Maintenance**: dedup, prune, rollback, backups, restore, maintain
//! - **Teaching**: suggestions, teach, deliver
//! - **Utility**: classify, config

pub mod workspace;

// Knowledge
pub mod add;
pub mod list;
pub mod outcome;
pub mod query;
pub mod stats;

// Maintenance
pub mod dedup;
pub mod maintain;
pub mod prune;
pub mod restore;

// Teaching
pub mod deliver;
pub mod suggestions;
pub mod teach;

// Utility
pub mod classify;
pub mod config_cmd;

use serde::{Deserialize, Serialize};

use crate::core::Bullet;

pub use add::AddCommand;
pub use classify::ClassifyCommand;
pub use config_cmd::ConfigCommand;
pub use dedup::DedupCommand;
pub use deliver::DeliverCommand;
pub use list::ListCommand;
pub use maintain::MaintainCommand;
pub use outcome::OutcomeCommand;
pub use prune::PruneCommand;
pub use query::QueryCommand;
pub use restore::RestoreCommand;
pub use stats::StatsCommand;
pub use suggestions::SuggestionsCommand;
pub use teach::TeachCommand;
pub use workspace::Workspace;

/// Render a command output.
///
/// Quiet wins over JSON; JSON falls back to `{}` if serialization fails.
pub fn render<T: Serialize>(
    output: &T,
    json: bool,
    quiet: bool,
    human: impl FnOnce(&T) -> String,
) -> String {
    if quiet {
        return String::new();
    }
    if json {
        return serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string());
    }
    human(output)
}

/// Bullet summary shared by command outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletInfo {
    pub id: String,
    pub text: String,
    pub pool: String,
    pub kind: String,
    pub status: String,
    pub confidence: f64,
    pub score: f64,
    pub helpful: u32,
    pub harmful: u32,
    pub tags: Vec<String>,
    pub created: String,
}

impl BulletInfo {
    pub fn from_bullet(bullet: &Bullet) -> Self {
        Self {
            id: bullet.id.clone(),
            text: bullet.text.clone(),
            pool: bullet.pool.to_string(),
            kind: bullet.kind.to_string(),
            status: bullet.status.to_string(),
            confidence: bullet.confidence,
            score: bullet.score(),
            helpful: bullet.helpful_count,
            harmful: bullet.harmful_count,
            tags: bullet.tags.clone(),
            created: bullet.created_at.format("%Y-%m-%d").to_string(),
        }
    }

    /// One line for human-readable listings.
    pub fn line(&self) -> String {
        let mut line = format!(
            "[{}] {} ({}, {}, conf {:.2}, +{}/-{})",
            self.id, self.text, self.kind, self.status, self.confidence, self.helpful, self.harmful
        );
        if !self.tags.is_empty() {
            line.push_str(&format!(" [{}]", self.tags.join(", ")));
        }
        line
    }
}

/// Split a comma-separated tag argument, dropping empty entries.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BulletKind, Pool};

    #[derive(Serialize)]
    struct Sample {
        success: bool,
    }

    #[test]
    fn test_render_modes() {
        let sample = Sample { success: true };
        assert_eq!(render(&sample, true, true, |_| "human".into()), "");
        assert!(render(&sample, true, false, |_| "human".into()).contains("\"success\": true"));
        assert_eq!(render(&sample, false, false, |_| "human".into()), "human");
    }

    #[test]
    fn test_bullet_info_line() {
        let bullet = Bullet::new("Run tests first", Pool::Left, BulletKind::Checklist)
            .with_tags(vec!["ci".to_string()]);
        let info = BulletInfo::from_bullet(&bullet);
        assert_eq!(info.pool, "left");
        assert_eq!(info.kind, "checklist");
        let line = info.line();
        assert!(line.contains("Run tests first"));
        assert!(line.contains("[ci]"));
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
    }
}

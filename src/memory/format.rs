//! Playbook rendering for LLM context.

use std::collections::BTreeMap;

use crate::core::{Bullet, BulletKind};

/// Render bullets as a playbook grouped by kind.
///
/// Sections come in kind-name order; bullets inside a section are sorted by
/// score, highest first. Only the first `max_bullets` inputs are used when a
/// limit is given.
pub fn format_for_prompt(bullets: &[Bullet], max_bullets: Option<usize>) -> String {
    let limit = max_bullets.unwrap_or(bullets.len()).min(bullets.len());
    if limit == 0 {
        return String::new();
    }

    let mut by_kind: BTreeMap<&'static str, (BulletKind, Vec<&Bullet>)> = BTreeMap::new();
    for bullet in &bullets[..limit] {
        by_kind
            .entry(bullet.kind.as_str())
            .or_insert_with(|| (bullet.kind, Vec::new()))
            .1
            .push(bullet);
    }

    let mut sections = Vec::with_capacity(by_kind.len());
    for (_, (kind, mut group)) in by_kind {
        group.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut lines = vec![format!("\n## {}\n", kind.section_title())];
        for bullet in group {
            let short_id: String = bullet.id.chars().take(12).collect();
            let tags = if bullet.tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", bullet.tags.join(", "))
            };
            lines.push(format!(
                "[{}]{} {} (score: {:.2})",
                short_id,
                tags,
                bullet.text,
                bullet.score()
            ));
        }
        sections.push(lines.join("\n"));
    }

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Pool;

    #[test]
    fn test_empty_input() {
        assert_eq!(format_for_prompt(&[], None), "");
        let b = Bullet::new("x", Pool::Left, BulletKind::Pitfall);
        assert_eq!(format_for_prompt(&[b], Some(0)), "");
    }

    #[test]
    fn test_sections_and_ordering() {
        let low = Bullet::new("Low scored rule", Pool::Left, BulletKind::ToolRule)
            .with_confidence(0.3);
        let high = Bullet::new("High scored rule", Pool::Left, BulletKind::ToolRule)
            .with_confidence(0.9)
            .with_tags(vec!["git".to_string(), "ci".to_string()]);
        let pitfall = Bullet::new("Never force push", Pool::Left, BulletKind::Pitfall);

        let out = format_for_prompt(&[low, high, pitfall], None);

        // pitfall sorts before tool_rule
        let pitfall_at = out.find("## COMMON MISTAKES TO AVOID").unwrap();
        let tools_at = out.find("## TOOL USAGE RULES").unwrap();
        assert!(pitfall_at < tools_at);

        let high_at = out.find("High scored rule").unwrap();
        let low_at = out.find("Low scored rule").unwrap();
        assert!(high_at < low_at);
        assert!(out.contains("[git, ci] High scored rule (score: 0.90)"));
        assert!(out.contains("[pb_left_"));
    }

    #[test]
    fn test_max_bullets_limits_input() {
        let a = Bullet::new("first", Pool::Left, BulletKind::Heuristic);
        let b = Bullet::new("second", Pool::Left, BulletKind::Concept);
        let out = format_for_prompt(&[a, b], Some(1));
        assert!(out.contains("first"));
        assert!(!out.contains("second"));
    }
}

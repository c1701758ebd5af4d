//! Token-budget-aware context formatting
//!
//! Packs scored context items into a markdown block under a token budget.
//! Selection is greedy by descending score with skip-and-continue, so a
//! smaller lower-ranked item can still fit after a large one is rejected.
//! Accepted items are grouped by kind under fixed headers in a fixed order.
//!
//! Pure and deterministic: identical `(items, budget, now)` yields
//! byte-identical output.

use chrono::{DateTime, Utc};

use crate::context::retriever::{ContextItem, ContextKind};

/// Fixed group emission order.
const KIND_ORDER: [ContextKind; 6] = [
    ContextKind::Focus,
    ContextKind::Conversation,
    ContextKind::Task,
    ContextKind::Commitment,
    ContextKind::Skill,
    ContextKind::Error,
];

const HEADING: &str = "## Focus Context";

/// Conservative token estimate: ceil(chars / 4).
fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4).max(1)
}

/// Render one item to its block: the tag line plus an optional body line.
fn render_item(item: &ContextItem, now: DateTime<Utc>) -> String {
    let mut line = format!("[{}] {}", item.kind.tag(), item.title);
    if let Some(qualifier) = &item.qualifier {
        line.push_str(&format!(" — {}", qualifier));
    }
    if let Some(recency) = item.recency {
        line.push_str(&format!(" ({})", relative_age(recency, now)));
    }
    if let Some(body) = &item.body {
        if !body.is_empty() {
            line.push('\n');
            line.push_str(body);
        }
    }
    line
}

/// Pack items into the final markdown block.
///
/// Returns the empty string when no items fit or none were given.
pub fn format_context(items: &[ContextItem], budget_tokens: usize, now: DateTime<Utc>) -> String {
    if items.is_empty() {
        return String::new();
    }

    // Stable sort by descending score preserves branch ordering for ties
    let mut sorted: Vec<&ContextItem> = items.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut remaining = budget_tokens.saturating_sub(estimate_tokens(HEADING));
    let mut accepted: Vec<(&ContextItem, String)> = Vec::new();
    let mut kinds_present: Vec<ContextKind> = Vec::new();

    for item in sorted {
        let rendered = render_item(item, now);
        let mut cost = estimate_tokens(&rendered);
        // First item of a kind also pays for its group header
        if !kinds_present.contains(&item.kind) {
            cost += estimate_tokens(&format!("### {}", item.kind.header()));
        }

        if cost <= remaining {
            remaining -= cost;
            if !kinds_present.contains(&item.kind) {
                kinds_present.push(item.kind);
            }
            accepted.push((item, rendered));
        }
        // Too large: skip and keep looking for smaller items
    }

    if accepted.is_empty() {
        return String::new();
    }

    let mut out = String::from(HEADING);
    for kind in KIND_ORDER {
        let group: Vec<&(&ContextItem, String)> =
            accepted.iter().filter(|(i, _)| i.kind == kind).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str("\n\n### ");
        out.push_str(kind.header());
        for (_, rendered) in group {
            out.push('\n');
            out.push_str(rendered);
        }
    }

    out
}

/// Format a timestamp as a relative age (e.g., "2h ago").
fn relative_age(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 60 {
        "just now".to_string()
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        format!("{}w ago", duration.num_days() / 7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn item(kind: ContextKind, title: &str, score: f64) -> ContextItem {
        ContextItem {
            kind,
            ref_id: title.to_string(),
            title: title.to_string(),
            body: None,
            qualifier: None,
            score,
            recency: None,
            project_id: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn test_empty_input_emits_empty_string() {
        assert_eq!(format_context(&[], 1500, fixed_now()), "");
    }

    #[test]
    fn test_zero_budget_emits_empty_string() {
        let items = vec![item(ContextKind::Task, "fix login", 0.9)];
        assert_eq!(format_context(&items, 0, fixed_now()), "");
    }

    #[test]
    fn test_heading_and_group_structure() {
        let items = vec![
            item(ContextKind::Task, "fix login", 0.9),
            item(ContextKind::Focus, "simon", 0.8),
            item(ContextKind::Error, "Traceback: boom", 0.4),
        ];

        let out = format_context(&items, 1500, fixed_now());
        assert!(out.starts_with("## Focus Context"));

        // Fixed group order regardless of score order
        let focus_pos = out.find("### Focus").unwrap();
        let task_pos = out.find("### Tasks").unwrap();
        let error_pos = out.find("### Errors").unwrap();
        assert!(focus_pos < task_pos && task_pos < error_pos);

        assert!(out.contains("[Task] fix login"));
        assert!(out.contains("[Focus] simon"));
        assert!(out.contains("[Error] Traceback: boom"));
    }

    #[test]
    fn test_task_ranked_above_error_in_group_order() {
        // The S5 shape: a high pinned task and a matching error artifact
        let mut task = item(ContextKind::Task, "fix login", 0.63);
        task.qualifier = Some("high, pinned".to_string());
        let error = item(
            ContextKind::Error,
            "AttributeError: 'NoneType' object has no attribute 'user'",
            0.5,
        );

        let out = format_context(&[error, task], 1500, fixed_now());
        let task_pos = out.find("[Task] fix login").unwrap();
        let error_pos = out.find("[Error] AttributeError").unwrap();
        assert!(task_pos < error_pos);
    }

    #[test]
    fn test_deterministic_output() {
        let items = vec![
            item(ContextKind::Conversation, "parser work", 0.7),
            item(ContextKind::Task, "fix login", 0.9),
        ];
        let a = format_context(&items, 1500, fixed_now());
        let b = format_context(&items, 1500, fixed_now());
        assert_eq!(a, b);
    }

    #[test]
    fn test_skip_and_continue_packing() {
        let mut big = item(ContextKind::Conversation, "big", 0.9);
        big.body = Some("x".repeat(2000));
        let small = item(ContextKind::Task, "small", 0.5);

        // Budget fits the small item but not the big one
        let out = format_context(&[big, small], 80, fixed_now());
        assert!(!out.contains("[Conv] big"));
        assert!(out.contains("[Task] small"));
    }

    #[test]
    fn test_budget_monotonicity() {
        let items: Vec<ContextItem> = (0..8)
            .map(|i| {
                let mut it = item(ContextKind::Task, &format!("task-{i}"), 1.0 - i as f64 * 0.1);
                it.body = Some("detail ".repeat(10));
                it
            })
            .collect();

        let accepted_titles = |budget: usize| -> Vec<String> {
            let out = format_context(&items, budget, fixed_now());
            (0..8)
                .map(|i| format!("task-{i}"))
                .filter(|t| out.contains(&format!("[Task] {t}")))
                .collect()
        };

        for (b1, b2) in [(60, 120), (120, 240), (240, 1500), (60, 1500)] {
            let small = accepted_titles(b1);
            let large = accepted_titles(b2);
            for title in &small {
                assert!(
                    large.contains(title),
                    "budget {} accepted {:?} missing under {}",
                    b1,
                    title,
                    b2
                );
            }
        }
    }

    #[test]
    fn test_qualifier_and_age_rendering() {
        let mut it = item(ContextKind::Task, "fix login", 0.9);
        it.qualifier = Some("high, pinned".to_string());
        it.recency = Some(fixed_now() - chrono::Duration::hours(2));

        let out = format_context(&[it], 1500, fixed_now());
        assert!(out.contains("[Task] fix login — high, pinned (2h ago)"));
    }

    #[test]
    fn test_relative_age_buckets() {
        let now = fixed_now();
        assert_eq!(relative_age(now - chrono::Duration::seconds(30), now), "just now");
        assert_eq!(relative_age(now - chrono::Duration::minutes(5), now), "5m ago");
        assert_eq!(relative_age(now - chrono::Duration::hours(3), now), "3h ago");
        assert_eq!(relative_age(now - chrono::Duration::days(2), now), "2d ago");
        assert_eq!(relative_age(now - chrono::Duration::days(21), now), "3w ago");
    }
}

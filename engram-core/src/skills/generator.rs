//! SKILL.md generation
//!
//! Renders skill documents with YAML frontmatter (`name`, `description`,
//! `triggers`) followed by a numbered procedure, and derives the trigger
//! keywords that surface a skill back into context.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::SkillRequest;

/// Validate and normalize a skill name: lowercase alphanumerics and
/// hyphens, at most 64 characters.
pub fn validate_skill_name(name: &str) -> Result<String> {
    let mut normalized = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            normalized.push(c);
        } else if !normalized.ends_with('-') && !normalized.is_empty() {
            normalized.push('-');
        }
    }
    let normalized = normalized.trim_matches('-').to_string();

    if normalized.is_empty() {
        return Err(Error::Skill(format!("cannot normalize skill name: {:?}", name)));
    }

    if normalized.len() > 64 {
        let mut end = 64;
        while !normalized.is_char_boundary(end) {
            end -= 1;
        }
        return Ok(normalized[..end].trim_end_matches('-').to_string());
    }
    Ok(normalized)
}

/// Render a complete SKILL.md with frontmatter and body.
pub fn render_skill_md(
    name: &str,
    description: &str,
    triggers: &[String],
    body: &str,
) -> String {
    let mut lines = vec!["---".to_string()];
    lines.push(format!("name: {}", name));
    lines.push(format!("description: {}", description));
    lines.push(format!("triggers: [{}]", triggers.join(", ")));
    lines.push("---".to_string());
    lines.push(String::new());
    lines.push(body.trim().to_string());
    lines.push(String::new());
    lines.join("\n")
}

/// Derive trigger keywords from the generation context: top entities
/// (tool-touched file stems) plus distinctive description words.
pub fn derive_triggers(request: &SkillRequest, max: usize) -> Vec<String> {
    let mut triggers: Vec<String> = Vec::new();

    let mut push = |raw: &str| {
        let token = raw.trim().to_lowercase();
        if token.len() > 2 && !triggers.contains(&token) && triggers.len() < max {
            triggers.push(token);
        }
    };

    for file in &request.files_touched {
        if let Some(stem) = Path::new(file).file_stem().and_then(|s| s.to_str()) {
            for part in stem.split(['_', '-', '.']) {
                push(part);
            }
        }
    }
    for command in &request.commands_run {
        if let Some(argv0) = command.split_whitespace().next() {
            push(argv0);
        }
    }
    for word in request.description.split(|c: char| !c.is_alphanumeric()) {
        push(word);
    }

    triggers
}

/// Build a numbered procedure from ordered turn titles. Used when the
/// caller already has the steps and no model synthesis is involved.
pub fn procedure_from_titles(titles: &[String]) -> String {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| format!("{}. {}", i + 1, title))
        .collect::<Vec<_>>()
        .join("\n")
}

/// sha256 hex digest of a rendered skill document.
pub fn skill_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_skill_name_normalizes() {
        assert_eq!(validate_skill_name("Deploy Staging!").unwrap(), "deploy-staging");
        assert_eq!(validate_skill_name("a__b..c").unwrap(), "a-b-c");
        assert_eq!(validate_skill_name("-lead-trail-").unwrap(), "lead-trail");
    }

    #[test]
    fn test_validate_skill_name_rejects_empty() {
        assert!(validate_skill_name("!!!").is_err());
        assert!(validate_skill_name("").is_err());
    }

    #[test]
    fn test_validate_skill_name_truncates() {
        let long = "x".repeat(100);
        let name = validate_skill_name(&long).unwrap();
        assert!(name.len() <= 64);
    }

    #[test]
    fn test_render_skill_md_frontmatter() {
        let content = render_skill_md(
            "deploy-staging",
            "Deploy the app to staging",
            &["deploy".to_string(), "staging".to_string()],
            "1. Build the image\n2. Push it",
        );

        assert!(content.starts_with("---\n"));
        assert!(content.contains("name: deploy-staging"));
        assert!(content.contains("description: Deploy the app to staging"));
        assert!(content.contains("triggers: [deploy, staging]"));
        assert!(content.contains("1. Build the image"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn test_derive_triggers_from_context() {
        let request = SkillRequest {
            description: "Release the parser crate".to_string(),
            files_touched: vec!["/src/release_notes.md".to_string()],
            commands_run: vec!["cargo publish --dry-run".to_string()],
            ..Default::default()
        };

        let triggers = derive_triggers(&request, 8);
        assert!(triggers.contains(&"release".to_string()));
        assert!(triggers.contains(&"notes".to_string()));
        assert!(triggers.contains(&"cargo".to_string()));
        assert!(triggers.contains(&"parser".to_string()));
        assert!(triggers.len() <= 8);
    }

    #[test]
    fn test_procedure_from_titles() {
        let titles = vec!["Inspect the failure".to_string(), "Patch and verify".to_string()];
        assert_eq!(
            procedure_from_titles(&titles),
            "1. Inspect the failure\n2. Patch and verify"
        );
    }

    #[test]
    fn test_skill_content_hash_is_64_hex() {
        let hash = skill_content_hash("content");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, skill_content_hash("content"));
        assert_ne!(hash, skill_content_hash("other"));
    }
}

//! Skill installation on disk
//!
//! Skills live at `<base>/<name>/SKILL.md` where `<base>` is the
//! configured skills directory for the scope. Validation happens before
//! any write.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::SkillScope;

/// An installed skill discovered on disk.
#[derive(Debug, Clone)]
pub struct InstalledSkill {
    pub name: String,
    pub description: String,
    pub triggers: Vec<String>,
    pub path: PathBuf,
    pub scope: SkillScope,
}

/// Parse the YAML-like frontmatter of a SKILL.md into key/value pairs.
pub fn parse_frontmatter(content: &str) -> Vec<(String, String)> {
    if !content.starts_with("---") {
        return vec![];
    }

    let mut fields = Vec::new();
    for line in content.lines().skip(1) {
        if line.trim() == "---" {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    fields
}

fn frontmatter_value<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Parse a `triggers: [a, b, c]` value into its entries.
pub fn parse_triggers(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Validate SKILL.md content. Returns all problems found, empty when
/// valid.
pub fn validate_skill_content(content: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if content.trim().is_empty() {
        errors.push("skill content is empty".to_string());
        return errors;
    }
    if !content.starts_with("---") {
        errors.push("missing frontmatter (must start with ---)".to_string());
        return errors;
    }

    let fields = parse_frontmatter(content);

    match frontmatter_value(&fields, "name") {
        Some(name) if !name.is_empty() => {
            if !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                || name.starts_with('-')
                || name.ends_with('-')
            {
                errors.push(format!(
                    "invalid skill name '{}': must be lowercase alphanumeric plus hyphens",
                    name
                ));
            }
            if name.len() > 64 {
                errors.push(format!("skill name too long ({} > 64 chars)", name.len()));
            }
        }
        _ => errors.push("missing 'name' field in frontmatter".to_string()),
    }

    if frontmatter_value(&fields, "description").is_none_or(|d| d.is_empty()) {
        errors.push("missing or empty 'description' field in frontmatter".to_string());
    }

    // Body must exist after the closing fence
    let mut sections = content.splitn(3, "---");
    sections.next();
    sections.next();
    if sections.next().map(str::trim).unwrap_or("").is_empty() {
        errors.push("missing instruction body after frontmatter".to_string());
    }

    errors
}

/// Install a skill document under the given skills directory.
///
/// Fails when the skill already exists unless `force` is set, and always
/// validates first.
pub fn install_skill(
    skills_dir: &Path,
    name: &str,
    content: &str,
    force: bool,
) -> Result<PathBuf> {
    let errors = validate_skill_content(content);
    if !errors.is_empty() {
        return Err(Error::Skill(format!(
            "invalid skill content: {}",
            errors.join("; ")
        )));
    }

    let skill_dir = skills_dir.join(name);
    let skill_path = skill_dir.join("SKILL.md");

    if skill_path.exists() && !force {
        return Err(Error::Skill(format!(
            "skill '{}' already exists at {}",
            name,
            skill_path.display()
        )));
    }

    std::fs::create_dir_all(&skill_dir)?;
    std::fs::write(&skill_path, content)?;

    tracing::info!(name, path = %skill_path.display(), "Installed skill");
    Ok(skill_path)
}

/// Remove an installed skill. Returns whether anything was removed.
pub fn uninstall_skill(skills_dir: &Path, name: &str) -> Result<bool> {
    let skill_dir = skills_dir.join(name);
    if !skill_dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&skill_dir)?;
    tracing::info!(name, "Uninstalled skill");
    Ok(true)
}

/// List installed skills under a skills directory.
pub fn list_installed(skills_dir: &Path, scope: SkillScope) -> Vec<InstalledSkill> {
    let Ok(entries) = std::fs::read_dir(skills_dir) else {
        return vec![];
    };

    let mut skills = Vec::new();
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let skill_md = dir.join("SKILL.md");
        let Ok(content) = std::fs::read_to_string(&skill_md) else {
            continue;
        };
        let fields = parse_frontmatter(&content);

        skills.push(InstalledSkill {
            name: frontmatter_value(&fields, "name")
                .map(str::to_string)
                .unwrap_or_else(|| {
                    dir.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default()
                }),
            description: frontmatter_value(&fields, "description")
                .map(str::to_string)
                .unwrap_or_default(),
            triggers: frontmatter_value(&fields, "triggers")
                .map(parse_triggers)
                .unwrap_or_default(),
            path: skill_md,
            scope,
        });
    }

    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "---\nname: deploy-staging\ndescription: Deploy to staging\ntriggers: [deploy, staging]\n---\n\n1. Build\n2. Ship\n";

    #[test]
    fn test_parse_frontmatter() {
        let fields = parse_frontmatter(VALID);
        assert_eq!(frontmatter_value(&fields, "name"), Some("deploy-staging"));
        assert_eq!(
            frontmatter_value(&fields, "description"),
            Some("Deploy to staging")
        );
    }

    #[test]
    fn test_parse_triggers() {
        assert_eq!(
            parse_triggers("[deploy, staging]"),
            vec!["deploy".to_string(), "staging".to_string()]
        );
        assert!(parse_triggers("[]").is_empty());
    }

    #[test]
    fn test_validate_accepts_valid_content() {
        assert!(validate_skill_content(VALID).is_empty());
    }

    #[test]
    fn test_validate_rejects_problems() {
        assert!(!validate_skill_content("").is_empty());
        assert!(!validate_skill_content("no frontmatter here").is_empty());

        let bad_name = "---\nname: Bad Name\ndescription: d\n---\nbody\n";
        assert!(validate_skill_content(bad_name)
            .iter()
            .any(|e| e.contains("invalid skill name")));

        let no_body = "---\nname: ok\ndescription: d\n---\n\n";
        assert!(validate_skill_content(no_body)
            .iter()
            .any(|e| e.contains("instruction body")));
    }

    #[test]
    fn test_install_list_uninstall_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let skills_dir = dir.path().join("skills");

        let path = install_skill(&skills_dir, "deploy-staging", VALID, false).unwrap();
        assert!(path.exists());

        // Double install without force fails
        assert!(install_skill(&skills_dir, "deploy-staging", VALID, false).is_err());
        // Force overwrites
        assert!(install_skill(&skills_dir, "deploy-staging", VALID, true).is_ok());

        let listed = list_installed(&skills_dir, SkillScope::Personal);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "deploy-staging");
        assert_eq!(listed[0].triggers, vec!["deploy", "staging"]);

        assert!(uninstall_skill(&skills_dir, "deploy-staging").unwrap());
        assert!(!uninstall_skill(&skills_dir, "deploy-staging").unwrap());
    }

    #[test]
    fn test_install_rejects_invalid_content() {
        let dir = tempfile::tempdir().unwrap();
        let result = install_skill(dir.path(), "bad", "not a skill", false);
        assert!(result.is_err());
    }
}

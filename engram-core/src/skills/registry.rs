//! Registry skill installation
//!
//! Clones a remote SKILL.md into the local skills directory. The document
//! is validated before anything touches disk; the caller records the
//! resulting skill with `source = registry`.

use crate::error::{Error, Result};
use crate::skills::installer::{self, parse_frontmatter};

/// A skill document fetched from a registry.
#[derive(Debug, Clone)]
pub struct RegistrySkill {
    pub name: String,
    pub description: String,
    pub content: String,
    pub source_url: String,
}

/// Fetch a SKILL.md from a URL and validate it.
pub async fn fetch_skill(url: &str) -> Result<RegistrySkill> {
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()
        .unwrap_or_default();

    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(Error::Skill(format!(
            "registry fetch failed: {} returned {}",
            url,
            response.status()
        )));
    }

    let content = response.text().await?;
    let errors = installer::validate_skill_content(&content);
    if !errors.is_empty() {
        return Err(Error::Skill(format!(
            "registry document is not a valid skill: {}",
            errors.join("; ")
        )));
    }

    let fields = parse_frontmatter(&content);
    let name = fields
        .iter()
        .find(|(k, _)| k == "name")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| Error::Skill("registry document has no name".to_string()))?;
    let description = fields
        .iter()
        .find(|(k, _)| k == "description")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    Ok(RegistrySkill {
        name,
        description,
        content,
        source_url: url.to_string(),
    })
}

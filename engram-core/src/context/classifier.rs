//! Lexical prompt classification
//!
//! Classifies a prompt against known projects and people using pure
//! string matching; no model calls. Entity lists are prefetched once per
//! invocation so classification itself is CPU-only and stays well inside
//! the 500 ms budget at 10^4 known entities.

use crate::context::artifacts::extract_file_paths;
use crate::db::{PersonRef, ProjectRef, Store};
use crate::error::Result;
use uuid::Uuid;

/// Coarse intent of a prompt, from a leading-token heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Question,
    Command,
    Continuation,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Question => "question",
            Intent::Command => "command",
            Intent::Continuation => "continuation",
            Intent::Unknown => "unknown",
        }
    }
}

/// A matched project or person.
#[derive(Debug, Clone)]
pub struct EntityMatch {
    pub id: Uuid,
    /// Slug for projects, full name for people
    pub name: String,
    /// Confidence in [0, 1], proportional to match occurrences
    pub confidence: f64,
}

/// Output of classifying a prompt.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    pub projects: Vec<EntityMatch>,
    pub people: Vec<EntityMatch>,
    pub paths: Vec<String>,
    pub keywords: Vec<String>,
    pub has_code_fence: bool,
    pub intent: Intent,
}

impl Default for Intent {
    fn default() -> Self {
        Intent::Unknown
    }
}

impl Signal {
    /// Whether anything concrete was matched.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.people.is_empty() && self.paths.is_empty()
    }

    /// Lowercased names of matched projects and people, for entity
    /// intersection queries.
    pub fn entity_names(&self) -> Vec<String> {
        self.projects
            .iter()
            .chain(self.people.iter())
            .map(|m| m.name.to_lowercase())
            .collect()
    }
}

const CONTINUATION_WORDS: &[&str] = &["continue", "keep", "again", "resume", "proceed"];

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "where", "when", "who", "which", "is", "are", "can", "could", "does",
    "do", "should", "would", "will",
];

const IMPERATIVE_WORDS: &[&str] = &[
    "fix", "add", "implement", "write", "update", "refactor", "create", "make", "run", "build",
    "test", "remove", "delete", "rename", "move", "deploy", "install", "check", "debug", "clean",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "into", "your", "you", "was", "were",
    "has", "have", "had", "but", "not", "all", "its", "out", "about", "then", "than", "please",
    "some", "just", "like", "also", "them", "they", "there", "here",
];

/// Prompt classifier over prefetched entity lists.
pub struct Classifier {
    projects: Vec<ProjectRef>,
    people: Vec<PersonRef>,
}

impl Classifier {
    /// Prefetch entity lists from the store. Called at most once per
    /// invocation.
    pub async fn load(store: &Store) -> Result<Self> {
        let projects = store.active_projects().await?;
        let people = store.people_refs().await?;
        tracing::debug!(
            projects = projects.len(),
            people = people.len(),
            "Classifier entities loaded"
        );
        Ok(Self { projects, people })
    }

    /// Build from in-memory entity lists (tests).
    pub fn with_entities(projects: Vec<ProjectRef>, people: Vec<PersonRef>) -> Self {
        Self { projects, people }
    }

    /// Classify a prompt. All string ops; must not suspend.
    pub fn classify(&self, prompt: &str) -> Signal {
        let mut signal = Signal::default();

        let trimmed = prompt.trim();
        if trimmed.len() < 3 {
            return signal;
        }

        let lower = trimmed.to_lowercase();
        let tokens = tokenize(&lower);

        for project in &self.projects {
            let slug_count = count_occurrences(&tokens, &project.slug.to_lowercase());
            let name_count = count_occurrences(&tokens, &project.name.to_lowercase());
            let occurrences = slug_count.max(name_count);
            if occurrences > 0 {
                signal.projects.push(EntityMatch {
                    id: project.id,
                    name: project.slug.clone(),
                    confidence: (0.5 * occurrences as f64).min(1.0),
                });
            }
        }

        for person in &self.people {
            let full = person.name.to_lowercase();
            let full_count = count_occurrences(&tokens, &full);
            let first = full.split_whitespace().next().unwrap_or("");
            let first_count = if first.len() >= 3 {
                count_occurrences(&tokens, first)
            } else {
                0
            };

            if full_count > 0 {
                signal.people.push(EntityMatch {
                    id: person.id,
                    name: person.name.clone(),
                    confidence: 0.9,
                });
            } else if first_count > 0 {
                signal.people.push(EntityMatch {
                    id: person.id,
                    name: person.name.clone(),
                    confidence: 0.6,
                });
            }
        }

        signal.paths = extract_file_paths(trimmed);
        signal.has_code_fence = trimmed.contains("```");
        signal.intent = detect_intent(&lower, &tokens);
        signal.keywords = tokens
            .iter()
            .filter(|t| t.len() > 2 && !STOPWORDS.contains(&t.as_str()))
            .fold(Vec::new(), |mut acc, t| {
                if !acc.contains(t) {
                    acc.push(t.clone());
                }
                acc
            });

        signal
    }
}

/// Lowercased word tokens; slugs keep their hyphens.
fn tokenize(lower: &str) -> Vec<String> {
    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('-').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Count whole-word occurrences of `needle` in the token stream. A
/// multi-word needle matches when its words appear adjacently.
fn count_occurrences(tokens: &[String], needle: &str) -> usize {
    let words: Vec<&str> = needle.split_whitespace().collect();
    match words.len() {
        0 => 0,
        1 => tokens.iter().filter(|t| t.as_str() == words[0]).count(),
        n => tokens
            .windows(n)
            .filter(|w| w.iter().map(|t| t.as_str()).eq(words.iter().copied()))
            .count(),
    }
}

fn detect_intent(lower: &str, tokens: &[String]) -> Intent {
    let Some(first) = tokens.first().map(|t| t.as_str()) else {
        return Intent::Unknown;
    };

    if CONTINUATION_WORDS.contains(&first) {
        return Intent::Continuation;
    }
    if lower.contains('?') || QUESTION_WORDS.contains(&first) {
        return Intent::Question;
    }
    if IMPERATIVE_WORDS.contains(&first) {
        return Intent::Command;
    }
    Intent::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::with_entities(
            vec![
                ProjectRef {
                    id: Uuid::new_v4(),
                    slug: "simon".to_string(),
                    name: "simon".to_string(),
                },
                ProjectRef {
                    id: Uuid::new_v4(),
                    slug: "auth".to_string(),
                    name: "Auth Service".to_string(),
                },
            ],
            vec![PersonRef {
                id: Uuid::new_v4(),
                name: "Jane Doe".to_string(),
            }],
        )
    }

    #[test]
    fn test_continue_prompt_matches_project_and_intent() {
        let signal = classifier().classify("continue simon refactor");
        assert_eq!(signal.projects.len(), 1);
        assert_eq!(signal.projects[0].name, "simon");
        assert_eq!(signal.intent, Intent::Continuation);
    }

    #[test]
    fn test_project_matched_by_name() {
        let signal = classifier().classify("ship the Auth Service milestone");
        assert_eq!(signal.projects.len(), 1);
        assert_eq!(signal.projects[0].name, "auth");
    }

    #[test]
    fn test_no_substring_matches() {
        // "simons" is not a whole-word match for "simon"
        let signal = classifier().classify("ask simons team");
        assert!(signal.projects.is_empty());
    }

    #[test]
    fn test_occurrence_proportional_confidence_bounded() {
        let signal = classifier().classify("simon simon simon simon");
        assert_eq!(signal.projects.len(), 1);
        assert!((signal.projects[0].confidence - 1.0).abs() < f64::EPSILON);

        let single = classifier().classify("look at simon today");
        assert!((single.projects[0].confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_person_full_and_first_name() {
        let full = classifier().classify("sync with Jane Doe tomorrow");
        assert_eq!(full.people.len(), 1);
        assert!((full.people[0].confidence - 0.9).abs() < f64::EPSILON);

        let first = classifier().classify("ping jane about the review");
        assert_eq!(first.people.len(), 1);
        assert!((first.people[0].confidence - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_paths_extracted() {
        let signal = classifier().classify("fix the auth bug in /src/login.py");
        assert_eq!(signal.paths, vec!["/src/login.py"]);
        assert_eq!(signal.intent, Intent::Command);
    }

    #[test]
    fn test_question_intent() {
        assert_eq!(
            classifier().classify("why does the build fail").intent,
            Intent::Question
        );
        assert_eq!(
            classifier().classify("the tests pass now?").intent,
            Intent::Question
        );
    }

    #[test]
    fn test_unknown_intent() {
        assert_eq!(classifier().classify("ok then").intent, Intent::Unknown);
    }

    #[test]
    fn test_code_fence_detected() {
        let signal = classifier().classify("explain this\n```rust\nfn main() {}\n```");
        assert!(signal.has_code_fence);
    }

    #[test]
    fn test_keywords_exclude_stopwords_and_dedupe() {
        let signal = classifier().classify("update the parser and the parser tests");
        assert!(signal.keywords.contains(&"parser".to_string()));
        assert!(signal.keywords.contains(&"tests".to_string()));
        assert!(!signal.keywords.contains(&"the".to_string()));
        assert_eq!(
            signal.keywords.iter().filter(|k| *k == "parser").count(),
            1
        );
    }

    #[test]
    fn test_short_prompt_is_empty_signal() {
        let signal = classifier().classify("ok");
        assert!(signal.is_empty());
        assert!(signal.keywords.is_empty());
    }

    #[test]
    fn test_classification_is_fast_at_scale() {
        // 10^4 entities, classification alone must stay well under 500ms.
        let projects: Vec<ProjectRef> = (0..5000)
            .map(|i| ProjectRef {
                id: Uuid::new_v4(),
                slug: format!("project-{i}"),
                name: format!("Project {i}"),
            })
            .collect();
        let people: Vec<PersonRef> = (0..5000)
            .map(|i| PersonRef {
                id: Uuid::new_v4(),
                name: format!("Person{i} Smith"),
            })
            .collect();

        let classifier = Classifier::with_entities(projects, people);
        let started = std::time::Instant::now();
        let signal =
            classifier.classify("continue project-42 work on /src/login.py with Person7");
        let elapsed = started.elapsed();

        assert_eq!(signal.projects.len(), 1);
        assert_eq!(signal.people.len(), 1);
        assert!(
            elapsed.as_millis() < 500,
            "classification took {:?}",
            elapsed
        );
    }
}

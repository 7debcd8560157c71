//! Prompt templates and rendering.
//!
//! Templates use `{name}` placeholders filled in a single pass, so text
//! substituted into a prompt (article content in particular) is never
//! re-scanned for placeholders.

use std::borrow::Cow;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::info;

use veille_core::Result;

/// Appended to content cut at the size limit.
pub const TRUNCATION_MARKER: &str = "\n[... CONTENT TRUNCATED ...]";

const CLASSIFY_TEMPLATE: &str = "\
You are reviewing the classification of a medical article.

Allowed classifications (category -> subcategories):
{candidates}

Current classification of the article:
{current}

For each category that applies to the article, choose at most {max_subcategories} \
subcategories from the allowed list, using the names exactly as written. A category \
may be given an empty list when none of its subcategories fits.

Answer with a single JSON object mapping category names to arrays of subcategory \
names, and nothing else.

Article to classify:
---
Title: {title}

{content}
---
";

const ARBITRATE_TEMPLATE: &str = "\
Two reviewers classified the same medical article and disagree.

Allowed classifications (category -> subcategories):
{candidates}

Reviewer 1:
{first}

Reviewer 2:
{second}

Decide the correct classification. You may keep either proposal, combine them, or \
propose another one from the allowed list. Use at most {max_subcategories} \
subcategories per category, with the names exactly as written.

Answer with a single JSON object mapping category names to arrays of subcategory \
names, and nothing else.

Article to classify:
---
Title: {title}

{content}
---
";

const GRADE_TEMPLATE: &str = "\
Grade the level of evidence of the following medical abstract.

Answer with exactly one of: A, B, C, Accord d'experts.

Abstract to grade:
---
{content}
---
";

const GRADE_ARBITRATE_TEMPLATE: &str = "\
Two reviewers graded the level of evidence of the same medical abstract and disagree.

Reviewer 1: {first}
Reviewer 2: {second}

Give the final grade. Answer with exactly one of: A, B, C, Accord d'experts.

Abstract to grade:
---
{content}
---
";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"));

/// Which of the two independent calls a prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Primary,
    /// Same request, lightly reworded to reduce repetition bias.
    Secondary,
}

impl PromptVariant {
    /// Apply the variant to a template (before rendering).
    pub fn apply<'a>(&self, template: &'a str) -> Cow<'a, str> {
        match self {
            PromptVariant::Primary => Cow::Borrowed(template),
            PromptVariant::Secondary => {
                let varied = template
                    .replacen("---", ">>>", 1)
                    .replace("---", "<<<");
                Cow::Owned(format!("Second review.\n\n{}", varied))
            }
        }
    }
}

/// Prompt templates, overridable from a directory.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub classify: String,
    pub arbitrate: String,
    pub grade: String,
    pub grade_arbitrate: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            classify: CLASSIFY_TEMPLATE.to_string(),
            arbitrate: ARBITRATE_TEMPLATE.to_string(),
            grade: GRADE_TEMPLATE.to_string(),
            grade_arbitrate: GRADE_ARBITRATE_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Built-in templates, with any of `classify.txt`, `arbitrate.txt`,
    /// `grade.txt`, `grade_arbitrate.txt` found in `dir` taking precedence.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut templates = Self::default();
        let Some(dir) = dir else {
            return Ok(templates);
        };
        for (file, slot) in [
            ("classify.txt", &mut templates.classify),
            ("arbitrate.txt", &mut templates.arbitrate),
            ("grade.txt", &mut templates.grade),
            ("grade_arbitrate.txt", &mut templates.grade_arbitrate),
        ] {
            let path = dir.join(file);
            if path.exists() {
                *slot = std::fs::read_to_string(&path)?;
                info!("Loaded prompt template {}", path.display());
            }
        }
        Ok(templates)
    }
}

/// Fill `{name}` placeholders from `vars`. Unknown placeholders are kept as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match vars.iter().find(|(key, _)| *key == name) {
                Some((_, value)) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Cut `content` to `max_chars` characters, appending [`TRUNCATION_MARKER`].
pub fn truncate_content(content: &str, max_chars: usize) -> Cow<'_, str> {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}{}", &content[..cut], TRUNCATION_MARKER)),
        None => Cow::Borrowed(content),
    }
}

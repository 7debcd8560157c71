//! Evidence grading as a consensus task.
//!
//! The oracle answers free text containing one of `A`, `B`, `C` or
//! `Accord d'experts`; two grades agree only when they are identical.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use veille_core::Item;
use veille_oracle::DecodeError;

use crate::prompt::{render, truncate_content, PromptTemplates, PromptVariant};
use crate::task::ConsensusTask;

/// Letters must be upper case; the expert-consensus phrase matches in any case.
static GRADE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(A|B|C|(?i:accord d['’]experts))\b").expect("grade pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    #[serde(rename = "Accord d'experts")]
    ExpertConsensus,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::ExpertConsensus => "Accord d'experts",
        }
    }

    /// Value persisted in the grade column, which only holds letters.
    pub fn as_stored(&self) -> &'static str {
        match self {
            Grade::ExpertConsensus => "C",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First grade mentioned in an oracle answer.
pub fn parse_grade(raw: &str) -> Result<Grade, DecodeError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }
    let caps = GRADE_PATTERN
        .captures(text)
        .ok_or_else(|| DecodeError::Shape(format!("no grade in answer '{}'", text)))?;
    match &caps[1] {
        "A" => Ok(Grade::A),
        "B" => Ok(Grade::B),
        "C" => Ok(Grade::C),
        _ => Ok(Grade::ExpertConsensus),
    }
}

/// Grade the evidence level of one item's abstract.
pub struct GradeTask<'a> {
    pub item: &'a Item,
    pub templates: &'a PromptTemplates,
    pub max_content_chars: usize,
}

impl GradeTask<'_> {
    fn render(&self, template: &str, extra: &[(&str, &str)]) -> String {
        let content = truncate_content(&self.item.content, self.max_content_chars);
        let mut vars: Vec<(&str, &str)> = vec![
            ("title", self.item.title.as_deref().unwrap_or("")),
            ("content", &*content),
        ];
        vars.extend_from_slice(extra);
        render(template, &vars)
    }
}

impl ConsensusTask for GradeTask<'_> {
    type Output = Grade;

    fn label(&self) -> String {
        format!("{}-grade", self.item.id)
    }

    fn prompt(&self, variant: PromptVariant) -> String {
        let template = variant.apply(&self.templates.grade);
        self.render(&template, &[])
    }

    fn arbitration_prompt(&self, first: &Grade, second: &Grade) -> String {
        self.render(
            &self.templates.grade_arbitrate,
            &[("first", first.as_str()), ("second", second.as_str())],
        )
    }

    fn decode(&self, raw: &str) -> Result<Grade, DecodeError> {
        parse_grade(raw)
    }

    fn agrees(&self, first: &Grade, second: &Grade) -> bool {
        first == second
    }
}

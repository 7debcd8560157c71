//! Taxonomy classification as a consensus task.

use veille_core::{CandidateSet, ClassificationResult, Item};
use veille_oracle::{decode_classification, DecodeError};

use crate::prompt::{render, truncate_content, PromptTemplates, PromptVariant};
use crate::task::ConsensusTask;

/// Reclassify one item against its candidate set.
///
/// Two answers agree when they name the same categories with the same set
/// of subcategories in each.
pub struct ClassifyTask<'a> {
    pub item: &'a Item,
    /// Current assignments, described by name.
    pub current: &'a ClassificationResult,
    pub candidates: &'a CandidateSet,
    pub templates: &'a PromptTemplates,
    pub max_content_chars: usize,
    pub max_subcategories: usize,
}

impl ClassifyTask<'_> {
    fn render(&self, template: &str, extra: &[(&str, &str)]) -> String {
        let content = truncate_content(&self.item.content, self.max_content_chars);
        let candidates = self.candidates.to_prompt_json();
        let current = self.current.to_prompt_json();
        let max = self.max_subcategories.to_string();
        let mut vars: Vec<(&str, &str)> = vec![
            ("title", self.item.title.as_deref().unwrap_or("")),
            ("content", &*content),
            ("candidates", candidates.as_str()),
            ("current", current.as_str()),
            ("max_subcategories", max.as_str()),
        ];
        vars.extend_from_slice(extra);
        render(template, &vars)
    }
}

impl ConsensusTask for ClassifyTask<'_> {
    type Output = ClassificationResult;

    fn label(&self) -> String {
        self.item.id.to_string()
    }

    fn prompt(&self, variant: PromptVariant) -> String {
        let template = variant.apply(&self.templates.classify);
        self.render(&template, &[])
    }

    fn arbitration_prompt(
        &self,
        first: &ClassificationResult,
        second: &ClassificationResult,
    ) -> String {
        let first = first.to_prompt_json();
        let second = second.to_prompt_json();
        self.render(
            &self.templates.arbitrate,
            &[("first", first.as_str()), ("second", second.as_str())],
        )
    }

    fn decode(&self, raw: &str) -> Result<ClassificationResult, DecodeError> {
        decode_classification(raw, self.candidates, self.max_subcategories)
    }

    fn agrees(&self, first: &ClassificationResult, second: &ClassificationResult) -> bool {
        first.agrees_with(second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veille_core::ItemStatus;

    fn item() -> Item {
        Item {
            id: 42,
            title: Some("Hypertension et sel".into()),
            content: "Une étude sur {title} et le sel.".into(),
            status: ItemStatus::Processing,
            status_reason: None,
        }
    }

    #[test]
    fn test_prompts_carry_item_and_candidates() {
        let item = item();
        let mut candidates = CandidateSet::new();
        candidates.insert("Cardiologie", vec!["HTA".into()]);
        let current: ClassificationResult =
            [("Cardiologie".to_string(), vec![])].into_iter().collect();
        let templates = PromptTemplates::default();
        let task = ClassifyTask {
            item: &item,
            current: &current,
            candidates: &candidates,
            templates: &templates,
            max_content_chars: 1000,
            max_subcategories: 3,
        };

        let primary = task.prompt(PromptVariant::Primary);
        assert!(primary.contains("Title: Hypertension et sel"));
        // Placeholders inside content are not expanded.
        assert!(primary.contains("Une étude sur {title} et le sel."));
        assert!(primary.contains("\"HTA\""));
        assert!(primary.contains("at most 3"));

        let secondary = task.prompt(PromptVariant::Secondary);
        assert_ne!(primary, secondary);
        assert!(secondary.contains(">>>"));

        let mut a = ClassificationResult::new();
        a.insert("Cardiologie", vec!["HTA".into()]);
        let b = ClassificationResult::new();
        let arbitration = task.arbitration_prompt(&a, &b);
        assert!(arbitration.contains("Reviewer 1:\n{\n  \"Cardiologie\""));
        assert_eq!(task.label(), "42");
    }

    #[test]
    fn test_decode_filters_against_candidates() {
        let item = item();
        let mut candidates = CandidateSet::new();
        candidates.insert("Cardiologie", vec!["HTA".into()]);
        let current = ClassificationResult::new();
        let templates = PromptTemplates::default();
        let task = ClassifyTask {
            item: &item,
            current: &current,
            candidates: &candidates,
            templates: &templates,
            max_content_chars: 1000,
            max_subcategories: 3,
        };
        let decoded = task
            .decode(r#"{"Cardiologie": ["HTA", "Inconnue"]}"#)
            .unwrap();
        assert_eq!(decoded.get("Cardiologie"), Some(&["HTA".to_string()][..]));
    }
}

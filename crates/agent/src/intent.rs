use regex::Regex;
use tracing::warn;

/// Coarse class of a user message. Only biases the prompt; the model still
/// decides what to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentClass {
    Question,
    Action,
}

impl IntentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentClass::Question => "question",
            IntentClass::Action => "action",
        }
    }
}

/// Turkish interrogatives and question particles.
pub const DEFAULT_QUESTION_WORDS: &[&str] = &[
    "kaç",
    "nedir",
    "ne",
    "nasıl",
    "hangi",
    "kim",
    "nerede",
    "ne zaman",
    "niçin",
    "niye",
    "neden",
    "ne kadar",
    "açık mı",
    "kapalı mı",
    "var mı",
    "yok mu",
    "çalışıyor mu",
    "çalışmıyor mu",
    "durumu",
    "mı",
    "mi",
    "mu",
    "mü",
];

pub struct IntentClassifier {
    pattern: Option<Regex>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_QUESTION_WORDS.iter().map(|s| s.to_string()))
    }
}

impl IntentClassifier {
    /// Words and phrases match on whole-token boundaries, case-insensitive.
    pub fn new(words: impl IntoIterator<Item = String>) -> Self {
        let alternatives: Vec<String> = words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .map(|w| {
                w.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();

        if alternatives.is_empty() {
            return Self { pattern: None };
        }

        let source = format!(
            r"(?i)(?:^|[^\p{{L}}\p{{N}}_])(?:{})(?:$|[^\p{{L}}\p{{N}}_])",
            alternatives.join("|")
        );
        match Regex::new(&source) {
            Ok(pattern) => Self {
                pattern: Some(pattern),
            },
            Err(e) => {
                warn!(error = %e, "Invalid question word list, only '?' will mark questions");
                Self { pattern: None }
            }
        }
    }

    /// Builds from `pipeline.questionWords`, falling back to the defaults.
    pub fn from_words(configured: &[String]) -> Self {
        if configured.is_empty() {
            Self::default()
        } else {
            Self::new(configured.iter().cloned())
        }
    }

    pub fn classify(&self, text: &str) -> IntentClass {
        if text.contains('?') {
            return IntentClass::Question;
        }
        let lowered = text.to_lowercase();
        match &self.pattern {
            Some(p) if p.is_match(&lowered) => IntentClass::Question,
            _ => IntentClass::Action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_mark_and_interrogatives() {
        let c = IntentClassifier::default();
        assert_eq!(c.classify("Salon sıcaklığı kaç?"), IntentClass::Question);
        assert_eq!(c.classify("Salon sıcaklığı kaç"), IntentClass::Question);
        assert_eq!(c.classify("Mutfak ışığı açık mı"), IntentClass::Question);
        assert_eq!(c.classify("Nem oranı nedir"), IntentClass::Question);
        assert_eq!(c.classify("Kombi ne zaman açıldı"), IntentClass::Question);
    }

    #[test]
    fn test_actions() {
        let c = IntentClassifier::default();
        assert_eq!(c.classify("Salon peteklerini aç"), IntentClass::Action);
        assert_eq!(c.classify("Mutfak ışığını kapat"), IntentClass::Action);
        // "kaçır" contains "kaç" but is not the interrogative
        assert_eq!(c.classify("Perdeyi kaçırma"), IntentClass::Action);
    }

    #[test]
    fn test_configured_words_override_defaults() {
        let c = IntentClassifier::from_words(&["what is".to_string(), "how".to_string()]);
        assert_eq!(c.classify("what is   the temperature"), IntentClass::Question);
        assert_eq!(c.classify("How warm"), IntentClass::Question);
        assert_eq!(c.classify("Salon sıcaklığı kaç"), IntentClass::Action);
    }

    #[test]
    fn test_empty_list_only_uses_question_mark() {
        let c = IntentClassifier::new(Vec::new());
        assert_eq!(c.classify("kaç"), IntentClass::Action);
        assert_eq!(c.classify("kaç?"), IntentClass::Question);
    }
}

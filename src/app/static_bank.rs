use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::domain::quiz::{fit_to_count, normalize_topic};
use crate::domain::QuizQuestion;

/// Topic used when the requested one has no authored set.
pub const DEFAULT_TOPIC: &str = "fundamentals";

static BANK: Lazy<HashMap<String, Vec<QuizQuestion>>> = Lazy::new(|| {
    let bank: HashMap<String, Vec<QuizQuestion>> =
        serde_json::from_str(include_str!("../../assets/static_quiz_bank.json"))
            .expect("embedded quiz bank is valid JSON");
    debug_assert!(bank.contains_key(DEFAULT_TOPIC));
    bank
});

/// Authored questions that back the quiz pipeline when every backend fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticQuestionBank;

impl StaticQuestionBank {
    /// Topics with an authored set.
    pub fn topics(&self) -> Vec<&'static str> {
        let mut topics: Vec<_> = BANK.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    /// The authored set for `topic`, or the default set for unknown topics.
    pub fn questions_for(&self, topic: &str) -> &'static [QuizQuestion] {
        let key = normalize_topic(topic);
        BANK.get(&key)
            .or_else(|| BANK.get(DEFAULT_TOPIC))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Exactly `count` questions for `topic`.
    pub fn quiz(&self, topic: &str, count: usize) -> Vec<QuizQuestion> {
        fit_to_count(self.questions_for(topic), count)
    }
}

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::DomainError;

/// Number of answer options every question carries.
pub const OPTIONS_PER_QUESTION: usize = 4;

/// Difficulty requested for a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuizLevel {
    Beginner,
    Intermediate,
    Expert,
}

impl fmt::Display for QuizLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuizLevel::Beginner => "Beginner",
            QuizLevel::Intermediate => "Intermediate",
            QuizLevel::Expert => "Expert",
        })
    }
}

impl FromStr for QuizLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(QuizLevel::Beginner),
            "intermediate" => Ok(QuizLevel::Intermediate),
            "expert" => Ok(QuizLevel::Expert),
            other => Err(DomainError::InvalidRequest(format!("unknown quiz level '{other}'"))),
        }
    }
}

/// Session style: short rapid-fire questions or deeper conceptual ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuizMode {
    Blitz,
    Zen,
}

impl fmt::Display for QuizMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuizMode::Blitz => "Blitz",
            QuizMode::Zen => "Zen",
        })
    }
}

impl FromStr for QuizMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blitz" => Ok(QuizMode::Blitz),
            "zen" => Ok(QuizMode::Zen),
            other => Err(DomainError::InvalidRequest(format!("unknown quiz mode '{other}'"))),
        }
    }
}

/// Input to every quiz backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizRequest {
    pub topic: String,
    pub level: QuizLevel,
    pub mode: QuizMode,
    pub count: usize,
}

impl QuizRequest {
    pub fn new(topic: impl Into<String>, level: QuizLevel, mode: QuizMode, count: usize) -> Self {
        Self {
            topic: topic.into(),
            level,
            mode,
            count,
        }
    }

    /// Prompt asking a text model for this quiz as a bare JSON array.
    pub fn prompt(&self) -> String {
        format!(
            "Generate a {count}-question {level} level UI/UX design quiz about \"{topic}\".\n\
             Session Type: {mode} (If 'Blitz', keep questions short and quick. \
             If 'Zen', include deeper conceptual questions).\n\n\
             Return ONLY a raw JSON array (no markdown, no code fences) with objects having:\n\
             - id: string (unique identifier)\n\
             - question: string\n\
             - options: string[] (exactly 4 options)\n\
             - correctIndex: number (0-3, index of correct answer)\n\
             - explanation: string (brief explanation why the answer is correct)\n\n\
             IMPORTANT: Generate EXACTLY {count} questions. Make them specific to {topic}.",
            count = self.count,
            level = self.level,
            topic = self.topic,
            mode = self.mode,
        )
    }
}

/// A multiple-choice question.
///
/// Invariant: `options.len() == 4` and `correct_index < 4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
}

impl QuizQuestion {
    /// Check the structural invariant.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.question.trim().is_empty() {
            return Err(DomainError::Quiz(format!("question {} has no prompt", self.id)));
        }
        if self.options.len() != OPTIONS_PER_QUESTION {
            return Err(DomainError::Quiz(format!(
                "question {} has {} options, expected {}",
                self.id,
                self.options.len(),
                OPTIONS_PER_QUESTION
            )));
        }
        if self.correct_index >= self.options.len() {
            return Err(DomainError::Quiz(format!(
                "question {} has correct index {} out of range",
                self.id, self.correct_index
            )));
        }
        Ok(())
    }
}

/// Models emit ids as either strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Remove the markdown fence models like to wrap JSON in.
///
/// Only an opening fence (with its info string) and a closing fence are
/// removed; backticks inside the payload are left alone.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match body.find('\n') {
        Some(newline) => &body[newline + 1..],
        None => body.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Parse freeform model output into validated questions.
///
/// The text must be a JSON array (after fence stripping), non-empty, and every
/// element must carry all fields with the right types. Any mismatch fails the
/// whole batch.
pub fn parse_questions(text: &str) -> Result<Vec<QuizQuestion>, DomainError> {
    let cleaned = strip_code_fences(text);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| DomainError::Quiz(format!("response is not valid JSON: {e}")))?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(DomainError::Quiz(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };

    if items.is_empty() {
        return Err(DomainError::Quiz("response contained no questions".to_string()));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let question: QuizQuestion = serde_json::from_value(item)
                .map_err(|e| DomainError::Quiz(format!("question {idx} is malformed: {e}")))?;
            question.validate()?;
            Ok(question)
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Resize a question set to exactly `count` entries.
///
/// Takes the first `count` when there are enough; otherwise cycles through the
/// set and truncates. Repeated entries get their id suffixed with the round
/// number, and any remaining duplicate ids are disambiguated, so ids stay
/// unique within the batch.
pub fn fit_to_count(questions: &[QuizQuestion], count: usize) -> Vec<QuizQuestion> {
    if questions.is_empty() || count == 0 {
        return Vec::new();
    }

    let mut fitted: Vec<QuizQuestion> = questions
        .iter()
        .cycle()
        .take(count)
        .enumerate()
        .map(|(i, q)| {
            let round = i / questions.len();
            let mut q = q.clone();
            if round > 0 {
                q.id = format!("{}-{}", q.id, round);
            }
            q
        })
        .collect();

    let mut seen = HashSet::new();
    for (i, q) in fitted.iter_mut().enumerate() {
        if !seen.insert(q.id.clone()) {
            q.id = format!("{}-q{}", q.id, i + 1);
            seen.insert(q.id.clone());
        }
    }
    fitted
}

/// Normalize a topic for lookup: lowercase, collapsed whitespace, trimmed.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

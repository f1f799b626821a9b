use serde::{Deserialize, Serialize};

/// A highlighted region of a design with a concrete suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub label: String,
    pub suggestion: String,
    /// Model confidence between 0 and 100.
    #[serde(default)]
    pub confidence_score: f32,
    /// Bounding box `[ymin, xmin, ymax, xmax]` as percentages (0..100) of the
    /// image height and width.
    #[serde(rename = "box_2d", default)]
    pub box_2d: [f32; 4],
}

/// Result of an image review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignAnalysis {
    #[serde(rename = "analysis", default)]
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl DesignAnalysis {
    /// A text-only analysis with no annotations.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            annotations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRating {
    Good,
    Bad,
}

/// A user's verdict on one suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFeedback {
    pub annotation_label: String,
    pub suggestion: String,
    pub rating: FeedbackRating,
    #[serde(default)]
    pub user_comment: Option<String>,
}

/// Reference material the user uploaded (design system, guidelines, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignResource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub ai_analysis: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

/// One turn of an assistant conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
        }
    }
}

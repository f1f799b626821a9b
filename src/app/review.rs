use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::app::router::CompletionRouter;
use crate::domain::audio::split_data_url;
use crate::domain::{
    ChatMessage, ChatRole, Completion, CompletionRequest, Content, DesignAnalysis, DesignResource,
    DomainError, FeedbackRating, GenerationOptions, ImageOutput, InlineData, Part, Role,
    UserFeedback,
};

const TOKEN_FALLBACK: &str = "Service temporarily unavailable. Please try again in a moment.";
const TOKEN_EMPTY: &str = "Could not analyze token.";
const IMAGE_RATE_LIMITED: &str = "⏳ Rate limit reached. Please wait 1-2 minutes and try again.";
const IMAGE_FAILED: &str = "Failed to analyze image. Please try again.";
const IMAGE_EMPTY: &str = "Analysis failed.";
const TIP_EMPTY: &str = "Simplify the layout for better clarity.";
const TIP_FALLBACK: &str = "Try simplifying the layout.";
const CHAT_EMPTY: &str = "I'm having trouble thinking right now.";
const CHAT_FALLBACK: &str = "Sorry, I encountered an error connecting to the server.";
const RESOURCE_EMPTY: &str = "Could not analyze PDF.";
const RESOURCE_RATE_LIMITED: &str =
    "⏳ Rate limit reached. PDF will be used as-is. Wait 1-2 minutes to re-analyze.";
const RESOURCE_FALLBACK: &str = "PDF uploaded successfully. Content will be used in analysis.";

/// Characters of design context kept in the chat persona.
const CHAT_CONTEXT_CHARS: usize = 2000;
/// Characters of inline resource content kept in the system prompt.
const RESOURCE_CONTENT_CHARS: usize = 500;
/// Positively rated suggestions fed back into image reviews.
const IMAGE_MEMORY: usize = 5;
const HELPFUL_HISTORY: usize = 10;
const UNHELPFUL_HISTORY: usize = 5;
/// Rough summary size above which a resource is flagged as expensive.
const RESOURCE_TOKEN_WARN: usize = 1000;

const AUDIT_PROTOCOL: &str = r#"SYSTEM INSTRUCTIONS - VISUAL AUDIT PROTOCOL:

You are Refyna, a Senior Technical Design Auditor. Your job is to provide factual, evidence-based design critiques.
You are NOT to give vague or "fluff" feedback like "make it pop" or "looks clear".

STRICT AUDIT CHECKLIST (Follow this internally for every analysis):
1. **Accessibility Scan:** Check contrast ratios immediately. If text looks light gray on white, flag it as a WCAG fail.
2. **Alignment & Spacing:** Look for pixel-perfect alignment. If elements are slightly off, call it out specifically.
3. **Typography Hierarchy:** Identify H1, H2, Body. If they look too similar in size/weight, flag it.
4. **Consistency:** Check if buttons/inputs share the same corner radius and padding.

CORE STANDARDS TO ENFORCE:
- **WCAG 2.1 AA:** Text contrast must be at least 4.5:1 (assume standard sRGB).
- **8px Grid:** Spacing should likely be multiples of 4px or 8px.
- **Law of Proximity:** Related items must be grouped visually.
- **Touch Targets:** Interactive elements must appear large enough (~44px minimum).

RESPONSE GUIDELINES:
- Be precise (e.g., "The button padding appears uneven (approx 12px top vs 8px bottom)" vs "Padding is bad").
- Be objective. State what you see, then why it fails a standard.
- If referencing a specific rule from the user's uploaded resources, CITE IT explicitly.
"#;

const IMAGE_REVIEW_STEPS: &str = r#"Step 1: Scan the design from Top-Left to Bottom-Right.
Step 2: Identify structural issues (Grid, Alignment, Visual Hierarchy).
Step 3: Identify visual issues (Contrast, Color Harmony, Typography).

Return EXACTLY 3 critical annotations:
- label: Specific Issue (e.g. "Low Contrast H3", "Misaligned Button")
- suggestion: Specific, actionable fix (e.g. "Increase contrast to #4B5563", "Align left edge to 24px grid"). DO NOT give generic advice.
- confidenceScore: 0-100 (Be strict. High score = obvious violation).
- box_2d: Exact coordinates [ymin, xmin, ymax, xmax]

Overall analysis: Provide a technical summary of the design's maturity and adherence to modern standards."#;

const RESOURCE_SUMMARY_PROMPT: &str = r#"Analyze this design resource PDF and extract ONLY the most important guidelines in a CONCISE format.

IMPORTANT: Keep the summary SHORT and TOKEN-EFFICIENT. Extract only:

1. **Colors** (max 10 most important):
   - Name: Hex - Usage
2. **Typography** (max 5 rules):
   - Font, size, usage
3. **Spacing** (max 3 rules):
   - Grid system or key spacing values
4. **Key Rules** (max 10 most critical):
   - Only the MUST-FOLLOW rules
5. **Components** (max 5 most used):
   - Only if clearly specified

DO NOT include long explanations, examples, case studies, historical context, redundant information or full page content.

Format as a compact list. Be extremely concise. Aim for under 500 words total."#;

/// Design review operations on top of the completion router.
///
/// Uploaded design resources are folded into every system prompt. Failures
/// other than permission errors degrade to a readable message.
pub struct ReviewService {
    router: Arc<CompletionRouter>,
    resources: RwLock<Vec<DesignResource>>,
}

impl ReviewService {
    pub fn new(router: Arc<CompletionRouter>) -> Self {
        Self {
            router,
            resources: RwLock::new(Vec::new()),
        }
    }

    pub fn set_resources(&self, resources: Vec<DesignResource>) {
        info!(count = resources.len(), "Design resources updated");
        *self.resources.write() = resources;
    }

    pub fn resources(&self) -> Vec<DesignResource> {
        self.resources.read().clone()
    }

    /// Model currently preferred by the router.
    pub fn active_model(&self) -> String {
        self.router.sticky_model()
    }

    /// `base` plus the resource block and the audit protocol.
    pub fn system_prompt(&self, base: &str) -> String {
        let resources = resource_context(&self.resources.read());
        format!("{base}\n\n{resources}\n\n{AUDIT_PROTOCOL}")
    }

    /// Critique a design token or code snippet.
    pub async fn analyze_token(&self, code: &str) -> Result<String, DomainError> {
        let request = CompletionRequest::text(format!(
            "Analyze this Figma design token/code snippet for UX best practices, accessibility, and visual harmony. Provide a concise but critical review. \n\n Code: {code}"
        ))
        .with_system_instruction(self.system_prompt(
            "You are Refyna, an expert UI/UX designer. Analyze this design token/code for best practices.",
        ));

        match self.router.generate(&request).await {
            Ok(completion) => Ok(text_or(completion, TOKEN_EMPTY)),
            Err(err) => degrade("analyze_token", err, TOKEN_FALLBACK.to_string()),
        }
    }

    /// Review a screenshot and return up to three located annotations.
    pub async fn analyze_image(
        &self,
        mime_type: &str,
        data: &str,
        prior_feedback: &[UserFeedback],
    ) -> Result<DesignAnalysis, DomainError> {
        let (declared, data) = split_data_url(data);
        let mime_type = declared.unwrap_or(mime_type);

        let liked: Vec<&str> = prior_feedback
            .iter()
            .filter(|f| f.rating == FeedbackRating::Good)
            .map(|f| f.suggestion.as_str())
            .collect();
        let liked = &liked[liked.len().saturating_sub(IMAGE_MEMORY)..];
        let memory = if liked.is_empty() {
            String::new()
        } else {
            format!(
                "NOTE: The user has previously reacted positively to these types of improvements: {}. Prioritize similar suggestions.",
                liked.join("; ")
            )
        };

        let request = CompletionRequest::from_parts(vec![
            Part::Inline(InlineData::new(mime_type, data)),
            Part::Text(format!(
                "Analyze this UI design screenshot systematically.\n{memory}\n\n{IMAGE_REVIEW_STEPS}"
            )),
        ])
        .with_system_instruction(
            self.system_prompt("You are Refyna, an expert UI/UX designer analyzing design screenshots."),
        )
        .with_options(GenerationOptions {
            temperature: Some(0.0),
            top_p: Some(1.0),
            top_k: Some(1),
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(analysis_schema()),
            ..GenerationOptions::default()
        });

        let completion = match self.router.generate(&request).await {
            Ok(completion) => completion,
            Err(err) if err.is_rate_limited() => {
                warn!(error = %err, "Image review rate limited");
                return Ok(DesignAnalysis::message(IMAGE_RATE_LIMITED));
            }
            Err(err) => return degrade("analyze_image", err, DesignAnalysis::message(IMAGE_FAILED)),
        };

        let Some(body) = completion.json else {
            warn!(model = %completion.model, "Image review returned no JSON body");
            return Ok(DesignAnalysis::message(IMAGE_FAILED));
        };
        match serde_json::from_value::<DesignAnalysis>(body) {
            Ok(mut analysis) => {
                if analysis.text.trim().is_empty() {
                    analysis.text = IMAGE_EMPTY.to_string();
                }
                debug!(annotations = analysis.annotations.len(), "Image reviewed");
                Ok(analysis)
            }
            Err(err) => {
                warn!(error = %err, "Image review had an unexpected shape");
                Ok(DesignAnalysis::message(IMAGE_FAILED))
            }
        }
    }

    /// One short design tip.
    pub async fn quick_suggestion(&self, context: &str) -> Result<String, DomainError> {
        let request = CompletionRequest::text(format!(
            "Give a short, single-sentence UI design tip regarding: {context}. Be witty and concise."
        ));
        match self.router.generate(&request).await {
            Ok(completion) => Ok(text_or(completion, TIP_EMPTY)),
            Err(err) => degrade("quick_suggestion", err, TIP_FALLBACK.to_string()),
        }
    }

    /// Answer `message` in a design conversation.
    ///
    /// `context` describes the design under review. Rated feedback steers the
    /// persona toward topics the user found useful.
    pub async fn chat(
        &self,
        history: &[ChatMessage],
        context: &str,
        feedback: &[UserFeedback],
        message: &str,
    ) -> Result<String, DomainError> {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|m| Content {
                role: match m.role {
                    ChatRole::User => Role::User,
                    ChatRole::Model => Role::Model,
                },
                parts: vec![Part::Text(m.text.clone())],
            })
            .collect();
        contents.push(Content {
            role: Role::User,
            parts: vec![Part::Text(message.to_string())],
        });

        let persona = chat_persona(context, feedback);
        let request = CompletionRequest::conversation(contents)
            .with_system_instruction(format!("{}{}", self.system_prompt(&persona), feedback_context(feedback)));

        match self.router.generate(&request).await {
            Ok(completion) => Ok(text_or(completion, CHAT_EMPTY)),
            Err(err) => degrade("chat", err, CHAT_FALLBACK.to_string()),
        }
    }

    /// Render a fresh design from a text description.
    ///
    /// `size` is "1K", "2K" or "4K". Only permission failures are errors.
    pub async fn generate_variant(&self, prompt: &str, size: &str) -> Result<Option<InlineData>, DomainError> {
        let request = CompletionRequest::text(format!("A high fidelity UI design interface. {prompt}"))
            .with_options(image_options(size));
        self.image(request).await
    }

    /// Redesign an existing screenshot, focusing on `improvements`.
    pub async fn improve_design(
        &self,
        original_image: &str,
        improvements: &[String],
    ) -> Result<Option<InlineData>, DomainError> {
        let (_, data) = split_data_url(original_image);
        let focus = if improvements.is_empty() {
            "Optimize layout structure, visual hierarchy, and color harmony.".to_string()
        } else {
            format!("Crucially improve the following areas: {}.", improvements.join(", "))
        };

        let request = CompletionRequest::from_parts(vec![
            Part::Text(format!(
                "Redesign this UI interface to be world-class.\n\
                 Maintain the core content and purpose of the original design.\n\
                 {focus}\n\
                 Ensure high contrast, perfect alignment, and modern aesthetics.\n\
                 Return a high-fidelity image of the improved design."
            )),
            Part::Inline(InlineData::new("image/png", data)),
        ])
        .with_options(image_options("2K"));
        self.image(request).await
    }

    /// Condense a PDF guideline document into a short rule list.
    pub async fn analyze_resource(&self, pdf_base64: &str, file_name: &str) -> Result<String, DomainError> {
        let (_, data) = split_data_url(pdf_base64);
        let request = CompletionRequest::from_parts(vec![
            Part::Inline(InlineData::new("application/pdf", data)),
            Part::Text(RESOURCE_SUMMARY_PROMPT.to_string()),
        ]);
        info!(file = file_name, "Summarizing design resource");

        match self.router.generate(&request).await {
            Ok(completion) => {
                let summary = text_or(completion, RESOURCE_EMPTY);
                let estimated_tokens = summary.chars().count().div_ceil(4);
                if estimated_tokens > RESOURCE_TOKEN_WARN {
                    warn!(file = file_name, tokens = estimated_tokens, "Resource summary is large");
                } else {
                    debug!(file = file_name, tokens = estimated_tokens, "Resource summarized");
                }
                Ok(summary)
            }
            Err(err) if err.is_rate_limited() => {
                warn!(file = file_name, "Resource summary rate limited");
                Ok(RESOURCE_RATE_LIMITED.to_string())
            }
            Err(err) => degrade("analyze_resource", err, RESOURCE_FALLBACK.to_string()),
        }
    }

    async fn image(&self, request: CompletionRequest) -> Result<Option<InlineData>, DomainError> {
        match self.router.generate(&request).await {
            Ok(completion) => {
                if completion.inline_data.is_none() {
                    debug!(model = %completion.model, "Image request returned text only");
                }
                Ok(completion.inline_data)
            }
            Err(err) => degrade("image", err, None),
        }
    }
}

/// Propagate permission failures, otherwise log and return `fallback`.
fn degrade<T>(operation: &str, err: DomainError, fallback: T) -> Result<T, DomainError> {
    if err.is_fatal() {
        error!(operation = operation, error = %err, "Review aborted");
        return Err(err);
    }
    warn!(operation = operation, error = %err, "Review degraded to fallback");
    Ok(fallback)
}

fn text_or(completion: Completion, fallback: &str) -> String {
    completion
        .text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn image_options(size: &str) -> GenerationOptions {
    GenerationOptions {
        image_output: Some(ImageOutput {
            aspect_ratio: "16:9".to_string(),
            size: size.to_string(),
        }),
        ..GenerationOptions::default()
    }
}

fn analysis_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "analysis": { "type": "STRING" },
            "annotations": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": { "type": "STRING" },
                        "suggestion": { "type": "STRING" },
                        "confidenceScore": { "type": "INTEGER", "description": "Confidence score 0-100" },
                        "box_2d": {
                            "type": "ARRAY",
                            "items": { "type": "INTEGER" },
                            "description": "Bounding box coordinates [ymin, xmin, ymax, xmax] in percentages (0-100)"
                        }
                    }
                }
            }
        }
    })
}

fn chat_persona(context: &str, feedback: &[UserFeedback]) -> String {
    let context: String = context.chars().take(CHAT_CONTEXT_CHARS).collect();
    let mut persona = format!(
        "You are Refyna, a world-class senior UI/UX designer trained on industry best practices and design principles.\n\
         You are currently reviewing a design provided by the user.\n\
         Context of the design: {context}.\n\n\
         Your goal is to help the user improve their design.\n\
         Be critical but constructive. Focus on whitespace, typography, accessibility, and visual hierarchy.\n\
         Keep your responses conversational and helpful."
    );

    if !feedback.is_empty() {
        let labels = |rating: FeedbackRating| {
            let labels: Vec<&str> = feedback
                .iter()
                .filter(|f| f.rating == rating)
                .map(|f| f.annotation_label.as_str())
                .collect();
            if labels.is_empty() {
                "None yet".to_string()
            } else {
                labels.join(", ")
            }
        };
        persona.push_str(&format!(
            "\n\nSELF-LEARNING: Based on past feedback from this user:\n\
             - Topics they found helpful: {}\n\
             - Topics needing improvement: {}\n\n\
             Use this information to tailor your suggestions - focus more on areas they found helpful, and improve your feedback on areas they marked as unhelpful.",
            labels(FeedbackRating::Good),
            labels(FeedbackRating::Bad),
        ));
    }
    persona
}

/// Prompt block listing the uploaded design resources. Empty when there are none.
pub fn resource_context(resources: &[DesignResource]) -> String {
    if resources.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n\n=== DESIGN RESOURCES & GUIDELINES ===\n");
    out.push_str("The following design resources have been uploaded by the team:\n\n");
    for (idx, resource) in resources.iter().enumerate() {
        out.push_str(&format!("{}. {} ({})\n", idx + 1, resource.name, resource.kind));
        if !resource.tags.is_empty() {
            out.push_str(&format!("   Tags: {}\n", resource.tags.join(", ")));
        }
        match &resource.ai_analysis {
            Some(analysis) => {
                out.push_str("\n   AI Analysis:\n");
                out.push_str(&format!("   {}\n", analysis.lines().collect::<Vec<_>>().join("\n   ")));
            }
            None if !resource.name.ends_with(".pdf") => {
                let excerpt: String = resource.content.chars().take(RESOURCE_CONTENT_CHARS).collect();
                out.push_str(&format!("   Content: {excerpt}...\n"));
            }
            None => {}
        }
        out.push('\n');
    }
    out.push_str("Please reference these resources when providing design feedback.\n");
    out.push_str("When you see a design issue, check if these resources specify the correct approach.\n");
    out.push_str("=== END DESIGN RESOURCES ===\n\n");
    out
}

/// Prompt block with the most recent rated suggestions. Empty without history.
pub fn feedback_context(history: &[UserFeedback]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let recent = |rating: FeedbackRating, keep: usize| {
        let rated: Vec<&UserFeedback> = history.iter().filter(|f| f.rating == rating).collect();
        let skip = rated.len().saturating_sub(keep);
        rated.into_iter().skip(skip).collect::<Vec<_>>()
    };
    let list = |out: &mut String, items: &[&UserFeedback]| {
        for (idx, f) in items.iter().enumerate() {
            out.push_str(&format!("{}. {}: {}\n", idx + 1, f.annotation_label, f.suggestion));
            if let Some(comment) = &f.user_comment {
                out.push_str(&format!("   User comment: \"{comment}\"\n"));
            }
        }
    };

    let good = recent(FeedbackRating::Good, HELPFUL_HISTORY);
    let bad = recent(FeedbackRating::Bad, UNHELPFUL_HISTORY);

    let mut out = String::from("\n\n=== LEARNING FROM PAST FEEDBACK ===\n");
    if !good.is_empty() {
        out.push_str("\nSuggestions the user found helpful:\n");
        list(&mut out, &good);
    }
    if !bad.is_empty() {
        out.push_str("\nSuggestions the user did NOT find helpful (avoid similar):\n");
        list(&mut out, &bad);
    }
    out.push_str("\nUse this feedback to provide more relevant and personalized suggestions.\n");
    out.push_str("=== END LEARNING CONTEXT ===\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelEndpoint, ProviderError};
    use crate::testing::ScriptedModelClient;

    fn service(client: &Arc<ScriptedModelClient>, ids: &[&str]) -> ReviewService {
        let endpoints = ids.iter().map(|id| ModelEndpoint::primary(*id)).collect();
        let router = CompletionRouter::with_client(endpoints, client.clone(), None).unwrap();
        ReviewService::new(Arc::new(router))
    }

    fn feedback(label: &str, rating: FeedbackRating, comment: Option<&str>) -> UserFeedback {
        UserFeedback {
            annotation_label: label.to_string(),
            suggestion: format!("fix {label}"),
            rating,
            user_comment: comment.map(str::to_string),
        }
    }

    fn text_of(request: &CompletionRequest) -> String {
        request
            .contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Inline(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_token_review_uses_audit_prompt() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_ok("m", "Padding is off the 8px grid.");
        let service = service(&client, &["m"]);

        let review = service.analyze_token("padding: 13px;").await.unwrap();
        assert_eq!(review, "Padding is off the 8px grid.");

        let request = &client.requests()[0];
        assert!(text_of(request).contains("Code: padding: 13px;"));
        let system = request.system_instruction.as_deref().unwrap();
        assert!(system.starts_with("You are Refyna, an expert UI/UX designer."));
        assert!(system.contains("VISUAL AUDIT PROTOCOL"));
    }

    #[tokio::test]
    async fn test_token_review_degrades_when_models_fail() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_err("a", ProviderError::from_http(503, None, "busy"));
        client.push_err("b", ProviderError::from_http(429, None, "quota"));
        let service = service(&client, &["a", "b"]);

        assert_eq!(service.analyze_token("x").await.unwrap(), TOKEN_FALLBACK);
    }

    #[tokio::test]
    async fn test_permission_failure_propagates() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_err("a", ProviderError::from_http(403, None, "API key not valid"));
        client.push_err("a", ProviderError::from_http(403, None, "API key not valid"));
        let service = service(&client, &["a"]);

        assert!(service.analyze_token("x").await.unwrap_err().is_fatal());
        assert!(service.generate_variant("dashboard", "1K").await.is_err());
    }

    #[tokio::test]
    async fn test_image_review_parses_annotations() {
        let client = Arc::new(ScriptedModelClient::new());
        let mut completion = crate::testing::completion("m", "");
        completion.json = Some(json!({
            "analysis": "Solid grid, weak contrast.",
            "annotations": [
                {"label": "Low Contrast H3", "suggestion": "Use #4B5563", "confidenceScore": 88, "box_2d": [10, 10, 20, 60]}
            ]
        }));
        completion.text = Some("{}".to_string());
        client.push_result("m", Ok(completion));
        let service = service(&client, &["m"]);

        let history = vec![
            feedback("a", FeedbackRating::Good, None),
            feedback("b", FeedbackRating::Bad, None),
            feedback("c", FeedbackRating::Good, None),
        ];
        let analysis = service
            .analyze_image("image/jpeg", "data:image/png;base64,iVBOR", &history)
            .await
            .unwrap();
        assert_eq!(analysis.text, "Solid grid, weak contrast.");
        assert_eq!(analysis.annotations[0].label, "Low Contrast H3");

        let request = &client.requests()[0];
        assert!(request.options.wants_json());
        assert_eq!(request.options.temperature, Some(0.0));
        let Part::Inline(image) = &request.contents[0].parts[0] else {
            panic!("image part first");
        };
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "iVBOR");
        assert!(text_of(request).contains("reacted positively to these types of improvements: fix a; fix c."));

        let schema = request.options.response_schema.as_ref().unwrap();
        let box_spec = &schema["properties"]["annotations"]["items"]["properties"]["box_2d"];
        assert!(box_spec["description"].as_str().unwrap().contains("percentages (0-100)"));
        assert!(analysis.annotations[0].box_2d.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[tokio::test]
    async fn test_image_review_rate_limit_message() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_err("m", ProviderError::from_http(429, Some("RESOURCE_EXHAUSTED"), "quota"));
        let service = service(&client, &["m"]);

        let analysis = service.analyze_image("image/png", "AAAA", &[]).await.unwrap();
        assert_eq!(analysis, DesignAnalysis::message(IMAGE_RATE_LIMITED));
    }

    #[tokio::test]
    async fn test_image_review_without_json_fails_softly() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_ok("m", "I think it looks nice");
        let service = service(&client, &["m"]);

        let analysis = service.analyze_image("image/png", "AAAA", &[]).await.unwrap();
        assert_eq!(analysis.text, IMAGE_FAILED);
        assert!(analysis.annotations.is_empty());
    }

    #[tokio::test]
    async fn test_chat_sends_history_and_persona() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_ok("m", "Try a larger H1.");
        let service = service(&client, &["m"]);

        let history = vec![ChatMessage::user("Hi"), ChatMessage::model("Hello! Share your design.")];
        let rated = vec![
            feedback("Contrast", FeedbackRating::Good, Some("very useful")),
            feedback("Spacing", FeedbackRating::Bad, None),
        ];
        let reply = service
            .chat(&history, &"x".repeat(3000), &rated, "What about the header?")
            .await
            .unwrap();
        assert_eq!(reply, "Try a larger H1.");

        let request = &client.requests()[0];
        let roles: Vec<_> = request.contents.iter().map(|c| c.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User]);

        let system = request.system_instruction.as_deref().unwrap();
        assert!(system.contains(&format!("Context of the design: {}.", "x".repeat(2000))));
        assert!(!system.contains(&"x".repeat(2001)));
        assert!(system.contains("Topics they found helpful: Contrast"));
        assert!(system.contains("Topics needing improvement: Spacing"));
        assert!(system.contains("User comment: \"very useful\""));
    }

    #[tokio::test]
    async fn test_chat_and_tip_fallbacks() {
        let client = Arc::new(ScriptedModelClient::new());
        let service = service(&client, &["m"]);

        assert_eq!(service.chat(&[], "ctx", &[], "hi").await.unwrap(), CHAT_FALLBACK);
        assert_eq!(service.quick_suggestion("buttons").await.unwrap(), TIP_FALLBACK);
    }

    #[tokio::test]
    async fn test_variant_returns_image_or_none() {
        let client = Arc::new(ScriptedModelClient::new());
        let mut with_image = crate::testing::completion("m", "");
        with_image.text = None;
        with_image.inline_data = Some(InlineData::new("image/png", "iVBOR"));
        client.push_result("m", Ok(with_image));
        client.push_err("m", ProviderError::from_http(500, None, "boom"));
        let service = service(&client, &["m"]);

        let image = service
            .improve_design("data:image/png;base64,AAAA", &["contrast".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.to_data_url(), "data:image/png;base64,iVBOR");

        let request = &client.requests()[0];
        assert!(text_of(request).contains("Crucially improve the following areas: contrast."));
        assert_eq!(request.options.image_output.as_ref().unwrap().size, "2K");

        assert_eq!(service.generate_variant("a login form", "1K").await.unwrap(), None);
        assert!(text_of(&client.requests()[1]).starts_with("A high fidelity UI design interface. a login form"));
    }

    #[tokio::test]
    async fn test_resource_summary_fallbacks() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_ok("m", "## Colors\n- Primary: #0052CC");
        client.push_err("m", ProviderError::from_http(429, None, "quota"));
        client.push_err("m", ProviderError::malformed("bad"));
        let service = service(&client, &["m"]);

        assert_eq!(
            service.analyze_resource("JVBERi0", "brand.pdf").await.unwrap(),
            "## Colors\n- Primary: #0052CC"
        );
        assert_eq!(service.analyze_resource("JVBERi0", "brand.pdf").await.unwrap(), RESOURCE_RATE_LIMITED);
        assert_eq!(service.analyze_resource("JVBERi0", "brand.pdf").await.unwrap(), RESOURCE_FALLBACK);
    }

    #[test]
    fn test_resource_context_layout() {
        assert_eq!(resource_context(&[]), "");

        let resources = vec![
            DesignResource {
                name: "brand.pdf".to_string(),
                kind: "pdf".to_string(),
                tags: vec!["brand".to_string(), "colors".to_string()],
                content: String::new(),
                ai_analysis: Some("## Colors\n- Primary: #0052CC".to_string()),
            },
            DesignResource {
                name: "tokens.md".to_string(),
                kind: "markdown".to_string(),
                tags: Vec::new(),
                content: "y".repeat(800),
                ai_analysis: None,
            },
            DesignResource {
                name: "raw.pdf".to_string(),
                kind: "pdf".to_string(),
                tags: Vec::new(),
                content: "binary".to_string(),
                ai_analysis: None,
            },
        ];
        let context = resource_context(&resources);
        assert!(context.contains("1. brand.pdf (pdf)\n   Tags: brand, colors\n"));
        assert!(context.contains("   AI Analysis:\n   ## Colors\n   - Primary: #0052CC\n"));
        assert!(context.contains(&format!("   Content: {}...\n", "y".repeat(500))));
        assert!(!context.contains("binary"));
        assert!(context.ends_with("=== END DESIGN RESOURCES ===\n\n"));
    }

    #[test]
    fn test_feedback_context_keeps_recent_entries() {
        assert_eq!(feedback_context(&[]), "");

        let mut history: Vec<_> = (0..12)
            .map(|i| feedback(&format!("good{i}"), FeedbackRating::Good, None))
            .collect();
        history.extend((0..7).map(|i| feedback(&format!("bad{i}"), FeedbackRating::Bad, None)));

        let context = feedback_context(&history);
        assert!(!context.contains("good1:"));
        assert!(context.contains("1. good2: fix good2"));
        assert!(context.contains("10. good11: fix good11"));
        assert!(!context.contains("bad1:"));
        assert!(context.contains("1. bad2: fix bad2"));
        assert!(context.contains("5. bad6: fix bad6"));
    }

    #[test]
    fn test_system_prompt_includes_resources() {
        let client = Arc::new(ScriptedModelClient::new());
        let service = service(&client, &["m"]);
        service.set_resources(vec![DesignResource {
            name: "guide.txt".to_string(),
            kind: "text".to_string(),
            tags: Vec::new(),
            content: "Buttons use 8px radius".to_string(),
            ai_analysis: None,
        }]);

        let prompt = service.system_prompt("Base.");
        assert!(prompt.starts_with("Base.\n\n"));
        assert!(prompt.contains("Buttons use 8px radius"));
        assert!(prompt.contains("CORE STANDARDS TO ENFORCE"));
    }
}

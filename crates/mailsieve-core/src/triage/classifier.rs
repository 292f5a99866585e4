//! Arbiter-backed classifier.
//!
//! The pattern hint and a digest of past decisions are put in front of the
//! completion backend, which must confirm or override the hint with a JSON
//! object. Anything unusable in the answer, or a failing backend, yields the
//! Review fallback instead of an error.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::arbiter::{BackendKind, CompletionBackend};
use super::model::{
    ClassificationSource, PatternMatchResult, TrainingExample, TriageClassificationResult,
    TriageFolder,
};
use crate::mail::Email;

/// Snippet characters put into the prompt.
const SNIPPET_CHARS: usize = 500;

const SYSTEM_PROMPT: &str = "You sort email into folders. A fast rule-based matcher has already \
made a guess (the pattern hint); confirm it or override it. Learn from the user's past \
decisions, especially corrections for the same sender domain. Answer with one JSON object and \
nothing else: {\"folder\": <one folder name from the list>, \"confidence\": <number 0..1>, \
\"reasoning\": <one sentence>, \"tags\": [<short lowercase tags>]}";

/// Rough token estimate: four characters per token.
#[must_use]
pub const fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}

/// A classification plus the estimated tokens it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyOutcome {
    /// The decision.
    pub result: TriageClassificationResult,
    /// Prompt and response tokens, estimated.
    pub tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ArbiterReply {
    folder: String,
    confidence: f64,
    reasoning: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// Combines the pattern hint and training examples through an arbiter.
#[derive(Clone)]
pub struct TriageClassifier {
    backend: Arc<dyn CompletionBackend>,
}

impl TriageClassifier {
    /// Creates a classifier over a completion backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Kind of the underlying backend.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Classifies an email. Never fails; see [`TriageClassificationResult::fallback`].
    pub async fn classify(
        &self,
        email: &Email,
        hint: &PatternMatchResult,
        examples: &[TrainingExample],
    ) -> TriageClassificationResult {
        self.classify_with_usage(email, hint, examples).await.result
    }

    /// Like [`Self::classify`], also reporting estimated token usage.
    pub async fn classify_with_usage(
        &self,
        email: &Email,
        hint: &PatternMatchResult,
        examples: &[TrainingExample],
    ) -> ClassifyOutcome {
        let prompt = build_prompt(email, hint, examples);
        let prompt_chars = SYSTEM_PROMPT.len() + prompt.len();

        match self.backend.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => ClassifyOutcome {
                tokens: estimate_tokens(prompt_chars + raw.len()),
                result: parse_response(&raw, hint),
            },
            Err(e) => {
                warn!("Arbiter unavailable, falling back to Review: {e}");
                ClassifyOutcome {
                    tokens: estimate_tokens(prompt_chars),
                    result: TriageClassificationResult::fallback(hint, format!("arbiter failed: {e}")),
                }
            }
        }
    }
}

impl std::fmt::Debug for TriageClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageClassifier")
            .field("backend", &self.backend.kind())
            .finish()
    }
}

/// Builds the user prompt.
#[must_use]
pub fn build_prompt(email: &Email, hint: &PatternMatchResult, examples: &[TrainingExample]) -> String {
    let mut prompt = String::from("Folders:\n");
    for folder in TriageFolder::ALL {
        prompt.push_str(&format!("- {}: {}\n", folder.as_str(), folder.description()));
    }

    prompt.push_str(&format!(
        "\nPattern hint: {} (confidence {:.2}",
        hint.folder, hint.confidence
    ));
    if !hint.tags.is_empty() {
        prompt.push_str(&format!(", tags: {}", hint.tags.join(", ")));
    }
    prompt.push_str(")\n");

    let domain = email.from_domain();
    let mut relevant: Vec<&TrainingExample> = examples.iter().collect();
    relevant.sort_by_key(|ex| (ex.from_domain != domain, !ex.was_correction));

    if !relevant.is_empty() {
        prompt.push_str("\nPast decisions:\n");
        for ex in relevant {
            let verdict = match (ex.ai_suggestion, ex.was_correction) {
                (Some(suggested), true) => format!(" (corrected from {suggested})"),
                (Some(_), false) => " (confirmed)".to_string(),
                (None, _) => String::new(),
            };
            prompt.push_str(&format!(
                "- {} \"{}\" -> {}{verdict}\n",
                ex.from_domain, ex.subject, ex.user_choice
            ));
        }
    }

    let from = email.from_name.as_deref().map_or_else(
        || email.from_address.clone(),
        |name| format!("{name} <{}>", email.from_address),
    );
    let snippet: String = email
        .snippet
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(SNIPPET_CHARS)
        .collect();

    prompt.push_str(&format!(
        "\nEmail:\nFrom: {from}\nSubject: {}\nDate: {}\nSnippet: {snippet}\n",
        email.subject,
        email.date.to_rfc3339()
    ));
    prompt
}

/// Turns a raw arbiter answer into a result, falling back on any defect.
#[must_use]
pub fn parse_response(raw: &str, hint: &PatternMatchResult) -> TriageClassificationResult {
    match decode_reply(raw, hint) {
        Ok(result) => {
            debug!(
                "Arbiter chose {} ({:.2}), hint {} {}",
                result.folder,
                result.confidence,
                hint.folder,
                if result.pattern_agreed { "confirmed" } else { "overridden" }
            );
            result
        }
        Err(cause) => {
            warn!("Unusable arbiter answer, falling back to Review: {cause}");
            TriageClassificationResult::fallback(hint, cause)
        }
    }
}

fn decode_reply(raw: &str, hint: &PatternMatchResult) -> Result<TriageClassificationResult, String> {
    let start = raw.find('{').ok_or("no JSON object in answer")?;
    let end = raw.rfind('}').ok_or("no JSON object in answer")?;
    if end < start {
        return Err("no JSON object in answer".to_string());
    }

    let reply: ArbiterReply =
        serde_json::from_str(&raw[start..=end]).map_err(|e| format!("malformed answer: {e}"))?;

    let folder = TriageFolder::parse(&reply.folder)
        .ok_or_else(|| format!("folder {:?} is not a triage folder", reply.folder))?;

    if !(0.0..=1.0).contains(&reply.confidence) {
        return Err(format!("confidence {} is outside [0, 1]", reply.confidence));
    }

    let mut tags = hint.tags.clone();
    for tag in reply.tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let pattern_agreed = folder == hint.folder;
    Ok(TriageClassificationResult {
        folder,
        tags,
        confidence: reply.confidence,
        snooze_until: hint.snooze_until.filter(|_| pattern_agreed),
        auto_delete_after: hint.auto_delete_after.filter(|_| pattern_agreed),
        pattern_hint: Some(hint.folder),
        pattern_agreed,
        reasoning: reply.reasoning,
        source: ClassificationSource::Arbiter,
    })
}

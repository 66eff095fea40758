use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tiktoken_rs::CoreBPE;
use tracing::debug;

use super::prompts::JOB_DESCRIPTION_PLACEHOLDER;
use crate::models::Job;

/// Token budget for the job text substituted into the template.
pub const MAX_JOB_TOKENS: usize = 3000;

/// Tokenizer vocabulary shared by every supported chat model family.
const TOKENIZER_MODEL: &str = "gpt-3.5-turbo";

/// Renders the per-job user prompt. Deterministic for identical input.
#[derive(Clone)]
pub struct PromptBuilder {
    template: String,
    bpe: Arc<CoreBPE>,
}

impl PromptBuilder {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(JOB_DESCRIPTION_PLACEHOLDER) {
            bail!("Prompt template is missing the {JOB_DESCRIPTION_PLACEHOLDER} placeholder");
        }
        let bpe = tiktoken_rs::get_bpe_from_model(TOKENIZER_MODEL)
            .context("Failed to load tokenizer")?;
        Ok(Self {
            template,
            bpe: Arc::new(bpe),
        })
    }

    pub fn build(&self, job: &Job) -> String {
        let job_text = format!(
            "Company: {}\nTitle: {}\nLocation: {}\nDescription: {}",
            or_unknown(&job.company),
            or_unknown(&job.title),
            or_unknown(&job.location),
            if job.description.trim().is_empty() {
                "No description available"
            } else {
                &job.description
            },
        );
        let safe_text = self.truncate(&sanitize(&job_text), MAX_JOB_TOKENS);
        self.template.replace(JOB_DESCRIPTION_PLACEHOLDER, &safe_text)
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Cuts `text` to at most `max_tokens` tokens. A cut that splits a multi-byte
    /// character is moved back until the prefix decodes.
    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }

        let mut end = max_tokens;
        while end > 0 {
            match self.bpe.decode(tokens[..end].to_vec()) {
                Ok(prefix) => {
                    debug!("Truncated job text from {} to {end} tokens", tokens.len());
                    return prefix;
                }
                Err(_) => end -= 1,
            }
        }
        String::new()
    }
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "Unknown"
    } else {
        value
    }
}

/// Drops control and zero-width characters. Newlines and tabs survive so the
/// description keeps its layout.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|&c| c == '\n' || c == '\t' || !(c.is_control() || is_invisible(c)))
        .collect()
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{2028}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(description: &str) -> Job {
        Job {
            id: 1,
            title: "Platform Engineer".to_string(),
            company: "Acme".to_string(),
            location: "Berlin".to_string(),
            description: description.to_string(),
            date: "2024-05-01".to_string(),
            applicants_count: Some(20),
            company_size_score: Some(4),
        }
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new("Evaluate:\n{job_description}\nReply in JSON.").unwrap()
    }

    #[test]
    fn test_template_requires_placeholder() {
        assert!(PromptBuilder::new("no placeholder here").is_err());
    }

    #[test]
    fn test_build_renders_header_and_description() {
        let prompt = builder().build(&job("Run Kubernetes clusters."));
        assert_eq!(
            prompt,
            "Evaluate:\nCompany: Acme\nTitle: Platform Engineer\nLocation: Berlin\n\
             Description: Run Kubernetes clusters.\nReply in JSON."
        );
    }

    #[test]
    fn test_missing_fields_render_placeholders() {
        let mut blank = job("");
        blank.company = String::new();
        let prompt = builder().build(&blank);
        assert!(prompt.contains("Company: Unknown"));
        assert!(prompt.contains("Description: No description available"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = builder();
        let job = job("Terraform, AWS and on-call rotation.");
        assert_eq!(builder.build(&job), builder.build(&job));
    }

    #[test]
    fn test_sanitize_strips_control_and_invisible_chars() {
        let dirty = "Rust\u{0007} and\u{200B} Go\r\n\tPostgres\u{FEFF}";
        assert_eq!(sanitize(dirty), "Rust and Go\n\tPostgres");
    }

    #[test]
    fn test_long_description_is_truncated_to_budget() {
        let builder = builder();
        let long = "word ".repeat(MAX_JOB_TOKENS * 2);
        let truncated = builder.truncate(&long, MAX_JOB_TOKENS);
        assert!(truncated.len() < long.len());
        assert!(long.starts_with(&truncated));
        assert!(builder.count_tokens(&truncated) <= MAX_JOB_TOKENS);
    }

    #[test]
    fn test_short_text_is_untouched() {
        let builder = builder();
        assert_eq!(builder.truncate("short text", MAX_JOB_TOKENS), "short text");
    }

    #[test]
    fn test_truncation_never_splits_characters() {
        let builder = builder();
        let text = "日本語の求人票".repeat(2000);
        let truncated = builder.truncate(&text, 101);
        assert!(!truncated.is_empty());
        assert!(text.starts_with(&truncated));
    }
}

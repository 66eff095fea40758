// Job evaluation: prompt construction, provider dispatch with retry, score extraction
// from free-form model output, and the ranking formula applied to the result.
// All upstream calls go through llm_client.

pub mod evaluator;
pub mod extractor;
pub mod prompt;
pub mod prompts;
pub mod ranking;
pub mod score;

pub use evaluator::{Evaluator, RetryPolicy};
pub use prompt::PromptBuilder;
pub use score::ScoreRecord;

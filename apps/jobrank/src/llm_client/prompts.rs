// Cross-cutting prompt fragments sent with every provider request.
// The per-job user prompt is rendered by `evaluation::prompt::PromptBuilder`.

/// System message attached to every chat completion.
pub const SYSTEM_MESSAGE: &str = "You are an AI career advisor. Provide concise JSON answers.";

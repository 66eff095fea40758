// Prompt constants for job evaluation.
// Operators can replace the template via PROMPT_TEMPLATE_PATH.

/// Placeholder substituted with the sanitized, truncated job text.
pub const JOB_DESCRIPTION_PLACEHOLDER: &str = "{job_description}";

/// Built-in evaluation template. Replace `{job_description}` before sending.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Evaluate how well the candidate fits the job below.

Candidate profile:
- Senior backend / platform engineer, 8 years of experience
- Strong: Rust, Go, PostgreSQL, Kubernetes, Terraform, AWS, CI/CD
- Working knowledge: Python, Kafka, observability stacks
- Prefers remote-friendly roles at companies with 50-1000 employees

Job:
{job_description}

Score every field on a 0-100 integer scale unless stated otherwise.
Return a JSON object with this EXACT schema and nothing else:
{
  "skills_match": 0,
  "experience_gap": 0,
  "model_fit_score": 0,
  "success_probability": 0,
  "role_complexity": 0,
  "effort_days_to_fit": 0,
  "critical_skill_mismatch_penalty": 0,
  "reasoning": "one or two sentences",
  "areas_for_development": "comma separated skills to learn"
}

Field meanings:
- skills_match: overlap between the candidate's skills and the job requirements
- experience_gap: how far the candidate's experience falls short (0 = no gap)
- model_fit_score: overall fit
- success_probability: chance the application leads to an offer
- role_complexity: how demanding the role is
- effort_days_to_fit: whole days of study needed to close the gaps
- critical_skill_mismatch_penalty: penalty for missing must-have skills (0 = none)"#;

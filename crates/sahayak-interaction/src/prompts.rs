//! Prompt builders for workflow stages.
//!
//! Plain string construction; the generation collaborator receives the full
//! prompt and returns text. Stages decide what to do with the output.

/// Prompt for the candidate questions surfaced at the review checkpoint.
pub fn sample_questions(trigger: &str, subject: &str, grade: &str, count: u64) -> String {
    format!(
        "Create {count} sample questions for a {subject} worksheet for Grade {grade} \
based on this request: \"{trigger}\"

Make questions:
- Age-appropriate for Grade {grade}
- Relevant to {subject}
- Varied in type and difficulty
- Engaging and practical

Return the questions as a numbered markdown list, one line per question."
    )
}

/// Variation cue appended when the reviewer asks for a regeneration.
pub fn regeneration(trigger: &str, attempt: u32) -> String {
    format!("{trigger} (attempt {attempt}, make it different)")
}

/// Prompt for the final worksheet artifact.
pub fn worksheet(
    trigger: &str,
    subject: &str,
    grade: &str,
    difficulty: &str,
    approved_questions: Option<&str>,
) -> String {
    let reference = approved_questions
        .map(|q| format!("\nUse these approved question styles as reference:\n{q}\n"))
        .unwrap_or_default();

    format!(
        "Create a complete worksheet for Grade {grade} {subject} based on this request: \
\"{trigger}\"
{reference}
Generate a professional worksheet in markdown format including:
- Title and metadata
- Learning objectives
- Clear instructions
- 8-12 varied questions organized in sections
- Answer spaces
- Bonus questions
- Answer key
- Assessment rubric

Make it:
- Age-appropriate for Grade {grade}
- {difficulty} difficulty overall
- Educationally sound
- Visually organized
- Culturally relevant (Indian context)
- Include real-world applications

Return ONLY the markdown worksheet content."
    )
}

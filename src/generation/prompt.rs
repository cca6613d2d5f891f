//! Prompt assembly for grounded generation.

/// Instructions used when the deployment does not configure its own.
pub const DEFAULT_INSTRUCTIONS: &str = "You are an assistant that writes concise, well-structured \
summaries formatted in Markdown. Base the summary only on the request and the reference material \
below. Do not invent information; when something is not covered, state that the information was \
not provided.";

/// Inputs to [`build_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    /// Task instructions placed first.
    pub instructions: &'a str,
    /// The user's request.
    pub query: &'a str,
    /// Optional side notes supplied with the request.
    pub notes: Option<&'a str>,
}

/// Build the generation prompt from instructions, the request, notes, and retrieved texts.
///
/// Context texts keep their retrieval order, one per line.
pub fn build_prompt<S: AsRef<str>>(parts: PromptParts<'_>, context: &[S]) -> String {
    let mut prompt = String::new();
    prompt.push_str(parts.instructions.trim());
    prompt.push_str("\n\n---Request---\n");
    prompt.push_str(parts.query.trim());
    prompt.push('\n');

    if let Some(notes) = parts.notes.map(str::trim).filter(|notes| !notes.is_empty()) {
        prompt.push_str("\n---Notes---\n");
        prompt.push_str(notes);
        prompt.push('\n');
    }

    prompt.push_str("\n---Reference Material---\n");
    let joined = context
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join("\n");
    prompt.push_str(&joined);
    prompt.push_str("\n---End Reference Material---\n\nSummary:\n");
    prompt
}

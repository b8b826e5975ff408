/// Sentence the model must use when the excerpts do not support an answer.
pub const INSUFFICIENT_INFORMATION: &str =
    "There is not enough information in the provided documents.";

pub const SYSTEM_PROMPT: &str = "You are a technical administrative assistant.
Answer objectively, directly and formally.
Answer only from the excerpts provided.
Do not use expressions such as \"it seems\", \"it may be related to\" or \"it suggests\".
If information is missing, say: \"There is not enough information in the provided documents.\"
Write a single paragraph, followed by a list of sources.
";

/// Build the final instruction text. The context is already size-bounded by the formatter.
pub fn assemble_prompt(question: &str, context: &str) -> String {
    let mut prompt = String::with_capacity(SYSTEM_PROMPT.len() + question.len() + context.len() + 96);
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\n\nContext:\n");
    prompt.push_str(context);
    prompt.push_str("\n\nAnswer objectively and cite the sources.\n");
    prompt
}

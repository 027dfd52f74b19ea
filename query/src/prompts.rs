/// Grounded-QA rules given to the model. Editable copy, not wire format:
/// the answer contract (context-only, `[doc:ID]` citations, explicit
/// refusal) is what the pipeline's quality gate assumes.
pub const SYSTEM_PROMPT: &str = "\
You are an enterprise assistant that answers questions using only the \
information provided in the context.

Rules:
1. Answer factually, based ONLY on the supplied context.
2. Cite your sources using the [doc:ID] references provided.
3. If the information is not in the context, say so clearly.
4. Structure answers with short headings and bullet points when helpful.
5. Never invent information or sources.
6. If the question falls outside the context, suggest what related \
information is available instead.";

/// Streamed verbatim when retrieval returns nothing; never generated by
/// the model, so tests can match it exactly.
pub const NO_INFORMATION_REPLY: &str =
    "I could not find relevant information in your documents to answer this question.";

/// Answers containing any of these are refusals: citing sources under a
/// refusal would point users at documents that did not answer them. The
/// list mirrors the phrasings the prompt's refusal rule produces, plus
/// their French equivalents for bilingual deployments.
const NO_INFORMATION_PHRASES: &[&str] = &[
    "no information",
    "not available",
    "cannot answer",
    "could not find",
    "no relevant information",
    "not covered by the context",
    "don't have information",
    "aucune information",
    "ne trouve pas",
    "pas d'information",
    "impossible de répondre",
];

const MIN_ANSWER_WORDS: usize = 10;

pub fn user_prompt(context: &str, question: &str) -> String {
    format!(
        "Document context:\n{}\n\nUser question:\n{}\n\nInstructions: Answer the question using only the information in the \
context above. Cite sources as [doc:ID].",
        context, question
    )
}

/// Quality gate for the citations event: suppress citations under refusals
/// and trivially short answers.
pub fn citations_warranted(answer: &str) -> bool {
    let trimmed = answer.trim();
    if trimmed.split_whitespace().count() < MIN_ANSWER_WORDS {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !NO_INFORMATION_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

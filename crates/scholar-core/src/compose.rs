//! Prompt composition for answer generation.
//!
//! Turns retrieval output into a single generation prompt and the
//! citation list that travels with the answer. The context section is
//! budgeted in characters; the top-ranked hit is always included even
//! if it alone exceeds the budget, lower-ranked hits are dropped first.
//! Citations cover exactly the passages that made it into the prompt.

use crate::index::VectorHit;
use crate::models::{Citation, RelatedEntity};

const INSTRUCTION: &str = "You are a research assistant. Answer the question using only the \
context passages below. Cite supporting passages with their bracketed document id. If the \
context does not contain the answer, say so.";

/// A ready-to-send generation prompt plus citations for the passages
/// it contains.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub prompt: String,
    pub citations: Vec<Citation>,
}

pub fn build_prompt(
    question: &str,
    hits: &[VectorHit],
    entities: &[RelatedEntity],
    max_context_chars: usize,
) -> ComposedPrompt {
    let mut citations = Vec::new();
    let mut context = String::new();
    let mut used = 0usize;
    for (rank, hit) in hits.iter().enumerate() {
        let passage = format!("[{}] {}\n\n", short_doc_id(&hit.document_id), hit.text.trim());
        let cost = passage.chars().count();
        if rank > 0 && used + cost > max_context_chars {
            break;
        }
        context.push_str(&passage);
        used += cost;
        citations.push(Citation {
            document_id: hit.document_id.clone(),
            chunk_id: hit.chunk_id.clone(),
            chunk_index: hit.chunk_index,
            score: hit.score,
        });
    }

    let mut prompt = String::new();
    prompt.push_str(INSTRUCTION);
    prompt.push_str("\n\nCONTEXT FROM DOCUMENTS:\n");
    if context.is_empty() {
        prompt.push_str("(no matching passages)\n");
    } else {
        prompt.push_str(&context);
    }
    if !entities.is_empty() {
        prompt.push_str("\nRELATED ENTITIES:\n");
        for related in entities {
            prompt.push_str(&format!(
                "- {} ({})\n",
                related.entity.label, related.entity.kind
            ));
        }
    }
    prompt.push_str(&format!("\nUSER QUESTION: {question}\n\nRESPONSE:"));

    ComposedPrompt { prompt, citations }
}

/// Prompts reference documents by the same 12-character prefix chunk
/// ids use, enough to disambiguate and short enough for a model to
/// echo back reliably.
fn short_doc_id(document_id: &str) -> String {
    document_id.chars().take(12).collect()
}

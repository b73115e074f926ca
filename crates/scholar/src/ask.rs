//! Question answering: embed, retrieve, compose, generate.

use tracing::info;

use scholar_core::compose::build_prompt;
use scholar_core::error::Result;
use scholar_core::models::Answer;
use scholar_core::retrieve::{retrieve, RetrievalParams};

use crate::pipeline::Pipeline;

pub(crate) async fn ask(
    p: &Pipeline,
    question: &str,
    top_k: Option<usize>,
    include_entities: bool,
) -> Result<Answer> {
    let query_vector = p.gateway.embed(question).await?;

    let params = RetrievalParams {
        top_k: top_k.unwrap_or(p.config.retrieval.top_k),
        include_entities,
        max_hops: p.config.retrieval.max_hops,
        max_related_entities: p.config.retrieval.max_related_entities,
    };
    let retrieval = retrieve(p.index.as_ref(), p.graph.as_ref(), &query_vector, &params).await?;
    info!(
        hits = retrieval.hits.len(),
        entities = retrieval.entities.len(),
        degraded = retrieval.graph_degraded,
        "retrieval complete"
    );

    let composed = build_prompt(
        question,
        &retrieval.hits,
        &retrieval.entities,
        p.config.retrieval.max_context_chars,
    );
    let text = p.generator.generate(&composed.prompt).await?;

    Ok(Answer {
        text,
        citations: composed.citations,
        related_entities: retrieval.entities,
        graph_degraded: retrieval.graph_degraded,
    })
}

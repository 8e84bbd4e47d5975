use super::*;
use crate::ingest::{Chunk, FileType};
use crate::testing::{EchoLlm, FailingLlm};
use chrono::Utc;

fn hit(source: &str, chunk_index: usize, text: &str, score: f32) -> SearchHit {
    SearchHit {
        chunk: Chunk {
            text: text.to_string(),
            source: source.to_string(),
            file_type: FileType::Text,
            processed_at: Utc::now(),
            chunk_index,
        },
        score,
    }
}

fn synthesizer(max_context_chars: usize) -> (Arc<EchoLlm>, AnswerSynthesizer) {
    let llm = Arc::new(EchoLlm::new());
    let synth = AnswerSynthesizer::new(Arc::clone(&llm) as Arc<dyn LlmProvider>, max_context_chars, 0.0);
    (llm, synth)
}

#[test]
fn context_is_ordered_by_score_then_source_then_index() {
    let (_, synth) = synthesizer(10_000);
    let hits = vec![
        hit("b.txt", 1, "b1", 0.5),
        hit("a.txt", 3, "a3", 0.9),
        hit("b.txt", 0, "b0", 0.5),
        hit("a.txt", 2, "a2", 0.5),
    ];

    let order: Vec<String> = synth
        .select_context(&hits)
        .iter()
        .map(|h| h.chunk.text.clone())
        .collect();

    assert_eq!(order, vec!["a3", "a2", "b0", "b1"]);
}

#[test]
fn budget_drops_lowest_scoring_chunks_first() {
    let (_, synth) = synthesizer(25);
    let hits = vec![
        hit("low.txt", 0, &"l".repeat(10), 0.1),
        hit("top.txt", 0, &"t".repeat(10), 0.9),
        hit("mid.txt", 0, &"m".repeat(10), 0.5),
    ];

    let kept: Vec<String> = synth
        .select_context(&hits)
        .iter()
        .map(|h| h.chunk.source.clone())
        .collect();

    assert_eq!(kept, vec!["top.txt", "mid.txt"]);
}

#[test]
fn oversized_top_chunk_is_truncated_not_dropped() {
    let (_, synth) = synthesizer(100);
    let hits = vec![hit("big.txt", 0, &"x".repeat(500), 0.9)];

    let kept = synth.select_context(&hits);

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].chunk.text.chars().count(), 100);
}

#[test]
fn prompt_is_deterministic_and_numbered() {
    let context = vec![
        hit("intro.txt", 0, "Paris is the capital of France.", 0.9),
        hit("rivers.txt", 2, "The Seine flows through Paris.", 0.4),
    ];

    let prompt = AnswerSynthesizer::build_prompt("What is the capital of France?", &context);

    assert_eq!(
        prompt,
        "Context:\n\n\
         [1] intro.txt (chunk 0)\nParis is the capital of France.\n\n\
         [2] rivers.txt (chunk 2)\nThe Seine flows through Paris.\n\n\
         Question: What is the capital of France?\nAnswer:"
    );
    assert_eq!(
        prompt,
        AnswerSynthesizer::build_prompt("What is the capital of France?", &context)
    );
}

#[tokio::test]
async fn answer_cites_used_sources() {
    let (llm, synth) = synthesizer(10_000);
    let hits = vec![
        hit("intro.txt", 0, "Paris is the capital of France.", 0.9),
        hit("intro.txt", 1, "It lies on the Seine.", 0.7),
        hit("other.txt", 0, "Unrelated text.", 0.1),
    ];

    let result = synth
        .answer("What is the capital of France?", &hits)
        .await
        .expect("synthesis should succeed");

    assert!(result.answer.contains("Paris"));
    assert_eq!(result.used_sources, vec!["intro.txt", "other.txt"]);
    assert_eq!(result.used_chunks.len(), 3);

    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system, SYSTEM_PROMPT);
    assert!(requests[0].prompt.ends_with("Question: What is the capital of France?\nAnswer:"));
}

#[tokio::test]
async fn llm_failure_is_generation_failure() {
    let synth = AnswerSynthesizer::new(Arc::new(FailingLlm), 1000, 0.0);
    let hits = vec![hit("intro.txt", 0, "Paris is the capital of France.", 0.9)];

    let result = synth.answer("capital?", &hits).await;

    let Err(SynthesisError::GenerationFailure { provider, message }) = result else {
        panic!("expected a generation failure");
    };
    assert_eq!(provider, "failing/none");
    assert!(message.contains("unavailable"));
}

#[tokio::test]
async fn no_hits_skips_the_llm() {
    let (llm, synth) = synthesizer(1000);

    let result = synth.answer("anything?", &[]).await.expect("no-context answer");

    assert_eq!(result.answer, NO_CONTEXT_ANSWER);
    assert!(result.used_sources.is_empty());
    assert!(llm.requests().is_empty());
}

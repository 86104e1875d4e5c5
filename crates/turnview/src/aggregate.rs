use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use tracing::warn;

use crate::error::Error;
use crate::response::{AggregatedResult, Citation, ResponseEvent};
use crate::trace::{GUARDRAIL_TRACE, POST_GUARDRAIL_TRACE, PRE_GUARDRAIL_TRACE};

/// Fold one turn's ordered event sequence into an [`AggregatedResult`].
///
/// Chunks concatenate in arrival order, citation batches extend the citation
/// list in arrival order, and trace fragments are appended under their mapped
/// category label. Fails with [`Error::Decode`] when the concatenated text is
/// not valid UTF-8 — the turn is then considered failed as a whole and no
/// partial text is published.
pub fn aggregate(
    events: impl IntoIterator<Item = ResponseEvent>,
) -> Result<AggregatedResult, Error> {
    let mut state = AggregateState::default();
    for event in events {
        state.push_event(event);
    }
    state.into_result()
}

/// Async variant of [`aggregate`] over a response event stream. The upstream
/// stream is the only suspension point; a stream dropped mid-turn simply
/// never yields a result.
pub async fn aggregate_stream<S>(stream: S) -> Result<AggregatedResult, Error>
where
    S: Stream<Item = ResponseEvent>,
{
    let mut state = AggregateState::default();
    tokio::pin!(stream);
    while let Some(event) = stream.next().await {
        state.push_event(event);
    }
    state.into_result()
}

#[derive(Default)]
struct AggregateState {
    /// Raw chunk bytes; decoded once at end of turn so multi-byte sequences
    /// split across chunk boundaries survive.
    text_bytes: Vec<u8>,
    citations: Vec<Citation>,
    trace: BTreeMap<String, Vec<serde_json::Value>>,
    guardrail_fragments: usize,
}

impl AggregateState {
    fn push_event(&mut self, event: ResponseEvent) {
        match event {
            ResponseEvent::Chunk { bytes } => self.text_bytes.extend_from_slice(&bytes),
            ResponseEvent::Attribution { citations } => self.citations.extend(citations),
            ResponseEvent::Trace { category, payload } => {
                let label = self.map_category(&category);
                self.trace.entry(label).or_default().push(payload);
            }
        }
    }

    /// Guardrail fragments carry no phase marker; arrival position is the
    /// only signal. The first one in a turn is the pre phase, every later
    /// one the post phase. A turn is expected to emit at most one of each.
    fn map_category(&mut self, category: &str) -> String {
        if category != GUARDRAIL_TRACE {
            return category.to_string();
        }
        self.guardrail_fragments += 1;
        match self.guardrail_fragments {
            1 => PRE_GUARDRAIL_TRACE.to_string(),
            2 => POST_GUARDRAIL_TRACE.to_string(),
            n => {
                warn!(
                    fragments = n,
                    "more than two guardrail fragments in one turn; keeping the post-phase label"
                );
                POST_GUARDRAIL_TRACE.to_string()
            }
        }
    }

    fn into_result(self) -> Result<AggregatedResult, Error> {
        let text = String::from_utf8(self.text_bytes)?;
        Ok(AggregatedResult {
            text,
            citations: self.citations,
            trace: self.trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{RefLocation, Reference, Span};
    use crate::trace::{ORCHESTRATION_TRACE, PRE_PROCESSING_TRACE};
    use bytes::Bytes;
    use serde_json::json;

    fn chunk(text: &str) -> ResponseEvent {
        ResponseEvent::Chunk {
            bytes: Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    fn trace_event(category: &str, payload: serde_json::Value) -> ResponseEvent {
        ResponseEvent::Trace {
            category: category.into(),
            payload,
        }
    }

    #[test]
    fn chunks_concatenate_in_arrival_order() {
        let result = aggregate([chunk("The sky is "), chunk("blue.")]).unwrap();
        assert_eq!(result.text, "The sky is blue.");
        assert!(result.citations.is_empty());
        assert!(result.trace.is_empty());
    }

    #[test]
    fn multibyte_sequence_split_across_chunks() {
        // "é" is 0xC3 0xA9; split it between two chunks.
        let events = [
            ResponseEvent::Chunk {
                bytes: Bytes::from_static(&[b'c', b'a', b'f', 0xC3]),
            },
            ResponseEvent::Chunk {
                bytes: Bytes::from_static(&[0xA9]),
            },
        ];
        let result = aggregate(events).unwrap();
        assert_eq!(result.text, "café");
    }

    #[test]
    fn invalid_utf8_fails_the_whole_turn() {
        let events = [
            chunk("partial "),
            ResponseEvent::Chunk {
                bytes: Bytes::from_static(&[0xFF, 0xFE]),
            },
        ];
        let err = aggregate(events).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn citation_batches_extend_in_order() {
        let first = Citation {
            span: Span { start: 0, end: 4 },
            references: vec![Reference::new(RefLocation::web("http://a"))],
        };
        let second = Citation {
            span: Span { start: 5, end: 9 },
            references: vec![Reference::new(RefLocation::web("http://b"))],
        };
        let result = aggregate([
            chunk("some text"),
            ResponseEvent::Attribution {
                citations: vec![first],
            },
            ResponseEvent::Attribution {
                citations: vec![second],
            },
        ])
        .unwrap();
        assert_eq!(result.citations.len(), 2);
        assert_eq!(result.citations[0].span.end, 4);
        assert_eq!(result.citations[1].span.end, 9);
    }

    #[test]
    fn trace_fragments_group_by_category_preserving_order() {
        let result = aggregate([
            trace_event(ORCHESTRATION_TRACE, json!({"step": 1})),
            trace_event(PRE_PROCESSING_TRACE, json!({"step": 2})),
            trace_event(ORCHESTRATION_TRACE, json!({"step": 3})),
        ])
        .unwrap();
        assert_eq!(
            result.trace[ORCHESTRATION_TRACE],
            vec![json!({"step": 1}), json!({"step": 3})]
        );
        assert_eq!(result.trace[PRE_PROCESSING_TRACE], vec![json!({"step": 2})]);
    }

    #[test]
    fn guardrail_fragments_relabel_positionally() {
        let result = aggregate([
            trace_event(GUARDRAIL_TRACE, json!({"action": "NONE"})),
            trace_event(ORCHESTRATION_TRACE, json!({})),
            trace_event(GUARDRAIL_TRACE, json!({"action": "INTERVENED"})),
        ])
        .unwrap();
        assert_eq!(
            result.trace[PRE_GUARDRAIL_TRACE],
            vec![json!({"action": "NONE"})]
        );
        assert_eq!(
            result.trace[POST_GUARDRAIL_TRACE],
            vec![json!({"action": "INTERVENED"})]
        );
        assert!(!result.trace.contains_key(GUARDRAIL_TRACE));
    }

    #[test]
    fn third_guardrail_fragment_stays_in_post_phase() {
        let result = aggregate([
            trace_event(GUARDRAIL_TRACE, json!({"n": 1})),
            trace_event(GUARDRAIL_TRACE, json!({"n": 2})),
            trace_event(GUARDRAIL_TRACE, json!({"n": 3})),
        ])
        .unwrap();
        assert_eq!(result.trace[PRE_GUARDRAIL_TRACE].len(), 1);
        assert_eq!(result.trace[POST_GUARDRAIL_TRACE].len(), 2);
    }

    #[tokio::test]
    async fn stream_variant_matches_iterator_variant() {
        let events = vec![chunk("hello "), chunk("world")];
        let streamed = aggregate_stream(futures::stream::iter(events.clone()))
            .await
            .unwrap();
        let folded = aggregate(events).unwrap();
        assert_eq!(streamed.text, folded.text);
        assert_eq!(streamed.text, "hello world");
    }
}

use futures::Stream;
use serde::Serialize;

use crate::aggregate::{aggregate, aggregate_stream};
use crate::citation::{Annotated, CitationStyle, annotate, resolve_display_text};
use crate::error::Error;
use crate::response::{AggregatedResult, ResponseEvent};
use crate::trace::{TraceSection, reconstruct};

/// Everything derived from one agent turn: the aggregated raw result, the
/// annotated transcript, and the step-grouped trace view. Recomputed per
/// turn and replaced wholesale on the next one.
#[derive(Debug, Clone, Serialize)]
pub struct TurnView {
    pub aggregated: AggregatedResult,
    pub annotated: Annotated,
    pub trace: Vec<TraceSection>,
}

impl TurnView {
    pub fn style(&self) -> CitationStyle {
        self.annotated.style
    }

    /// Annotated text with the references block appended.
    pub fn rendered(&self) -> String {
        self.annotated.render()
    }
}

/// Run the full pipeline over one turn's event sequence: aggregate, resolve
/// the citation style, annotate, and reconstruct the trace.
pub fn process_turn(
    events: impl IntoIterator<Item = ResponseEvent>,
) -> Result<TurnView, Error> {
    Ok(view_of(aggregate(events)?))
}

/// Async variant of [`process_turn`] over a response event stream.
pub async fn process_turn_stream<S>(stream: S) -> Result<TurnView, Error>
where
    S: Stream<Item = ResponseEvent>,
{
    Ok(view_of(aggregate_stream(stream).await?))
}

fn view_of(aggregated: AggregatedResult) -> TurnView {
    let display = resolve_display_text(&aggregated.text);
    let annotated = annotate(&display.text, &aggregated.citations, display.style);
    let trace = reconstruct(&aggregated.trace);
    TurnView {
        aggregated,
        annotated,
        trace,
    }
}

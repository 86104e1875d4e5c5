pub mod aggregate;
pub mod citation;
pub mod error;
pub mod response;
pub mod trace;
pub mod turn;

pub use aggregate::{aggregate, aggregate_stream};
pub use citation::{
    Annotated, CitationStyle, DisplayText, ReferenceEntry, annotate, resolve_display_text,
};
pub use error::Error;
pub use response::{
    AggregatedResult, Citation, LocationType, RefLocation, Reference, ResponseEvent, Span,
};
pub use trace::{TraceSection, TraceStep, reconstruct};
pub use turn::{TurnView, process_turn, process_turn_stream};

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Raw category emitted for guardrail checks; relabeled positionally by the
/// aggregator since the fragment itself carries no phase marker.
pub const GUARDRAIL_TRACE: &str = "guardrailTrace";

pub const PRE_GUARDRAIL_TRACE: &str = "preGuardrailTrace";
pub const PRE_PROCESSING_TRACE: &str = "preProcessingTrace";
pub const ORCHESTRATION_TRACE: &str = "orchestrationTrace";
pub const POST_PROCESSING_TRACE: &str = "postProcessingTrace";
pub const POST_GUARDRAIL_TRACE: &str = "postGuardrailTrace";

/// Display sections in fixed priority order, each an umbrella over one or
/// two underlying category labels.
const SECTIONS: [(&str, &[&str]); 3] = [
    ("Pre-Processing", &[PRE_GUARDRAIL_TRACE, PRE_PROCESSING_TRACE]),
    ("Orchestration", &[ORCHESTRATION_TRACE]),
    ("Post-Processing", &[POST_PROCESSING_TRACE, POST_GUARDRAIL_TRACE]),
];

/// Sub-fields that carry the correlation `traceId`, per label, in lookup
/// priority order. Labels without a table (guardrail phases, anything novel)
/// fall back to the fragment's own top-level `traceId`.
fn correlation_fields(label: &str) -> &'static [&'static str] {
    match label {
        PRE_PROCESSING_TRACE => &["modelInvocationInput", "modelInvocationOutput"],
        ORCHESTRATION_TRACE => &[
            "invocationInput",
            "modelInvocationInput",
            "modelInvocationOutput",
            "observation",
            "rationale",
        ],
        POST_PROCESSING_TRACE => &["modelInvocationInput", "modelInvocationOutput", "observation"],
        _ => &[],
    }
}

/// One step of the reconstructed trace: all fragments sharing a correlation
/// id, in arrival order. `index` is 1-based and global across all sections.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub index: usize,
    /// `None` for a fragment that carried no recognizable identifier and
    /// therefore forms a step of its own.
    pub correlation_id: Option<String>,
    /// Fragments in their original serialized shape.
    pub fragments: Vec<Value>,
}

/// A display section. Sections are always emitted, even with no steps, so
/// the structure presented to the caller is complete and stable.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSection {
    pub heading: String,
    pub steps: Vec<TraceStep>,
}

/// Rebuild the step-grouped trace view from the aggregated category mapping.
///
/// Sections are visited in fixed priority order; within a section fragments
/// are scanned in arrival order and grouped by the first-seen correlation id.
/// Step numbering increases monotonically across the whole trace.
pub fn reconstruct(trace: &BTreeMap<String, Vec<Value>>) -> Vec<TraceSection> {
    let mut next_index = 1usize;
    SECTIONS
        .iter()
        .map(|(heading, labels)| TraceSection {
            heading: (*heading).to_string(),
            steps: section_steps(trace, labels, &mut next_index),
        })
        .collect()
}

fn section_steps(
    trace: &BTreeMap<String, Vec<Value>>,
    labels: &[&str],
    next_index: &mut usize,
) -> Vec<TraceStep> {
    let mut groups: Vec<(Option<String>, Vec<Value>)> = Vec::new();
    let mut slot_by_id: HashMap<String, usize> = HashMap::new();

    for &label in labels {
        let Some(fragments) = trace.get(label) else {
            continue;
        };
        for fragment in fragments {
            match correlation_id(label, fragment) {
                Some(id) => match slot_by_id.get(&id) {
                    Some(&slot) => groups[slot].1.push(fragment.clone()),
                    None => {
                        slot_by_id.insert(id.clone(), groups.len());
                        groups.push((Some(id), vec![fragment.clone()]));
                    }
                },
                None => {
                    warn!(label, "trace fragment has no correlation field; keeping it as its own step");
                    groups.push((None, vec![fragment.clone()]));
                }
            }
        }
    }

    groups
        .into_iter()
        .map(|(correlation_id, fragments)| {
            let step = TraceStep {
                index: *next_index,
                correlation_id,
                fragments,
            };
            *next_index += 1;
            step
        })
        .collect()
}

/// Pull the correlation id out of a fragment: the `traceId` of the first
/// present sub-field from the label's priority list, else the fragment's own
/// top-level `traceId`.
fn correlation_id(label: &str, fragment: &Value) -> Option<String> {
    for field in correlation_fields(label) {
        if let Some(id) = fragment
            .get(field)
            .and_then(|sub| sub.get("traceId"))
            .and_then(Value::as_str)
        {
            return Some(id.to_string());
        }
    }
    fragment
        .get("traceId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

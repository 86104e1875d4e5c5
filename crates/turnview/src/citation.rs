use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::response::{Citation, Reference};

/// Scheme used to recover citation ordinals from the generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    /// No inline markers in the text; ordinals are assigned sequentially in
    /// citation arrival order and markers spliced in at span ends.
    Standard,
    /// The text already carries `%[n]%` delimiters with the agent's own
    /// ordinals, which may be out of sequence relative to arrival order.
    DelimitedInline,
}

/// Inline `%[n]%` delimiter carrying an original ordinal.
static DELIMITER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%\[(\d+)\]%").unwrap());

/// Marker template quoted in a citing instruction: `%[2]%` or the
/// documented `%[X]%` placeholder.
static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%\[(?:\d+|X)\]%").unwrap());

/// Display text plus the citation style discovered alongside it.
#[derive(Debug, Clone)]
pub struct DisplayText {
    pub text: String,
    pub style: CitationStyle,
}

#[derive(Deserialize)]
struct Envelope {
    instruction: String,
    result: String,
}

/// Unwrap the optional `{instruction, result}` JSON envelope some agent
/// configurations return and detect the citation style from it.
///
/// Parsing is lenient: badly escaped control characters inside string values
/// are re-escaped and the parse retried. Anything that still fails to parse
/// is not an envelope — the raw text passes through under `Standard` style.
pub fn resolve_display_text(raw: &str) -> DisplayText {
    match parse_envelope(raw) {
        Some(envelope) => {
            let style = if TEMPLATE_RE.is_match(&envelope.instruction) {
                CitationStyle::DelimitedInline
            } else {
                CitationStyle::Standard
            };
            DisplayText {
                text: envelope.result,
                style,
            }
        }
        None => {
            if raw.trim_start().starts_with('{') {
                debug!("text is not an instruction/result envelope; using it unmodified");
            }
            DisplayText {
                text: raw.to_string(),
                style: CitationStyle::Standard,
            }
        }
    }
}

fn parse_envelope(raw: &str) -> Option<Envelope> {
    if let Ok(envelope) = serde_json::from_str::<Envelope>(raw) {
        return Some(envelope);
    }
    serde_json::from_str::<Envelope>(&escape_control_chars(raw)).ok()
}

/// Re-escape raw control characters inside JSON string literals. Control
/// characters between tokens are legal whitespace and left alone.
fn escape_control_chars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    for c in raw.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                out.push(c);
                in_string = false;
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// One reference occurrence for the citation inspector: every reference is
/// listed, including repeats of an ordinal that the references block
/// deduplicates away.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceEntry {
    pub ordinal: u32,
    /// 1-based repeat count of this ordinal so far.
    pub occurrence: u32,
    /// Resolved source location; `None` when the location type is unknown
    /// or its tagged field is missing.
    pub location: Option<String>,
    pub title: Option<String>,
}

/// Result of annotating one turn's display text.
#[derive(Debug, Clone, Serialize)]
pub struct Annotated {
    /// Display text with citation markers spliced in.
    pub text: String,
    pub style: CitationStyle,
    /// Final ordinals in the order their references appear: sequential under
    /// `Standard`, the delimiter arrival sequence under `DelimitedInline`.
    pub ordinals: Vec<u32>,
    /// Deduplicated references block content, keyed by ordinal; first
    /// location wins for a repeated ordinal.
    pub locations: BTreeMap<u32, String>,
    /// Full per-reference breakdown for the inspector.
    pub entries: Vec<ReferenceEntry>,
}

impl Annotated {
    /// `[n] <location>` lines in ascending ordinal order.
    pub fn references_block(&self) -> String {
        self.locations
            .iter()
            .map(|(ordinal, location)| format!("[{ordinal}] {location}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Annotated text with the references block appended after a blank-line
    /// separator; just the text when there is nothing to reference.
    pub fn render(&self) -> String {
        if self.locations.is_empty() {
            return self.text.clone();
        }
        format!("{}\n\n{}", self.text, self.references_block())
    }
}

/// Annotate `text` with citation markers and build the references block.
///
/// With no citations the text passes through untouched, so re-annotating an
/// already-annotated transcript is a no-op.
pub fn annotate(text: &str, citations: &[Citation], style: CitationStyle) -> Annotated {
    if citations.is_empty() {
        return Annotated {
            text: text.to_string(),
            style,
            ordinals: Vec::new(),
            locations: BTreeMap::new(),
            entries: Vec::new(),
        };
    }

    let (marked, ordinals) = match style {
        CitationStyle::Standard => annotate_standard(text, citations),
        CitationStyle::DelimitedInline => rewrite_delimiters(text),
    };
    let (locations, entries) = collect_references(citations, &ordinals);

    Annotated {
        text: marked,
        style,
        ordinals,
        locations,
        entries,
    }
}

/// A pending splice: marker text to insert at an original-text offset.
struct Insertion {
    at: usize,
    text: String,
}

/// Standard style: sequential ordinals in arrival order, one marker per
/// reference spliced in immediately after each citation's span, with a
/// newline separating citation groups (none after the last).
fn annotate_standard(text: &str, citations: &[Citation]) -> (String, Vec<u32>) {
    let mut insertions = Vec::with_capacity(citations.len());
    let mut ordinal = 0u32;

    for (idx, citation) in citations.iter().enumerate() {
        let at = insertion_point(text, citation.span.end);
        let mut block = String::new();
        for reference in &citation.references {
            ordinal += 1;
            block.push_str(&marker(ordinal, reference));
        }
        if idx + 1 < citations.len() {
            block.push('\n');
        }
        insertions.push(Insertion { at, text: block });
    }

    (splice(text, insertions), (1..=ordinal).collect())
}

fn marker(ordinal: u32, reference: &Reference) -> String {
    match reference.location.value() {
        Some(value) if reference.location.location_type.is_link() => format!(
            r#"<a href="{value}" target="_blank" rel="noopener noreferrer">[{ordinal}]</a>"#
        ),
        _ => format!("[{ordinal}]"),
    }
}

/// Effective splice offset for a span end: first a UTF-8 char boundary at or
/// after the requested offset, then past any alphanumeric run the offset
/// would split, so a marker never lands inside a word.
fn insertion_point(text: &str, span_end: usize) -> usize {
    let mut pos = span_end.min(text.len());
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    if pos == 0 || pos >= text.len() {
        return pos;
    }
    let before = text[..pos].chars().next_back();
    let after = text[pos..].chars().next();
    let splits_word = matches!(
        (before, after),
        (Some(b), Some(a)) if b.is_alphanumeric() && a.is_alphanumeric()
    );
    if !splits_word {
        return pos;
    }
    text[pos..]
        .char_indices()
        .find(|(_, c)| !c.is_alphanumeric())
        .map(|(off, _)| pos + off)
        .unwrap_or(text.len())
}

/// Join the original text and the pending insertions in one pass. Offsets
/// address the original text; a stable sort keeps arrival order for equal
/// offsets, so no running insertion-length bookkeeping is needed.
fn splice(text: &str, mut insertions: Vec<Insertion>) -> String {
    insertions.sort_by_key(|insertion| insertion.at);
    let extra: usize = insertions.iter().map(|i| i.text.len()).sum();
    let mut out = String::with_capacity(text.len() + extra);
    let mut cursor = 0usize;
    for insertion in insertions {
        out.push_str(&text[cursor..insertion.at]);
        cursor = insertion.at;
        out.push_str(&insertion.text);
    }
    out.push_str(&text[cursor..]);
    out
}

/// DelimitedInline style: fold over the `%[n]%` delimiters, rewriting each
/// to a superscript marker with `n` preserved verbatim, and return the
/// sequence of original ordinals in encounter order.
fn rewrite_delimiters(text: &str) -> (String, Vec<u32>) {
    let mut out = String::with_capacity(text.len());
    let mut ordinals = Vec::new();
    let mut cursor = 0usize;

    for caps in DELIMITER_RE.captures_iter(text) {
        let matched = caps.get(0).expect("group 0 always present");
        let digits = &caps[1];
        let Ok(ordinal) = digits.parse::<u32>() else {
            // Too large for a citation ordinal; treat the delimiter as prose.
            continue;
        };
        out.push_str(&text[cursor..matched.start()]);
        out.push_str("<sup>[");
        out.push_str(digits);
        out.push_str("]</sup>");
        ordinals.push(ordinal);
        cursor = matched.end();
    }
    out.push_str(&text[cursor..]);
    (out, ordinals)
}

/// Flatten the references across all citations, pair each with its final
/// ordinal, and build both the deduplicated block map and the full
/// inspector listing.
fn collect_references(
    citations: &[Citation],
    ordinals: &[u32],
) -> (BTreeMap<u32, String>, Vec<ReferenceEntry>) {
    let mut locations = BTreeMap::new();
    let mut entries = Vec::new();
    let mut occurrences: HashMap<u32, u32> = HashMap::new();

    let references = citations.iter().flat_map(|c| c.references.iter());
    for (i, reference) in references.enumerate() {
        let ordinal = match ordinals.get(i) {
            Some(&n) => n,
            None => {
                warn!(
                    reference = i,
                    "more references than citation markers; falling back to positional ordinal"
                );
                (i + 1) as u32
            }
        };
        let location = reference.location.value().map(str::to_string);
        if location.is_none() {
            warn!(
                location_type = ?reference.location.location_type,
                "reference location could not be resolved; omitting it from the references block"
            );
        }
        let occurrence = occurrences
            .entry(ordinal)
            .and_modify(|n| *n += 1)
            .or_insert(1);
        if let Some(value) = &location {
            locations.entry(ordinal).or_insert_with(|| value.clone());
        }
        entries.push(ReferenceEntry {
            ordinal,
            occurrence: *occurrence,
            location,
            title: reference.display_title.clone(),
        });
    }

    (locations, entries)
}

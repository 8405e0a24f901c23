//! Transfer codec for moving an element across a grab/drop gesture.
//!
//! The only thing that survives the trip is a string (a grab in this window,
//! or a clipboard yank pasted into another one), so an element record is
//! serialised as `cw1:` + URL-safe base64 of its compact JSON. The alphabet of
//! the encoded part is `[A-Za-z0-9_-]`, which no quoting or escaping layer in
//! between can mangle.
//!
//! Decoding tries, in order:
//!
//! 1. the current `cw1:` form,
//! 2. the legacy form: bare JSON as older builds and browser clients emitted
//!    it, possibly wrapped in quotes, HTML-escaped, backslash-escaped or
//!    percent-encoded,
//! 3. the position the element had in the candidate list when it was grabbed.
//!
//! A record without an element identifier is never accepted; missing type,
//! title or text are filled with sentinels.

use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;

use crate::error::{TransferError, TransferResult};
use crate::model::{Element, ElementRow, NOT_AVAILABLE};

/// Prefix of the current payload version.
pub const PAYLOAD_PREFIX: &str = "cw1:";

/// What a grab hands to the drop target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPayload {
    /// Encoded record; `None` when nothing could be attached.
    pub data: Option<String>,
    /// Index of the element in the candidate list at grab time.
    pub origin: Option<usize>,
}

impl TransferPayload {
    /// Payload for the candidate at `origin`.
    pub fn grab(element: &Element, origin: usize) -> Self {
        Self {
            data: encode(element),
            origin: Some(origin),
        }
    }

    /// Payload received as text from outside (clipboard paste).
    pub fn pasted(text: &str) -> Self {
        Self {
            data: Some(text.to_string()),
            origin: None,
        }
    }
}

/// Which decoder recovered the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedVia {
    Current,
    Legacy,
    Position,
}

/// Serialise `element` into the current payload form.
pub fn encode(element: &Element) -> Option<String> {
    match serde_json::to_vec(element) {
        Ok(json) => Some(format!("{PAYLOAD_PREFIX}{}", URL_SAFE_NO_PAD.encode(json))),
        Err(e) => {
            tracing::warn!(error = %e, element = %element.element_identifier, "failed to encode transfer payload");
            None
        }
    }
}

/// Recover an element from a drop.
///
/// `candidates` is the candidate list in its current ordering (for the
/// positional fallback); `default_doc` names the document a record without
/// `doc_identifier` belongs to.
pub fn decode(
    payload: &TransferPayload,
    candidates: &[Element],
    default_doc: &str,
) -> TransferResult<(Element, DecodedVia)> {
    let mut failure = None;

    if let Some(data) = payload.data.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        let attempt = match data.strip_prefix(PAYLOAD_PREFIX) {
            Some(encoded) => decode_current(encoded, default_doc).map(|el| (el, DecodedVia::Current)),
            None => decode_legacy(data, default_doc).map(|el| (el, DecodedVia::Legacy)),
        };
        match attempt {
            Ok(found) => return Ok(found),
            Err(e) => {
                tracing::debug!(error = %e, "payload decode failed, trying position");
                failure = Some(e);
            }
        }
    }

    if let Some(element) = payload.origin.and_then(|i| candidates.get(i)) {
        if is_identified(element) {
            return Ok((element.clone(), DecodedVia::Position));
        }
        failure.get_or_insert(TransferError::MissingIdentifier);
    }

    Err(failure.unwrap_or(TransferError::EmptyPayload))
}

fn decode_current(encoded: &str, default_doc: &str) -> TransferResult<Element> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| TransferError::Undecodable {
            reason: format!("invalid base64: {e}"),
        })?;
    // A complete record round-trips exactly; anything less goes through the
    // lenient row path and gets its gaps filled.
    if let Ok(mut element) = serde_json::from_slice::<Element>(&bytes) {
        if !is_identified(&element) {
            return Err(TransferError::MissingIdentifier);
        }
        if element.doc_identifier.trim().is_empty() {
            element.doc_identifier = default_doc.to_string();
        }
        return Ok(element);
    }
    let row: ElementRow = serde_json::from_slice(&bytes).map_err(|e| TransferError::Undecodable {
        reason: format!("invalid record: {e}"),
    })?;
    from_row(row, default_doc)
}

static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(quot|#34|#x22|apos|#39|#x27|lt|gt|amp);").unwrap());

static RE_PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%[0-9A-Fa-f]{2}").unwrap());

/// Legacy payloads: raw JSON with whatever quoting artifacts it picked up.
fn decode_legacy(raw: &str, default_doc: &str) -> TransferResult<Element> {
    let mut candidates = Vec::new();
    let mut text = raw.trim().to_string();
    if RE_PERCENT.is_match(&text) && !text.contains('{') {
        text = percent_decode(&text);
    }
    candidates.push(text.clone());

    let unwrapped = strip_wrapping_quotes(&text);
    let unescaped = RE_ENTITY
        .replace_all(unwrapped, |caps: &regex::Captures| match &caps[1] {
            "quot" | "#34" | "#x22" => "\"",
            "apos" | "#39" | "#x27" => "'",
            "lt" => "<",
            "gt" => ">",
            _ => "&",
        })
        .into_owned();
    candidates.push(unescaped.clone());
    candidates.push(unescaped.replace("\\\"", "\"").replace("\\'", "'"));

    let mut last_err = None;
    for candidate in candidates {
        match serde_json::from_str::<ElementRow>(&candidate) {
            Ok(row) => return from_row(row, default_doc),
            Err(e) => last_err = Some(e),
        }
    }
    Err(TransferError::Undecodable {
        reason: match last_err {
            Some(e) => format!("not a recognised payload: {e}"),
            None => "not a recognised payload".into(),
        },
    })
}

fn strip_wrapping_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

fn percent_decode(text: &str) -> String {
    fn hex(byte: u8) -> Option<u8> {
        (byte as char).to_digit(16).map(|d| d as u8)
    }
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn from_row(row: ElementRow, default_doc: &str) -> TransferResult<Element> {
    let identified = row
        .element_identifier
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty() && id != NOT_AVAILABLE);
    if !identified {
        return Err(TransferError::MissingIdentifier);
    }
    Ok(Element::from_row(default_doc, row))
}

fn is_identified(element: &Element) -> bool {
    let id = element.element_identifier.trim();
    !id.is_empty() && id != NOT_AVAILABLE
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn phishing() -> Element {
        Element {
            doc_identifier: "ATTACK".into(),
            element_type: "technique".into(),
            element_identifier: "T1566".into(),
            title: "Phishing \"spear\" & <whale>".into(),
            text: "Adversaries may send phishing messages — l'accès".into(),
        }
    }

    #[test]
    fn current_form_is_url_safe() {
        let encoded = encode(&phishing()).unwrap();
        let body = encoded.strip_prefix(PAYLOAD_PREFIX).unwrap();
        assert!(body.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn current_form_without_document_takes_default() {
        let el = Element {
            doc_identifier: "  ".into(),
            ..phishing()
        };
        let payload = TransferPayload::grab(&el, 0);
        let (back, via) = decode(&payload, &[], "ATTACK").unwrap();
        assert_eq!(via, DecodedVia::Current);
        assert_eq!(back.doc_identifier, "ATTACK");
        assert_eq!(back.title, el.title);
    }

    #[test]
    fn legacy_html_escaped_payload() {
        let raw = "{&quot;element_identifier&quot;:&quot;T1566&quot;,&quot;title&quot;:&quot;Phishing &amp; co&quot;}";
        let (el, via) = decode(&TransferPayload::pasted(raw), &[], "ATTACK").unwrap();
        assert_eq!(via, DecodedVia::Legacy);
        assert_eq!(el.element_identifier, "T1566");
        assert_eq!(el.title, "Phishing & co");
        assert_eq!(el.doc_identifier, "ATTACK");
        assert_eq!(el.element_type, NOT_AVAILABLE);
        assert_eq!(el.text, "");
    }

    #[test]
    fn legacy_backslash_quoted_payload() {
        let raw = r#"'{\"element_identifier\":\"T1078\",\"text\":\"it\'s valid\"}'"#;
        let (el, via) = decode(&TransferPayload::pasted(raw), &[], "ATTACK").unwrap();
        assert_eq!(via, DecodedVia::Legacy);
        assert_eq!(el.element_identifier, "T1078");
        assert_eq!(el.text, "it's valid");
    }

    #[test]
    fn legacy_percent_encoded_payload() {
        let raw = "%7B%22element_identifier%22%3A%22T1190%22%2C%22title%22%3A%22Exploit%22%7D";
        let (el, _) = decode(&TransferPayload::pasted(raw), &[], "ATTACK").unwrap();
        assert_eq!(el.element_identifier, "T1190");
        assert_eq!(el.title, "Exploit");
    }

    #[test]
    fn corrupt_payload_falls_back_to_position() {
        let candidates = vec![phishing()];
        let payload = TransferPayload {
            data: Some("cw1:###".into()),
            origin: Some(0),
        };
        let (el, via) = decode(&payload, &candidates, "ATTACK").unwrap();
        assert_eq!(via, DecodedVia::Position);
        assert_eq!(el, phishing());
    }

    #[test]
    fn missing_payload_uses_position_or_fails_safe() {
        let candidates = vec![phishing()];
        let payload = TransferPayload {
            data: None,
            origin: Some(0),
        };
        assert_eq!(decode(&payload, &candidates, "ATTACK").unwrap().1, DecodedVia::Position);

        let nothing = TransferPayload::default();
        assert_eq!(
            decode(&nothing, &candidates, "ATTACK").unwrap_err(),
            TransferError::EmptyPayload
        );
    }

    #[test]
    fn record_without_identifier_is_rejected() {
        let raw = r#"{"title": "orphan"}"#;
        assert_eq!(
            decode(&TransferPayload::pasted(raw), &[], "ATTACK").unwrap_err(),
            TransferError::MissingIdentifier
        );
    }

    #[test]
    fn garbage_without_position_is_undecodable() {
        let err = decode(&TransferPayload::pasted("hello there"), &[], "ATTACK").unwrap_err();
        assert!(matches!(err, TransferError::Undecodable { .. }));
    }

    #[test]
    fn stale_position_is_not_trusted() {
        let payload = TransferPayload {
            data: Some("garbage".into()),
            origin: Some(5),
        };
        let err = decode(&payload, &[phishing()], "ATTACK").unwrap_err();
        assert!(matches!(err, TransferError::Undecodable { .. }));
    }

    proptest! {
        #[test]
        fn encode_decode_round_trips(
            doc in "[A-Z_]{1,12}",
            kind in "\\PC{0,16}",
            id in "[A-Za-z0-9][A-Za-z0-9 .\\-]{0,15}",
            title in "\\PC{0,40}",
            text in "\\PC{0,200}",
        ) {
            let el = Element {
                doc_identifier: doc,
                element_type: kind,
                element_identifier: id,
                title,
                text,
            };
            prop_assume!(el.element_identifier != NOT_AVAILABLE);
            let payload = TransferPayload { data: encode(&el), origin: None };
            let (back, via) = decode(&payload, &[], "OTHER").unwrap();
            prop_assert_eq!(via, DecodedVia::Current);
            prop_assert_eq!(back, el);
        }
    }
}

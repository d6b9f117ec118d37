//! Per-event search-vector fragment construction (spec §4.6), grounded in
//! `process_event.py::get_search_vector`: a small, bounded contribution from
//! title, transaction/culprit, a simplified request URL, and a handful of
//! stack-frame basenames — the issue's full vector is the union of these,
//! capped by `EventStore::apply_issue_batch_updates`'s lexeme limit.

use faultline_types::Stacktrace;

const FIELD_CHARS: usize = 250;
const BASENAME_CHARS: usize = 100;
const MAX_BASENAMES: usize = 5;
const MAX_STACKTRACES: usize = 2;
const MAX_FRAMES_PER_TRACE: usize = 3;
const FRAGMENT_BYTES: usize = 2048;

/// Inputs gathered by the grouping stage for one processed event.
pub struct SearchVectorInput<'a> {
    pub title: &'a str,
    pub transaction_or_culprit: Option<&'a str>,
    pub request_url: Option<&'a str>,
    pub stacktraces: &'a [Stacktrace],
}

/// Build the bounded per-event fragment described in spec §4.6.
pub fn build_fragment(input: &SearchVectorInput) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(truncate_chars(input.title, FIELD_CHARS));
    if let Some(t) = input.transaction_or_culprit {
        parts.push(truncate_chars(t, FIELD_CHARS));
    }
    if let Some(url) = input.request_url {
        parts.push(truncate_chars(&simplify_url(url), FIELD_CHARS));
    }
    parts.extend(basenames(input.stacktraces));

    let mut seen = std::collections::HashSet::new();
    parts.retain(|p| !p.is_empty() && seen.insert(p.clone()));

    let joined = parts.join(" ");
    let stripped = joined.replace('\u{0000}', "");
    cap_bytes(&stripped, FRAGMENT_BYTES)
}

/// `scheme://netloc` + path, falling back to the raw URL when it doesn't
/// parse as a URL at all.
fn simplify_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
            if path.is_empty() {
                format!("{scheme}://{authority}")
            } else {
                format!("{scheme}://{authority}/{path}")
            }
        }
        None => url.to_string(),
    }
}

/// At most 5 basenames (≤100 chars each) drawn from at most 2 stacktraces,
/// at most 3 frames each, frames reversed so the outermost call comes first.
fn basenames(stacktraces: &[Stacktrace]) -> Vec<String> {
    let mut out = Vec::new();
    for st in stacktraces.iter().take(MAX_STACKTRACES) {
        for frame in st.frames.iter().rev().take(MAX_FRAMES_PER_TRACE) {
            if let Some(name) = frame.basename() {
                out.push(truncate_chars(name, BASENAME_CHARS));
                if out.len() >= MAX_BASENAMES {
                    return out;
                }
            }
        }
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn cap_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    match s[..cut].rfind(' ') {
        Some(pos) => s[..pos].to_string(),
        None => s[..cut].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_types::StackFrame;

    #[test]
    fn simplifies_url_to_scheme_netloc_path() {
        assert_eq!(
            simplify_url("https://example.com/checkout?x=1"),
            "https://example.com/checkout?x=1"
        );
    }

    #[test]
    fn unparseable_url_passes_through() {
        assert_eq!(simplify_url("not-a-url"), "not-a-url");
    }

    #[test]
    fn basenames_reversed_outermost_first_capped_at_three_per_trace() {
        let frames: Vec<StackFrame> = (0..5)
            .map(|i| StackFrame {
                filename: Some(format!("frame{i}.js")),
                ..Default::default()
            })
            .collect();
        let st = Stacktrace { frames };
        let names = basenames(std::slice::from_ref(&st));
        assert_eq!(names, vec!["frame4.js", "frame3.js", "frame2.js"]);
    }

    #[test]
    fn fragment_dedups_and_strips_nul() {
        let st = Stacktrace { frames: vec![] };
        let input = SearchVectorInput {
            title: "boom\u{0000}",
            transaction_or_culprit: Some("boom"),
            request_url: None,
            stacktraces: std::slice::from_ref(&st),
        };
        let fragment = build_fragment(&input);
        assert_eq!(fragment, "boom");
    }

    #[test]
    fn fragment_caps_at_2048_bytes_cutting_at_space() {
        let long_title = "a".repeat(3000);
        let input = SearchVectorInput {
            title: &long_title,
            transaction_or_culprit: None,
            request_url: None,
            stacktraces: &[],
        };
        let fragment = build_fragment(&input);
        assert!(fragment.len() <= FRAGMENT_BYTES);
    }
}

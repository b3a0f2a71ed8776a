//! Citation extraction and verification for generated answers.
//!
//! A small hand-written parser recognises reference markers in answer
//! text and returns typed [`Reference`]s. Recognised markers:
//!
//! | Marker | Example |
//! |--------|---------|
//! | `文档` + number | `文档2` |
//! | `document` + number (any case) | `Document 2` |
//! | opening bracket + number(s) | `[2]`, `(2)`, `【2】`, `（2）`, `[1, 3]` |
//!
//! Numbers are 1-based positions in the [`EvidenceSet`]. Verification fails
//! closed: any out-of-range or unparseable reference invalidates the answer.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::models::{Candidate, Citation, EvidenceSet};

/// Maximum number of characters copied from a chunk into a citation.
pub const EXCERPT_CHARS: usize = 100;

const WORD_MARKERS: [&str; 2] = ["文档", "document"];
const OPEN_BRACKETS: [char; 4] = ['[', '(', '【', '（'];
const LIST_SEPARATORS: [char; 3] = [',', '，', '、'];

/// One reference found in answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A 1-based evidence position as written.
    Index(usize),
    /// A digit run too large to represent.
    Unparseable(String),
}

/// Scan `answer` for reference markers, in text order.
pub fn parse_references(answer: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut rest = answer;

    while let Some(c) = rest.chars().next() {
        if let Some(after) = strip_word_marker(rest) {
            rest = match read_number(after) {
                Some((r, tail)) => {
                    refs.push(r);
                    tail
                }
                None => after,
            };
            continue;
        }

        if OPEN_BRACKETS.contains(&c) {
            let after = &rest[c.len_utf8()..];
            rest = match read_number(after) {
                Some((r, tail)) => {
                    refs.push(r);
                    read_list_tail(tail, &mut refs)
                }
                None => after,
            };
            continue;
        }

        rest = &rest[c.len_utf8()..];
    }

    refs
}

fn strip_word_marker(s: &str) -> Option<&str> {
    WORD_MARKERS.iter().find_map(|marker| {
        let head = s.get(..marker.len())?;
        head.eq_ignore_ascii_case(marker).then(|| &s[marker.len()..])
    })
}

fn skip_spaces(s: &str) -> &str {
    s.trim_start_matches(&[' ', '\u{3000}'][..])
}

/// Optional spaces, then an ASCII digit run.
fn read_number(s: &str) -> Option<(Reference, &str)> {
    let s = skip_spaces(s);
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let digits = &s[..end];
    let reference = match digits.parse::<usize>() {
        Ok(n) => Reference::Index(n),
        Err(_) => Reference::Unparseable(digits.to_string()),
    };
    Some((reference, &s[end..]))
}

/// Further comma-separated numbers inside a bracket: `[1, 2, 3]`.
fn read_list_tail<'a>(mut s: &'a str, refs: &mut Vec<Reference>) -> &'a str {
    loop {
        let after_sep = match skip_spaces(s).strip_prefix(&LIST_SEPARATORS[..]) {
            Some(t) => t,
            None => return s,
        };
        match read_number(after_sep) {
            Some((r, tail)) => {
                refs.push(r);
                s = tail;
            }
            None => return s,
        }
    }
}

/// Build the citation list for a generated answer.
///
/// Distinct in-range references become verified citations in ascending
/// order. When the answer has none, every evidence item is cited in rank
/// order, unverified.
pub fn extract_citations(answer: &str, evidence: &EvidenceSet) -> Vec<Citation> {
    let valid: BTreeSet<usize> = parse_references(answer)
        .into_iter()
        .filter_map(|r| match r {
            Reference::Index(n) if n >= 1 && n <= evidence.len() => Some(n - 1),
            _ => None,
        })
        .collect();

    if valid.is_empty() {
        return evidence.iter().map(|c| citation(c, false)).collect();
    }

    valid
        .into_iter()
        .filter_map(|i| evidence.get(i))
        .map(|c| citation(c, true))
        .collect()
}

fn citation(candidate: &Candidate, verified: bool) -> Citation {
    Citation {
        filename: candidate.filename.clone(),
        chunk_id: candidate.chunk_id,
        excerpt: excerpt(&candidate.text),
        verified,
    }
}

/// First [`EXCERPT_CHARS`] characters, with `...` appended only when cut.
pub fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CitationIssue {
    OutOfRange { reference: usize, evidence_len: usize },
    Unparseable { token: String, evidence_len: usize },
}

impl fmt::Display for CitationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (what, len) = match self {
            CitationIssue::OutOfRange {
                reference,
                evidence_len,
            } => (format!("reference to document {}", reference), *evidence_len),
            CitationIssue::Unparseable {
                token,
                evidence_len,
            } => (format!("unreadable reference \"{}\"", token), *evidence_len),
        };
        if len == 0 {
            write!(f, "{} is out of range (no documents were provided)", what)
        } else {
            write!(f, "{} is out of range (valid range: 1-{})", what, len)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationCheck {
    pub valid: bool,
    pub issue: Option<CitationIssue>,
}

/// Check every reference in `answer` against the evidence positions.
///
/// Reports the first offending reference in text order.
pub fn verify_citations(answer: &str, evidence: &EvidenceSet) -> CitationCheck {
    let evidence_len = evidence.len();
    let issue = parse_references(answer).into_iter().find_map(|r| match r {
        Reference::Index(n) if n >= 1 && n <= evidence_len => None,
        Reference::Index(n) => Some(CitationIssue::OutOfRange {
            reference: n,
            evidence_len,
        }),
        Reference::Unparseable(token) => Some(CitationIssue::Unparseable {
            token,
            evidence_len,
        }),
    });

    CitationCheck {
        valid: issue.is_none(),
        issue,
    }
}

/// Text prepended to an answer whose citations failed verification.
pub fn warning_banner(issue: &CitationIssue) -> String {
    format!(
        "WARNING: citation check failed: {}. Verify this answer against the listed sources.\n\n",
        issue
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(n: usize) -> EvidenceSet {
        EvidenceSet::from_ranked(
            (0..n)
                .map(|i| Candidate {
                    chunk_id: 100 + i as i64,
                    filename: format!("doc{}.txt", i + 1),
                    text: format!("chunk text {}", i + 1),
                    semantic_score: 0.5,
                    lexical_score: 0.5,
                    raw_match_count: 1,
                    combined_score: 0.5,
                })
                .collect(),
        )
    }

    #[test]
    fn test_parse_marker_forms() {
        let refs = parse_references("见文档1，以及 Document 2、[3]、(4)、【5】、（6）");
        assert_eq!(
            refs,
            (1..=6).map(Reference::Index).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_parse_bracket_list() {
        let refs = parse_references("As shown [1, 3] and [2，4].");
        assert_eq!(
            refs,
            vec![
                Reference::Index(1),
                Reference::Index(3),
                Reference::Index(2),
                Reference::Index(4)
            ]
        );
    }

    #[test]
    fn test_marker_without_number_ignored() {
        assert!(parse_references("the document says (see above) [x]").is_empty());
    }

    #[test]
    fn test_overflowing_digits_unparseable() {
        let refs = parse_references("[99999999999999999999999999]");
        assert_eq!(
            refs,
            vec![Reference::Unparseable("99999999999999999999999999".into())]
        );
    }

    #[test]
    fn test_extract_verified_distinct_ascending() {
        let ev = evidence(3);
        let cites = extract_citations("文档3 says so, and [1]. Also 文档3 again.", &ev);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].filename, "doc1.txt");
        assert_eq!(cites[1].filename, "doc3.txt");
        assert!(cites.iter().all(|c| c.verified));
        assert_eq!(cites[1].chunk_id, 102);
    }

    #[test]
    fn test_extract_ignores_out_of_range() {
        let ev = evidence(2);
        let cites = extract_citations("参考文档1和文档3", &ev);
        assert_eq!(cites.len(), 1);
        assert_eq!(cites[0].filename, "doc1.txt");
        assert!(cites[0].verified);
    }

    #[test]
    fn test_no_markers_cites_all_unverified() {
        let ev = evidence(2);
        let cites = extract_citations("An answer without any markers.", &ev);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].filename, "doc1.txt");
        assert_eq!(cites[1].filename, "doc2.txt");
        assert!(cites.iter().all(|c| !c.verified));
    }

    #[test]
    fn test_verify_reports_out_of_range() {
        let ev = evidence(2);
        let check = verify_citations("参考文档1和文档3", &ev);
        assert!(!check.valid);
        assert_eq!(
            check.issue,
            Some(CitationIssue::OutOfRange {
                reference: 3,
                evidence_len: 2
            })
        );
        let msg = check.issue.unwrap().to_string();
        assert!(msg.contains("document 3"));
        assert!(msg.contains("1-2"));
    }

    #[test]
    fn test_verify_zero_is_out_of_range() {
        let check = verify_citations("see [0]", &evidence(2));
        assert!(!check.valid);
    }

    #[test]
    fn test_verify_valid_and_markerless() {
        assert!(verify_citations("文档1 and [2]", &evidence(2)).valid);
        assert!(verify_citations("no references", &evidence(2)).valid);
    }

    #[test]
    fn test_verify_unparseable_fails_closed() {
        let check = verify_citations("[123456789012345678901234567890]", &evidence(2));
        assert!(!check.valid);
        assert!(matches!(
            check.issue,
            Some(CitationIssue::Unparseable { .. })
        ));
    }

    #[test]
    fn test_excerpt_truncation() {
        assert_eq!(excerpt("short"), "short");
        let exact = "字".repeat(100);
        assert_eq!(excerpt(&exact), exact);
        let long = "字".repeat(101);
        assert_eq!(excerpt(&long), format!("{}...", "字".repeat(100)));
    }

    #[test]
    fn test_warning_banner_mentions_issue() {
        let issue = CitationIssue::OutOfRange {
            reference: 7,
            evidence_len: 5,
        };
        let banner = warning_banner(&issue);
        assert!(banner.starts_with("WARNING"));
        assert!(banner.contains("valid range: 1-5"));
    }
}

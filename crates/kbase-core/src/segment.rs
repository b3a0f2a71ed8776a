//! Paragraph-first text segmenter with sentence fallback.
//!
//! Splits document text into chunks whose length targets `max_len`
//! characters (Unicode scalar values, not bytes).
//!
//! # Algorithm
//!
//! 1. Normalize line endings and split on blank lines into paragraphs.
//!    Paragraphs are trimmed; empty ones are discarded.
//! 2. Accumulate paragraphs into a buffer, joined by `\n`, while
//!    `len(buffer) + len(paragraph) + 1 <= max_len`. Otherwise flush the
//!    buffer and start a new one with the paragraph.
//! 3. A paragraph longer than `max_len` is split on sentence terminators
//!    (`。！？.!?`, kept with their sentence) and re-accumulated under the
//!    same cap. Each sub-chunk after the first starts with the trailing
//!    `overlap` characters of the previous one, when that one is longer
//!    than `overlap`.
//! 4. Flush whatever remains.
//!
//! Paragraph-to-paragraph transitions never carry overlap. A single
//! sentence longer than `max_len` becomes its own chunk unsplit.
//!
//! # Example
//!
//! ```rust
//! use kbase_core::segment::segment;
//!
//! let chunks = segment("First paragraph.\n\nSecond paragraph.", 300, 50).unwrap();
//! assert_eq!(chunks, vec!["First paragraph.\nSecond paragraph."]);
//! ```

use crate::error::KbError;

const SENTENCE_TERMINATORS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

/// Split `text` into ordered chunks of at most roughly `max_len` characters.
///
/// Returns an empty vector for empty or whitespace-only input. Fails with
/// [`KbError::InvalidSegmentation`] when `max_len` is zero or `overlap` is
/// not smaller than `max_len`.
pub fn segment(text: &str, max_len: usize, overlap: usize) -> Result<Vec<String>, KbError> {
    if max_len == 0 || overlap >= max_len {
        return Err(KbError::InvalidSegmentation { max_len, overlap });
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for para in paragraphs(&normalized) {
        let para_len = para.chars().count();

        if para_len > max_len {
            if !buf.is_empty() {
                chunks.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            chunks.extend(split_long_paragraph(&para, max_len, overlap));
            continue;
        }

        if buf.is_empty() {
            buf.push_str(&para);
            buf_len = para_len;
        } else if buf_len + para_len + 1 <= max_len {
            buf.push('\n');
            buf.push_str(&para);
            buf_len += para_len + 1;
        } else {
            chunks.push(std::mem::replace(&mut buf, para));
            buf_len = para_len;
        }
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    Ok(chunks)
}

/// Blank-line separated paragraphs, trimmed, empties dropped.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            push_paragraph(&mut out, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_paragraph(&mut out, &current);

    out
}

fn push_paragraph(out: &mut Vec<String>, lines: &[&str]) {
    let joined = lines.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Sentences with their terminator attached. Whitespace-only pieces are dropped.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if SENTENCE_TERMINATORS.contains(&c) {
            let end = i + c.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }

    out.retain(|s| !s.trim().is_empty());
    out
}

fn split_long_paragraph(para: &str, max_len: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut cur = String::new();
    let mut cur_len = 0usize;

    for sent in sentences(para) {
        let sent_len = sent.chars().count();

        if cur_len + sent_len <= max_len {
            cur.push_str(sent);
            cur_len += sent_len;
            continue;
        }

        let seed = if overlap > 0 && cur_len > overlap {
            tail_chars(&cur, overlap).to_string()
        } else {
            String::new()
        };
        if !cur.trim().is_empty() {
            chunks.push(cur.trim().to_string());
        }

        cur_len = seed.chars().count() + sent_len;
        cur = seed;
        cur.push_str(sent);
    }

    if !cur.trim().is_empty() {
        chunks.push(cur.trim().to_string());
    }

    chunks
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if n >= total {
        return s;
    }
    let start = s
        .char_indices()
        .nth(total - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert!(segment("", 300, 50).unwrap().is_empty());
        assert!(segment("  \n\n \r\n ", 300, 50).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_overlap_not_below_max_len() {
        assert!(matches!(
            segment("text", 10, 10),
            Err(KbError::InvalidSegmentation {
                max_len: 10,
                overlap: 10
            })
        ));
        assert!(segment("text", 0, 0).is_err());
    }

    #[test]
    fn test_small_paragraphs_accumulate() {
        let text = "Alpha.\n\nBeta.\r\n\r\nGamma.";
        let chunks = segment(text, 300, 50).unwrap();
        assert_eq!(chunks, vec!["Alpha.\nBeta.\nGamma."]);
    }

    #[test]
    fn test_paragraph_transition_flushes_without_overlap() {
        let text = "aaaaaaaa\n\nbbbbbbbb\n\ncccccccc";
        let chunks = segment(text, 17, 5).unwrap();
        assert_eq!(chunks, vec!["aaaaaaaa\nbbbbbbbb", "cccccccc"]);
    }

    #[test]
    fn test_join_rule_counts_separator() {
        // 8 + 8 + 1 = 17 > 16, so the second paragraph starts a new chunk.
        let chunks = segment("aaaaaaaa\n\nbbbbbbbb", 16, 0).unwrap();
        assert_eq!(chunks, vec!["aaaaaaaa", "bbbbbbbb"]);
    }

    #[test]
    fn test_paragraph_exactly_max_len_kept_whole() {
        let para = "x".repeat(20);
        let chunks = segment(&para, 20, 5).unwrap();
        assert_eq!(chunks, vec![para]);
    }

    #[test]
    fn test_long_paragraph_split_on_sentences_with_overlap() {
        // Three 10-char sentences, cap 25, overlap 4.
        let text = "aaaaaaaaa.bbbbbbbbb.ccccccccc.";
        let chunks = segment(text, 25, 4).unwrap();
        assert_eq!(chunks, vec!["aaaaaaaaa.bbbbbbbbb.", "bbb.ccccccccc."]);
    }

    #[test]
    fn test_zero_overlap_seeds_nothing() {
        let text = "aaaaaaaaa.bbbbbbbbb.ccccccccc.";
        let chunks = segment(text, 25, 0).unwrap();
        assert_eq!(chunks, vec!["aaaaaaaaa.bbbbbbbbb.", "ccccccccc."]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        // 32 bytes, 14 characters.
        let text = "向量检索使用FAISS实现。";
        let chunks = segment(text, 20, 5).unwrap();
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_cjk_sentence_split() {
        let text = "第一句话在这里。第二句话在这里！第三句话在这里？";
        let chunks = segment(text, 16, 2).unwrap();
        assert_eq!(
            chunks,
            vec!["第一句话在这里。第二句话在这里！", "里！第三句话在这里？"]
        );
    }

    #[test]
    fn test_oversized_sentence_kept_unsplit() {
        let long = "y".repeat(50);
        let text = format!("short.{}", long);
        let chunks = segment(&text, 20, 3).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "short.");
        assert!(chunks[1].ends_with(&long));
    }

    #[test]
    fn test_buffer_flushed_before_long_paragraph() {
        let text = format!("intro\n\n{}", "z".repeat(30));
        let chunks = segment(&text, 20, 5).unwrap();
        assert_eq!(chunks[0], "intro");
        assert_eq!(chunks[1], "z".repeat(30));
    }

    #[test]
    fn test_resegmenting_a_chunk_is_identity() {
        let text = "One. Two sentences here.\n\nAnother paragraph that is a bit longer than the others. It keeps going. And going!";
        for chunk in segment(text, 40, 8).unwrap() {
            if chunk.chars().count() <= 40 {
                assert_eq!(segment(&chunk, 40, 8).unwrap(), vec![chunk.clone()]);
            }
        }
    }

    #[test]
    fn test_paragraphs_preserved_in_order() {
        let paras: Vec<String> = (0..30).map(|i| format!("Paragraph number {}.", i)).collect();
        let text = paras.join("\n\n");
        let chunks = segment(&text, 60, 10).unwrap();
        let joined = chunks.join("\n");
        let mut pos = 0;
        for p in &paras {
            let found = joined[pos..].find(p.as_str()).expect("paragraph missing");
            pos += found + p.len();
        }
        for c in &chunks {
            assert!(c.chars().count() <= 60);
        }
    }
}

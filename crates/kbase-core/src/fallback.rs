//! Deterministic reply for queries the confidence gate rejected.
//!
//! Never calls the generation backend. The message explains why the
//! knowledge base cannot answer, proposes follow-up questions built from
//! query keywords, and lists up to three possibly related files.

use std::collections::HashSet;

use serde::Serialize;

use crate::gate::GateReason;
use crate::models::{Citation, EvidenceSet};

const MAX_KEYWORDS: usize = 3;
const MAX_RELATED_FILES: usize = 3;

/// Function words and question words that make poor keywords.
const STOPWORDS: [&str; 33] = [
    "的", "了", "是", "在", "有", "和", "就", "不", "人", "都", "我", "要", "他", "这", "着", "你",
    "会", "地", "个", "她", "到", "说", "们", "为", "什么", "怎么", "如何", "能否", "可以", "吗",
    "呢", "？", "?",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackReply {
    pub message: String,
    pub keywords: Vec<String>,
    pub suggestions: Vec<String>,
    /// Always empty: a fallback never cites evidence.
    pub citations: Vec<Citation>,
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// Up to three keywords: maximal runs of CJK ideographs longer than one
/// character that are not stopwords, in query order.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();

    for c in query.chars() {
        if is_cjk_ideograph(c) {
            current.push(c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs.into_iter()
        .filter(|w| w.chars().count() > 1 && !STOPWORDS.contains(&w.as_str()))
        .take(MAX_KEYWORDS)
        .collect()
}

fn suggestions_for(keywords: &[String]) -> Vec<String> {
    match keywords {
        [] => vec![
            "Can you add more specific keywords or background?".to_string(),
            "Which aspect of the topic are you interested in?".to_string(),
            "Could you rephrase the question another way?".to_string(),
        ],
        [first] => vec![
            format!("What is the definition or background of '{}'?", first),
            "Can you give a more concrete scenario or example?".to_string(),
        ],
        [first, second, ..] => vec![
            format!("What is the definition or background of '{}'?", first),
            format!("In which situations does '{}' apply?", second),
            "Can you give a more concrete scenario or example?".to_string(),
        ],
    }
}

pub fn fallback(query: &str, evidence: &EvidenceSet, reason: &GateReason) -> FallbackReply {
    let keywords = extract_keywords(query);
    let suggestions = suggestions_for(&keywords);

    let mut message = String::new();
    message.push_str("The knowledge base does not contain enough evidence to answer this question.\n\n");
    message.push_str(&format!("Reason: {}\n", reason));
    message.push_str("\nSuggested follow-up questions:\n");
    for (i, s) in suggestions.iter().enumerate() {
        message.push_str(&format!("{}. {}\n", i + 1, s));
    }

    let mut seen = HashSet::new();
    let related: Vec<_> = evidence
        .iter()
        .filter(|c| seen.insert(c.filename.as_str()))
        .take(MAX_RELATED_FILES)
        .collect();
    if !related.is_empty() {
        message.push_str("\nPossibly related documents (low confidence, for reference only):\n");
        for c in related {
            message.push_str(&format!(
                "- {} (score: {:.3})\n",
                c.filename, c.combined_score
            ));
        }
    }

    message.push_str(
        "\nTip: import more relevant documents, or ask again with different keywords.",
    );

    FallbackReply {
        message,
        keywords,
        suggestions,
        citations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;

    fn candidate(id: i64, filename: &str, score: f64) -> Candidate {
        Candidate {
            chunk_id: id,
            filename: filename.to_string(),
            text: String::new(),
            semantic_score: score,
            lexical_score: 0.0,
            raw_match_count: 0,
            combined_score: score,
        }
    }

    #[test]
    fn test_keywords_from_cjk_runs() {
        assert_eq!(
            extract_keywords("向量 检索 的 原理"),
            vec!["向量", "检索", "原理"]
        );
    }

    #[test]
    fn test_keywords_drop_stopwords_and_single_chars() {
        assert_eq!(extract_keywords("什么 是 猫"), Vec::<String>::new());
        assert_eq!(extract_keywords("如何 部署 服务 到 集群 上面"), vec!["部署", "服务", "集群"]);
    }

    #[test]
    fn test_keywords_ignore_latin() {
        assert!(extract_keywords("what is FAISS?").is_empty());
    }

    #[test]
    fn test_fallback_without_evidence() {
        let reply = fallback("what is this", &EvidenceSet::default(), &GateReason::NoEvidence);
        assert!(reply.citations.is_empty());
        assert!(reply.message.contains("no relevant documents found"));
        assert_eq!(reply.suggestions.len(), 3);
        assert!(!reply.message.contains("Possibly related"));
    }

    #[test]
    fn test_fallback_lists_distinct_related_files() {
        let ev = EvidenceSet::from_ranked(vec![
            candidate(1, "a.txt", 0.25),
            candidate(2, "a.txt", 0.2),
            candidate(3, "b.txt", 0.15),
            candidate(4, "c.txt", 0.1),
            candidate(5, "d.txt", 0.05),
        ]);
        let reason = GateReason::LowTopScore {
            top: 0.25,
            threshold: 0.3,
        };
        let reply = fallback("向量检索", &ev, &reason);
        assert!(reply.message.contains("- a.txt (score: 0.250)"));
        assert!(reply.message.contains("- b.txt (score: 0.150)"));
        assert!(reply.message.contains("- c.txt (score: 0.100)"));
        assert!(!reply.message.contains("d.txt"));
        assert_eq!(reply.message.matches("a.txt").count(), 1);
        assert!(reply.message.contains("0.250 is below"));
        assert!(reply.message.contains("'向量检索'"));
    }

    #[test]
    fn test_fallback_message_layout() {
        let reply = fallback("what is this", &EvidenceSet::default(), &GateReason::NoEvidence);
        let lines: Vec<&str> = reply.message.lines().collect();
        assert!(lines.iter().any(|l| l.starts_with("Reason: ")));
        for n in 1..=3 {
            let prefix = format!("{}. ", n);
            assert_eq!(lines.iter().filter(|l| l.starts_with(&prefix)).count(), 1);
        }
        assert!(reply.message.ends_with("with different keywords."));
    }
}

//! Grounded prompt construction.
//!
//! Evidence items are numbered from 1 in rank order so the model's
//! `[n]` markers line up with [`citation`](crate::citation) positions.

use crate::generation::ChatMessage;
use crate::models::EvidenceSet;

pub const SYSTEM_PROMPT: &str = "You are a knowledge-base assistant. Answer only from the provided context \
and list the documents you cited at the end of your answer.";

const SEPARATOR_WIDTH: usize = 60;

pub fn build_user_prompt(query: &str, evidence: &EvidenceSet) -> String {
    let mut context = String::new();
    for (i, c) in evidence.iter().enumerate() {
        context.push_str(&format!("\n[Document {}] source: {}\n", i + 1, c.filename));
        context.push_str(&format!("{}\n", c.text));
        context.push_str(&format!("{}\n", "-".repeat(SEPARATOR_WIDTH)));
    }

    format!(
        "Answer the question using the document excerpts below. Always list the cited document numbers at the end.\n\
         \n\
         Documents:\n\
         {context}\n\
         Question: {query}\n\
         \n\
         Rules:\n\
         1. Answer only from the documents above.\n\
         2. If the documents do not contain the information, say so explicitly.\n\
         3. Cite documents inline as [n] and end with a line: References: [1], [2]...\n"
    )
}

pub fn build_messages(query: &str, evidence: &EvidenceSet) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(query, evidence)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Role;
    use crate::models::Candidate;

    #[test]
    fn test_numbers_evidence_in_rank_order() {
        let ev = EvidenceSet::from_ranked(vec![
            Candidate {
                chunk_id: 9,
                filename: "first.md".into(),
                text: "alpha".into(),
                semantic_score: 0.9,
                lexical_score: 0.0,
                raw_match_count: 0,
                combined_score: 0.54,
            },
            Candidate {
                chunk_id: 3,
                filename: "second.md".into(),
                text: "beta".into(),
                semantic_score: 0.1,
                lexical_score: 0.0,
                raw_match_count: 0,
                combined_score: 0.06,
            },
        ]);
        let messages = build_messages("what?", &ev);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        let user = &messages[1].content;
        let first = user.find("[Document 1] source: first.md").unwrap();
        let second = user.find("[Document 2] source: second.md").unwrap();
        assert!(first < second);
        assert!(user.contains("Question: what?"));
        assert!(user.contains(&"-".repeat(60)));
    }
}

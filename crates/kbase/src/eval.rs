//! Retrieval and citation evaluation (`kb eval`).
//!
//! Input is JSON Lines, one case per line:
//!
//! ```json
//! {"query": "What is vector retrieval?", "expected_docs": ["vector", "faiss.md"]}
//! ```
//!
//! Every case runs through the full ask pipeline. Per case we record:
//!
//! - **hit rate**: fraction of `expected_docs` found, case-insensitively, as a
//!   substring of at least one retrieved filename
//! - **has citations**: whether a generated answer contains any reference
//!   marker (fallback replies never cite)
//! - **latency**: wall-clock seconds for the whole pipeline
//!
//! Upstream failures on a single case are recorded and the run continues.
//! Configuration errors abort the run.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use kbase_core::answer::{Outcome, Reply};
use kbase_core::citation::parse_references;

use crate::ask::AskSession;
use crate::config::Settings;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvalCase {
    pub query: String,
    #[serde(default)]
    pub expected_docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub hit_rate: f64,
    pub hits: Vec<String>,
    pub expected: Vec<String>,
    pub retrieved_count: usize,
    pub confident: bool,
    pub has_citations: bool,
    pub latency: f64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub avg_hit_rate: f64,
    pub citation_rate: f64,
    pub avg_latency: f64,
    pub total_queries: usize,
    pub results: Vec<QueryResult>,
}

/// Parse a JSONL evaluation set. Blank lines are skipped.
pub fn parse_cases(text: &str) -> Result<Vec<EvalCase>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid eval case on line {}", i + 1))
        })
        .collect()
}

/// Expected names found in `filenames`, in the order they were expected.
pub fn matched_expected(expected: &[String], filenames: &[&str]) -> Vec<String> {
    let lowered: Vec<String> = filenames.iter().map(|f| f.to_lowercase()).collect();
    expected
        .iter()
        .filter(|e| {
            let needle = e.to_lowercase();
            lowered.iter().any(|f| f.contains(&needle))
        })
        .cloned()
        .collect()
}

fn has_citations(reply: &Reply) -> bool {
    match reply {
        Reply::Generated(g) => !parse_references(&g.raw).is_empty(),
        Reply::Fallback(_) => false,
    }
}

pub fn score_outcome(case: &EvalCase, outcome: &Outcome, latency: f64) -> QueryResult {
    let filenames: Vec<&str> = outcome
        .retrieved
        .evidence
        .iter()
        .map(|c| c.filename.as_str())
        .collect();
    let hits = matched_expected(&case.expected_docs, &filenames);
    let hit_rate = if case.expected_docs.is_empty() {
        0.0
    } else {
        hits.len() as f64 / case.expected_docs.len() as f64
    };

    QueryResult {
        query: case.query.clone(),
        hit_rate,
        hits,
        expected: case.expected_docs.clone(),
        retrieved_count: filenames.len(),
        confident: outcome.retrieved.is_confident(),
        has_citations: has_citations(&outcome.reply),
        latency,
        timestamp: chrono::Utc::now().to_rfc3339(),
        error: None,
    }
}

fn failed_result(case: &EvalCase, latency: f64, error: String) -> QueryResult {
    QueryResult {
        query: case.query.clone(),
        hit_rate: 0.0,
        hits: Vec::new(),
        expected: case.expected_docs.clone(),
        retrieved_count: 0,
        confident: false,
        has_citations: false,
        latency,
        timestamp: chrono::Utc::now().to_rfc3339(),
        error: Some(error),
    }
}

pub fn aggregate(results: Vec<QueryResult>) -> EvalReport {
    let n = results.len();
    if n == 0 {
        return EvalReport {
            avg_hit_rate: 0.0,
            citation_rate: 0.0,
            avg_latency: 0.0,
            total_queries: 0,
            results,
        };
    }
    let total = n as f64;
    EvalReport {
        avg_hit_rate: results.iter().map(|r| r.hit_rate).sum::<f64>() / total,
        citation_rate: results.iter().filter(|r| r.has_citations).count() as f64 / total,
        avg_latency: results.iter().map(|r| r.latency).sum::<f64>() / total,
        total_queries: n,
        results,
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    query: &'a str,
    hit_rate: f64,
    hits: String,
    expected: String,
    retrieved_count: usize,
    confident: bool,
    has_citations: bool,
    latency: f64,
    timestamp: &'a str,
    error: &'a str,
}

pub fn write_csv(path: &Path, results: &[QueryResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for r in results {
        writer.serialize(CsvRow {
            query: &r.query,
            hit_rate: r.hit_rate,
            hits: r.hits.join(", "),
            expected: r.expected.join(", "),
            retrieved_count: r.retrieved_count,
            confident: r.confident,
            has_citations: r.has_citations,
            latency: r.latency,
            timestamp: &r.timestamp,
            error: r.error.as_deref().unwrap_or(""),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub async fn run_eval(
    settings: &Settings,
    cases_path: &Path,
    report_path: Option<&Path>,
    csv_path: Option<&Path>,
) -> Result<()> {
    let text = std::fs::read_to_string(cases_path)
        .with_context(|| format!("Failed to read {}", cases_path.display()))?;
    let cases = parse_cases(&text)?;
    let k = settings.config.retrieval.top_k;

    let mut session = AskSession::open(settings).await?;
    let mut results = Vec::with_capacity(cases.len());

    for case in &cases {
        let started = Instant::now();
        let outcome = session.ask(&case.query, k).await;
        let latency = started.elapsed().as_secs_f64();

        match outcome {
            Ok(outcome) => results.push(score_outcome(case, &outcome, latency)),
            Err(e) if e.is_configuration() => {
                session.close().await;
                return Err(e.into());
            }
            Err(e) => {
                warn!(query = %case.query, error = %e, "evaluation query failed");
                results.push(failed_result(case, latency, e.to_string()));
            }
        }
    }
    session.close().await;

    let report = aggregate(results);

    println!("eval");
    println!("  queries: {}", report.total_queries);
    println!("  avg hit rate: {:.1}%", report.avg_hit_rate * 100.0);
    println!("  citation rate: {:.1}%", report.citation_rate * 100.0);
    println!("  avg latency: {:.2}s", report.avg_latency);

    if let Some(path) = report_path {
        ensure_parent(path)?;
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  report: {}", path.display());
    }
    if let Some(path) = csv_path {
        ensure_parent(path)?;
        write_csv(path, &report.results)?;
        println!("  csv: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(hit_rate: f64, has_citations: bool, latency: f64) -> QueryResult {
        QueryResult {
            query: "q".into(),
            hit_rate,
            hits: Vec::new(),
            expected: Vec::new(),
            retrieved_count: 0,
            confident: true,
            has_citations,
            latency,
            timestamp: String::new(),
            error: None,
        }
    }

    #[test]
    fn test_parse_cases_skips_blank_lines() {
        let text = "{\"query\": \"a\", \"expected_docs\": [\"x.md\"]}\n\n{\"query\": \"b\"}\n";
        let cases = parse_cases(text).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].expected_docs, vec!["x.md".to_string()]);
        assert!(cases[1].expected_docs.is_empty());
    }

    #[test]
    fn test_parse_cases_reports_line() {
        let err = parse_cases("{\"query\": \"a\"}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_matched_expected_is_case_insensitive_substring() {
        let expected = vec!["Vector".to_string(), "faiss".to_string(), "missing".to_string()];
        let hits = matched_expected(&expected, &["vector-guide.md", "FAISS_notes.txt"]);
        assert_eq!(hits, vec!["Vector".to_string(), "faiss".to_string()]);
    }

    #[test]
    fn test_aggregate_averages() {
        let report = aggregate(vec![result(1.0, true, 0.5), result(0.0, false, 1.5)]);
        assert_eq!(report.total_queries, 2);
        assert!((report.avg_hit_rate - 0.5).abs() < 1e-9);
        assert!((report.citation_rate - 0.5).abs() < 1e-9);
        assert!((report.avg_latency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty() {
        let report = aggregate(Vec::new());
        assert_eq!(report.total_queries, 0);
        assert_eq!(report.avg_hit_rate, 0.0);
    }

    #[test]
    fn test_csv_joins_lists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut r = result(0.5, false, 0.1);
        r.hits = vec!["a".into()];
        r.expected = vec!["a".into(), "b".into()];
        write_csv(&path, &[r]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("query,hit_rate,hits,expected"));
        assert!(lines.next().unwrap().contains("\"a, b\""));
    }
}

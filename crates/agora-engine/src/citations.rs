//! Turning retrieved evidence into a `Sources:` block on the final answer.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use agora_core::types::EvidenceItem;

/// Maximum number of citations appended to an answer.
pub const MAX_CITATIONS: usize = 5;

fn citation_section_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(citations|sources)\b\s*:").expect("citation section pattern")
    })
}

/// Deduplicate evidence by document id, keeping first occurrence order,
/// capped at [`MAX_CITATIONS`].
pub fn build_citations(evidence: &[EvidenceItem]) -> Vec<EvidenceItem> {
    let mut seen = HashSet::new();
    evidence
        .iter()
        .filter(|e| seen.insert(e.doc_id.clone()))
        .take(MAX_CITATIONS)
        .cloned()
        .collect()
}

/// Append a `Sources:` block unless the answer already carries a citations
/// or sources section of its own.
pub fn append_citations_if_missing(answer: &str, citations: &[EvidenceItem]) -> String {
    if citations.is_empty() || citation_section_pattern().is_match(answer) {
        return answer.to_string();
    }

    let lines: Vec<String> = citations
        .iter()
        .map(|c| format!("- [{}] {}: {}", c.doc_id, c.title, c.excerpt))
        .collect();
    format!("{answer}\n\nSources:\n{}", lines.join("\n"))
}

use agora_core::types::{EvidenceItem, FactCheckResult};

/// Label used when no dedicated fact-checker agent is enrolled.
pub const DEFAULT_FACT_CHECKER_ID: &str = "fact_checker";

/// Confidence lost per unsupported sentence.
const UNSUPPORTED_PENALTY: f64 = 0.1;

/// Lexical fact check: a deterministic overlap computation, not a model call.
///
/// Each sentence counts as supported when some evidence excerpt contains its
/// leading token. Confidence starts at 1.0 and drops per unsupported
/// sentence, floored at 0.
pub fn perform_fact_check(content: &str, evidence: &[EvidenceItem], agent_id: &str) -> FactCheckResult {
    let mut unsupported = Vec::new();

    for sentence in split_sentences(content) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let lead = sentence
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let supported = !lead.is_empty()
            && evidence
                .iter()
                .any(|e| e.excerpt.to_lowercase().contains(&lead));
        if !supported {
            unsupported.push(sentence.to_string());
        }
    }

    let confidence = (1.0 - unsupported.len() as f64 * UNSUPPORTED_PENALTY).max(0.0);

    FactCheckResult {
        agent_id: agent_id.to_string(),
        unsupported_claims: unsupported,
        confidence,
    }
}

fn split_sentences(content: &str) -> impl Iterator<Item = &str> {
    content.split_inclusive(['.', '!', '?']).map(|s| s.trim_end_matches(['.', '!', '?']))
}

//! Combining raw scores, critiques, fact checks, and cost into a final
//! ranking and answer.

use serde::Serialize;
use tracing::debug;

use agora_core::types::{Candidate, Critique, EvidenceItem, FactCheckResult, ScoreResult};

use crate::citations::{append_citations_if_missing, build_citations};

/// How a candidate's aggregate critique severity is computed.
///
/// Two strategies exist because critiques can be produced per candidate or
/// jointly over the whole candidate set; the aggregator takes either behind
/// this seam.
pub trait SeverityAttribution: Send + Sync {
    /// Aggregate severity for the candidate at `index` in the candidate set.
    fn severity(&self, candidate: &Candidate, index: usize, critiques: &[Critique]) -> f64;
}

/// Mean severity of the critiques whose target matches the candidate.
/// Suited to per-(critic, candidate) critique calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAverage;

impl SeverityAttribution for DirectAverage {
    fn severity(&self, candidate: &Candidate, _index: usize, critiques: &[Critique]) -> f64 {
        let targeted: Vec<&Critique> =
            critiques.iter().filter(|c| c.target_id == candidate.agent_id).collect();
        if targeted.is_empty() {
            return 0.0;
        }
        targeted.iter().map(|c| c.severity).sum::<f64>() / targeted.len() as f64
    }
}

/// Weighted mean over all critiques: full weight when the critique text
/// mentions the candidate's agent id or its positional label
/// (`candidate <n>`, 1-based), partial weight otherwise. Suited to joint
/// critique calls where target attribution is unreliable.
#[derive(Debug, Clone, Copy)]
pub struct MentionWeighted {
    pub partial_weight: f64,
}

impl Default for MentionWeighted {
    fn default() -> Self {
        Self { partial_weight: 0.3 }
    }
}

impl SeverityAttribution for MentionWeighted {
    fn severity(&self, candidate: &Candidate, index: usize, critiques: &[Critique]) -> f64 {
        if critiques.is_empty() {
            return 0.0;
        }
        let positional = format!("candidate {}", index + 1);
        let mut weighted = 0.0;
        let mut weights = 0.0;
        for critique in critiques {
            let text = critique.content.to_lowercase();
            let mentioned = text.contains(&candidate.agent_id.to_lowercase())
                || text.contains(&positional);
            let weight = if mentioned { 1.0 } else { self.partial_weight };
            weighted += critique.severity * weight;
            weights += weight;
        }
        if weights == 0.0 { 0.0 } else { weighted / weights }
    }
}

/// One candidate with its score decomposition.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub final_score: f64,
    pub raw_score: f64,
    pub avg_severity: f64,
    pub fact_confidence: f64,
}

/// The chosen answer plus its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub confidence: f64,
    pub justification: String,
}

/// final = raw − severity × severity_weight + fact_confidence × 2 − cost × 0.01
pub struct ScoreAggregator {
    pub severity_weight: f64,
    pub attribution: Box<dyn SeverityAttribution>,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self { severity_weight: 0.5, attribution: Box::new(DirectAverage) }
    }
}

impl ScoreAggregator {
    /// Score every candidate and rank descending by final score. Ties keep
    /// input order (stable sort).
    pub fn aggregate(
        &self,
        candidates: &[Candidate],
        critiques: &[Critique],
        fact_checks: &[FactCheckResult],
        scores: &[ScoreResult],
    ) -> Vec<RankedCandidate> {
        let fallback_fact_confidence = if fact_checks.is_empty() {
            0.0
        } else {
            fact_checks.iter().map(|f| f.confidence).sum::<f64>() / fact_checks.len() as f64
        };

        let mut ranked: Vec<RankedCandidate> = candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let raw_score = scores
                    .iter()
                    .find(|s| s.candidate_id == candidate.agent_id)
                    .map(|s| s.score)
                    .unwrap_or(0.0);
                let avg_severity = self.attribution.severity(candidate, index, critiques);
                let fact_confidence = fact_checks
                    .iter()
                    .find(|f| f.agent_id == candidate.agent_id)
                    .map(|f| f.confidence)
                    .unwrap_or(fallback_fact_confidence);

                let final_score = raw_score - avg_severity * self.severity_weight
                    + fact_confidence * 2.0
                    - candidate.cost * 0.01;

                RankedCandidate {
                    candidate: candidate.clone(),
                    final_score,
                    raw_score,
                    avg_severity,
                    fact_confidence,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        ranked
    }

    /// Pick the top-ranked candidate and assemble the final answer, appending
    /// a sources block built from the evidence when the answer lacks one.
    pub fn choose_final(&self, ranked: &[RankedCandidate], evidence: &[EvidenceItem]) -> FinalAnswer {
        let Some(top) = ranked.first() else {
            return FinalAnswer {
                answer: "Unable to answer".to_string(),
                confidence: 0.0,
                justification: "Selected candidate from n/a with adjusted score 0.00".to_string(),
            };
        };

        debug!(agent_id = %top.candidate.agent_id, final_score = top.final_score, "final answer chosen");

        let citations = build_citations(evidence);
        let answer = if top.candidate.content.is_empty() {
            "Unable to answer".to_string()
        } else {
            append_citations_if_missing(&top.candidate.content, &citations)
        };

        FinalAnswer {
            answer,
            confidence: (top.final_score / 10.0).clamp(0.0, 1.0),
            justification: format!(
                "Selected candidate from {} with adjusted score {:.2}",
                top.candidate.agent_id, top.final_score
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::types::CallUsage;

    fn candidate(id: &str, content: &str, cost: f64) -> Candidate {
        Candidate {
            agent_id: id.to_string(),
            content: content.to_string(),
            model: "m".to_string(),
            provider: "mock".to_string(),
            cost,
            usage: CallUsage::default(),
        }
    }

    fn critique(target: &str, content: &str, severity: f64) -> Critique {
        Critique {
            agent_id: "critic-1".to_string(),
            target_id: target.to_string(),
            content: content.to_string(),
            severity,
        }
    }

    fn score(id: &str, score: f64) -> ScoreResult {
        ScoreResult { candidate_id: id.to_string(), score }
    }

    fn fact(id: &str, confidence: f64) -> FactCheckResult {
        FactCheckResult {
            agent_id: id.to_string(),
            unsupported_claims: vec![],
            confidence,
        }
    }

    #[test]
    fn test_direct_average_targets_only() {
        let candidates = [candidate("a1", "x", 0.0)];
        let critiques = vec![
            critique("a1", "weak", 4.0),
            critique("a1", "unsound", 2.0),
            critique("a2", "fine", 5.0),
        ];
        let severity = DirectAverage.severity(&candidates[0], 0, &critiques);
        assert!((severity - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mention_weighted_mean() {
        let candidates = [candidate("a1", "x", 0.0)];
        let critiques = vec![
            critique("a2", "a1 misses the point", 4.0),
            critique("a2", "generally shallow", 1.0),
        ];
        let attribution = MentionWeighted { partial_weight: 0.3 };
        let severity = attribution.severity(&candidates[0], 0, &critiques);
        // (4.0*1.0 + 1.0*0.3) / 1.3
        assert!((severity - 4.3 / 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_mention_weighted_positional_label() {
        let candidates = [candidate("alpha", "x", 0.0)];
        let critiques = vec![critique("c", "Candidate 1 is vague", 5.0)];
        let attribution = MentionWeighted::default();
        let severity = attribution.severity(&candidates[0], 0, &critiques);
        assert!((severity - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_formula() {
        let aggregator = ScoreAggregator::default();
        let candidates = vec![candidate("a1", "answer", 10.0)];
        let ranked = aggregator.aggregate(
            &candidates,
            &[critique("a1", "weak", 2.0)],
            &[fact("a1", 0.8)],
            &[score("a1", 7.0)],
        );
        // 7 − 2×0.5 + 0.8×2 − 10×0.01 = 7.5
        assert!((ranked[0].final_score - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_fact_confidence_fallback_is_mean() {
        let aggregator = ScoreAggregator::default();
        let candidates = vec![candidate("a1", "answer", 0.0)];
        let ranked = aggregator.aggregate(
            &candidates,
            &[],
            &[fact("other-1", 0.4), fact("other-2", 0.8)],
            &[score("a1", 5.0)],
        );
        assert!((ranked[0].fact_confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_ranking_descending_with_stable_ties() {
        let aggregator = ScoreAggregator::default();
        let candidates = vec![
            candidate("low", "a", 0.0),
            candidate("tie-first", "b", 0.0),
            candidate("tie-second", "c", 0.0),
        ];
        let scores = vec![score("low", 1.0), score("tie-first", 6.0), score("tie-second", 6.0)];
        let ranked = aggregator.aggregate(&candidates, &[], &[], &scores);
        assert_eq!(ranked[0].candidate.agent_id, "tie-first");
        assert_eq!(ranked[1].candidate.agent_id, "tie-second");
        assert_eq!(ranked[2].candidate.agent_id, "low");
    }

    #[test]
    fn test_monotonicity_in_severity_and_cost() {
        let aggregator = ScoreAggregator::default();
        let base = aggregator.aggregate(
            &[candidate("a1", "x", 0.0)],
            &[critique("a1", "c", 1.0)],
            &[],
            &[score("a1", 5.0)],
        )[0]
            .final_score;
        let more_severe = aggregator.aggregate(
            &[candidate("a1", "x", 0.0)],
            &[critique("a1", "c", 3.0)],
            &[],
            &[score("a1", 5.0)],
        )[0]
            .final_score;
        let more_costly = aggregator.aggregate(
            &[candidate("a1", "x", 50.0)],
            &[critique("a1", "c", 1.0)],
            &[],
            &[score("a1", 5.0)],
        )[0]
            .final_score;
        assert!(more_severe < base);
        assert!(more_costly < base);
    }

    #[test]
    fn test_choose_final_appends_sources() {
        let aggregator = ScoreAggregator::default();
        let ranked = aggregator.aggregate(
            &[candidate("a1", "The answer.", 0.0)],
            &[],
            &[],
            &[score("a1", 8.0)],
        );
        let evidence = vec![EvidenceItem {
            doc_id: "d1".to_string(),
            title: "doc".to_string(),
            excerpt: "text".to_string(),
        }];
        let chosen = aggregator.choose_final(&ranked, &evidence);
        assert!(chosen.answer.starts_with("The answer."));
        assert!(chosen.answer.contains("Sources:"));
        assert!((chosen.confidence - 0.8).abs() < 1e-9);
        assert!(chosen.justification.contains("a1"));
    }

    #[test]
    fn test_choose_final_empty() {
        let chosen = ScoreAggregator::default().choose_final(&[], &[]);
        assert_eq!(chosen.answer, "Unable to answer");
        assert_eq!(chosen.confidence, 0.0);
    }

    #[test]
    fn test_confidence_clamped() {
        let aggregator = ScoreAggregator::default();
        let ranked = aggregator.aggregate(
            &[candidate("a1", "x", 0.0)],
            &[],
            &[fact("a1", 1.0)],
            &[score("a1", 10.0)],
        );
        // 10 + 2 = 12 → confidence clamps to 1.0
        let chosen = aggregator.choose_final(&ranked, &[]);
        assert!((chosen.confidence - 1.0).abs() < 1e-9);
    }
}

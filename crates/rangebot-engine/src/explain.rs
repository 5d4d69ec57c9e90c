//! Per-cycle explain record builder.

use rangebot_core::{
    Candidate, CandidateSummary, DecisionExplain, Gates, SignalSummary, Sizing,
};

/// Candidates kept in the explain record.
pub const TOP_CANDIDATES: usize = 5;

pub const REASON_TRADING_DISABLED: &str = "ENABLE_TRADING=0";
pub const REASON_RISK_BLOCKED: &str = "risk.canEnter=false";
pub const REASON_NO_CANDIDATES: &str = "noCandidates";

/// Accumulates one cycle's reasons, candidates and last signal.
#[derive(Debug, Default)]
pub struct ExplainBuilder {
    reasons: Vec<String>,
    candidates: Vec<Candidate>,
    last_signal: Option<SignalSummary>,
    sizing: Option<Sizing>,
}

impl ExplainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a blocking reason; repeats are ignored, first-seen order kept.
    pub fn block(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub fn candidate(&mut self, candidate: Candidate) {
        self.last_signal = Some(SignalSummary {
            symbol: candidate.symbol.clone(),
            side: candidate.side,
            why: if candidate.rationale.is_empty() {
                "candidateMatched".to_string()
            } else {
                candidate.rationale.clone()
            },
        });
        self.candidates.push(candidate);
    }

    pub fn sizing(&mut self, sizing: Option<Sizing>) {
        if sizing.is_some() {
            self.sizing = sizing;
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn has_signal(&self) -> bool {
        self.last_signal.is_some()
    }

    /// Finish the cycle. Adds the no-candidates reason when nothing qualified.
    pub fn build(mut self, mode: &str, gates: Gates, at: i64) -> (DecisionExplain, Vec<Candidate>) {
        if self.candidates.is_empty() {
            self.block(REASON_NO_CANDIDATES);
        }
        let explain = DecisionExplain {
            can_trade: self.reasons.is_empty(),
            reasons_blocked: self.reasons,
            candidates_top: self
                .candidates
                .iter()
                .take(TOP_CANDIDATES)
                .map(CandidateSummary::from)
                .collect(),
            last_signal: self.last_signal,
            sizing: self.sizing,
            last_decision_time: Some(at),
            mode: mode.to_string(),
            gates,
        };
        (explain, self.candidates)
    }
}

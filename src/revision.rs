//! Belief revision: merging truth values and flagging contradictions.
//!
//! When two beliefs about the same atom meet, their truth values merge by
//! confidence-weighted averaging. Evidence accumulates: the merged confidence
//! is higher than the mean of its inputs but never reaches certainty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atom::AtomId;
use crate::item::{ItemId, TruthValue};

/// Confidence ceiling after any number of revisions.
pub const CONFIDENCE_CAP: f32 = 0.99;

/// Frequency gap above which two confident beliefs count as contradictory.
pub const CONFLICT_FREQUENCY_GAP: f32 = 0.5;

/// Confidence both sides must exceed for a contradiction to register.
pub const CONFLICT_CONFIDENCE_FLOOR: f32 = 0.7;

/// Merges two truth values about the same atom.
///
/// Frequency is the confidence-weighted average; confidence is the mean of
/// the inputs plus an evidence bonus, capped at [`CONFIDENCE_CAP`]. The
/// operation is commutative.
#[must_use]
pub fn merge_truth(a: TruthValue, b: TruthValue) -> TruthValue {
    let weight_sum = a.confidence + b.confidence;
    let frequency = if weight_sum > 0.0 {
        (a.confidence * a.frequency + b.confidence * b.frequency) / weight_sum
    } else {
        (a.frequency + b.frequency) / 2.0
    };
    let confidence = (weight_sum / 2.0 + 0.1).min(CONFIDENCE_CAP);
    TruthValue {
        frequency: frequency.clamp(0.0, 1.0),
        confidence,
    }
}

/// Returns true when two truth values disagree strongly enough that both
/// sides being confident counts as a contradiction rather than noise.
#[must_use]
pub fn is_conflict(a: TruthValue, b: TruthValue) -> bool {
    (a.frequency - b.frequency).abs() > CONFLICT_FREQUENCY_GAP
        && a.confidence > CONFLICT_CONFIDENCE_FLOOR
        && b.confidence > CONFLICT_CONFIDENCE_FLOOR
}

/// Record of a detected contradiction between two beliefs.
///
/// The engine never resolves conflicts itself; it logs them and merges
/// anyway, leaving resolution to outer reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictWarning {
    /// The belief already in the store.
    pub existing_item: ItemId,
    /// The incoming belief that triggered the revision.
    pub incoming_item: ItemId,
    /// The atom both beliefs refer to.
    pub atom_id: AtomId,
    /// Truth held before the merge.
    pub existing_truth: TruthValue,
    /// Truth of the incoming belief.
    pub incoming_truth: TruthValue,
    /// When the contradiction was detected.
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(f: f32, c: f32) -> TruthValue {
        TruthValue::new(f, c).unwrap()
    }

    #[test]
    fn merge_weights_by_confidence() {
        let strong = tv(1.0, 0.9);
        let weak = tv(0.0, 0.1);
        let merged = merge_truth(strong, weak);
        assert!(merged.frequency > 0.8, "frequency {}", merged.frequency);
    }

    #[test]
    fn merge_is_commutative() {
        let a = tv(0.3, 0.6);
        let b = tv(0.9, 0.4);
        assert_eq!(merge_truth(a, b), merge_truth(b, a));
    }

    #[test]
    fn merge_accumulates_evidence() {
        let a = tv(0.8, 0.5);
        let b = tv(0.8, 0.5);
        let merged = merge_truth(a, b);
        assert!(merged.confidence > 0.5);
    }

    #[test]
    fn repeated_merges_converge_below_cap() {
        let mut truth = tv(0.9, 0.5);
        for _ in 0..100 {
            truth = merge_truth(truth, tv(0.9, 0.5));
        }
        assert!(truth.confidence <= CONFIDENCE_CAP);
        assert!((truth.frequency - 0.9).abs() < 1e-4);
    }

    #[test]
    fn zero_confidence_pair_averages_frequency() {
        let merged = merge_truth(tv(0.2, 0.0), tv(0.8, 0.0));
        assert!((merged.frequency - 0.5).abs() < 1e-6);
    }

    #[test]
    fn conflict_requires_gap_and_confidence() {
        assert!(is_conflict(tv(0.95, 0.8), tv(0.1, 0.9)));
        // Large gap but one side unsure.
        assert!(!is_conflict(tv(0.95, 0.8), tv(0.1, 0.5)));
        // Confident but close.
        assert!(!is_conflict(tv(0.7, 0.9), tv(0.5, 0.9)));
    }
}

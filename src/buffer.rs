//! Deferred-phase buffer: per-shard, per-partner records of a pending
//! two-qubit phase or invert gate that has been promised to the caller
//! but not yet applied to any engine.

use std::collections::HashMap;

use crate::math::{approx_eq_c, C, C_ONE, C_ZERO};
use crate::shard::ShardId;

/// A pending controlled-phase or controlled-invert, conditioned on the
/// partner qubit's computational-basis value: `cmplx_same` applies when
/// the partner reads 0, `cmplx_diff` when it reads 1. `is_invert` marks
/// that the target is also flipped (Pauli-X) conditioned on the partner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseRecord {
    pub cmplx_diff: C,
    pub cmplx_same: C,
    pub is_invert: bool,
}

impl PhaseRecord {
    pub fn phase(diff: C, same: C) -> Self {
        Self { cmplx_diff: diff, cmplx_same: same, is_invert: false }
    }

    pub fn invert(diff: C, same: C) -> Self {
        Self { cmplx_diff: diff, cmplx_same: same, is_invert: true }
    }

    /// Whether this record is the identity and can be dropped outright.
    pub fn is_identity(&self) -> bool {
        !self.is_invert && approx_eq_c(self.cmplx_diff, C_ONE) && approx_eq_c(self.cmplx_same, C_ONE)
    }

    /// Composes `self` (already pending) with a newly issued record
    /// acting on the same partner/target pair. Matching like fields are
    /// multiplied; inversion toggles and swaps the role of the two
    /// fields, since an invert exchanges which branch of the partner's
    /// value lands on which target amplitude.
    pub fn compose(&self, other: &PhaseRecord) -> PhaseRecord {
        if self.is_invert == other.is_invert {
            PhaseRecord {
                cmplx_diff: self.cmplx_diff * other.cmplx_diff,
                cmplx_same: self.cmplx_same * other.cmplx_same,
                is_invert: self.is_invert,
            }
        } else {
            // One flips the branch the other doesn't; net effect still
            // inverts, with diff/same crossed from whichever operand is
            // the invert.
            let (inv, plain) = if self.is_invert { (self, other) } else { (other, self) };
            PhaseRecord {
                cmplx_diff: inv.cmplx_diff * plain.cmplx_same,
                cmplx_same: inv.cmplx_same * plain.cmplx_diff,
                is_invert: true,
            }
        }
    }
}

/// Which of the four relations a record is stored under on a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// `self` is the control for `partner` (the target).
    Controls,
    /// `self` is the anti-control for `partner`.
    AntiControls,
    /// `self` is the target, controlled by `partner`.
    TargetOf,
    /// `self` is the target, anti-controlled by `partner`.
    AntiTargetOf,
}

/// The four per-partner maps a shard carries: which shards it controls
/// or anti-controls, and which shards control or anti-control it.
#[derive(Debug, Clone, Default)]
pub struct ShardBuffers {
    pub controls: HashMap<ShardId, PhaseRecord>,
    pub anti_controls: HashMap<ShardId, PhaseRecord>,
    pub target_of: HashMap<ShardId, PhaseRecord>,
    pub anti_target_of: HashMap<ShardId, PhaseRecord>,
}

impl ShardBuffers {
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
            && self.anti_controls.is_empty()
            && self.target_of.is_empty()
            && self.anti_target_of.is_empty()
    }

    fn map_mut(&mut self, rel: Relation) -> &mut HashMap<ShardId, PhaseRecord> {
        match rel {
            Relation::Controls => &mut self.controls,
            Relation::AntiControls => &mut self.anti_controls,
            Relation::TargetOf => &mut self.target_of,
            Relation::AntiTargetOf => &mut self.anti_target_of,
        }
    }

    pub fn map(&self, rel: Relation) -> &HashMap<ShardId, PhaseRecord> {
        match rel {
            Relation::Controls => &self.controls,
            Relation::AntiControls => &self.anti_controls,
            Relation::TargetOf => &self.target_of,
            Relation::AntiTargetOf => &self.anti_target_of,
        }
    }

    /// Inserts or composes a record in place, dropping it entirely if
    /// the combined result is the identity.
    pub fn add(&mut self, rel: Relation, partner: ShardId, record: PhaseRecord) {
        let map = self.map_mut(rel);
        let combined = match map.get(&partner) {
            Some(existing) => existing.compose(&record),
            None => record,
        };
        if combined.is_identity() {
            map.remove(&partner);
        } else {
            map.insert(partner, combined);
        }
    }

    pub fn remove_partner(&mut self, partner: ShardId) {
        self.controls.remove(&partner);
        self.anti_controls.remove(&partner);
        self.target_of.remove(&partner);
        self.anti_target_of.remove(&partner);
    }

    pub fn take(&mut self, rel: Relation, partner: ShardId) -> Option<PhaseRecord> {
        self.map_mut(rel).remove(&partner)
    }

    /// Merges matching control and anti-control entries against the
    /// same partner into a single-qubit phase on the target, whenever
    /// the two records happen to agree on the branch that survives.
    pub fn combine_gates(&mut self) {
        let partners: Vec<ShardId> = self.controls.keys().copied().collect();
        for partner in partners {
            if let (Some(c), Some(a)) = (self.controls.get(&partner), self.anti_controls.get(&partner)) {
                if !c.is_invert && !a.is_invert && approx_eq_c(c.cmplx_diff, a.cmplx_same) {
                    self.controls.remove(&partner);
                    self.anti_controls.remove(&partner);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composing_a_phase_with_itself_multiplies_diffs() {
        let mut buf = ShardBuffers::default();
        let partner = ShardId::from_raw(1);
        buf.add(Relation::Controls, partner, PhaseRecord::phase(C_ZERO - C_ONE, C_ONE));
        buf.add(Relation::Controls, partner, PhaseRecord::phase(C_ZERO - C_ONE, C_ONE));
        // (-1) * (-1) == 1 on both fields, which is the identity and is
        // dropped entirely.
        assert!(buf.controls.get(&partner).is_none());
    }

    #[test]
    fn remove_partner_clears_all_four_maps() {
        let mut buf = ShardBuffers::default();
        let partner = ShardId::from_raw(7);
        buf.add(Relation::Controls, partner, PhaseRecord::phase(C_ZERO - C_ONE, C_ONE));
        buf.add(Relation::TargetOf, partner, PhaseRecord::invert(C_ONE, C_ONE));
        buf.remove_partner(partner);
        assert!(buf.is_empty());
    }
}

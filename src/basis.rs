//! Per-shard single-qubit basis bookkeeping: Z/X/Y transitions and the
//! "revert" operations that bring a shard back to a canonical form so
//! that gate application on it is well-defined.

use crate::buffer::{PhaseRecord, Relation};
use crate::engine::dense::gates;
use crate::math::{C, M1};
use crate::shard::{Basis, Shard, ShardId};

/// Restricts `revert_basis_2qb` to invert-carrying records, phase-only
/// records, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseExclusivity {
    OnlyInvert,
    OnlyPhase,
    InvertAndPhase,
}

/// Restricts `revert_basis_2qb` to the relations where `q` is a control,
/// where `q` is a target, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlExclusivity {
    OnlyControls,
    OnlyTargets,
    ControlsAndTargets,
}

/// Restricts `revert_basis_2qb` by polarity: plain control relations,
/// anti-control relations, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolarityExclusivity {
    OnlyCtrl,
    OnlyAnti,
    CtrlAndAnti,
}

/// 2x2 matrix that rotates a shard from `from` back to the Z basis.
pub fn basis_to_z_matrix(from: Basis) -> M1 {
    match from {
        Basis::Z => gates::id(),
        Basis::X => gates::h(),
        // Y -> Z: S, then H (Y = S . X . S+, rotating to Z undoes both).
        Basis::Y => matmul(gates::h(), gates::is()),
    }
}

fn matmul(a: M1, b: M1) -> M1 {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
    ]
}

pub fn apply_m1_to_amps(m: M1, amp0: C, amp1: C) -> (C, C) {
    (m[0] * amp0 + m[1] * amp1, m[2] * amp0 + m[3] * amp1)
}

/// Brings a shard back to the Z basis. If detached, rotates the cached
/// amplitudes directly and returns `None`. If attached, leaves the
/// amplitude cache alone (it is dirty anyway) and returns the matrix
/// the caller must forward to the engine at the shard's mapped index.
pub fn revert_basis_1qb(shard: &mut Shard) -> Option<M1> {
    if shard.basis == Basis::Z {
        return None;
    }
    let m = basis_to_z_matrix(shard.basis);
    if shard.is_detached() {
        let (a0, a1) = apply_m1_to_amps(m, shard.amp0, shard.amp1);
        shard.amp0 = a0;
        shard.amp1 = a1;
        shard.basis = Basis::Z;
        None
    } else {
        shard.basis = Basis::Z;
        Some(m)
    }
}

/// `H`: swaps Z<->X. A shard in Y must first be rotated to X.
pub fn apply_h(shard: &mut Shard) -> Option<M1> {
    if shard.basis == Basis::Y {
        revert_y_to_x(shard);
    }
    let new_basis = if shard.basis == Basis::Z { Basis::X } else { Basis::Z };
    let out = if shard.is_detached() {
        let (a0, a1) = apply_m1_to_amps(gates::h(), shard.amp0, shard.amp1);
        shard.amp0 = a0;
        shard.amp1 = a1;
        None
    } else {
        Some(gates::h())
    };
    shard.basis = new_basis;
    out
}

fn revert_y_to_x(shard: &mut Shard) -> Option<M1> {
    // S+ rotates Y back to X (S takes X -> Y).
    let m = gates::is();
    if shard.is_detached() {
        let (a0, a1) = apply_m1_to_amps(m, shard.amp0, shard.amp1);
        shard.amp0 = a0;
        shard.amp1 = a1;
        shard.basis = Basis::X;
        None
    } else {
        shard.basis = Basis::X;
        Some(m)
    }
}

/// `S`: Z stays Z but applies a relative phase of `i` to amp1; X -> Y;
/// Y -> X with an accompanying flip.
pub fn apply_s(shard: &mut Shard) -> Option<M1> {
    let (m, new_basis) = match shard.basis {
        Basis::Z => (gates::s(), Basis::Z),
        Basis::X => (gates::s(), Basis::Y),
        Basis::Y => (matmul(gates::x(), gates::s()), Basis::X),
    };
    let out = if shard.is_detached() {
        let (a0, a1) = apply_m1_to_amps(m, shard.amp0, shard.amp1);
        shard.amp0 = a0;
        shard.amp1 = a1;
        None
    } else {
        Some(m)
    };
    shard.basis = new_basis;
    out
}

/// `S` inverse.
pub fn apply_is(shard: &mut Shard) -> Option<M1> {
    let (m, new_basis) = match shard.basis {
        Basis::Z => (gates::is(), Basis::Z),
        Basis::Y => (gates::is(), Basis::X),
        Basis::X => (matmul(gates::is(), gates::x()), Basis::Y),
    };
    let out = if shard.is_detached() {
        let (a0, a1) = apply_m1_to_amps(m, shard.amp0, shard.amp1);
        shard.amp0 = a0;
        shard.amp1 = a1;
        None
    } else {
        Some(m)
    };
    shard.basis = new_basis;
    out
}

/// Pushes an `H` through one pending deferred-phase record, rewriting
/// it by the closed-form identity that conjugating a controlled-phase
/// by Hadamard on the target turns diagonal content into anti-diagonal
/// content (and vice versa).
pub fn commute_h_record(record: PhaseRecord) -> PhaseRecord {
    PhaseRecord {
        cmplx_diff: record.cmplx_same,
        cmplx_same: record.cmplx_diff,
        is_invert: !record.is_invert,
    }
}

/// One record selected by `revert_basis_2qb`, tagged with which of the
/// four relations it came from so the caller can apply it with the
/// correct control/anti-control polarity and role.
pub struct SelectedRecord {
    pub relation: Relation,
    pub partner: ShardId,
    pub record: PhaseRecord,
}

/// Selects (and removes) the records in `shard`'s buffers that match
/// the given exclusivity filters, skipping anything named in
/// `except_controls`/`except_targets`. When `dump_skipped` is set, the
/// skipped records are discarded outright instead of being left in
/// place (the caller has determined they are already accounted for
/// elsewhere).
#[allow(clippy::too_many_arguments)]
pub fn revert_basis_2qb(
    shard: &mut Shard,
    exclusivity: PhaseExclusivity,
    control_exclusivity: ControlExclusivity,
    anti_exclusivity: PolarityExclusivity,
    except_controls: &[ShardId],
    except_targets: &[ShardId],
    dump_skipped: bool,
    skip_optimize: bool,
) -> Vec<SelectedRecord> {
    if !skip_optimize {
        shard.buffers.combine_gates();
    }

    let mut relations = Vec::new();
    if control_exclusivity != ControlExclusivity::OnlyTargets {
        if anti_exclusivity != PolarityExclusivity::OnlyAnti {
            relations.push(Relation::Controls);
        }
        if anti_exclusivity != PolarityExclusivity::OnlyCtrl {
            relations.push(Relation::AntiControls);
        }
    }
    if control_exclusivity != ControlExclusivity::OnlyControls {
        if anti_exclusivity != PolarityExclusivity::OnlyAnti {
            relations.push(Relation::TargetOf);
        }
        if anti_exclusivity != PolarityExclusivity::OnlyCtrl {
            relations.push(Relation::AntiTargetOf);
        }
    }

    let mut out = Vec::new();
    for relation in relations {
        let except = match relation {
            Relation::Controls | Relation::AntiControls => except_targets,
            Relation::TargetOf | Relation::AntiTargetOf => except_controls,
        };
        let partners: Vec<ShardId> = shard.buffers.map(relation).keys().copied().collect();
        for partner in partners {
            if except.contains(&partner) {
                if dump_skipped {
                    shard.buffers.take(relation, partner);
                }
                continue;
            }
            let Some(record) = shard.buffers.take(relation, partner) else { continue };
            let keep = match exclusivity {
                PhaseExclusivity::OnlyInvert => record.is_invert,
                PhaseExclusivity::OnlyPhase => !record.is_invert,
                PhaseExclusivity::InvertAndPhase => true,
            };
            if keep {
                out.push(SelectedRecord { relation, partner, record });
            } else {
                shard.buffers.add(relation, partner, record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{approx_eq_r, C_ONE};

    #[test]
    fn h_then_h_is_a_no_op() {
        let mut shard = Shard::zero();
        shard.amp0 = C { re: 0.6, im: 0.0 };
        shard.amp1 = C { re: 0.8, im: 0.0 };
        let (a0, a1) = (shard.amp0, shard.amp1);
        apply_h(&mut shard);
        apply_h(&mut shard);
        assert!(approx_eq_r(shard.amp0.re, a0.re) && approx_eq_r(shard.amp0.im, a0.im));
        assert!(approx_eq_r(shard.amp1.re, a1.re) && approx_eq_r(shard.amp1.im, a1.im));
        assert_eq!(shard.basis, Basis::Z);
    }

    #[test]
    fn s_then_is_restores_basis_and_amplitudes() {
        let mut shard = Shard::zero();
        shard.amp1 = C_ONE;
        apply_s(&mut shard);
        apply_is(&mut shard);
        assert_eq!(shard.basis, Basis::Z);
        assert!((shard.amp1 - C_ONE).norm() < 1e-9);
    }
}

//! Public unitary operations. Each one either updates a detached shard
//! analytically, absorbs into the deferred-phase buffer, or flushes
//! buffers, fuses shards, and forwards to the engine.

use crate::basis::{self, ControlExclusivity, PhaseExclusivity, PolarityExclusivity};
use crate::buffer::{PhaseRecord, Relation};
use crate::engine::dense::gates;
use crate::math::{approx_eq_c, C, M1, M2, N, R};

use super::QUnit;

impl QUnit {
    pub fn x(&mut self, q: N) {
        self.dispatch_single_qubit(q, gates::x());
    }

    pub fn y(&mut self, q: N) {
        self.dispatch_single_qubit(q, gates::y());
    }

    pub fn z(&mut self, q: N) {
        self.dispatch_single_qubit(q, gates::z());
    }

    pub fn t(&mut self, q: N) {
        self.dispatch_single_qubit(q, gates::t());
    }

    pub fn mtrx(&mut self, m: &M1, q: N) {
        self.dispatch_single_qubit(q, *m);
    }

    /// `H`: reverts a Y-basis shard to X first, rewrites pending
    /// deferred-phase records through the closed-form Hadamard
    /// conjugation identity, then toggles the Z/X basis label.
    pub fn h(&mut self, q: N) {
        let shard = self.shards.get_mut(q);
        commute_h_buffers(&mut shard.buffers);
        if let Some(rot) = basis::apply_h(shard) {
            let (engine, mapped) = self.engine_at(q).expect("apply_h returned Some only when attached");
            engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
            self.shards.get_mut(q).mark_dirty();
        }
    }

    pub fn s(&mut self, q: N) {
        let shard = self.shards.get_mut(q);
        if let Some(rot) = basis::apply_s(shard) {
            let (engine, mapped) = self.engine_at(q).expect("apply_s returned Some only when attached");
            engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
            self.shards.get_mut(q).mark_dirty();
        }
    }

    pub fn is(&mut self, q: N) {
        let shard = self.shards.get_mut(q);
        if let Some(rot) = basis::apply_is(shard) {
            let (engine, mapped) = self.engine_at(q).expect("apply_is returned Some only when attached");
            engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
            self.shards.get_mut(q).mark_dirty();
        }
    }

    /// `phase(topLeft, bottomRight, q)`. A global-phase-equivalent
    /// (`topLeft == bottomRight`) is a literal no-op for every
    /// observable this crate tracks.
    pub fn phase(&mut self, top_left: C, bottom_right: C, q: N) {
        if approx_eq_c(top_left, bottom_right) {
            return;
        }
        self.dispatch_single_qubit(q, [top_left, crate::math::C_ZERO, crate::math::C_ZERO, bottom_right]);
    }

    pub fn invert(&mut self, top_right: C, bottom_left: C, q: N) {
        self.dispatch_single_qubit(q, [crate::math::C_ZERO, top_right, bottom_left, crate::math::C_ZERO]);
    }

    fn dispatch_single_qubit(&mut self, q: N, m: M1) {
        let shard = self.shards.get_mut(q);
        if let Some(rot) = basis::revert_basis_1qb(shard) {
            let (engine, mapped) = self.engine_at(q).expect("revert_basis_1qb returned Some only when attached");
            engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
        }
        let shard = self.shards.get(q);
        if shard.is_detached() {
            let (a0, a1) = basis::apply_m1_to_amps(m, shard.amp0, shard.amp1);
            let shard = self.shards.get_mut(q);
            shard.amp0 = a0;
            shard.amp1 = a1;
        } else {
            let (engine, mapped) = self.engine_at(q).expect("checked attached above");
            engine.borrow_mut().apply_mtrx(&m, mapped, 0, 0);
            self.shards.get_mut(q).mark_dirty();
        }
    }

    // -- controlled phase / invert: buffer absorption for a single
    // control, full materialization otherwise ------------------------

    pub fn mc_phase(&mut self, controls: &[N], diff: C, same: C, target: N) {
        self.controlled_phase_or_invert(controls, &[], diff, same, target, false);
    }

    pub fn mac_phase(&mut self, anti_controls: &[N], diff: C, same: C, target: N) {
        self.controlled_phase_or_invert(&[], anti_controls, diff, same, target, false);
    }

    pub fn mc_invert(&mut self, controls: &[N], top_right: C, bottom_left: C, target: N) {
        self.controlled_phase_or_invert(controls, &[], top_right, bottom_left, target, true);
    }

    pub fn mac_invert(&mut self, anti_controls: &[N], top_right: C, bottom_left: C, target: N) {
        self.controlled_phase_or_invert(&[], anti_controls, top_right, bottom_left, target, true);
    }

    fn controlled_phase_or_invert(
        &mut self,
        controls: &[N],
        anti_controls: &[N],
        diff: C,
        same: C,
        target: N,
        is_invert: bool,
    ) {
        if controls.len() + anti_controls.len() == 1 {
            let (control, anti) = if controls.len() == 1 { (controls[0], false) } else { (anti_controls[0], true) };
            let same_engine = !self.shards.get(control).is_detached()
                && !self.shards.get(target).is_detached()
                && self.shards.get(control).unit.same_engine(&self.shards.get(target).unit);
            if !same_engine {
                self.add_buffered_record(control, target, anti, PhaseRecord { cmplx_diff: diff, cmplx_same: same, is_invert });
                return;
            }
        }
        self.materialize_controlled(controls, anti_controls, target, diff, same, is_invert);
    }

    fn add_buffered_record(&mut self, control: N, target: N, anti: bool, record: PhaseRecord) {
        let control_id = self.shards.get(control).id;
        let target_id = self.shards.get(target).id;
        let (ctrl_rel, target_rel) = if anti {
            (Relation::AntiControls, Relation::AntiTargetOf)
        } else {
            (Relation::Controls, Relation::TargetOf)
        };
        self.shards.get_mut(control).buffers.add(ctrl_rel, target_id, record);
        self.shards.get_mut(target).buffers.add(target_rel, control_id, record);
    }

    fn materialize_controlled(
        &mut self,
        controls: &[N],
        anti_controls: &[N],
        target: N,
        diff: C,
        same: C,
        is_invert: bool,
    ) {
        let mut bits: Vec<N> = controls.iter().chain(anti_controls.iter()).copied().collect();
        bits.push(target);
        for &b in &bits {
            let shard = self.shards.get_mut(b);
            if let Some(rot) = basis::revert_basis_1qb(shard) {
                if let Some((engine, mapped)) = self.engine_at(b) {
                    engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
                }
            }
        }
        let (engine, mapped) =
            crate::entangler::entangle_in_current_basis(&mut self.shards, &bits).expect("entangle cannot fail here");
        let target_mapped = self.shards.get(target).mapped;
        let mut ctrl_mask = 0usize;
        let mut anti_mask = 0usize;
        for (i, &b) in bits.iter().enumerate() {
            if b == target {
                continue;
            }
            if controls.contains(&b) {
                ctrl_mask |= 1 << mapped[i];
            } else {
                anti_mask |= 1 << mapped[i];
            }
        }
        if is_invert {
            engine.borrow_mut().apply_invert(diff, same, target_mapped, ctrl_mask, anti_mask);
        } else {
            engine.borrow_mut().apply_phase(same, diff, target_mapped, ctrl_mask, anti_mask);
        }
        for &b in &bits {
            self.shards.get_mut(b).mark_dirty();
        }
        self.reactive_separate(&bits);
    }

    pub fn mc_mtrx(&mut self, controls: &[N], m: &M1, target: N) {
        self.materialize_controlled_mtrx(controls, &[], m, target);
    }

    pub fn mac_mtrx(&mut self, anti_controls: &[N], m: &M1, target: N) {
        self.materialize_controlled_mtrx(&[], anti_controls, m, target);
    }

    fn materialize_controlled_mtrx(&mut self, controls: &[N], anti_controls: &[N], m: &M1, target: N) {
        let mut bits: Vec<N> = controls.iter().chain(anti_controls.iter()).copied().collect();
        bits.push(target);
        for &b in &bits {
            let shard = self.shards.get_mut(b);
            if let Some(rot) = basis::revert_basis_1qb(shard) {
                if let Some((engine, mapped)) = self.engine_at(b) {
                    engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
                }
            }
        }
        let (engine, mapped) =
            crate::entangler::entangle_in_current_basis(&mut self.shards, &bits).expect("entangle cannot fail here");
        let target_mapped = self.shards.get(target).mapped;
        let mut ctrl_mask = 0usize;
        let mut anti_mask = 0usize;
        for (i, &b) in bits.iter().enumerate() {
            if b == target {
                continue;
            }
            if controls.contains(&b) {
                ctrl_mask |= 1 << mapped[i];
            } else {
                anti_mask |= 1 << mapped[i];
            }
        }
        engine.borrow_mut().apply_mtrx(m, target_mapped, ctrl_mask, anti_mask);
        for &b in &bits {
            self.shards.get_mut(b).mark_dirty();
        }
        self.reactive_separate(&bits);
    }

    pub fn uniformly_controlled_single_bit(&mut self, controls: &[N], target: N, mtrxs: &[M1]) {
        let mut bits: Vec<N> = controls.to_vec();
        bits.push(target);
        let (engine, mapped) =
            crate::entangler::entangle_in_current_basis(&mut self.shards, &bits).expect("entangle cannot fail here");
        let target_mapped = self.shards.get(target).mapped;
        let control_mapped: Vec<N> = mapped[..mapped.len() - 1].to_vec();
        engine.borrow_mut().apply_uniformly_controlled(&control_mapped, target_mapped, mtrxs);
        for &b in &bits {
            self.shards.get_mut(b).mark_dirty();
        }
        self.reactive_separate(&bits);
    }

    // -- structural / swap-like ------------------------------------------

    /// Exchanges logical positions. Since physical amplitude storage is
    /// tracked independently of logical position (each shard carries
    /// its own engine handle and local index), this never touches an
    /// engine.
    pub fn swap(&mut self, a: N, b: N) {
        self.shards.swap_positions(a, b);
    }

    pub fn iswap(&mut self, a: N, b: N) {
        self.dispatch_two_qubit(a, b, gates::i_swap());
    }

    pub fn sqrt_swap(&mut self, a: N, b: N) {
        self.dispatch_two_qubit(a, b, gates::sqrt_swap());
    }

    pub fn i_sqrt_swap(&mut self, a: N, b: N) {
        self.dispatch_two_qubit(a, b, gates::sqrt_i_swap());
    }

    pub fn f_sim(&mut self, theta: R, phi: R, a: N, b: N) {
        self.dispatch_two_qubit(a, b, gates::f_sim(theta, phi));
    }

    fn dispatch_two_qubit(&mut self, a: N, b: N, m: M2) {
        for &q in &[a, b] {
            let selected = basis::revert_basis_2qb(
                self.shards.get_mut(q),
                PhaseExclusivity::OnlyInvert,
                ControlExclusivity::ControlsAndTargets,
                PolarityExclusivity::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
            self.materialize_selected(q, selected);
        }
        let (engine, mapped) =
            crate::entangler::entangle_in_current_basis(&mut self.shards, &[a, b]).expect("entangle cannot fail here");
        engine.borrow_mut().apply_mtrx2(&m, mapped[0], mapped[1], 0, 0);
        self.shards.get_mut(a).mark_dirty();
        self.shards.get_mut(b).mark_dirty();
        self.reactive_separate(&[a, b]);
    }

    pub fn c_swap(&mut self, control: N, a: N, b: N) {
        self.dispatch_controlled_two_qubit(&[control], &[], a, b, gates::swap());
    }

    pub fn anti_c_swap(&mut self, control: N, a: N, b: N) {
        self.dispatch_controlled_two_qubit(&[], &[control], a, b, gates::swap());
    }

    pub fn c_sqrt_swap(&mut self, control: N, a: N, b: N) {
        self.dispatch_controlled_two_qubit(&[control], &[], a, b, gates::sqrt_swap());
    }

    pub fn anti_c_sqrt_swap(&mut self, control: N, a: N, b: N) {
        self.dispatch_controlled_two_qubit(&[], &[control], a, b, gates::sqrt_swap());
    }

    pub fn c_i_sqrt_swap(&mut self, control: N, a: N, b: N) {
        self.dispatch_controlled_two_qubit(&[control], &[], a, b, gates::sqrt_i_swap());
    }

    pub fn anti_c_i_sqrt_swap(&mut self, control: N, a: N, b: N) {
        self.dispatch_controlled_two_qubit(&[], &[control], a, b, gates::sqrt_i_swap());
    }

    fn dispatch_controlled_two_qubit(&mut self, controls: &[N], anti_controls: &[N], a: N, b: N, m: M2) {
        let mut bits: Vec<N> = controls.iter().chain(anti_controls.iter()).copied().collect();
        bits.push(a);
        bits.push(b);
        let (engine, mapped) =
            crate::entangler::entangle_in_current_basis(&mut self.shards, &bits).expect("entangle cannot fail here");
        let (ma, mb) = (self.shards.get(a).mapped, self.shards.get(b).mapped);
        let mut ctrl_mask = 0usize;
        let mut anti_mask = 0usize;
        for (i, &q) in bits.iter().enumerate() {
            if q == a || q == b {
                continue;
            }
            if controls.contains(&q) {
                ctrl_mask |= 1 << mapped[i];
            } else {
                anti_mask |= 1 << mapped[i];
            }
        }
        engine.borrow_mut().apply_mtrx2(&m, ma, mb, ctrl_mask, anti_mask);
        for &q in &bits {
            self.shards.get_mut(q).mark_dirty();
        }
        self.reactive_separate(&bits);
    }

    /// Multiplies every basis state by `e^{i*radians}` wherever the
    /// qubits named in `mask` have odd parity, and leaves even-parity
    /// states untouched.
    pub fn phase_parity(&mut self, radians: R, mask: N) {
        let qubits: Vec<N> = crate::math::bits_iter::QubitIter::from(mask).collect();
        if qubits.is_empty() {
            return;
        }
        for &q in &qubits {
            let shard = self.shards.get_mut(q);
            if let Some(rot) = basis::revert_basis_1qb(shard) {
                if let Some((engine, mapped)) = self.engine_at(q) {
                    engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
                }
            }
        }
        let (engine, mapped) = crate::entangler::entangle_in_current_basis(&mut self.shards, &qubits)
            .expect("entangle cannot fail here");
        let local_mask = mapped.iter().fold(0usize, |acc, &m| acc | (1 << m));
        let phase = crate::math::phase_from_rad(radians);
        let mut amps = engine.borrow().get_quantum_state();
        for (idx, amp) in amps.iter_mut().enumerate() {
            if (idx & local_mask).count_ones() % 2 == 1 {
                *amp *= phase;
            }
        }
        engine.borrow_mut().set_quantum_state(amps).expect("length matches current qubit count");
        for &q in &qubits {
            self.shards.get_mut(q).mark_dirty();
        }
        self.reactive_separate(&qubits);
    }

    fn materialize_selected(&mut self, owner: N, selected: Vec<basis::SelectedRecord>) {
        if selected.is_empty() {
            return;
        }
        if self.freeze_basis_2qb {
            log::warn!("materialize_selected: re-entrant buffer flush on qubit {owner} ignored");
            return;
        }
        self.freeze_basis_2qb = true;
        for sel in selected {
            let owner_id = self.shards.get(owner).id;
            // Remove the mirrored entry on the partner side to preserve
            // the symmetric-buffer invariant.
            let mirror = match sel.relation {
                Relation::Controls => Relation::TargetOf,
                Relation::AntiControls => Relation::AntiTargetOf,
                Relation::TargetOf => Relation::Controls,
                Relation::AntiTargetOf => Relation::AntiControls,
            };
            self.shards.by_id_mut(sel.partner).buffers.take(mirror, owner_id);

            let partner_pos = self.shards.position_of(sel.partner).expect("partner shard must exist");
            let (control_pos, target_pos, anti) = match sel.relation {
                Relation::Controls => (owner, partner_pos, false),
                Relation::AntiControls => (owner, partner_pos, true),
                Relation::TargetOf => (partner_pos, owner, false),
                Relation::AntiTargetOf => (partner_pos, owner, true),
            };
            self.apply_controlled_record(control_pos, target_pos, anti, sel.record);
        }
        self.freeze_basis_2qb = false;
    }

    /// Materializes a buffered record by fusing control and target into
    /// one engine and forwarding a standard controlled phase or invert
    /// gate: the control/anti-control masking already makes the
    /// non-matching branch an identity, so no shortcut is available —
    /// both branches genuinely depend on the target's own amplitude.
    fn apply_controlled_record(&mut self, control: N, target: N, anti: bool, record: PhaseRecord) {
        let bits = [control, target];
        let (engine, mapped) =
            crate::entangler::entangle_in_current_basis(&mut self.shards, &bits).expect("entangle cannot fail here");
        let (ctrl_mask, anti_mask) = if anti { (0, 1 << mapped[0]) } else { (1 << mapped[0], 0) };
        if record.is_invert {
            engine.borrow_mut().apply_invert(record.cmplx_diff, record.cmplx_same, mapped[1], ctrl_mask, anti_mask);
        } else {
            engine.borrow_mut().apply_phase(record.cmplx_same, record.cmplx_diff, mapped[1], ctrl_mask, anti_mask);
        }
        self.shards.get_mut(control).mark_dirty();
        self.shards.get_mut(target).mark_dirty();
        self.reactive_separate(&bits);
    }

    /// Brings a shard fully into the permutation (Z) basis with every
    /// buffer flushed, the way `toPermBasis` is described.
    pub fn gates_to_perm_basis(&mut self, q: N) {
        let shard = self.shards.get_mut(q);
        if let Some(rot) = basis::revert_basis_1qb(shard) {
            if let Some((engine, mapped)) = self.engine_at(q) {
                engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
            }
        }
        let selected = basis::revert_basis_2qb(
            self.shards.get_mut(q),
            PhaseExclusivity::InvertAndPhase,
            ControlExclusivity::ControlsAndTargets,
            PolarityExclusivity::CtrlAndAnti,
            &[],
            &[],
            false,
            false,
        );
        self.materialize_selected(q, selected);
    }

    /// Brings a shard's own single-qubit basis to Z and flushes only the
    /// inversion-carrying deferred-phase records touching it, leaving
    /// phase-only records pending. A phase-only record never changes
    /// the probability of reading either qubit it straddles, so
    /// measurement and parity queries can skip materializing it.
    pub(crate) fn flush_invert_buffers(&mut self, q: N) {
        let shard = self.shards.get_mut(q);
        if let Some(rot) = basis::revert_basis_1qb(shard) {
            if let Some((engine, mapped)) = self.engine_at(q) {
                engine.borrow_mut().apply_mtrx(&rot, mapped, 0, 0);
            }
        }
        let selected = basis::revert_basis_2qb(
            self.shards.get_mut(q),
            PhaseExclusivity::OnlyInvert,
            ControlExclusivity::ControlsAndTargets,
            PolarityExclusivity::CtrlAndAnti,
            &[],
            &[],
            false,
            false,
        );
        self.materialize_selected(q, selected);
    }

    pub(crate) fn reactive_separate(&mut self, bits: &[N]) {
        if !self.config.reactive_separate {
            return;
        }
        for &q in bits {
            let _ = self.try_separate(q);
        }
    }
}

fn commute_h_buffers(buffers: &mut crate::buffer::ShardBuffers) {
    for record in buffers.controls.values_mut() {
        *record = basis::commute_h_record(*record);
    }
    for record in buffers.anti_controls.values_mut() {
        *record = basis::commute_h_record(*record);
    }
    for record in buffers.target_of.values_mut() {
        *record = basis::commute_h_record(*record);
    }
    for record in buffers.anti_target_of.values_mut() {
        *record = basis::commute_h_record(*record);
    }
}

//! Probability queries and collapse operations.

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;

use crate::engine::Engine;
use crate::math::{C, N, R};

use super::QUnit;

impl QUnit {
    /// Full projective measurement of `q`, collapsing and re-detaching
    /// it. Uses the engine's own sampling when attached; a direct
    /// weighted coin flip on the cached amplitudes when detached.
    pub fn m(&mut self, q: N) -> bool {
        let p1 = self.prob(q);
        let result = self.rng.gen_bool(p1.clamp(0.0, 1.0));
        self.force_m(q, result);
        result
    }

    /// Collapses `q` to `result` outright (no randomness), renormalizing.
    /// Only the inversion-carrying buffers touching `q` are flushed
    /// first — a phase-only record never changes either qubit's own
    /// measurement probability, so it is left pending.
    pub fn force_m(&mut self, q: N, result: bool) {
        self.flush_invert_buffers(q);
        let shard = self.shards.get_mut(q);
        if shard.is_detached() {
            if result {
                shard.amp0 = crate::math::C_ZERO;
                shard.amp1 = crate::math::C_ONE;
            } else {
                shard.amp0 = crate::math::C_ONE;
                shard.amp1 = crate::math::C_ZERO;
            }
            shard.prob_dirty = false;
            shard.phase_dirty = false;
            return;
        }
        let (engine, mapped) = self.engine_at(q).expect("checked attached above");
        engine.borrow_mut().force_m(mapped, result).expect("force_m: measured qubit out of range");
        let _ = crate::separator::try_separate(&mut self.shards, &self.config, q);
    }

    pub fn m_reg(&mut self, qubits: &[N]) -> Vec<bool> {
        qubits.iter().map(|&q| self.m(q)).collect()
    }

    pub fn force_m_reg(&mut self, qubits: &[N], results: &[bool]) {
        for (&q, &r) in qubits.iter().zip(results.iter()) {
            self.force_m(q, r);
        }
    }

    pub fn m_all(&mut self) -> N {
        let n = self.qubit_count();
        let mut perm = 0usize;
        for q in 0..n {
            if self.m(q) {
                perm |= 1 << q;
            }
        }
        perm
    }

    /// Probability that `q` reads `1`.
    pub fn prob(&mut self, q: N) -> R {
        self.gates_to_perm_basis(q);
        let shard = self.shards.get(q);
        if shard.is_detached() {
            shard.cached_prob1()
        } else {
            let (engine, mapped) = self.engine_at(q).expect("checked attached above");
            let p = engine.borrow().prob(mapped);
            crate::math::clamp_prob(p)
        }
    }

    /// Probability of the full permutation `perm` over the whole
    /// register. Expensive: fuses every qubit into one engine.
    pub fn prob_all(&mut self, perm: N) -> R {
        let n = self.qubit_count();
        for q in 0..n {
            self.gates_to_perm_basis(q);
        }
        let bits: Vec<N> = (0..n).collect();
        let (engine, mapped) = crate::entangler::entangle_in_current_basis(&mut self.shards, &bits)
            .expect("entangle cannot fail here");
        let mut local_perm = 0usize;
        for (i, &m) in mapped.iter().enumerate() {
            if perm & (1 << i) != 0 {
                local_perm |= 1 << m;
            }
        }
        engine.borrow().prob_all(local_perm)
    }

    /// `probParity(mask)`: partitions `mask`'s qubits by which engine
    /// (or detached shard) each currently belongs to, computes each
    /// partition's own parity probability in isolation, and combines
    /// disjoint partitions with the independent-parity update
    /// `p' = p(1-q) + (1-p)q` — no engine ever needs to fuse with
    /// another just to answer a parity query.
    pub fn prob_parity(&mut self, mask: N) -> R {
        let qubits: Vec<N> = crate::math::bits_iter::QubitIter::from(mask).collect();
        if qubits.is_empty() {
            return 0.0;
        }
        for &q in &qubits {
            self.flush_invert_buffers(q);
        }
        let partitions = self.partition_by_engine(&qubits);
        let mut combined: Option<R> = None;
        for group in &partitions {
            let p = self.partition_parity(group);
            combined = Some(match combined {
                None => p,
                Some(acc) => acc * (1.0 - p) + (1.0 - acc) * p,
            });
        }
        combined.unwrap_or(0.0)
    }

    /// `forceMParity`: same per-engine partitioning as
    /// [`Self::prob_parity`]. Every partition but the last is sampled
    /// independently by its own marginal parity probability; the last
    /// is forced to whatever value makes the total XOR across
    /// partitions equal `result`. Sound because partitions are
    /// provably independent once invert buffers are flushed — any
    /// correlation left pending between them is phase-only.
    pub fn force_m_parity(&mut self, mask: N, result: bool) {
        let qubits: Vec<N> = crate::math::bits_iter::QubitIter::from(mask).collect();
        if qubits.is_empty() {
            return;
        }
        for &q in &qubits {
            self.flush_invert_buffers(q);
        }
        let partitions = self.partition_by_engine(&qubits);
        let last = partitions.len() - 1;
        let mut running = false;
        for (i, group) in partitions.iter().enumerate() {
            let forced = if i == last {
                result ^ running
            } else {
                let p = self.partition_parity(group);
                let sampled = self.rng.gen_bool(p.clamp(0.0, 1.0));
                running ^= sampled;
                sampled
            };
            self.force_partition_parity(group, forced);
        }
    }

    /// Groups `qubits` by the engine they currently share; an
    /// individually detached qubit is its own singleton group.
    fn partition_by_engine(&self, qubits: &[N]) -> Vec<Vec<N>> {
        let mut groups: Vec<(Option<*const RefCell<Box<dyn Engine>>>, Vec<N>)> = Vec::new();
        for &q in qubits {
            match self.shards.get(q).unit.engine() {
                None => groups.push((None, vec![q])),
                Some(engine) => {
                    let ptr = Rc::as_ptr(engine);
                    match groups.iter_mut().find(|(key, _)| *key == Some(ptr)) {
                        Some(group) => group.1.push(q),
                        None => groups.push((Some(ptr), vec![q])),
                    }
                }
            }
        }
        groups.into_iter().map(|(_, members)| members).collect()
    }

    /// Parity-1 probability of one partition, without fusing it with
    /// any other partition.
    fn partition_parity(&self, group: &[N]) -> R {
        if group.len() == 1 && self.shards.get(group[0]).is_detached() {
            return self.shards.get(group[0]).cached_prob1();
        }
        let (engine, _) = self.engine_at(group[0]).expect("partition shares an engine");
        let local_mask = group.iter().fold(0usize, |acc, &q| acc | (1 << self.shards.get(q).mapped));
        engine.borrow().prob_parity(local_mask)
    }

    /// Forces one partition's own parity to `result`, in isolation from
    /// every other partition.
    fn force_partition_parity(&mut self, group: &[N], result: bool) {
        if group.len() == 1 && self.shards.get(group[0]).is_detached() {
            self.force_m(group[0], result);
            return;
        }
        let (engine, _) = self.engine_at(group[0]).expect("partition shares an engine");
        let local_mask = group.iter().fold(0usize, |acc, &q| acc | (1 << self.shards.get(q).mapped));
        engine.borrow_mut().force_m_parity(local_mask, result).expect("force_m_parity: mask out of range");
        for &q in group {
            self.shards.get_mut(q).mark_dirty();
        }
        self.reactive_separate(group);
    }

    pub fn expectation_bits_all(&mut self) -> R {
        let n = self.qubit_count();
        for q in 0..n {
            self.gates_to_perm_basis(q);
        }
        let bits: Vec<N> = (0..n).collect();
        let (engine, _) = crate::entangler::entangle_in_current_basis(&mut self.shards, &bits)
            .expect("entangle cannot fail here");
        engine.borrow().expectation_bits_all()
    }

    /// Draws `shots` independent samples of the qubits in `mask` without
    /// collapsing the register.
    pub fn multi_shot_measure_mask(&mut self, mask: N, shots: N) -> Vec<N> {
        let qubits: Vec<N> = crate::math::bits_iter::QubitIter::from(mask).collect();
        if qubits.is_empty() {
            return vec![0; shots];
        }
        for &q in &qubits {
            self.gates_to_perm_basis(q);
        }
        let (engine, mapped) = crate::entangler::entangle_in_current_basis(&mut self.shards, &qubits)
            .expect("entangle cannot fail here");
        let local_mask = mapped.iter().fold(0usize, |acc, &m| acc | (1 << m));
        let local_to_qubit: std::collections::HashMap<N, N> =
            mapped.iter().enumerate().map(|(i, &m)| (m, qubits[i])).collect();

        let samples = engine.borrow().multi_shot_measure_mask(local_mask, shots, &mut self.rng);
        samples
            .into_iter()
            .map(|local_perm| {
                let mut out = 0usize;
                for (&local_bit, &q) in &local_to_qubit {
                    if local_perm & local_bit != 0 {
                        out |= 1 << q;
                    }
                }
                out
            })
            .collect()
    }

    pub fn get_probs(&mut self) -> Vec<R> {
        let n = self.qubit_count();
        (0..1usize << n).map(|perm| self.prob_all(perm)).collect()
    }

    pub fn get_amplitude(&mut self, perm: N) -> C {
        let n = self.qubit_count();
        for q in 0..n {
            self.gates_to_perm_basis(q);
        }
        let bits: Vec<N> = (0..n).collect();
        let (engine, mapped) = crate::entangler::entangle_in_current_basis(&mut self.shards, &bits)
            .expect("entangle cannot fail here");
        let mut local_perm = 0usize;
        for (i, &m) in mapped.iter().enumerate() {
            if perm & (1 << i) != 0 {
                local_perm |= 1 << m;
            }
        }
        engine.borrow().get_amplitude(local_perm)
    }

    pub fn set_amplitude(&mut self, perm: N, amp: C) {
        let n = self.qubit_count();
        for q in 0..n {
            self.gates_to_perm_basis(q);
        }
        let bits: Vec<N> = (0..n).collect();
        let (engine, mapped) = crate::entangler::entangle_in_current_basis(&mut self.shards, &bits)
            .expect("entangle cannot fail here");
        let mut local_perm = 0usize;
        for (i, &m) in mapped.iter().enumerate() {
            if perm & (1 << i) != 0 {
                local_perm |= 1 << m;
            }
        }
        engine.borrow_mut().set_amplitude(local_perm, amp);
        for &q in &bits {
            self.shards.get_mut(q).mark_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn measuring_a_zero_qubit_always_reads_zero() {
        let mut q = QUnit::with_seed(1, Config::default(), 42);
        assert!(!q.m(0));
    }

    #[test]
    fn hadamard_then_measure_collapses_to_a_definite_value() {
        let mut q = QUnit::with_seed(1, Config::default(), 7);
        q.h(0);
        let result = q.m(0);
        assert!((q.prob(0) - if result { 1.0 } else { 0.0 }).abs() < 1e-9);
    }

    #[test]
    fn prob_parity_of_two_untouched_qubits_stays_detached_and_even() {
        let mut q = QUnit::with_seed(2, Config::default(), 3);
        assert!((q.prob_parity(0b11) - 0.0).abs() < 1e-9);
        assert!(q.is_detached(0));
        assert!(q.is_detached(1));
    }
}

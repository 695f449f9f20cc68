//! Core public surface: qubit allocation, structural operations
//! (compose/decompose/detach/dispose/clone) and the lifecycle methods
//! that fan out to every reachable engine.

pub mod arithmetic;
pub mod gates;
pub mod measurement;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Config;
use crate::engine::{dense::DenseEngine, Engine};
use crate::error::{QUnitError, Result};
use crate::math::{R, N};
use crate::shard::{Shard, ShardId, ShardUnit};
use crate::shard_map::ShardMap;

/// A register of qubits, each independently tracked as detached or
/// fused into a joint subsystem, per the separability-tracking design
/// this crate implements.
pub struct QUnit {
    pub(crate) shards: ShardMap,
    pub(crate) config: Config,
    pub(crate) rng: StdRng,
    /// Re-entrancy guard around [`gates::materialize_selected`](super::gates),
    /// per-register instance state rather than a process global, same as
    /// `config.reactive_separate`.
    pub(crate) freeze_basis_2qb: bool,
}

impl std::fmt::Debug for QUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QUnit").field("qubit_count", &self.qubit_count()).finish()
    }
}

impl QUnit {
    /// Allocates `n` qubits in `|0...0>`, using the default dense engine
    /// backend and a configuration read from the environment.
    pub fn new(n: N) -> Self {
        Self::with_config(n, Config::default())
    }

    pub fn with_config(n: N, config: Config) -> Self {
        let mut shards = ShardMap::new();
        for _ in 0..n {
            shards.push(Shard::zero());
        }
        Self { shards, config, rng: StdRng::from_entropy(), freeze_basis_2qb: false }
    }

    /// Deterministic construction for tests: measurement and multi-shot
    /// sampling draw from a seeded generator instead of OS entropy.
    pub fn with_seed(n: N, config: Config, seed: u64) -> Self {
        let mut shards = ShardMap::new();
        for _ in 0..n {
            shards.push(Shard::zero());
        }
        Self { shards, config, rng: StdRng::seed_from_u64(seed), freeze_basis_2qb: false }
    }

    pub fn qubit_count(&self) -> N {
        self.shards.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Resets every qubit to a computational-basis permutation, with an
    /// optional global phase (ignored by every analytic fast path, but
    /// applied if a gate later needs to fuse an engine).
    pub fn set_permutation(&mut self, perm: N) {
        let n = self.qubit_count();
        self.shards = ShardMap::new();
        for bit in 0..n {
            let mut shard = Shard::zero();
            if perm & (1 << bit) != 0 {
                shard.amp0 = crate::math::C_ZERO;
                shard.amp1 = crate::math::C_ONE;
            }
            self.shards.push(shard);
        }
    }

    // -- structural ----------------------------------------------------

    /// Appends `other`'s qubits after this register's, without doing
    /// any engine-level work: every incoming shard keeps its own
    /// unit/mapped, just at new logical positions.
    pub fn compose(&mut self, other: QUnit) -> N {
        let offset = self.qubit_count();
        for shard in other.shards.iter() {
            self.shards.push(shard.clone());
        }
        offset
    }

    /// Splits the logical range `[start, start+len)` off into a new
    /// `QUnit`, fusing engines only where the range crosses an existing
    /// joint subsystem boundary.
    pub fn decompose(&mut self, start: N, len: N) -> Result<QUnit> {
        crate::entangler::entangle_range(&mut self.shards, start, len)?;
        let mut out_shards = ShardMap::new();
        for _ in 0..len {
            let shard = self.shards.remove_at(start);
            self.prune_partner_records(shard.id);
            out_shards.push(shard);
        }
        Ok(QUnit { shards: out_shards, config: self.config, rng: StdRng::from_entropy(), freeze_basis_2qb: false })
    }

    /// Removes `[start, start+len)` outright, asserting the removed
    /// range was already `|0...0>`.
    pub fn dispose(&mut self, start: N, len: N) -> Result<()> {
        let split = self.decompose(start, len)?;
        for shard in split.shards.iter() {
            if shard.is_detached() {
                let p1 = shard.cached_prob1();
                if p1 > crate::math::EPSILON {
                    log::warn!("dispose(): qubit was not |0> (p1={p1})");
                }
            }
        }
        Ok(())
    }

    pub fn try_separate(&mut self, q: N) -> Result<bool> {
        crate::separator::try_separate(&mut self.shards, &self.config, q)
    }

    pub fn try_separate_pair(&mut self, q1: N, q2: N) -> Result<bool> {
        crate::separator::try_separate_pair(&mut self.shards, &self.config, q1, q2)
    }

    /// Whether `q` is currently a standalone shard (not fused into any
    /// joint subsystem engine).
    pub fn is_detached(&self, q: N) -> bool {
        self.shards.get(q).is_detached()
    }

    /// Detaches `q`, returning it as a fresh single-qubit `QUnit` (the
    /// `decompose`-of-one-qubit convenience named in the external
    /// interface).
    pub fn detach(&mut self, q: N) -> Result<QUnit> {
        self.decompose(q, 1)
    }

    /// Removes a shard's identity from every partner's buffers. Called
    /// whenever a shard leaves the register (decompose, detach,
    /// measurement collapse that re-detaches a qubit).
    pub(crate) fn prune_partner_records(&mut self, removed: ShardId) {
        let ids: Vec<_> = self.shards.ids().collect();
        for id in ids {
            self.shards.by_id_mut(id).buffers.remove_partner(removed);
        }
    }

    /// Deep clone: every distinct engine reachable from a shard is
    /// cloned exactly once (via an identity-indexed table), and
    /// deferred-phase buffers are rebuilt verbatim over the new shard
    /// set — a clone never implicitly flushes pending records, so the
    /// mirrored control/target-of entries on both sides of every buffer
    /// stay consistent with each other after remapping.
    pub fn deep_clone(&self) -> QUnit {
        let mut engine_table: HashMap<usize, Rc<RefCell<Box<dyn Engine>>>> = HashMap::new();
        let mut id_remap: HashMap<ShardId, ShardId> = HashMap::new();
        let mut shards = ShardMap::new();

        for old in self.shards.iter() {
            let mut new_shard = old.clone();
            new_shard.id = crate::shard::fresh_shard_id();
            id_remap.insert(old.id, new_shard.id);
            if let ShardUnit::Attached(e) = &old.unit {
                let key = Rc::as_ptr(e) as *const () as usize;
                let cloned = engine_table
                    .entry(key)
                    .or_insert_with(|| Rc::new(RefCell::new(e.borrow().clone_engine())))
                    .clone();
                new_shard.unit = ShardUnit::Attached(cloned);
            }
            shards.push(new_shard);
        }

        // Rebuild every buffer map over the new shard ids, verbatim.
        let ids: Vec<_> = shards.ids().collect();
        for id in ids {
            let shard = shards.by_id_mut(id);
            shard.buffers.controls = remap_buffer(&shard.buffers.controls, &id_remap);
            shard.buffers.anti_controls = remap_buffer(&shard.buffers.anti_controls, &id_remap);
            shard.buffers.target_of = remap_buffer(&shard.buffers.target_of, &id_remap);
            shard.buffers.anti_target_of = remap_buffer(&shard.buffers.anti_target_of, &id_remap);
        }

        QUnit { shards, config: self.config, rng: StdRng::from_entropy(), freeze_basis_2qb: false }
    }

    /// Asks every reachable engine to finish queued work. The bundled
    /// dense engine is always synchronous, so this only matters for
    /// alternative backends.
    pub fn finish(&mut self) {
        for id in self.shards.ids().collect::<Vec<_>>() {
            if let ShardUnit::Attached(e) = &self.shards.by_id(id).unit {
                e.borrow_mut().finish();
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.shards.iter().all(|s| match &s.unit {
            ShardUnit::Detached => true,
            ShardUnit::Attached(e) => e.borrow().is_finished(),
        })
    }

    pub fn update_running_norm(&mut self) {
        for id in self.shards.ids().collect::<Vec<_>>() {
            if let ShardUnit::Attached(e) = &self.shards.by_id(id).unit {
                e.borrow_mut().update_running_norm();
            }
        }
    }

    pub fn normalize_state(&mut self) {
        for id in self.shards.ids().collect::<Vec<_>>() {
            if let ShardUnit::Attached(e) = &self.shards.by_id(id).unit {
                e.borrow_mut().normalize_state();
            }
        }
    }

    /// Sum-of-squared-differences against another register of the same
    /// qubit count, by bringing every qubit into permutation basis and
    /// comparing the joint state vectors engine-by-engine.
    ///
    /// When both qubits are single, detached shards, this takes the
    /// fast path of comparing `(amp0, amp1)` directly; the branch is on
    /// `unit == detached` uniformly for *both* operands, not swapped
    /// between them.
    pub fn sum_sqr_diff(&mut self, other: &mut QUnit) -> R {
        if self.qubit_count() != other.qubit_count() {
            return R::INFINITY;
        }
        if self.qubit_count() == 1 {
            let a_detached = self.shards.get(0).is_detached();
            let b_detached = other.shards.get(0).is_detached();
            if a_detached && b_detached {
                let a = self.shards.get(0);
                let b = other.shards.get(0);
                return (a.amp0 - b.amp0).norm_sqr() + (a.amp1 - b.amp1).norm_sqr();
            }
        }
        let a = self.get_quantum_state();
        let b = other.get_quantum_state();
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).norm_sqr()).sum()
    }

    /// Materializes the full joint amplitude vector, flushing every
    /// buffer and fusing every shard into one engine. Expensive;
    /// intended for tests and small registers.
    pub fn get_quantum_state(&mut self) -> Vec<crate::math::C> {
        let n = self.qubit_count();
        if n == 0 {
            return Vec::new();
        }
        let bits: Vec<N> = (0..n).collect();
        for &q in &bits {
            self.gates_to_perm_basis(q);
        }
        let (engine, _) = crate::entangler::entangle_in_current_basis(&mut self.shards, &bits)
            .expect("entangle_in_current_basis on the whole register cannot fail");
        crate::entangler::order_contiguous(&mut self.shards, &engine);
        engine.borrow().get_quantum_state()
    }

    pub(crate) fn engine_at(&self, q: N) -> Option<(Rc<RefCell<Box<dyn Engine>>>, N)> {
        self.shards.get(q).unit.engine().map(|e| (e.clone(), self.shards.get(q).mapped))
    }

    pub(crate) fn fresh_dense_engine(n: N) -> Box<dyn Engine> {
        Box::new(DenseEngine::new(n))
    }

    pub(crate) fn bounds_check(&self, q: N) -> Result<()> {
        QUnitError::bounds_check(q, self.qubit_count())
    }
}

fn remap_buffer(
    map: &std::collections::HashMap<ShardId, crate::buffer::PhaseRecord>,
    id_remap: &HashMap<ShardId, ShardId>,
) -> std::collections::HashMap<ShardId, crate::buffer::PhaseRecord> {
    map.iter().map(|(old_id, rec)| (*id_remap.get(old_id).unwrap_or(old_id), *rec)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_register_is_all_detached_zero() {
        let q = QUnit::new(3);
        assert_eq!(q.qubit_count(), 3);
        for s in q.shards.iter() {
            assert!(s.is_detached());
            assert!((s.amp0 - crate::math::C_ONE).norm() < 1e-9);
        }
    }

    #[test]
    fn compose_then_decompose_preserves_qubit_count() {
        let mut a = QUnit::new(2);
        let b = QUnit::new(1);
        let offset = a.compose(b);
        assert_eq!(offset, 2);
        assert_eq!(a.qubit_count(), 3);
        let split = a.decompose(2, 1).unwrap();
        assert_eq!(split.qubit_count(), 1);
        assert_eq!(a.qubit_count(), 2);
    }
}

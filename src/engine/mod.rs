//! Engine backend interface: the capability set the separability-tracking
//! core consumes. The engine's own gate kernels, device dispatch, and
//! alternative compressed representations live behind this trait, not in
//! the core itself — only the trait and one concrete dense implementation
//! live here.
//!
//! A capability-set trait returning `Result<_, QUnitError>`, consumed
//! through `Box<dyn Engine>`/`Rc<RefCell<Box<dyn Engine>>>` so that a
//! joint subsystem's identity can survive across an arbitrary sequence
//! of composes/decomposes chosen at runtime.

pub mod dense;

use std::fmt;

use rand::RngCore;

use crate::{
    error::{QUnitError, Result},
    math::{C, M1, M2, N, R},
};

pub use dense::DenseEngine;

/// A dense amplitude-vector joint subsystem, or any other backend
/// capable of the same operations — alternative compressed
/// representations are usable as engine backends through the same
/// interface.
pub trait Engine: fmt::Debug {
    /// Number of qubits this engine instance currently owns.
    fn qubit_count(&self) -> N;

    /// Resets to `|0..0>` at the given size, reallocating if needed.
    fn reset(&mut self, qubit_count: N) -> Result<()>;

    // -- bulk amplitude access -------------------------------------------------

    fn get_quantum_state(&self) -> Vec<C>;
    fn set_quantum_state(&mut self, amps: Vec<C>) -> Result<()>;
    fn get_amplitude(&self, perm: N) -> C;
    fn set_amplitude(&mut self, perm: N, amp: C);

    // -- structural ------------------------------------------------------------

    /// In-place swap of two local indices.
    fn swap(&mut self, a: N, b: N);

    /// Tries a backend-native separability check and split, as an
    /// optional fast path for stabilizer-style backends. The dense
    /// engine cannot do this cheaply and always returns `None`; the
    /// separator falls back to its own Bloch-vector probe in that case.
    fn try_separate(&mut self, _q: N) -> Option<Box<dyn Engine>> {
        None
    }

    fn try_decompose(&mut self, _start: N, _len: N, _tol: R) -> Option<Box<dyn Engine>> {
        None
    }

    fn is_clifford(&self) -> bool {
        false
    }

    fn is_binary_decision_tree(&self) -> bool {
        false
    }

    // -- gate application --------------------------------------------------

    /// Applies `m` to `target`, under `ctrl_mask` (all must be 1) and
    /// `anti_mask` (all must be 0). Covers `mtrx`/`mcMtrx`/`macMtrx`.
    fn apply_mtrx(&mut self, m: &M1, target: N, ctrl_mask: N, anti_mask: N);

    /// Applies a diagonal phase gate (`topLeft`, `bottomRight`). Covers
    /// `phase`/`mcPhase`/`macPhase`.
    fn apply_phase(&mut self, top_left: C, bottom_right: C, target: N, ctrl_mask: N, anti_mask: N);

    /// Applies an anti-diagonal invert gate (`topRight`, `bottomLeft`).
    /// Covers `invert`/`mcInvert`/`macInvert`.
    fn apply_invert(&mut self, top_right: C, bottom_left: C, target: N, ctrl_mask: N, anti_mask: N);

    /// Applies a distinct single-qubit matrix per control-bit pattern.
    /// `mtrxs.len()` must equal `1 << controls.len()`.
    fn apply_uniformly_controlled(&mut self, controls: &[N], target: N, mtrxs: &[M1]);

    /// General dense two-qubit gate, under control/anti masks. Covers
    /// `mcMtrx`/`macMtrx` for 2-qubit matrices, `iSwap`, `sqrtSwap`,
    /// `iSqrtSwap`, `fSim`.
    fn apply_mtrx2(&mut self, m: &M2, q0: N, q1: N, ctrl_mask: N, anti_mask: N);

    // -- probability & measurement ------------------------------------------

    fn prob(&self, q: N) -> R;
    fn prob_all(&self, perm: N) -> R;
    fn prob_parity(&self, mask: N) -> R;

    /// Collapses `q` to `result`, renormalizing. Covers `forceM`.
    fn force_m(&mut self, q: N, result: bool) -> Result<()>;

    /// Collapses the parity of `mask` to `result`, renormalizing. Covers
    /// `forceMParity`.
    fn force_m_parity(&mut self, mask: N, result: bool) -> Result<()>;

    /// Weighted expectation value of the permutation, i.e.
    /// `sum_perm perm * prob_all(perm)`.
    fn expectation_bits_all(&self) -> R {
        let n = self.qubit_count();
        if n == 0 || n > 20 {
            // Dense enumeration is infeasible/unnecessary beyond this;
            // callers needing it on larger engines should keep qubits
            // separated instead.
            return 0.0;
        }
        (0..(1usize << n))
            .map(|perm| perm as R * self.prob_all(perm))
            .sum()
    }

    /// Draws `shots` independent samples of the computational-basis
    /// state restricted to `mask`, without collapsing `self`.
    fn multi_shot_measure_mask(&self, mask: N, shots: N, rng: &mut dyn RngCore) -> Vec<N>;

    // -- lifecycle -----------------------------------------------------------

    fn update_running_norm(&mut self);
    fn normalize_state(&mut self);

    /// Asks the backend to finish any asynchronously queued work. The
    /// dense engine is always synchronous.
    fn finish(&mut self) {}
    fn is_finished(&self) -> bool {
        true
    }

    fn clone_engine(&self) -> Box<dyn Engine>;

    fn sum_sqr_diff(&self, other: &dyn Engine) -> R {
        if self.qubit_count() != other.qubit_count() {
            return R::INFINITY;
        }
        let a = self.get_quantum_state();
        let b = other.get_quantum_state();
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).norm_sqr())
            .sum()
    }
}

/// `compose`/`decompose` are expressed generically on top of the
/// required bulk-amplitude primitives, so any future backend only needs
/// to implement `get_quantum_state`/`set_quantum_state`/`reset`
/// correctly to participate in fusion.
pub fn compose(this: &mut dyn Engine, other: Box<dyn Engine>) -> Result<N> {
    let offset = this.qubit_count();
    let other_n = other.qubit_count();
    if other_n == 0 {
        return Ok(offset);
    }

    let a = this.get_quantum_state();
    let b = other.get_quantum_state();
    let new_n = offset + other_n;
    let new_len = 1usize << new_n;
    let a_mask = (1usize << offset) - 1;

    let mut out = Vec::with_capacity(new_len);
    for idx in 0..new_len {
        let a_idx = idx & a_mask;
        let b_idx = idx >> offset;
        out.push(a[a_idx] * b[b_idx]);
    }

    this.reset(new_n)?;
    this.set_quantum_state(out)?;
    Ok(offset)
}

/// Splits the contiguous local range `[start, start+len)` off of `this`
/// into a freshly returned engine, renormalizing what remains. Requires
/// that range be unentangled with the rest — callers (the separator) are
/// responsible for verifying that first; this function itself just
/// performs the linear-algebra split assuming it is already a product
/// state across the boundary.
pub fn decompose(this: &mut dyn Engine, start: N, len: N) -> Result<Box<dyn Engine>> {
    let total = this.qubit_count();
    if start + len > total {
        return Err(QUnitError::LengthMismatch {
            operation: "decompose",
            expected: total,
            found: start + len,
        });
    }

    let amps = this.get_quantum_state();
    let inner_mask = (1usize << len) - 1;
    let rest_n = total - len;

    let mut inner = vec![C::default(); 1usize << len];
    let mut rest = vec![C::default(); 1usize << rest_n];

    // Find the first nonzero amplitude to read off the separable factors.
    let lead = amps
        .iter()
        .position(|c| c.norm_sqr() > crate::math::EPSILON_SQR)
        .unwrap_or(0);
    let lead_inner = (lead >> start) & inner_mask;

    for idx in 0..amps.len() {
        let inner_idx = (idx >> start) & inner_mask;
        if inner_idx != lead_inner {
            continue;
        }
        let rest_idx = strip_range(idx, start, len);
        rest[rest_idx] = amps[idx];
    }
    let rest_norm = rest.iter().map(|c| c.norm_sqr()).sum::<R>().sqrt();
    if rest_norm > crate::math::EPSILON {
        for c in &mut rest {
            *c /= rest_norm;
        }
    }

    for (inner_idx, slot) in inner.iter_mut().enumerate() {
        let idx = splice_range(0usize, start, len, inner_idx) | (lead & !(inner_mask << start));
        *slot = if rest[strip_range(idx, start, len)].norm_sqr() > crate::math::EPSILON_SQR {
            amps[idx] / rest[strip_range(idx, start, len)]
        } else {
            C::default()
        };
    }
    let inner_norm = inner.iter().map(|c| c.norm_sqr()).sum::<R>().sqrt();
    if inner_norm > crate::math::EPSILON {
        for c in &mut inner {
            *c /= inner_norm;
        }
    } else {
        inner[0] = crate::math::C_ONE;
    }

    let mut out: Box<dyn Engine> = Box::new(DenseEngine::new(len));
    out.set_quantum_state(inner)?;

    if rest_n == 0 {
        this.reset(0)?;
    } else {
        this.reset(rest_n)?;
        this.set_quantum_state(rest)?;
    }

    Ok(out)
}

/// Removes `[start, start+len)` outright, asserting the disposed range
/// was already `|0..0>` up to a global phase so no information is
/// discarded silently.
pub fn dispose(this: &mut dyn Engine, start: N, len: N) -> Result<()> {
    let split = decompose(this, start, len)?;
    let p0 = split.prob_all(0);
    if p0 < 1.0 - crate::math::EPSILON {
        log::warn!(
            "dispose() dropped {} qubit(s) that were not in |0>; p(|0>) = {p0}",
            len
        );
    }
    Ok(())
}

fn strip_range(idx: N, start: N, len: N) -> N {
    let low = idx & ((1usize << start) - 1);
    let high = idx >> (start + len);
    low | (high << start)
}

fn splice_range(base_without_range: N, start: N, len: N, range_value: N) -> N {
    let low = base_without_range & ((1usize << start) - 1);
    let high = (base_without_range >> start) << (start + len);
    low | (range_value << start) | high
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_then_decompose_round_trips_product_state() {
        let mut a: Box<dyn Engine> = Box::new(DenseEngine::new(1));
        a.apply_mtrx(&crate::engine::dense::gates::h(), 0, 0, 0);
        let b: Box<dyn Engine> = Box::new(DenseEngine::new(1));

        let offset = compose(a.as_mut(), b).unwrap();
        assert_eq!(offset, 1);
        assert_eq!(a.qubit_count(), 2);

        let split = decompose(a.as_mut(), 1, 1).unwrap();
        assert!((split.prob_all(0) - 1.0).abs() < 1e-9);
        assert!((a.prob(0) - 0.5).abs() < 1e-9);
    }
}

//! Default dense amplitude-vector engine: one `Vec<C>` per joint
//! subsystem, with a scratch buffer swapped in for each write pass and
//! collapse-or-renormalize behavior on measurement.

use rand::{distributions::WeightedIndex, prelude::Distribution, RngCore};

use super::Engine;
use crate::{
    error::{QUnitError, Result},
    math::{C, C_ONE, C_ZERO, EPSILON, M1, M2, N, R},
};

#[cfg(feature = "cpu")]
use rayon::prelude::*;

/// Closed-form single- and two-qubit gate matrices.
pub mod gates {
    use super::*;
    use std::f64::consts::FRAC_1_SQRT_2;

    pub const fn id() -> M1 {
        [C_ONE, C_ZERO, C_ZERO, C_ONE]
    }

    pub const fn x() -> M1 {
        [C_ZERO, C_ONE, C_ONE, C_ZERO]
    }

    pub fn y() -> M1 {
        [
            C_ZERO,
            C { re: 0., im: -1. },
            C { re: 0., im: 1. },
            C_ZERO,
        ]
    }

    pub const fn z() -> M1 {
        [C_ONE, C_ZERO, C_ZERO, C { re: -1., im: 0. }]
    }

    pub fn h() -> M1 {
        let s = FRAC_1_SQRT_2;
        [
            C { re: s, im: 0. },
            C { re: s, im: 0. },
            C { re: s, im: 0. },
            C { re: -s, im: 0. },
        ]
    }

    pub fn s() -> M1 {
        [C_ONE, C_ZERO, C_ZERO, C { re: 0., im: 1. }]
    }

    pub fn is() -> M1 {
        [C_ONE, C_ZERO, C_ZERO, C { re: 0., im: -1. }]
    }

    pub fn t() -> M1 {
        [
            C_ONE,
            C_ZERO,
            C_ZERO,
            C::from_polar(1.0, std::f64::consts::FRAC_PI_4),
        ]
    }

    pub fn rx(theta: R) -> M1 {
        let (c, s) = ((theta / 2.0).cos(), (theta / 2.0).sin());
        [
            C { re: c, im: 0. },
            C { re: 0., im: -s },
            C { re: 0., im: -s },
            C { re: c, im: 0. },
        ]
    }

    pub fn ry(theta: R) -> M1 {
        let (c, s) = ((theta / 2.0).cos(), (theta / 2.0).sin());
        [
            C { re: c, im: 0. },
            C { re: -s, im: 0. },
            C { re: s, im: 0. },
            C { re: c, im: 0. },
        ]
    }

    pub fn rz(theta: R) -> M1 {
        [
            C::from_polar(1.0, -theta / 2.0),
            C_ZERO,
            C_ZERO,
            C::from_polar(1.0, theta / 2.0),
        ]
    }

    /// `SWAP` as a dense 4x4, basis order `|q1 q0>`.
    pub fn swap() -> M2 {
        let mut m = [C_ZERO; 16];
        m[0 * 4 + 0] = C_ONE;
        m[1 * 4 + 2] = C_ONE;
        m[2 * 4 + 1] = C_ONE;
        m[3 * 4 + 3] = C_ONE;
        m
    }

    pub fn sqrt_swap() -> M2 {
        let mut m = [C_ZERO; 16];
        let half_one_plus_i = C { re: 0.5, im: 0.5 };
        let half_one_minus_i = C { re: 0.5, im: -0.5 };
        m[0 * 4 + 0] = C_ONE;
        m[1 * 4 + 1] = half_one_plus_i;
        m[1 * 4 + 2] = half_one_minus_i;
        m[2 * 4 + 1] = half_one_minus_i;
        m[2 * 4 + 2] = half_one_plus_i;
        m[3 * 4 + 3] = C_ONE;
        m
    }

    pub fn i_swap() -> M2 {
        let mut m = [C_ZERO; 16];
        let i = C { re: 0., im: 1. };
        m[0 * 4 + 0] = C_ONE;
        m[1 * 4 + 2] = i;
        m[2 * 4 + 1] = i;
        m[3 * 4 + 3] = C_ONE;
        m
    }

    pub fn sqrt_i_swap() -> M2 {
        let mut m = [C_ZERO; 16];
        let s = FRAC_1_SQRT_2;
        let i_s = C { re: 0., im: s };
        m[0 * 4 + 0] = C_ONE;
        m[1 * 4 + 1] = C { re: s, im: 0. };
        m[1 * 4 + 2] = i_s;
        m[2 * 4 + 1] = i_s;
        m[2 * 4 + 2] = C { re: s, im: 0. };
        m[3 * 4 + 3] = C_ONE;
        m
    }

    /// `fSim(theta, phi)`, as used by Google's Sycamore-style circuits.
    pub fn f_sim(theta: R, phi: R) -> M2 {
        let mut m = [C_ZERO; 16];
        let (c, s) = (theta.cos(), theta.sin());
        m[0 * 4 + 0] = C_ONE;
        m[1 * 4 + 1] = C { re: c, im: 0. };
        m[1 * 4 + 2] = C { re: 0., im: -s };
        m[2 * 4 + 1] = C { re: 0., im: -s };
        m[2 * 4 + 2] = C { re: c, im: 0. };
        m[3 * 4 + 3] = C::from_polar(1.0, -phi);
        m
    }
}

#[derive(Debug, Default)]
pub struct DenseEngine {
    psi: Vec<C>,
    q_num: N,
}

impl Clone for DenseEngine {
    fn clone(&self) -> Self {
        Self {
            psi: self.psi.clone(),
            q_num: self.q_num,
        }
    }
}

impl DenseEngine {
    pub fn new(q_num: N) -> Self {
        let mut psi = vec![C_ZERO; 1usize << q_num];
        psi[0] = C_ONE;
        Self { psi, q_num }
    }

    pub fn from_amplitude(amp0: C, amp1: C) -> Self {
        Self {
            psi: vec![amp0, amp1],
            q_num: 1,
        }
    }

    #[inline]
    fn iter_indices(&self) -> impl Iterator<Item = N> {
        0..self.psi.len()
    }

    fn renormalize(&mut self) {
        let norm_sqr: R = self.psi.iter().map(|c| c.norm_sqr()).sum();
        if norm_sqr <= crate::math::EPSILON_SQR {
            self.psi.iter_mut().for_each(|c| *c = C_ZERO);
            self.psi[0] = C_ONE;
            return;
        }
        let norm = norm_sqr.sqrt();
        if (norm - 1.0).abs() > EPSILON {
            self.psi.iter_mut().for_each(|c| *c /= norm);
        }
    }
}

impl Engine for DenseEngine {
    fn qubit_count(&self) -> N {
        self.q_num
    }

    fn reset(&mut self, qubit_count: N) -> Result<()> {
        self.q_num = qubit_count;
        self.psi = vec![C_ZERO; 1usize << qubit_count];
        if !self.psi.is_empty() {
            self.psi[0] = C_ONE;
        }
        Ok(())
    }

    fn get_quantum_state(&self) -> Vec<C> {
        self.psi.clone()
    }

    fn set_quantum_state(&mut self, amps: Vec<C>) -> Result<()> {
        if amps.len() != self.psi.len() && amps.len() != 1usize << self.q_num {
            return Err(QUnitError::LengthMismatch {
                operation: "set_quantum_state",
                expected: self.psi.len(),
                found: amps.len(),
            });
        }
        self.psi = amps;
        Ok(())
    }

    fn get_amplitude(&self, perm: N) -> C {
        self.psi[perm]
    }

    fn set_amplitude(&mut self, perm: N, amp: C) {
        self.psi[perm] = amp;
    }

    fn swap(&mut self, a: N, b: N) {
        if a == b {
            return;
        }
        let (bit_a, bit_b) = (1usize << a, 1usize << b);
        for idx in self.iter_indices() {
            let swapped = ((idx & bit_a != 0) as usize) != ((idx & bit_b != 0) as usize);
            if swapped && idx & bit_a == 0 {
                let j = idx ^ bit_a ^ bit_b;
                self.psi.swap(idx, j);
            }
        }
    }

    fn apply_mtrx(&mut self, m: &M1, target: N, ctrl_mask: N, anti_mask: N) {
        let t = 1usize << target;
        let len = self.psi.len();
        let mut out = self.psi.clone();
        for idx in 0..len {
            if idx & t != 0 {
                continue;
            }
            if !gated(idx, ctrl_mask, anti_mask) {
                continue;
            }
            let i0 = idx;
            let i1 = idx | t;
            let (a0, a1) = (self.psi[i0], self.psi[i1]);
            out[i0] = m[0] * a0 + m[1] * a1;
            out[i1] = m[2] * a0 + m[3] * a1;
        }
        self.psi = out;
    }

    fn apply_phase(&mut self, top_left: C, bottom_right: C, target: N, ctrl_mask: N, anti_mask: N) {
        let t = 1usize << target;
        for idx in 0..self.psi.len() {
            if !gated(idx, ctrl_mask, anti_mask) {
                continue;
            }
            self.psi[idx] *= if idx & t == 0 { top_left } else { bottom_right };
        }
    }

    fn apply_invert(
        &mut self,
        top_right: C,
        bottom_left: C,
        target: N,
        ctrl_mask: N,
        anti_mask: N,
    ) {
        let t = 1usize << target;
        let len = self.psi.len();
        let mut out = self.psi.clone();
        for idx in 0..len {
            if idx & t != 0 {
                continue;
            }
            if !gated(idx, ctrl_mask, anti_mask) {
                continue;
            }
            let i0 = idx;
            let i1 = idx | t;
            out[i1] = top_right * self.psi[i0];
            out[i0] = bottom_left * self.psi[i1];
        }
        self.psi = out;
    }

    fn apply_uniformly_controlled(&mut self, controls: &[N], target: N, mtrxs: &[M1]) {
        debug_assert_eq!(mtrxs.len(), 1usize << controls.len());
        let t = 1usize << target;
        let len = self.psi.len();
        let mut out = self.psi.clone();
        for idx in 0..len {
            if idx & t != 0 {
                continue;
            }
            let mut pattern = 0usize;
            for (bit, &c) in controls.iter().enumerate() {
                if idx & (1 << c) != 0 {
                    pattern |= 1 << bit;
                }
            }
            let m = &mtrxs[pattern];
            let i0 = idx;
            let i1 = idx | t;
            let (a0, a1) = (self.psi[i0], self.psi[i1]);
            out[i0] = m[0] * a0 + m[1] * a1;
            out[i1] = m[2] * a0 + m[3] * a1;
        }
        self.psi = out;
    }

    fn apply_mtrx2(&mut self, m: &M2, q0: N, q1: N, ctrl_mask: N, anti_mask: N) {
        let (b0, b1) = (1usize << q0, 1usize << q1);
        let len = self.psi.len();
        let mut out = self.psi.clone();
        for idx in 0..len {
            if idx & b0 != 0 || idx & b1 != 0 {
                continue;
            }
            if !gated(idx, ctrl_mask, anti_mask) {
                continue;
            }
            let base = idx;
            let idxs = [base, base | b0, base | b1, base | b0 | b1];
            let amps = [
                self.psi[idxs[0]],
                self.psi[idxs[1]],
                self.psi[idxs[2]],
                self.psi[idxs[3]],
            ];
            for (row, &dst) in idxs.iter().enumerate() {
                let mut acc = C_ZERO;
                for (col, &a) in amps.iter().enumerate() {
                    acc += m[row * 4 + col] * a;
                }
                out[dst] = acc;
            }
        }
        self.psi = out;
    }

    fn prob(&self, q: N) -> R {
        let bit = 1usize << q;
        #[cfg(feature = "cpu")]
        let p: R = self
            .psi
            .par_iter()
            .enumerate()
            .filter(|(idx, _)| idx & bit != 0)
            .map(|(_, c)| c.norm_sqr())
            .sum();
        #[cfg(not(feature = "cpu"))]
        let p: R = self
            .psi
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx & bit != 0)
            .map(|(_, c)| c.norm_sqr())
            .sum();
        crate::math::clamp_prob(p)
    }

    fn prob_all(&self, perm: N) -> R {
        crate::math::clamp_prob(self.psi[perm].norm_sqr())
    }

    fn prob_parity(&self, mask: N) -> R {
        let p: R = self
            .psi
            .iter()
            .enumerate()
            .filter(|(idx, _)| (idx & mask).count_ones() % 2 == 1)
            .map(|(_, c)| c.norm_sqr())
            .sum();
        crate::math::clamp_prob(p)
    }

    fn force_m(&mut self, q: N, result: bool) -> Result<()> {
        let bit = 1usize << q;
        let want = if result { bit } else { 0 };
        for idx in 0..self.psi.len() {
            if idx & bit != want {
                self.psi[idx] = C_ZERO;
            }
        }
        self.renormalize();
        Ok(())
    }

    fn force_m_parity(&mut self, mask: N, result: bool) -> Result<()> {
        let want_odd = result;
        for idx in 0..self.psi.len() {
            let is_odd = (idx & mask).count_ones() % 2 == 1;
            if is_odd != want_odd {
                self.psi[idx] = C_ZERO;
            }
        }
        self.renormalize();
        Ok(())
    }

    fn multi_shot_measure_mask(&self, mask: N, shots: N, rng: &mut dyn RngCore) -> Vec<N> {
        if shots == 0 {
            return Vec::new();
        }
        let probs = self.psi.iter().map(|c| c.norm_sqr()).collect::<Vec<R>>();
        let dist = match WeightedIndex::new(&probs) {
            Ok(d) => d,
            Err(_) => return vec![0; shots],
        };
        (0..shots)
            .map(|_| dist.sample(&mut RngWrap(rng)) & mask)
            .collect()
    }

    fn update_running_norm(&mut self) {
        // Dense engine always keeps amplitudes exactly normalized after
        // every call; nothing to recompute lazily.
    }

    fn normalize_state(&mut self) {
        self.renormalize();
    }

    fn clone_engine(&self) -> Box<dyn Engine> {
        Box::new(self.clone())
    }
}

/// `rand`'s `Distribution::sample` wants an `impl Rng`, but the `Engine`
/// trait must stay object-safe, so callers pass a `&mut dyn RngCore`;
/// this thin newtype bridges the two.
struct RngWrap<'a>(&'a mut dyn RngCore);

impl<'a> rand::RngCore for RngWrap<'a> {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

#[inline]
fn gated(idx: N, ctrl_mask: N, anti_mask: N) -> bool {
    (idx & ctrl_mask) == ctrl_mask && (idx & anti_mask) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hadamard_gives_equal_superposition() {
        let mut e = DenseEngine::new(1);
        e.apply_mtrx(&gates::h(), 0, 0, 0);
        assert!((e.prob(0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cnot_on_plus_gives_bell_state() {
        let mut e = DenseEngine::new(2);
        e.apply_mtrx(&gates::h(), 0, 0, 0);
        e.apply_invert(C_ONE, C_ONE, 1, 1 << 0, 0);
        let psi = e.get_quantum_state();
        let expect = 1.0 / std::f64::consts::SQRT_2;
        assert!((psi[0b00].re - expect).abs() < 1e-9);
        assert!((psi[0b11].re - expect).abs() < 1e-9);
        assert!(psi[0b01].norm_sqr() < 1e-9);
        assert!(psi[0b10].norm_sqr() < 1e-9);
    }

    #[test]
    fn force_m_collapses_and_renormalizes() {
        let mut e = DenseEngine::new(1);
        e.apply_mtrx(&gates::h(), 0, 0, 0);
        e.force_m(0, true).unwrap();
        assert!((e.prob(0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn swap_exchanges_basis_labels() {
        let mut e = DenseEngine::new(2);
        e.set_amplitude(0, C_ZERO);
        e.set_amplitude(0b01, C_ONE);
        e.swap(0, 1);
        assert!((e.get_amplitude(0b10).norm_sqr() - 1.0).abs() < 1e-9);
    }
}

//! Arithmetic front-end: classical register operations expressed as
//! permutations (or controlled permutations) of the computational basis,
//! plus the handful of pure-phase oracles used by amplitude estimation
//! and Grover-style search.
//!
//! Every operation here is built on one primitive,
//! [`QUnit::dispatch_permutation`]: classify the participating qubits as
//! a single definite classical value (cheap, no engine touched), a
//! ripple case (a classical low-order prefix plus a smaller
//! indeterminate remainder), or a genuine superposition across the
//! whole range (fuse into one engine and permute the amplitude vector
//! directly). Because the permutation is applied to the full local
//! index space of whatever engine the qubits end up sharing, any other
//! qubit entangled into that engine is carried along for free.

use crate::math::{C_ONE, C_ZERO, N};

use super::QUnit;

impl QUnit {
    /// Drops any `controls` entry already classically known to be `1`
    /// (kept implicitly) and short-circuits the caller with `false` the
    /// moment one is classically known to be `0`. Returns the remaining
    /// controls that still need to be gated on an engine.
    pub(crate) fn trim_controls(&mut self, controls: &[N]) -> Option<Vec<N>> {
        let mut kept = Vec::with_capacity(controls.len());
        for &c in controls {
            self.gates_to_perm_basis(c);
            let shard = self.shards.get(c);
            if shard.is_detached() {
                let p1 = shard.cached_prob1();
                if p1 < crate::math::EPSILON {
                    return None;
                } else if p1 > 1.0 - crate::math::EPSILON {
                    continue;
                }
            }
            kept.push(c);
        }
        Some(kept)
    }

    /// Applies `f`, a bijection on `0..2^qubits.len()`, to the classical
    /// value encoded by `qubits`. Takes the classical fast path when
    /// every participating qubit is a detached, basis-definite shard.
    /// Otherwise, tries a ripple path: consume the longest classical
    /// prefix at the low end of `qubits` and recurse on only the
    /// indeterminate remainder. This is sound whenever `f`'s image of
    /// that prefix doesn't depend on the indeterminate high bits (true
    /// of a carry-propagating adder, since the result bit at position
    /// `i` only ever depends on input bits `<= i`); verified empirically
    /// against the actual `f` so a non-additive permutation still falls
    /// back safely to fusing the whole range. Takes `f` as a trait
    /// object rather than a generic parameter so the ripple path can
    /// recurse without the closure type growing on every level.
    pub(crate) fn dispatch_permutation(&mut self, qubits: &[N], f: &dyn Fn(N) -> N) {
        if qubits.is_empty() {
            return;
        }
        for &q in qubits {
            self.gates_to_perm_basis(q);
        }
        if qubits.iter().all(|&q| self.shards.get(q).is_detached()) {
            if let Some(v) = self.classical_value(qubits) {
                self.apply_classical_permutation(qubits, f(v));
                return;
            }
        }

        let prefix_len = qubits
            .iter()
            .take_while(|&&q| self.shards.get(q).is_detached() && self.classical_value(&[q]).is_some())
            .count();
        if prefix_len > 0 && prefix_len < qubits.len() {
            if let Some(lo) = self.classical_value(&qubits[..prefix_len]) {
                let suffix = &qubits[prefix_len..];
                let suffix_len = suffix.len();
                let lo_mask = (1usize << prefix_len) - 1;
                let expected_lo = f(lo) & lo_mask;
                let low_output_is_fixed =
                    (0..(1usize << suffix_len)).all(|hi| (f(lo | (hi << prefix_len)) & lo_mask) == expected_lo);
                if low_output_is_fixed {
                    let ripple = move |hi: N| f(lo | (hi << prefix_len)) >> prefix_len;
                    self.dispatch_permutation(suffix, &ripple);
                    if expected_lo != lo {
                        self.apply_classical_permutation(&qubits[..prefix_len], expected_lo);
                    }
                    return;
                }
            }
        }

        let (engine, mapped) = crate::entangler::entangle_in_current_basis(&mut self.shards, qubits)
            .expect("entangle cannot fail here");
        let local_mask = mapped.iter().fold(0usize, |acc, &m| acc | (1 << m));
        let amps = engine.borrow().get_quantum_state();
        let mut new_amps = vec![C_ZERO; amps.len()];
        for (idx, amp) in amps.iter().enumerate() {
            if amp.norm_sqr() <= crate::math::EPSILON_SQR {
                continue;
            }
            let mut v = 0usize;
            for (i, &m) in mapped.iter().enumerate() {
                if idx & (1 << m) != 0 {
                    v |= 1 << i;
                }
            }
            let new_v = f(v);
            let mut new_idx = idx & !local_mask;
            for (i, &m) in mapped.iter().enumerate() {
                if (new_v >> i) & 1 != 0 {
                    new_idx |= 1 << m;
                }
            }
            new_amps[new_idx] = *amp;
        }
        engine.borrow_mut().set_quantum_state(new_amps).expect("length matches current qubit count");
        for &q in qubits {
            self.shards.get_mut(q).mark_dirty();
        }
        self.reactive_separate(qubits);
    }

    /// Writes a classically-known `new_v` directly into `qubits`'
    /// cached amplitudes, bit by bit.
    fn apply_classical_permutation(&mut self, qubits: &[N], new_v: N) {
        for (i, &q) in qubits.iter().enumerate() {
            let bit = (new_v >> i) & 1;
            let shard = self.shards.get_mut(q);
            if bit == 1 {
                shard.amp0 = C_ZERO;
                shard.amp1 = C_ONE;
            } else {
                shard.amp0 = C_ONE;
                shard.amp1 = C_ZERO;
            }
        }
    }

    /// Reads the classical value of `qubits` if every one is a detached,
    /// basis-definite shard; `None` if any is in superposition.
    fn classical_value(&self, qubits: &[N]) -> Option<N> {
        let mut v = 0usize;
        for (i, &q) in qubits.iter().enumerate() {
            let shard = self.shards.get(q);
            let p1 = shard.cached_prob1();
            if p1 > 1.0 - crate::math::EPSILON {
                v |= 1 << i;
            } else if p1 >= crate::math::EPSILON {
                return None;
            }
        }
        Some(v)
    }

    /// Conditionally applies `f` only when every qubit in `controls`
    /// reads `1`, over the combined `[controls, qubits]` register.
    fn dispatch_controlled_permutation(&mut self, controls: &[N], qubits: &[N], f: &dyn Fn(N) -> N) {
        let Some(controls) = self.trim_controls(controls) else { return };
        if controls.is_empty() {
            self.dispatch_permutation(qubits, f);
            return;
        }
        let n_c = controls.len();
        let all_ctrl: N = (1 << n_c) - 1;
        let mut combined = controls;
        combined.extend_from_slice(qubits);
        let gated = move |v: N| {
            let ctrl_bits = v & all_ctrl;
            let reg = v >> n_c;
            if ctrl_bits == all_ctrl {
                ctrl_bits | (f(reg) << n_c)
            } else {
                v
            }
        };
        self.dispatch_permutation(&combined, &gated);
    }

    pub fn inc(&mut self, to_add: N, qubits: &[N]) {
        let m = 1usize << qubits.len();
        self.dispatch_permutation(qubits, &move |v| (v + to_add) % m);
    }

    pub fn dec(&mut self, to_sub: N, qubits: &[N]) {
        let m = 1usize << qubits.len();
        let to_sub = to_sub % m;
        self.dispatch_permutation(qubits, &move |v| (v + m - to_sub) % m);
    }

    pub fn cinc(&mut self, to_add: N, controls: &[N], qubits: &[N]) {
        let m = 1usize << qubits.len();
        self.dispatch_controlled_permutation(controls, qubits, &move |v| (v + to_add) % m);
    }

    pub fn cdec(&mut self, to_sub: N, controls: &[N], qubits: &[N]) {
        let m = 1usize << qubits.len();
        let to_sub = to_sub % m;
        self.dispatch_controlled_permutation(controls, qubits, &move |v| (v + m - to_sub) % m);
    }

    /// Increment with a dedicated carry-out qubit: the combined
    /// `(qubits, carry)` register is treated as one wider value.
    pub fn inc_c(&mut self, to_add: N, qubits: &[N], carry: N) {
        let width = qubits.len();
        let mut combined = qubits.to_vec();
        combined.push(carry);
        let wide = 1usize << (width + 1);
        self.dispatch_permutation(&combined, &move |v| (v + to_add) % wide);
    }

    pub fn dec_c(&mut self, to_sub: N, qubits: &[N], carry: N) {
        let width = qubits.len();
        let wide = 1usize << (width + 1);
        let to_sub = to_sub % wide;
        let mut combined = qubits.to_vec();
        combined.push(carry);
        self.dispatch_permutation(&combined, &move |v| (v + wide - to_sub) % wide);
    }

    /// Signed increment: flips `overflow` whenever the two's-complement
    /// sign of `qubits` changes in a way plain addition shouldn't cause.
    pub fn inc_s(&mut self, to_add: N, qubits: &[N], overflow: N) {
        let width = qubits.len();
        let m = 1usize << width;
        let half = m >> 1;
        let mut combined = qubits.to_vec();
        combined.push(overflow);
        self.dispatch_permutation(&combined, &move |v| {
            let reg = v & (m - 1);
            let ov = (v >> width) & 1;
            let signed_before = to_signed(reg, width);
            let signed_after = signed_before + to_add as i64;
            let overflowed = !(-(half as i64)..half as i64).contains(&signed_after);
            let new_reg = (reg + to_add) % m;
            let new_ov = ov ^ (overflowed as usize);
            new_reg | (new_ov << width)
        });
    }

    pub fn dec_s(&mut self, to_sub: N, qubits: &[N], overflow: N) {
        let width = qubits.len();
        let m = 1usize << width;
        let half = m >> 1;
        let mut combined = qubits.to_vec();
        combined.push(overflow);
        self.dispatch_permutation(&combined, &move |v| {
            let reg = v & (m - 1);
            let ov = (v >> width) & 1;
            let signed_before = to_signed(reg, width);
            let signed_after = signed_before - to_sub as i64;
            let overflowed = !(-(half as i64)..half as i64).contains(&signed_after);
            let new_reg = (reg + m - (to_sub % m)) % m;
            let new_ov = ov ^ (overflowed as usize);
            new_reg | (new_ov << width)
        });
    }

    /// Combined signed-and-carry increment/decrement: `to_add` negative
    /// means subtract. Tracks both a carry-out and a signed-overflow
    /// qubit in one pass.
    pub fn inc_dec_sc(&mut self, to_add: crate::math::Z, qubits: &[N], carry: N, overflow: N) {
        let width = qubits.len();
        let m = 1usize << width;
        let half = m >> 1;
        let wide = m << 1;
        let magnitude = to_add.unsigned_abs();
        let mut combined = qubits.to_vec();
        combined.push(carry);
        combined.push(overflow);
        self.dispatch_permutation(&combined, &move |v| {
            let reg = v & (m - 1);
            let c = (v >> width) & 1;
            let ov = (v >> (width + 1)) & 1;
            let signed_before = to_signed(reg, width);
            let (new_reg_wide, signed_after) = if to_add >= 0 {
                ((reg + magnitude) % wide, signed_before + to_add)
            } else {
                ((reg + wide - (magnitude % wide)) % wide, signed_before + to_add)
            };
            let overflowed = !(-(half as i64)..half as i64).contains(&signed_after);
            let new_c = c ^ ((new_reg_wide >= m) as usize);
            let new_reg = new_reg_wide % m;
            let new_ov = ov ^ (overflowed as usize);
            new_reg | (new_c << width) | (new_ov << (width + 1))
        });
    }

    /// In-place multiply by an odd `to_mul`, using `carry` as extra
    /// width so the operation is a bijection over the combined register.
    pub fn mul(&mut self, to_mul: N, qubits: &[N], carry: &[N]) {
        assert!(to_mul % 2 == 1, "mul: to_mul must be odd to be reversible in place");
        let mut combined = qubits.to_vec();
        combined.extend_from_slice(carry);
        let wide = 1usize << combined.len();
        self.dispatch_permutation(&combined, &move |v| (v * to_mul) % wide);
    }

    /// Undoes [`QUnit::mul`] with the same `to_mul`.
    pub fn div(&mut self, to_mul: N, qubits: &[N], carry: &[N]) {
        let mut combined = qubits.to_vec();
        combined.extend_from_slice(carry);
        let wide = 1usize << combined.len();
        let inv = mod_inverse(to_mul, wide).expect("div: to_mul must be odd (invertible mod 2^n)");
        self.dispatch_permutation(&combined, &move |v| (v * inv) % wide);
    }

    /// `out ^= (in * to_mul) mod mod_n`, leaving `in` untouched.
    pub fn mul_mod_n_out(&mut self, to_mul: N, mod_n: N, in_qubits: &[N], out_qubits: &[N]) {
        let n_in = in_qubits.len();
        let mut combined = in_qubits.to_vec();
        combined.extend_from_slice(out_qubits);
        self.dispatch_permutation(&combined, &move |v| {
            let in_val = v & ((1 << n_in) - 1);
            let out_val = v >> n_in;
            let new_out = out_val ^ ((in_val * to_mul) % mod_n);
            in_val | (new_out << n_in)
        });
    }

    /// Self-inverse: applying the same XOR twice restores `out`.
    pub fn imul_mod_n_out(&mut self, to_mul: N, mod_n: N, in_qubits: &[N], out_qubits: &[N]) {
        self.mul_mod_n_out(to_mul, mod_n, in_qubits, out_qubits);
    }

    /// `out ^= (base^in) mod mod_n`.
    pub fn pow_mod_n_out(&mut self, base: N, mod_n: N, in_qubits: &[N], out_qubits: &[N]) {
        let n_in = in_qubits.len();
        let mut combined = in_qubits.to_vec();
        combined.extend_from_slice(out_qubits);
        self.dispatch_permutation(&combined, &move |v| {
            let in_val = v & ((1 << n_in) - 1);
            let out_val = v >> n_in;
            let new_out = out_val ^ mod_pow(base, in_val, mod_n);
            in_val | (new_out << n_in)
        });
    }

    pub fn c_mul(&mut self, to_mul: N, controls: &[N], qubits: &[N], carry: &[N]) {
        assert!(to_mul % 2 == 1, "c_mul: to_mul must be odd to be reversible in place");
        let mut reg = qubits.to_vec();
        reg.extend_from_slice(carry);
        let wide = 1usize << reg.len();
        self.dispatch_controlled_permutation(controls, &reg, &move |v| (v * to_mul) % wide);
    }

    pub fn c_div(&mut self, to_mul: N, controls: &[N], qubits: &[N], carry: &[N]) {
        let mut reg = qubits.to_vec();
        reg.extend_from_slice(carry);
        let wide = 1usize << reg.len();
        let inv = mod_inverse(to_mul, wide).expect("c_div: to_mul must be odd (invertible mod 2^n)");
        self.dispatch_controlled_permutation(controls, &reg, &move |v| (v * inv) % wide);
    }

    pub fn c_mul_mod_n_out(&mut self, to_mul: N, mod_n: N, controls: &[N], in_qubits: &[N], out_qubits: &[N]) {
        let n_in = in_qubits.len();
        let mut reg = in_qubits.to_vec();
        reg.extend_from_slice(out_qubits);
        self.dispatch_controlled_permutation(controls, &reg, &move |v| {
            let in_val = v & ((1 << n_in) - 1);
            let out_val = v >> n_in;
            let new_out = out_val ^ ((in_val * to_mul) % mod_n);
            in_val | (new_out << n_in)
        });
    }

    pub fn ci_mul_mod_n_out(&mut self, to_mul: N, mod_n: N, controls: &[N], in_qubits: &[N], out_qubits: &[N]) {
        self.c_mul_mod_n_out(to_mul, mod_n, controls, in_qubits, out_qubits);
    }

    pub fn c_pow_mod_n_out(&mut self, base: N, mod_n: N, controls: &[N], in_qubits: &[N], out_qubits: &[N]) {
        let n_in = in_qubits.len();
        let mut reg = in_qubits.to_vec();
        reg.extend_from_slice(out_qubits);
        self.dispatch_controlled_permutation(controls, &reg, &move |v| {
            let in_val = v & ((1 << n_in) - 1);
            let out_val = v >> n_in;
            let new_out = out_val ^ mod_pow(base, in_val, mod_n);
            in_val | (new_out << n_in)
        });
    }

    /// `value ^= table[index]`, a lookup table load (qRAM-style).
    pub fn indexed_lda(&mut self, index_qubits: &[N], value_qubits: &[N], table: &[u8]) {
        let n_idx = index_qubits.len();
        let table: Vec<usize> = table.iter().map(|&b| b as usize).collect();
        let mut combined = index_qubits.to_vec();
        combined.extend_from_slice(value_qubits);
        self.dispatch_permutation(&combined, &move |v| {
            let idx = v & ((1 << n_idx) - 1);
            let val = v >> n_idx;
            let new_val = val ^ table.get(idx).copied().unwrap_or(0);
            idx | (new_val << n_idx)
        });
    }

    /// `value += table[index]` with carry-out, undone by
    /// [`QUnit::indexed_sbc`].
    pub fn indexed_adc(&mut self, index_qubits: &[N], value_qubits: &[N], carry: N, table: &[u8]) {
        let n_idx = index_qubits.len();
        let n_val = value_qubits.len();
        let wide = 1usize << (n_val + 1);
        let table: Vec<usize> = table.iter().map(|&b| b as usize).collect();
        let mut combined = index_qubits.to_vec();
        combined.extend_from_slice(value_qubits);
        combined.push(carry);
        self.dispatch_permutation(&combined, &move |v| {
            let idx = v & ((1 << n_idx) - 1);
            let rest = v >> n_idx;
            let new_rest = (rest + table.get(idx).copied().unwrap_or(0)) % wide;
            idx | (new_rest << n_idx)
        });
    }

    pub fn indexed_sbc(&mut self, index_qubits: &[N], value_qubits: &[N], carry: N, table: &[u8]) {
        let n_idx = index_qubits.len();
        let n_val = value_qubits.len();
        let wide = 1usize << (n_val + 1);
        let table: Vec<usize> = table.iter().map(|&b| b as usize).collect();
        let mut combined = index_qubits.to_vec();
        combined.extend_from_slice(value_qubits);
        combined.push(carry);
        self.dispatch_permutation(&combined, &move |v| {
            let idx = v & ((1 << n_idx) - 1);
            let rest = v >> n_idx;
            let new_rest = (rest + wide - (table.get(idx).copied().unwrap_or(0) % wide)) % wide;
            idx | (new_rest << n_idx)
        });
    }

    /// Overwrites `qubits`' value with `table[value]`; `table` must be a
    /// bijection of `0..2^qubits.len()`.
    pub fn hash(&mut self, qubits: &[N], table: &[N]) {
        let table = table.to_vec();
        self.dispatch_permutation(qubits, &move |v| table[v]);
    }

    /// Multiplies every amplitude whose `qubits` value is strictly less
    /// than `greater_perm` by `-1`.
    pub fn phase_flip_if_less(&mut self, greater_perm: N, qubits: &[N]) {
        self.flip_phase_where(qubits, move |v| v < greater_perm);
    }

    pub fn c_phase_flip_if_less(&mut self, greater_perm: N, controls: &[N], qubits: &[N]) {
        let Some(controls) = self.trim_controls(controls) else { return };
        if controls.is_empty() {
            self.phase_flip_if_less(greater_perm, qubits);
            return;
        }
        let n_c = controls.len();
        let all_ctrl = (1usize << n_c) - 1;
        let mut combined = controls;
        combined.extend_from_slice(qubits);
        self.flip_phase_where(&combined, move |v| {
            let ctrl_bits = v & all_ctrl;
            let reg = v >> n_c;
            ctrl_bits == all_ctrl && reg < greater_perm
        });
    }

    fn flip_phase_where(&mut self, qubits: &[N], predicate: impl Fn(N) -> bool) {
        if qubits.is_empty() {
            return;
        }
        for &q in qubits {
            self.gates_to_perm_basis(q);
        }
        let (engine, mapped) = crate::entangler::entangle_in_current_basis(&mut self.shards, qubits)
            .expect("entangle cannot fail here");
        let mut amps = engine.borrow().get_quantum_state();
        for (idx, amp) in amps.iter_mut().enumerate() {
            let mut v = 0usize;
            for (i, &m) in mapped.iter().enumerate() {
                if idx & (1 << m) != 0 {
                    v |= 1 << i;
                }
            }
            if predicate(v) {
                *amp = C_ZERO - *amp;
            }
        }
        engine.borrow_mut().set_quantum_state(amps).expect("length matches current qubit count");
        for &q in qubits {
            self.shards.get_mut(q).mark_dirty();
        }
        self.reactive_separate(qubits);
    }
}

fn to_signed(v: N, width: N) -> i64 {
    let sign_bit = 1usize << (width - 1);
    if v & sign_bit != 0 {
        v as i64 - (1i64 << width)
    } else {
        v as i64
    }
}

fn mod_inverse(a: N, modulus: N) -> Option<N> {
    if a % 2 == 0 {
        return None;
    }
    let (mut t, mut new_t): (i128, i128) = (0, 1);
    let (mut r, mut new_r): (i128, i128) = (modulus as i128, a as i128);
    while new_r != 0 {
        let q = r / new_r;
        (t, new_t) = (new_t, t - q * new_t);
        (r, new_r) = (new_r, r - q * new_r);
    }
    if r > 1 {
        return None;
    }
    if t < 0 {
        t += modulus as i128;
    }
    Some(t as N)
}

fn mod_pow(base: N, exp: N, modulus: N) -> N {
    if modulus == 1 {
        return 0;
    }
    let mut result = 1u128;
    let mut base = base as u128 % modulus as u128;
    let mut exp = exp;
    let modulus = modulus as u128;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % modulus;
        }
        exp >>= 1;
        base = base * base % modulus;
    }
    result as N
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn inc_on_a_classical_register_wraps_modulo_range() {
        let mut q = QUnit::new(2);
        q.x(0); // |01> = 1
        q.inc(3, &[0, 1]);
        assert!((q.prob(0) - 0.0).abs() < 1e-9);
        assert!((q.prob(1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mul_by_odd_factor_then_div_round_trips() {
        let mut q = QUnit::new(3);
        q.x(1); // qubits [1, 2] encode value 1
        q.mul(3, &[1, 2], &[0]);
        q.div(3, &[1, 2], &[0]);
        assert!((q.prob(1) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn inc_on_a_register_with_only_the_top_bit_superposed_ripples_the_known_low_bits() {
        // Qubits 0,1 are classically 1 (= 0b01 = 1); qubit 2 is in
        // superposition. inc(1, ..) should only need to entangle qubit
        // 2 with the carry out of the known low bits, never the whole
        // 3-qubit range.
        let mut q = QUnit::with_seed(3, Config::new(1e-6, true, 0), 11);
        q.x(0);
        q.h(2);
        q.inc(1, &[0, 1, 2]);
        assert!(q.is_detached(0));
        assert!(q.is_detached(1));
    }
}

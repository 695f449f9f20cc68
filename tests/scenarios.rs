//! End-to-end scenarios exercising the whole stack: shards, the
//! deferred-phase buffer, the entangler, and the separator together.

use qunit_core::engine::dense::gates as m1;
use qunit_core::math::{C, C_ONE, C_ZERO};
use qunit_core::{Config, QUnit};

const EPS: f64 = 1e-6;

fn config() -> Config {
    Config::new(1e-6, true, 0)
}

fn c(re: f64, im: f64) -> C {
    C { re, im }
}

#[test]
fn scenario_1_hadamard_on_one_qubit_leaves_the_others_detached() {
    let mut q = QUnit::with_seed(3, config(), 1);
    q.h(0);
    assert!((q.prob(0) - 0.5).abs() < EPS);
    assert!((q.prob(1) - 0.0).abs() < EPS);
    assert!(q.try_separate(1).unwrap());
    assert!(q.try_separate(2).unwrap());
}

#[test]
fn scenario_2_bell_state_does_not_separate() {
    let mut q = QUnit::with_seed(2, config(), 2);
    q.h(0);
    q.mc_invert(&[0], C_ONE, C_ONE, 1);

    let mut reference = QUnit::with_seed(2, config(), 2);
    let s = 1.0 / std::f64::consts::SQRT_2;
    reference.set_amplitude(0b00, c(s, 0.0));
    reference.set_amplitude(0b11, c(s, 0.0));
    reference.set_amplitude(0b01, C_ZERO);
    reference.set_amplitude(0b10, C_ZERO);

    assert!(q.sum_sqr_diff(&mut reference) <= EPS);
    assert!(!q.try_separate(0).unwrap());
}

#[test]
fn scenario_3_collapsing_one_bell_qubit_determines_the_other() {
    let mut q = QUnit::with_seed(2, config(), 3);
    q.h(0);
    q.mc_invert(&[0], C_ONE, C_ONE, 1);

    q.force_m(0, true);
    assert!(q.m(1));
    assert!(q.is_detached(0));
    assert!(q.is_detached(1));
}

#[test]
fn scenario_4_mul_mod_n_out_computes_five_times_three_mod_eight() {
    let mut q = QUnit::with_seed(8, config(), 4);
    // setReg(0, 4, 5): qubits 0..4 encode 5 = 0b0101.
    q.x(0);
    q.x(2);
    q.mul_mod_n_out(3, 8, &[0, 1, 2, 3], &[4, 5, 6, 7]);

    let out: usize = (0..4).map(|i| if q.prob(4 + i) > 0.5 { 1 << i } else { 0 }).sum();
    assert_eq!(out, 7);
    let in_val: usize = (0..4).map(|i| if q.prob(i) > 0.5 { 1 << i } else { 0 }).sum();
    assert_eq!(in_val, 5);
}

#[test]
fn scenario_5_cz_via_mc_phase_never_fuses_an_engine() {
    let mut q = QUnit::with_seed(2, config(), 5);
    q.mc_phase(&[0], c(-1.0, 0.0), C_ONE, 1);
    assert!(q.is_detached(0));
    assert!(q.is_detached(1));

    let direct = q.prob_parity(0b11);
    assert!(q.is_detached(0));
    assert!(q.is_detached(1));

    let mut reference = QUnit::with_seed(2, config(), 5);
    reference.mc_mtrx(&[0], &m1::z(), 1);
    let expected = reference.prob_parity(0b11);
    assert!((direct - expected).abs() < EPS);
}

#[test]
fn scenario_6_alternating_h_s_sequence_matches_closed_form() {
    let mut q = QUnit::with_seed(1, config(), 6);
    for _ in 0..3 {
        q.h(0);
        q.s(0);
    }
    let a0 = q.get_amplitude(0);
    let a1 = q.get_amplitude(1);

    // Closed form for (S . H)^3 applied to |0>, worked out by direct
    // 2x2 matrix composition.
    let (e0, e1) = closed_form_hs3();
    assert!((a0 - e0).norm() < EPS);
    assert!((a1 - e1).norm() < EPS);
}

fn closed_form_hs3() -> (C, C) {
    let s2 = 1.0 / std::f64::consts::SQRT_2;
    let h = [c(s2, 0.0), c(s2, 0.0), c(s2, 0.0), c(-s2, 0.0)];
    let s = [c(1.0, 0.0), C_ZERO, C_ZERO, c(0.0, 1.0)];
    let mul = |a: [C; 4], b: [C; 4]| {
        [
            a[0] * b[0] + a[1] * b[2],
            a[0] * b[1] + a[1] * b[3],
            a[2] * b[0] + a[3] * b[2],
            a[2] * b[1] + a[3] * b[3],
        ]
    };
    let mut m = [c(1.0, 0.0), C_ZERO, C_ZERO, c(1.0, 0.0)];
    for _ in 0..3 {
        m = mul(s, mul(h, m));
    }
    (m[0], m[2])
}

#[test]
fn p2_local_basis_round_trips_are_no_ops() {
    let mut q = QUnit::with_seed(1, config(), 7);
    let before = (q.get_amplitude(0), q.get_amplitude(1));
    q.h(0);
    q.h(0);
    assert!((q.get_amplitude(0) - before.0).norm() < EPS);
    assert!((q.get_amplitude(1) - before.1).norm() < EPS);

    q.s(0);
    q.is(0);
    assert!((q.get_amplitude(0) - before.0).norm() < EPS);
    assert!((q.get_amplitude(1) - before.1).norm() < EPS);
}

#[test]
fn p7_compose_then_decompose_round_trips_a_fresh_register() {
    let mut a = QUnit::with_seed(2, config(), 8);
    let mut b = QUnit::with_seed(1, config(), 9);
    b.h(0);
    let before = (b.get_amplitude(0), b.get_amplitude(1));

    let offset = a.compose(b);
    let mut recovered = a.decompose(offset, 1).unwrap();
    assert!((recovered.get_amplitude(0) - before.0).norm() < EPS);
    assert!((recovered.get_amplitude(1) - before.1).norm() < EPS);
}

#[test]
fn p8_swap_twice_is_a_no_op() {
    let mut q = QUnit::with_seed(2, config(), 10);
    q.x(0);
    let before = q.get_quantum_state();
    q.swap(0, 1);
    q.swap(0, 1);
    let after = q.get_quantum_state();
    for (x, y) in before.iter().zip(after.iter()) {
        assert!((x - y).norm() < EPS);
    }
}

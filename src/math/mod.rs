//! Complex amplitude primitives shared by every other module.

pub mod bits_iter;

pub use num_complex::Complex;
pub use std::f64::consts::*;

/// Logical/physical qubit index, and engine amplitude index.
pub type N = usize;
/// Signed counterpart of [`N`], used for bit-rotation arithmetic.
pub type Z = isize;
/// Real scalar precision used throughout the crate.
pub type R = f64;
/// Complex amplitude, at precision [`R`].
pub type C = Complex<R>;

/// A dense row-major 2x2 unitary (single-qubit gate matrix).
pub type M1 = [C; 4];
/// A dense row-major 4x4 unitary (two-qubit gate matrix).
pub type M2 = [C; 16];

pub const C_ONE: C = C { re: 1., im: 0. };
pub const C_ZERO: C = C { re: 0., im: 0. };
pub const C_IMAG: C = C { re: 0., im: 1. };
pub const C_NEG_IMAG: C = C { re: 0., im: -1. };

pub const I_POW_TABLE: [C; 4] = [
    C { re: 1., im: 0. },
    C { re: 0., im: 1. },
    C { re: -1., im: 0. },
    C { re: 0., im: -1. },
];

/// Tolerance used for "is this amplitude approximately X" checks across
/// the whole crate.
pub const EPSILON: R = 1e-12;

/// Tolerance on squared norms/probabilities.
pub const EPSILON_SQR: R = EPSILON * EPSILON;

#[inline]
pub fn phase_from_rad(rad: R) -> C {
    C::from_polar(1.0, rad)
}

/// Approximate equality of two reals at [`EPSILON`].
#[inline]
pub fn approx_eq_r(a: R, b: R) -> bool {
    (a - b).abs() <= EPSILON
}

/// Approximate equality of two complex amplitudes at [`EPSILON`], ignoring
/// no global phase (this is a literal, not up-to-global-phase, comparison;
/// callers wanting up-to-global-phase equality should align phases first).
#[inline]
pub fn approx_eq_c(a: C, b: C) -> bool {
    approx_eq_r(a.re, b.re) && approx_eq_r(a.im, b.im)
}

/// Approximate equality of a squared norm against a reference, at
/// [`EPSILON_SQR`]. Norms below this are treated as zero.
#[inline]
pub fn approx_eq_norm_sqr(a: R, b: R) -> bool {
    (a - b).abs() <= EPSILON_SQR
}

#[inline]
pub fn is_norm_negligible(norm_sqr: R) -> bool {
    norm_sqr <= EPSILON_SQR
}

/// Clamp a probability into `[0, 1]`.
#[inline]
pub fn clamp_prob(p: R) -> R {
    p.clamp(0.0, 1.0)
}

/// Polar construction of a unit-magnitude complex phase factor equal to
/// `i^q`, used by basis-rotation closed forms.
#[inline]
pub fn i_pow(q: N) -> C {
    I_POW_TABLE[q & 0b11]
}

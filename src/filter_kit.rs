// Windowed-sinc low-pass design and the fractional-phase wing evaluators.
// The math follows Julius O. Smith's Resample 1.7 kernel (by way of
// libresample): an oversampled right-wing impulse response plus a table of
// first differences for linear interpolation between adjacent slots.

use std::f64::consts::PI;

use crate::coeffs::{FilterTable, NPC};

const IZERO_EPSILON: f64 = 1e-21;

/// Zeroth-order modified Bessel function of the first kind, via its series
/// expansion. Converges quickly for the beta values used here.
fn izero(x: f64) -> f64 {
    let halfx = x / 2.0;
    let mut sum = 1.0;
    let mut u = 1.0;
    let mut n = 1.0;
    loop {
        let mut term = halfx / n;
        n += 1.0;
        term *= term;
        u *= term;
        sum += u;
        if u < IZERO_EPSILON * sum {
            break;
        }
    }
    sum
}

/// Design the right wing of a Kaiser-windowed sinc low-pass filter.
///
/// `nwing` coefficients at `num` table slots per unit of sample phase,
/// cutoff `frq` normalized so 0.5 is Nyquist, Kaiser shape parameter
/// `beta`. Pure and deterministic: identical parameters reproduce the
/// table bit for bit.
pub fn lp_filter(nwing: usize, frq: f64, beta: f64, num: usize) -> Vec<f64> {
    assert!(nwing > 1 && num > 0, "degenerate filter dimensions");
    assert!(
        frq > 0.0 && frq.is_finite() && beta > 0.0 && beta.is_finite(),
        "filter cutoff and beta must be positive and finite"
    );

    // Ideal band-limited interpolator: sinc at the oversampled rate.
    let mut c = vec![0.0f64; nwing];
    c[0] = 2.0 * frq;
    for (i, ci) in c.iter_mut().enumerate().skip(1) {
        let t = PI * i as f64 / num as f64;
        *ci = (2.0 * t * frq).sin() / t;
    }

    // Kaiser window over the wing.
    let ibeta = 1.0 / izero(beta);
    let inm1 = 1.0 / (nwing - 1) as f64;
    for (i, ci) in c.iter_mut().enumerate().skip(1) {
        let t = i as f64 * inm1;
        let arg = (1.0 - t * t).max(0.0);
        *ci *= izero(beta * arg.sqrt()) * ibeta;
    }
    c
}

/// One wing of the band-limited interpolation at a fixed table stride of
/// `NPC` (the pure upsampling case).
///
/// `x_start` indexes the sample under the wing's innermost coefficient and
/// `inc` (+1 right wing, -1 left wing) walks outward from there. `phase` is
/// the fractional position in [0, 1]. With `interp` set, adjacent table
/// slots are blended through the delta table for extra sub-slot accuracy.
pub fn filter_up(
    table: &FilterTable,
    interp: bool,
    x: &[f32],
    x_start: isize,
    phase: f64,
    inc: isize,
) -> f32 {
    let weights = &table.weights;
    let deltas = &table.deltas;

    let ph = phase * NPC as f64;
    let mut hp = ph as usize;
    let mut end = table.nwing;
    if inc == 1 {
        // Right wing drops the outermost coefficient so the two wings
        // never double-count it, and at exactly zero phase skips one
        // stride since the center sample belongs to the left wing.
        end -= 1;
        if ph == 0.0 {
            hp += NPC;
        }
    }

    let mut xi = x_start;
    let mut v = 0.0f32;
    if interp {
        let a = (ph - ph.floor()) as f32;
        while hp < end {
            let t = weights[hp] + deltas[hp] * a;
            v += t * x[xi as usize];
            hp += NPC;
            xi += inc;
        }
    } else {
        while hp < end {
            v += weights[hp] * x[xi as usize];
            hp += NPC;
            xi += inc;
        }
    }
    v
}

/// One wing of the combined up/down (decimating) evaluation: the table
/// stride `dh` is scaled by the factor, widening the filter's support so it
/// low-passes below the output Nyquist rate while interpolating.
pub fn filter_ud(
    table: &FilterTable,
    interp: bool,
    x: &[f32],
    x_start: isize,
    phase: f64,
    inc: isize,
    dh: f64,
) -> f32 {
    let weights = &table.weights;
    let deltas = &table.deltas;

    let mut ho = phase * dh;
    let mut end = table.nwing;
    if inc == 1 {
        end -= 1;
        if phase == 0.0 {
            ho += dh;
        }
    }

    let mut xi = x_start;
    let mut v = 0.0f32;
    if interp {
        loop {
            let hp = ho as usize;
            if hp >= end {
                break;
            }
            let a = (ho - ho.floor()) as f32;
            let t = weights[hp] + deltas[hp] * a;
            v += t * x[xi as usize];
            ho += dh;
            xi += inc;
        }
    } else {
        loop {
            let hp = ho as usize;
            if hp >= end {
                break;
            }
            v += weights[hp] * x[xi as usize];
            ho += dh;
            xi += inc;
        }
    }
    v
}

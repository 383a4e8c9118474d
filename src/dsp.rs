//! Scalar DSP primitives shared by the acquisition path and the pipeline
//! workers. All functions operate on caller-owned slices and may be called
//! concurrently on disjoint data.

use num_complex::Complex32;

const TWO_PI: f32 = 2.0 * std::f32::consts::PI;

/// Rotate `buf` in place by a complex exponential of normalized frequency
/// `freq` (cycles per sample), starting at `phase0` radians.
pub fn apply_pll(buf: &mut [Complex32], freq: f32, phase0: f32) {
    let step = TWO_PI * freq;
    let mut phase = phase0;
    for v in buf.iter_mut() {
        *v *= Complex32::from_polar(1.0, phase);
        phase += step;
        if phase > std::f32::consts::PI {
            phase -= TWO_PI;
        } else if phase < -std::f32::consts::PI {
            phase += TWO_PI;
        }
    }
}

/// Correlate two equal-length slices: `sum(late[i] * conj(early[i]))`.
///
/// The conjugate lands on `early` so that for a cyclic prefix and its data
/// twin the argument of the result carries the sign of the residual
/// frequency offset.
pub fn mul_conj_sum(late: &[Complex32], early: &[Complex32]) -> Complex32 {
    debug_assert_eq!(late.len(), early.len());
    let mut acc = Complex32::new(0.0, 0.0);
    for (a, b) in late.iter().zip(early.iter()) {
        acc += *a * b.conj();
    }
    acc
}

/// Replace each bin with the conjugate product of consecutive bins:
/// `buf[i] = conj(buf[i]) * buf[i+1]`, last bin zeroed.
///
/// `arg` of each product is the phase difference between adjacent bins,
/// which is insensitive to a constant phase shift across the spectrum.
pub fn relative_phase(buf: &mut [Complex32]) {
    let n = buf.len();
    for i in 0..n.saturating_sub(1) {
        buf[i] = buf[i].conj() * buf[i + 1];
    }
    if n > 0 {
        buf[n - 1] = Complex32::new(0.0, 0.0);
    }
}

/// FFT-shifted log-magnitude spectrum: `out[i] = 20*log10(|fft[(i + N/2) % N]|)`.
pub fn magnitude_spectrum(fft_buf: &[Complex32], out: &mut [f32]) {
    let n = fft_buf.len();
    debug_assert_eq!(out.len(), n);
    let m = n / 2;
    for (i, v) in out.iter_mut().enumerate() {
        let j = (i + m) % n;
        *v = 20.0 * fft_buf[j].norm().log10();
    }
}

/// L1 magnitude of one sample.
#[inline]
pub fn l1_norm(v: Complex32) -> f32 {
    v.re.abs() + v.im.abs()
}

/// Mean L1 magnitude over a block.
pub fn l1_average(block: &[Complex32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|v| l1_norm(*v)).sum();
    sum / block.len() as f32
}

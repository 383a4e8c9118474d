//! Pipeline worker: per-symbol PLL derotation, cyclic-prefix phase error,
//! FFT and DQPSK soft-bit emission for one half-open symbol range. The
//! ranges partition all frame symbols plus the trailing null; only the
//! first FFT of each range is visible to the previous worker.

use crate::demod::state::{DemodShared, WorkerHandle};
use crate::dsp;
use num_complex::Complex32;
use std::sync::Arc;

const TWO_PI: f32 = 2.0 * std::f32::consts::PI;

/// Signed soft-decision range expected by the downstream decoder.
pub const SOFT_DECISION_HIGH: f32 = 127.0;

#[inline]
fn to_soft_bit(x: f32) -> i8 {
    // Decoder convention: logical (0, 1) maps to (-high, +high), and the
    // transmitted component is +1 for a logical 0.
    (-x * SOFT_DECISION_HIGH) as i8
}

pub(crate) fn run_worker(
    shared: Arc<DemodShared>,
    me: Arc<WorkerHandle>,
    next: Option<Arc<WorkerHandle>>,
) {
    let params = shared.params;
    let n = params.nb_fft;
    let g = params.nb_cyclic_prefix;
    let s = params.nb_symbol_period;

    let symbol_start = me.symbol_start;
    let symbol_end = me.symbol_end;
    let symbol_end_no_null = symbol_end.min(params.nb_frame_symbols);
    let symbol_end_dqpsk = symbol_end.min(params.nb_frame_symbols - 1);
    // Only a range that owns at least one symbol pair has to wait for its
    // neighbour; the decision is static so event consumption is identical
    // every frame.
    let needs_next_fft = next.is_some() && symbol_end_dqpsk > symbol_start;

    let mut scratch = vec![Complex32::new(0.0, 0.0); shared.fft.get_inplace_scratch_len()];

    while me.start.wait() {
        let freq_offset = shared.freq_offset_snapshot();

        // Derotate every owned symbol in place, with the phase picked up
        // where the previous symbol's rotation left off.
        for i in symbol_start..symbol_end {
            // Safety: symbol ranges are disjoint across workers and the
            // ingest thread never touches the active buffer mid-frame.
            let sym = unsafe { shared.active_frame().range_mut(i * s, s) };
            let cycles = (i * s) as f64 * freq_offset as f64;
            let phase0 = (cycles.fract() * TWO_PI as f64) as f32;
            dsp::apply_pll(sym, freq_offset, phase0);
        }

        // Cyclic prefix self-correlation, null symbol excluded. The sum is
        // published raw; the coordinator divides by the symbol count.
        let mut phase_error_sum = 0.0f32;
        for i in symbol_start..symbol_end_no_null {
            let sym = unsafe { shared.active_frame().range(i * s, s) };
            let acc = dsp::mul_conj_sum(&sym[n..n + g], &sym[..g]);
            phase_error_sum += acc.im.atan2(acc.re);
        }
        *me.phase_error_sum.lock().unwrap() = phase_error_sum;
        me.phase_error_ready.signal();

        // The first FFT of the range unblocks the previous worker's last
        // DQPSK pair, so it is computed and published before the rest.
        compute_fft(&shared, symbol_start, &mut scratch);
        me.first_fft_ready.signal();
        for i in symbol_start + 1..symbol_end {
            compute_fft(&shared, i, &mut scratch);
        }

        if needs_next_fft {
            for i in symbol_start..symbol_end_dqpsk - 1 {
                demodulate_pair(&shared, i);
            }
            if !next.as_ref().unwrap().first_fft_ready.wait() {
                return;
            }
            demodulate_pair(&shared, symbol_end_dqpsk - 1);
        } else {
            for i in symbol_start..symbol_end_dqpsk {
                demodulate_pair(&shared, i);
            }
        }

        me.done.signal();
    }
}

fn compute_fft(shared: &DemodShared, symbol: usize, scratch: &mut [Complex32]) {
    let n = shared.params.nb_fft;
    let g = shared.params.nb_cyclic_prefix;
    let s = shared.params.nb_symbol_period;
    // Cyclic prefix removal: transform the data part only.
    // Safety: the source symbol belongs to this worker's range (or is the
    // trailing null owned by the last range); the destination row is owned
    // by the same range.
    let src = unsafe { shared.active_frame().range(symbol * s + g, n) };
    let dst = unsafe { shared.fft_buffer.range_mut(symbol * n, n) };
    dst.copy_from_slice(src);
    shared.fft.process_with_scratch(dst, scratch);
}

/// DQPSK demodulation of one symbol pair into soft bits: zero-padding
/// removal, differential product, L-infinity normalization, deinterleave
/// and demap.
fn demodulate_pair(shared: &DemodShared, pair: usize) {
    let params = shared.params;
    let n = params.nb_fft;
    let c = params.nb_data_carriers;
    let half = (c / 2) as i32;

    // Safety: the pair's own FFT row is in this worker's range; the row of
    // pair+1 is either owned too or published by the neighbour's first-FFT
    // event before this call.
    let z0 = unsafe { shared.fft_buffer.range(pair * n, n) };
    let z1 = unsafe { shared.fft_buffer.range((pair + 1) * n, n) };
    let vec_out = unsafe { shared.dqpsk_buffer.range_mut(pair * c, c) };
    let bits_out = unsafe { shared.out_bits.range_mut(pair * c * 2, c * 2) };

    // Keep only the carriers that carry information, DC skipped.
    let mut slot = 0usize;
    for k in -half..=half {
        if k == 0 {
            continue;
        }
        let bin = ((n as i32 + k) % n as i32) as usize;
        // arg(z1 * conj(z0)) = arg(z1) - arg(z0)
        vec_out[slot] = z1[bin] * z0[bin].conj();
        slot += 1;
    }

    for (carrier, &mapped) in shared.carrier_mapper.iter().enumerate() {
        let v = vec_out[mapped];
        // L-infinity norm: with real == imag the soft magnitudes stay at
        // full scale instead of the L2 norm's 0.707.
        let a = v.re.abs().max(v.im.abs());
        let (re, im) = if a > 0.0 {
            (v.re / a, v.im / a)
        } else {
            (0.0, 0.0)
        };
        bits_out[carrier] = to_soft_bit(re);
        bits_out[carrier + c] = to_soft_bit(-im);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_bits_saturate_at_decoder_range() {
        assert_eq!(to_soft_bit(1.0), -127);
        assert_eq!(to_soft_bit(-1.0), 127);
        assert_eq!(to_soft_bit(0.0), 0);
        assert_eq!(to_soft_bit(0.5), -63);
    }
}

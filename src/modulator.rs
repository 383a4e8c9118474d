//! OFDM frame synthesis used by the transmitter simulator and the test
//! suites: a zero-power null symbol, the phase reference symbol, then
//! DQPSK-encoded data symbols routed through the carrier interleaver.

use crate::params::OfdmParams;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

pub struct OfdmModulator {
    params: OfdmParams,
    carrier_mapper: Vec<usize>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    prs_fft: Vec<Complex32>,
    prs_time: Vec<Complex32>,
    last_sym_fft: Vec<Complex32>,
    sym_fft: Vec<Complex32>,
    time_buf: Vec<Complex32>,
}

impl OfdmModulator {
    pub fn new(
        params: OfdmParams,
        prs_fft_ref: &[Complex32],
        carrier_mapper: &[usize],
    ) -> anyhow::Result<Self> {
        params.validate()?;
        if prs_fft_ref.len() != params.nb_fft {
            anyhow::bail!(
                "PRS reference must have {} coefficients, got {}",
                params.nb_fft,
                prs_fft_ref.len()
            );
        }
        if carrier_mapper.len() != params.nb_data_carriers {
            anyhow::bail!(
                "carrier mapper must have {} entries, got {}",
                params.nb_data_carriers,
                carrier_mapper.len()
            );
        }

        let n = params.nb_fft;
        let g = params.nb_cyclic_prefix;
        let mut planner = FftPlanner::<f32>::new();
        let ifft = planner.plan_fft_inverse(n);
        let mut scratch = vec![Complex32::new(0.0, 0.0); ifft.get_inplace_scratch_len()];

        // Time-domain PRS with its cyclic prefix, computed once.
        let mut time_buf = prs_fft_ref.to_vec();
        ifft.process_with_scratch(&mut time_buf, &mut scratch);
        let scale = 1.0 / n as f32;
        for v in time_buf.iter_mut() {
            *v *= scale;
        }
        let mut prs_time = vec![Complex32::new(0.0, 0.0); params.nb_symbol_period];
        prs_time[..g].copy_from_slice(&time_buf[n - g..]);
        prs_time[g..].copy_from_slice(&time_buf);

        Ok(Self {
            params,
            carrier_mapper: carrier_mapper.to_vec(),
            ifft,
            scratch,
            prs_fft: prs_fft_ref.to_vec(),
            prs_time,
            last_sym_fft: vec![Complex32::new(0.0, 0.0); n],
            sym_fft: vec![Complex32::new(0.0, 0.0); n],
            time_buf,
        })
    }

    pub fn params(&self) -> &OfdmParams {
        &self.params
    }

    /// Build one complete frame (null, PRS, data symbols) from
    /// `params.frame_bytes()` source bytes, most significant bit first.
    pub fn process_frame(
        &mut self,
        out: &mut [Complex32],
        bytes: &[u8],
    ) -> anyhow::Result<()> {
        let p = self.params;
        if out.len() != p.frame_samples() {
            anyhow::bail!(
                "output must hold {} samples, got {}",
                p.frame_samples(),
                out.len()
            );
        }
        if bytes.len() != p.frame_bytes() {
            anyhow::bail!(
                "frame carries {} bytes, got {}",
                p.frame_bytes(),
                bytes.len()
            );
        }

        let (n, g, s) = (p.nb_fft, p.nb_cyclic_prefix, p.nb_symbol_period);
        let c = p.nb_data_carriers;
        let half = (c / 2) as i32;
        let bytes_per_symbol = c / 4;

        out[..p.nb_null_period].fill(Complex32::new(0.0, 0.0));
        out[p.nb_null_period..p.nb_null_period + s].copy_from_slice(&self.prs_time);
        self.last_sym_fft.copy_from_slice(&self.prs_fft);

        for sym in 0..p.nb_frame_symbols - 1 {
            let block = &bytes[sym * bytes_per_symbol..(sym + 1) * bytes_per_symbol];
            self.sym_fft.fill(Complex32::new(0.0, 0.0));

            for (carrier, &slot) in self.carrier_mapper.iter().enumerate() {
                let b0 = bit_at(block, carrier);
                let b1 = bit_at(block, carrier + c);
                // Unfold the deinterleave slot back to a signed carrier index.
                let k = if (slot as i32) < half {
                    slot as i32 - half
                } else {
                    slot as i32 - half + 1
                };
                let bin = ((n as i32 + k) % n as i32) as usize;
                // The receiver demaps b0 from -Re and b1 from +Im.
                let q = Complex32::new(
                    (1 - 2 * b0 as i32) as f32,
                    (2 * b1 as i32 - 1) as f32,
                ) * std::f32::consts::FRAC_1_SQRT_2;
                self.sym_fft[bin] = self.last_sym_fft[bin] * q;
            }

            self.time_buf.copy_from_slice(&self.sym_fft);
            self.ifft
                .process_with_scratch(&mut self.time_buf, &mut self.scratch);
            let scale = 1.0 / n as f32;
            for v in self.time_buf.iter_mut() {
                *v *= scale;
            }

            let dst_start = p.nb_null_period + (sym + 1) * s;
            let dst = &mut out[dst_start..dst_start + s];
            dst[..g].copy_from_slice(&self.time_buf[n - g..]);
            dst[g..].copy_from_slice(&self.time_buf);

            std::mem::swap(&mut self.last_sym_fft, &mut self.sym_fft);
        }
        Ok(())
    }
}

fn bit_at(block: &[u8], index: usize) -> u8 {
    (block[index / 8] >> (7 - index % 8)) & 1
}

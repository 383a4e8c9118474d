//! The five acquisition states. Each handler consumes a prefix of the
//! chunk it is given and returns the number of samples taken; the driver
//! loop in [`super::OfdmDemodulator::process`] keeps dispatching until the
//! chunk is exhausted.

use super::{OfdmDemodulator, SyncState};
use crate::dsp;
use std::sync::atomic::Ordering;

impl OfdmDemodulator {
    /// Frame synchronisation by power detection: watch decimated L1
    /// windows for a dip below the running average and the rise that ends
    /// it. Window accumulation carries across chunks, so detection points
    /// depend only on the sample stream.
    pub(super) fn find_null_power_dip(&mut self, chunk: &[num_complex::Complex32]) -> usize {
        let cfg = *self.shared.config.lock().unwrap();
        let window = cfg.signal_l1.nb_samples;

        let mut consumed = chunk.len();
        let mut is_end_found = false;
        for (i, &v) in chunk.iter().enumerate() {
            self.signal_average.advance_sample(v, &cfg.signal_l1);
            self.null_window_sum += dsp::l1_norm(v);
            self.null_window_count += 1;
            if self.null_window_count < window {
                continue;
            }
            let l1_avg = self.null_window_sum / window as f32;
            self.null_window_sum = 0.0;
            self.null_window_count = 0;

            if self.is_null_start_found {
                if l1_avg > self.signal_average.average * cfg.null_l1_search.thresh_null_end {
                    is_end_found = true;
                    consumed = i + 1;
                    break;
                }
            } else if l1_avg < self.signal_average.average * cfg.null_l1_search.thresh_null_start
            {
                self.is_null_start_found = true;
            }
        }

        self.null_power_dip_buffer.push(&chunk[..consumed]);
        if !is_end_found {
            return consumed;
        }

        // The captured dip may already contain the head of the PRS; seed
        // the correlation buffer with it so fine time sync can still find
        // the true PRS start.
        let held = {
            let storage = self.correlation_time_buffer.storage_mut();
            self.null_power_dip_buffer.copy_ordered(storage)
        };
        self.correlation_time_buffer.set_len(held);
        self.null_power_dip_buffer.clear();
        self.is_null_start_found = false;

        tracing::debug!(samples = held, "null power dip found");
        self.state = SyncState::ReadingNullPrs;
        consumed
    }

    /// Accumulate the null symbol plus one full PRS period.
    pub(super) fn read_null_prs(&mut self, chunk: &[num_complex::Complex32]) -> usize {
        let consumed = self.correlation_time_buffer.consume(chunk);
        let cfg = self.shared.config.lock().unwrap().signal_l1;
        self.signal_average.advance(&chunk[..consumed], &cfg);

        if self.correlation_time_buffer.is_full() {
            self.state = SyncState::RunningCoarseFreqSync;
        }
        consumed
    }

    /// Integral frequency offset estimation on the captured PRS. The
    /// conjugate-difference spectrum is correlated against the reference
    /// through a product in the time domain; the correlation peak's bin is
    /// the offset in carriers.
    pub(super) fn run_coarse_freq_sync(&mut self) -> usize {
        let sync = self.shared.config.lock().unwrap().sync;
        let params = self.shared.params;
        let n = params.nb_fft;

        if !sync.is_coarse_freq_correction {
            self.shared.freq.lock().unwrap().coarse = 0.0;
            self.state = SyncState::RunningFineTimeSync;
            return 0;
        }

        let prs_start = params.nb_null_period;
        let prs = &self.correlation_time_buffer.as_slice()[prs_start..prs_start + n];
        self.corr_fft_buffer.copy_from_slice(prs);
        self.shared
            .fft
            .process_with_scratch(&mut self.corr_fft_buffer, &mut self.fft_scratch);

        // Phase shifts from symbol timing drop out of the difference
        // between consecutive bins.
        dsp::relative_phase(&mut self.corr_fft_buffer);

        self.corr_ifft_buffer.copy_from_slice(&self.corr_fft_buffer);
        self.ifft
            .process_with_scratch(&mut self.corr_ifft_buffer, &mut self.fft_scratch);
        for (v, reference) in self.corr_ifft_buffer.iter_mut().zip(&self.prs_time_conj) {
            *v *= *reference;
        }

        self.corr_fft_buffer.copy_from_slice(&self.corr_ifft_buffer);
        self.shared
            .fft
            .process_with_scratch(&mut self.corr_fft_buffer, &mut self.fft_scratch);
        dsp::magnitude_spectrum(&self.corr_fft_buffer, &mut self.frequency_response);

        // Zero offset puts the peak at the centre of the shifted spectrum.
        let mid = (n / 2) as i32;
        let max_carrier_offset =
            ((sync.max_coarse_freq_correction_norm * n as f32) as i32).clamp(0, mid);
        let mut peak_index = -max_carrier_offset;
        let mut peak_value = self.frequency_response[(peak_index + mid) as usize];
        for i in -max_carrier_offset..=max_carrier_offset {
            let fft_index = (i + mid) as usize;
            if fft_index == n {
                continue;
            }
            let value = self.frequency_response[fft_index];
            if value > peak_value {
                peak_value = value;
                peak_index = i;
            }
        }

        let predicted_offset = -(peak_index as f32) / n as f32;
        {
            let mut freq = self.shared.freq.lock().unwrap();
            let error = predicted_offset - freq.coarse;

            // A large correction must land immediately or the PRS impulse
            // stays buried; near lock the slow update keeps the estimate
            // from oscillating between two adjacent bins.
            let large_offset_threshold = 1.5 / n as f32;
            let is_fast_update =
                error.abs() > large_offset_threshold || !freq.is_coarse_found;
            let beta = if is_fast_update {
                1.0
            } else {
                sync.coarse_freq_slow_beta
            };
            let delta = beta * error;

            freq.coarse += delta;
            freq.is_coarse_found = true;
            // Counter adjust so the combined offset stays put while the
            // coarse estimate hops between bins.
            freq.fine = super::state::wrap_fine(freq.fine - delta, params.freq_bin_spacing());

            if delta != 0.0 {
                tracing::debug!(
                    coarse = freq.coarse,
                    delta,
                    "coarse frequency updated"
                );
            }
        }

        self.state = SyncState::RunningFineTimeSync;
        0
    }

    /// Symbol timing synchronisation: derotate the captured PRS, correlate
    /// against the reference in the frequency domain and search the
    /// impulse response for a distance-weighted peak.
    pub(super) fn run_fine_time_sync(&mut self) -> usize {
        let sync = self.shared.config.lock().unwrap().sync;
        let params = self.shared.params;
        let n = params.nb_fft;
        let g = params.nb_cyclic_prefix;
        let s = params.nb_symbol_period;
        let p = params.nb_null_period;

        let freq_offset = self.shared.freq_offset_snapshot();
        {
            let prs = &self.correlation_time_buffer.as_slice()[p..p + n];
            self.corr_ifft_buffer.copy_from_slice(prs);
        }
        dsp::apply_pll(&mut self.corr_ifft_buffer, freq_offset, 0.0);

        self.corr_fft_buffer.copy_from_slice(&self.corr_ifft_buffer);
        self.shared
            .fft
            .process_with_scratch(&mut self.corr_fft_buffer, &mut self.fft_scratch);
        for (v, reference) in self.corr_fft_buffer.iter_mut().zip(&self.prs_fft_conj) {
            *v *= *reference;
        }
        self.corr_ifft_buffer.copy_from_slice(&self.corr_fft_buffer);
        self.ifft
            .process_with_scratch(&mut self.corr_ifft_buffer, &mut self.fft_scratch);
        for (out, v) in self.impulse_response.iter_mut().zip(&self.corr_ifft_buffer) {
            *out = 20.0 * v.norm().log10();
        }

        // While still locking on, frequency offsets can spray spurious
        // peaks across the response; weight each candidate by its distance
        // from the expected lobe one cyclic prefix in. The correlation is
        // cyclic, so the lag is read as a signed value around that lobe: a
        // power-dip detection that overruns a short cyclic prefix wraps the
        // peak to the top of the response.
        let decay_weight = 1.0 - sync.impulse_peak_distance_probability;
        let half = (n / 2) as i32;
        let mut impulse_avg = 0.0f32;
        let mut peak_value = self.impulse_response[0];
        let mut peak_lag = -(g as i32);
        for (i, &response) in self.impulse_response.iter().enumerate() {
            let raw_lag = i as i32 - g as i32;
            let lag = if raw_lag >= half { raw_lag - n as i32 } else { raw_lag };
            let distance = lag.abs() as f32 / s as f32;
            let probability = 1.0 - decay_weight * distance;
            let weighted_value = probability * response;
            impulse_avg += response;
            if weighted_value > peak_value {
                peak_value = weighted_value;
                peak_lag = lag;
            }
        }
        impulse_avg /= n as f32;

        if peak_value - impulse_avg < sync.impulse_peak_threshold_db {
            self.reset();
            return 0;
        }

        // The correlation lobe sits one cyclic prefix past the PRS start;
        // rewind so the copied slice begins at the prefix.
        let offset = peak_lag as isize;
        let prs_start = (p as isize + offset) as usize;
        let prs_len = (s as isize - offset) as usize;
        {
            let src = &self.correlation_time_buffer.as_slice()[prs_start..prs_start + prs_len];
            // Safety: the pipeline only touches the active buffer; the
            // inactive buffer belongs to the reader until the next swap.
            let dst = unsafe { self.shared.inactive_frame().range_mut(0, prs_len) };
            dst.copy_from_slice(src);
        }
        self.inactive_len = prs_len;
        self.correlation_time_buffer.clear();
        self.shared
            .fine_time_offset
            .store(offset as i32, Ordering::Relaxed);

        tracing::debug!(offset, "fine time sync locked");
        self.state = SyncState::ReadingSymbols;
        0
    }

    /// Fill the inactive buffer with all frame symbols plus the trailing
    /// null, then swap it in and hand the frame to the coordinator.
    pub(super) fn read_symbols(&mut self, chunk: &[num_complex::Complex32]) -> usize {
        let params = self.shared.params;
        let capacity = params.frame_samples();

        let n_take = (capacity - self.inactive_len).min(chunk.len());
        {
            // Safety: the inactive buffer belongs to the reader thread.
            let dst = unsafe {
                self.shared
                    .inactive_frame()
                    .range_mut(self.inactive_len, n_take)
            };
            dst.copy_from_slice(&chunk[..n_take]);
        }
        self.inactive_len += n_take;
        let cfg = self.shared.config.lock().unwrap().signal_l1;
        self.signal_average.advance(&chunk[..n_take], &cfg);

        if self.inactive_len < capacity {
            return n_take;
        }

        // Keep the trailing null as the next frame's acquisition prefix so
        // fine time sync has the leading context again.
        {
            let null_start = params.nb_frame_symbols * params.nb_symbol_period;
            // Safety: still the reader's buffer; the swap happens below.
            let null_sym = unsafe {
                self.shared
                    .inactive_frame()
                    .range(null_start, params.nb_null_period)
            };
            self.correlation_time_buffer.fill_from(null_sym);
        }

        // Frame handoff: wait out the previous frame, swap the ingest
        // buffers and release the coordinator on the fresh one.
        if !self.shared.coordinator.end.wait() {
            return n_take;
        }
        self.shared.swap_frame_buffers();
        self.inactive_len = 0;
        self.shared.coordinator.start.signal();

        // Stay locked: the next frame starts at the null we just stashed.
        self.state = SyncState::ReadingNullPrs;
        n_take
    }

    /// Collapse to desynchronisation: back to the power-dip search with
    /// every synchronisation estimate invalidated.
    pub(super) fn reset(&mut self) {
        self.state = SyncState::FindingNullPowerDip;
        self.correlation_time_buffer.clear();
        self.null_power_dip_buffer.clear();
        self.is_null_start_found = false;
        self.null_window_sum = 0.0;
        self.null_window_count = 0;

        let total = self
            .shared
            .total_frames_desync
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        // A stale fine offset would degrade the next impulse-response
        // search, so the frequency estimates go too.
        {
            let mut freq = self.shared.freq.lock().unwrap();
            freq.coarse = 0.0;
            freq.fine = 0.0;
            freq.is_coarse_found = false;
        }
        self.shared.fine_time_offset.store(0, Ordering::Relaxed);

        tracing::debug!(total_desync = total, "desynchronised, restarting acquisition");
    }
}

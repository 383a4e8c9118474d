//! OFDM synchronization and demodulation engine.
//!
//! One `OfdmDemodulator` owns a coordinator thread and a set of pipeline
//! worker threads for its whole lifetime. The caller feeds baseband samples
//! through [`OfdmDemodulator::process`] in chunks of any size; whenever a
//! complete frame has been captured and demodulated, every registered
//! observer receives the soft-decision bit block on the coordinator thread.

use crate::buffer::{CircularAccumulator, FillBuffer};
use crate::config::{DemodConfig, SignalL1Config};
use crate::dsp;
use crate::params::OfdmParams;
use anyhow::Context;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

mod acquire;
mod coordinator;
mod event;
mod pipeline;
mod state;

pub use pipeline::SOFT_DECISION_HIGH;

use state::{CoordinatorHandle, DemodShared, FreqState, SharedSlice, WorkerHandle};

/// Acquisition state of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    FindingNullPowerDip,
    ReadingNullPrs,
    RunningCoarseFreqSync,
    RunningFineTimeSync,
    ReadingSymbols,
}

/// Running L1 signal average, updated on decimated windows at
/// stream-defined positions so results do not depend on chunk slicing.
#[derive(Debug, Default)]
struct SignalAverage {
    average: f32,
    window_sum: f32,
    stride_pos: usize,
}

impl SignalAverage {
    fn advance_sample(&mut self, v: Complex32, cfg: &SignalL1Config) {
        let window = cfg.nb_samples;
        let stride = window * cfg.nb_decimate;
        if self.stride_pos < window {
            self.window_sum += dsp::l1_norm(v);
            if self.stride_pos + 1 == window {
                let l1_avg = self.window_sum / window as f32;
                self.average =
                    cfg.update_beta * self.average + (1.0 - cfg.update_beta) * l1_avg;
                self.window_sum = 0.0;
            }
        }
        self.stride_pos += 1;
        if self.stride_pos >= stride {
            self.stride_pos = 0;
        }
    }

    fn advance(&mut self, block: &[Complex32], cfg: &SignalL1Config) {
        for &v in block {
            self.advance_sample(v, cfg);
        }
    }
}

pub struct OfdmDemodulator {
    shared: Arc<DemodShared>,
    state: SyncState,

    // Conjugated references for fine time and coarse frequency correlation.
    prs_fft_conj: Vec<Complex32>,
    prs_time_conj: Vec<Complex32>,

    // Acquisition scratch, reader-thread only.
    ifft: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<Complex32>,
    corr_fft_buffer: Vec<Complex32>,
    corr_ifft_buffer: Vec<Complex32>,
    impulse_response: Vec<f32>,
    frequency_response: Vec<f32>,

    null_power_dip_buffer: CircularAccumulator,
    correlation_time_buffer: FillBuffer,
    inactive_len: usize,

    signal_average: SignalAverage,
    null_window_sum: f32,
    null_window_count: usize,
    is_null_start_found: bool,

    coordinator_thread: Option<JoinHandle<()>>,
    worker_threads: Vec<JoinHandle<()>>,
}

impl OfdmDemodulator {
    /// Build the engine and spawn its threads.
    ///
    /// `prs_fft_ref` holds the frequency-domain phase reference symbol and
    /// `carrier_mapper` the deinterleave permutation, both for the selected
    /// transmission mode. `nb_desired_threads` pins the worker count;
    /// `None` uses the hardware parallelism minus one core reserved for the
    /// ingest and coordinator path.
    pub fn new(
        params: OfdmParams,
        prs_fft_ref: &[Complex32],
        carrier_mapper: &[usize],
        config: DemodConfig,
        nb_desired_threads: Option<usize>,
    ) -> anyhow::Result<Self> {
        params.validate()?;
        config.validate()?;
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
        if carrier_mapper
            .iter()
            .any(|&slot| slot >= params.nb_data_carriers)
        {
            anyhow::bail!("carrier mapper entry out of range");
        }

        let n = params.nb_fft;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut fft_scratch = vec![Complex32::new(0.0, 0.0); scratch_len];

        // Fine time sync correlates in the frequency domain, so the FFT
        // reference is stored conjugated.
        let prs_fft_conj: Vec<Complex32> = prs_fft_ref.iter().map(|v| v.conj()).collect();

        // Coarse frequency sync correlates in the time domain against the
        // conjugate-difference spectrum of the reference, also conjugated.
        let mut prs_time_conj = prs_fft_ref.to_vec();
        dsp::relative_phase(&mut prs_time_conj);
        ifft.process_with_scratch(&mut prs_time_conj, &mut fft_scratch);
        for v in prs_time_conj.iter_mut() {
            *v = v.conj();
        }

        let nb_symbol_slots = params.nb_frame_symbols + 1;
        let nb_threads = match nb_desired_threads {
            Some(count) => count.clamp(1, nb_symbol_slots),
            None => {
                let total = std::thread::available_parallelism()
                    .map(|v| v.get())
                    .unwrap_or(1);
                // Leave one core to the ingest and coordinator path.
                let usable = if total > 1 { total - 1 } else { 1 };
                usable.clamp(1, nb_symbol_slots)
            }
        };

        let workers: Vec<Arc<WorkerHandle>> = worker_ranges(nb_symbol_slots, nb_threads)
            .into_iter()
            .map(|(start, end)| Arc::new(WorkerHandle::new(start, end)))
            .collect();

        let frame_len = params.frame_samples();
        let shared = Arc::new(DemodShared {
            params,
            config: Mutex::new(config),
            carrier_mapper: carrier_mapper.to_vec(),
            fft,
            frame_buffers: [
                SharedSlice::new(frame_len, Complex32::new(0.0, 0.0)),
                SharedSlice::new(frame_len, Complex32::new(0.0, 0.0)),
            ],
            active_index: AtomicUsize::new(0),
            fft_buffer: SharedSlice::new(nb_symbol_slots * n, Complex32::new(0.0, 0.0)),
            dqpsk_buffer: SharedSlice::new(
                (params.nb_frame_symbols - 1) * params.nb_data_carriers,
                Complex32::new(0.0, 0.0),
            ),
            out_bits: SharedSlice::new(params.frame_bits(), 0i8),
            freq: Mutex::new(FreqState::default()),
            coordinator: CoordinatorHandle::new(),
            workers,
            total_frames_read: AtomicU64::new(0),
            total_frames_desync: AtomicU64::new(0),
            fine_time_offset: AtomicI32::new(0),
            observers: Mutex::new(Vec::new()),
        });

        let coordinator_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("ofdm-coordinator".into())
                .spawn(move || coordinator::run_coordinator(shared))
                .context("spawn coordinator thread")?
        };

        let mut worker_threads = Vec::with_capacity(nb_threads);
        for index in 0..shared.workers.len() {
            let shared_for_worker = Arc::clone(&shared);
            let me = Arc::clone(&shared.workers[index]);
            let next = shared.workers.get(index + 1).map(Arc::clone);
            let handle = std::thread::Builder::new()
                .name(format!("ofdm-worker-{index}"))
                .spawn(move || pipeline::run_worker(shared_for_worker, me, next))
                .context("spawn pipeline worker thread")?;
            worker_threads.push(handle);
        }

        tracing::debug!(
            nb_threads,
            nb_fft = n,
            nb_frame_symbols = params.nb_frame_symbols,
            "demodulator started"
        );

        Ok(Self {
            shared,
            state: SyncState::FindingNullPowerDip,
            prs_fft_conj,
            prs_time_conj,
            ifft,
            fft_scratch,
            corr_fft_buffer: vec![Complex32::new(0.0, 0.0); n],
            corr_ifft_buffer: vec![Complex32::new(0.0, 0.0); n],
            impulse_response: vec![0.0; n],
            frequency_response: vec![0.0; n],
            null_power_dip_buffer: CircularAccumulator::new(params.nb_null_period),
            correlation_time_buffer: FillBuffer::new(
                params.nb_null_period + params.nb_symbol_period,
            ),
            inactive_len: 0,
            signal_average: SignalAverage::default(),
            null_window_sum: 0.0,
            null_window_count: 0,
            is_null_start_found: false,
            coordinator_thread: Some(coordinator_thread),
            worker_threads,
        })
    }

    /// Feed a chunk of baseband samples. May hand off at most one frame per
    /// `frame_samples()` consumed; blocks only at the frame handoff, and
    /// only until the previous frame has been demodulated.
    pub fn process(&mut self, buf: &[Complex32]) {
        let mut index = 0;
        while index < buf.len() {
            let chunk = &buf[index..];
            let consumed = match self.state {
                SyncState::FindingNullPowerDip => self.find_null_power_dip(chunk),
                SyncState::ReadingNullPrs => self.read_null_prs(chunk),
                SyncState::RunningCoarseFreqSync => self.run_coarse_freq_sync(),
                SyncState::RunningFineTimeSync => self.run_fine_time_sync(),
                SyncState::ReadingSymbols => self.read_symbols(chunk),
            };
            index += consumed;
        }
    }

    /// Register an observer for completed frames. Callbacks run on the
    /// coordinator thread and must not block.
    pub fn on_frame<F>(&self, callback: F)
    where
        F: FnMut(&[i8]) + Send + 'static,
    {
        self.shared.observers.lock().unwrap().push(Box::new(callback));
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn config(&self) -> DemodConfig {
        *self.shared.config.lock().unwrap()
    }

    pub fn set_config(&self, config: DemodConfig) -> anyhow::Result<()> {
        config.validate()?;
        *self.shared.config.lock().unwrap() = config;
        Ok(())
    }

    pub fn params(&self) -> &OfdmParams {
        &self.shared.params
    }

    pub fn total_frames_read(&self) -> u64 {
        self.shared.total_frames_read.load(Ordering::Relaxed)
    }

    pub fn total_frames_desync(&self) -> u64 {
        self.shared.total_frames_desync.load(Ordering::Relaxed)
    }

    /// Integral frequency offset, normalized to the sampling rate.
    pub fn coarse_freq_offset(&self) -> f32 {
        self.shared.freq.lock().unwrap().coarse
    }

    /// Fractional frequency offset, normalized to the sampling rate.
    pub fn fine_freq_offset(&self) -> f32 {
        self.shared.freq.lock().unwrap().fine
    }

    /// Sample offset found by the last fine time synchronisation.
    pub fn fine_time_offset(&self) -> i32 {
        self.shared.fine_time_offset.load(Ordering::Relaxed)
    }

    /// Running L1 magnitude average used by the null detector.
    pub fn signal_l1_average(&self) -> f32 {
        self.signal_average.average
    }

    /// Log-magnitude impulse response of the last PRS correlation.
    pub fn impulse_response(&self) -> &[f32] {
        &self.impulse_response
    }
}

impl Drop for OfdmDemodulator {
    fn drop(&mut self) {
        // The coordinator finishes any in-flight frame before it observes
        // the stop, so by the time it joins all workers are parked.
        self.shared.coordinator.stop();
        if let Some(handle) = self.coordinator_thread.take() {
            let _ = handle.join();
        }
        for worker in &self.shared.workers {
            worker.stop();
        }
        for handle in self.worker_threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Split `0..nb_symbols` into `nb_threads` contiguous ranges; the last
/// range absorbs the remainder.
fn worker_ranges(nb_symbols: usize, nb_threads: usize) -> Vec<(usize, usize)> {
    debug_assert!(nb_threads >= 1 && nb_threads <= nb_symbols);
    let mut ranges = Vec::with_capacity(nb_threads);
    let mut start = 0usize;
    for i in 0..nb_threads {
        let remaining_symbols = nb_symbols - start;
        let remaining_threads = nb_threads - i;
        let count = remaining_symbols.div_ceil(remaining_threads);
        let end = if i == nb_threads - 1 {
            nb_symbols
        } else {
            start + count
        };
        ranges.push((start, end));
        start = end;
    }
    ranges
}

#[cfg(test)]
mod tests;

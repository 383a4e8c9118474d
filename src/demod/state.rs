//! State shared between the ingest caller, the coordinator and the pipeline
//! workers: the double-buffered frame store, the per-frame work buffers, the
//! frequency offsets and the observability counters.

use crate::config::DemodConfig;
use crate::demod::event::Event;
use crate::params::OfdmParams;
use num_complex::Complex32;
use rustfft::Fft;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed-size storage accessed by several threads through disjoint ranges.
///
/// The engine's barriers serialize every access: workers touch only their
/// own symbol range between the start and done events, the ingest thread
/// touches only the inactive frame buffer, and whole-slice reads happen
/// only while all writers are parked. Callers assert that discipline at
/// each unsafe call site.
pub(crate) struct SharedSlice<T> {
    cell: UnsafeCell<Box<[T]>>,
}

unsafe impl<T: Send + Sync> Sync for SharedSlice<T> {}
unsafe impl<T: Send> Send for SharedSlice<T> {}

impl<T: Clone> SharedSlice<T> {
    pub fn new(len: usize, fill: T) -> Self {
        Self {
            cell: UnsafeCell::new(vec![fill; len].into_boxed_slice()),
        }
    }
}

impl<T> SharedSlice<T> {
    /// # Safety
    /// No other live reference may overlap `start..start + len`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn range_mut(&self, start: usize, len: usize) -> &mut [T] {
        &mut (*self.cell.get().as_mut().unwrap())[start..start + len]
    }

    /// # Safety
    /// No live mutable reference may overlap `start..start + len`.
    pub unsafe fn range(&self, start: usize, len: usize) -> &[T] {
        &(*self.cell.get().as_ref().unwrap())[start..start + len]
    }

    /// # Safety
    /// No live mutable reference may exist anywhere in the slice.
    pub unsafe fn whole(&self) -> &[T] {
        &(*self.cell.get().as_ref().unwrap())[..]
    }
}

/// Frequency offsets, both normalized to the sampling rate, under one lock
/// so the reader thread's coarse counter-adjust and the coordinator's fine
/// update cannot interleave. Workers snapshot the sum once per frame.
#[derive(Debug, Default)]
pub(crate) struct FreqState {
    pub coarse: f32,
    pub fine: f32,
    pub is_coarse_found: bool,
}

/// One pipeline worker's rendezvous points and published phase error.
pub(crate) struct WorkerHandle {
    pub symbol_start: usize,
    pub symbol_end: usize,
    pub start: Event,
    pub phase_error_ready: Event,
    pub first_fft_ready: Event,
    pub done: Event,
    pub phase_error_sum: Mutex<f32>,
}

impl WorkerHandle {
    pub fn new(symbol_start: usize, symbol_end: usize) -> Self {
        Self {
            symbol_start,
            symbol_end,
            start: Event::new(false),
            phase_error_ready: Event::new(false),
            first_fft_ready: Event::new(false),
            done: Event::new(false),
            phase_error_sum: Mutex::new(0.0),
        }
    }

    pub fn stop(&self) {
        self.start.stop();
        self.phase_error_ready.stop();
        self.first_fft_ready.stop();
        self.done.stop();
    }
}

/// Ingest <-> coordinator rendezvous. The end event starts raised so the
/// first frame can be handed over without a predecessor.
pub(crate) struct CoordinatorHandle {
    pub start: Event,
    pub end: Event,
}

impl CoordinatorHandle {
    pub fn new() -> Self {
        Self {
            start: Event::new(false),
            end: Event::new(true),
        }
    }

    pub fn stop(&self) {
        self.start.stop();
        self.end.stop();
    }
}

pub(crate) struct DemodShared {
    pub params: OfdmParams,
    pub config: Mutex<DemodConfig>,
    pub carrier_mapper: Vec<usize>,
    pub fft: Arc<dyn Fft<f32>>,

    /// Double-buffered ingest: `frame_buffers[active_index]` belongs to the
    /// pipeline between the start and end frame events, the other buffer to
    /// the ingest thread.
    pub frame_buffers: [SharedSlice<Complex32>; 2],
    pub active_index: AtomicUsize,

    /// FFT results for all frame symbols plus the trailing null.
    pub fft_buffer: SharedSlice<Complex32>,
    /// Differential products per symbol pair.
    pub dqpsk_buffer: SharedSlice<Complex32>,
    /// Soft output block handed to observers.
    pub out_bits: SharedSlice<i8>,

    pub freq: Mutex<FreqState>,
    pub coordinator: CoordinatorHandle,
    pub workers: Vec<Arc<WorkerHandle>>,

    pub total_frames_read: AtomicU64,
    pub total_frames_desync: AtomicU64,
    pub fine_time_offset: AtomicI32,

    #[allow(clippy::type_complexity)]
    pub observers: Mutex<Vec<Box<dyn FnMut(&[i8]) + Send>>>,
}

impl DemodShared {
    pub fn active_frame(&self) -> &SharedSlice<Complex32> {
        &self.frame_buffers[self.active_index.load(Ordering::Acquire)]
    }

    pub fn inactive_frame(&self) -> &SharedSlice<Complex32> {
        &self.frame_buffers[1 - self.active_index.load(Ordering::Acquire)]
    }

    pub fn swap_frame_buffers(&self) {
        let active = self.active_index.load(Ordering::Acquire);
        self.active_index.store(1 - active, Ordering::Release);
    }

    /// Apply a fine frequency delta, keeping the result inside the wrap
    /// bound.
    pub fn update_fine_freq(&self, delta: f32) {
        let mut freq = self.freq.lock().unwrap();
        freq.fine = wrap_fine(freq.fine + delta, self.params.freq_bin_spacing());
    }

    /// Per-frame snapshot of the combined frequency correction.
    pub fn freq_offset_snapshot(&self) -> f32 {
        let freq = self.freq.lock().unwrap();
        freq.coarse + freq.fine
    }
}

/// Wrap a fine frequency value just past half a carrier spacing, so the
/// combined coarse + fine offset cannot run away when the coarse estimate
/// sits between two bins.
pub(crate) fn wrap_fine(value: f32, bin_spacing: f32) -> f32 {
    let margin = 1.01;
    value % (0.5 * bin_spacing * margin)
}

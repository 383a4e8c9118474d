//! Coordinator thread: releases the pipeline workers for each frame, folds
//! their cyclic-prefix phase errors into the fine frequency feedback and
//! publishes the finished soft-bit block to the observers.

use crate::demod::state::DemodShared;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const TWO_PI: f32 = 2.0 * std::f32::consts::PI;

pub(crate) fn run_coordinator(shared: Arc<DemodShared>) {
    let nb_frame_symbols = shared.params.nb_frame_symbols as f32;

    while shared.coordinator.start.wait() {
        for worker in &shared.workers {
            worker.start.signal();
        }

        for worker in &shared.workers {
            if !worker.phase_error_ready.wait() {
                return;
            }
        }

        // Fractional frequency estimation: the cyclic prefix equals its
        // data twin, so without any offset the average conjugate-product
        // phase is zero; a residual w1 shows up as w1 / w_bin * 2*pi.
        let mut total_phase_error = 0.0f32;
        for worker in &shared.workers {
            total_phase_error += *worker.phase_error_sum.lock().unwrap();
        }
        let average_phase_error = total_phase_error / nb_frame_symbols;
        let fine_freq_error =
            shared.params.freq_bin_spacing() * average_phase_error / TWO_PI;
        let beta = shared.config.lock().unwrap().sync.fine_freq_update_beta;
        shared.update_fine_freq(-beta * fine_freq_error);

        for worker in &shared.workers {
            if !worker.done.wait() {
                return;
            }
        }

        let total = shared.total_frames_read.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(
            frame = total,
            phase_error = average_phase_error,
            "frame demodulated"
        );

        {
            // Safety: all workers are parked past their done barrier and the
            // next frame cannot start until the end event below is consumed.
            let bits = unsafe { shared.out_bits.whole() };
            let mut observers = shared.observers.lock().unwrap();
            for callback in observers.iter_mut() {
                callback(bits);
            }
        }

        shared.coordinator.end.signal();
    }
}

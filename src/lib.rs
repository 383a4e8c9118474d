//! OFDM-DQPSK receiver front-end for a terrestrial digital audio broadcast.
//!
//! The crate consumes baseband complex samples at 2.048 MS/s and produces,
//! per transmission frame, a block of soft-decision bits ready for
//! forward-error-correction decoding. The [`demod::OfdmDemodulator`] engine
//! carries the synchronisation machinery: null-symbol power detection,
//! integral and fractional frequency-offset estimation, fine time
//! synchronisation by impulse-response correlation, and a multi-threaded
//! per-symbol FFT + differential demodulation pipeline fed through a
//! double-buffered ingest path.
//!
//! [`modulator::OfdmModulator`] synthesizes matching frames for test
//! signals; it backs the `simulate_transmitter` binary.

pub mod buffer;
pub mod config;
pub mod demod;
pub mod dsp;
pub mod modulator;
pub mod params;
pub mod reference;
pub mod scrambler;

pub use config::DemodConfig;
pub use demod::{OfdmDemodulator, SyncState};
pub use modulator::OfdmModulator;
pub use params::{OfdmParams, TransmissionMode};

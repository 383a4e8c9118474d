use super::*;
use crate::config::DemodConfig;
use crate::modulator::OfdmModulator;
use crate::params::{OfdmParams, TransmissionMode, SAMPLE_RATE_HZ};
use crate::reference;
use crate::scrambler::Scrambler;
use num_complex::Complex32;
use std::sync::{Arc, Mutex};

struct TestSignal {
    params: OfdmParams,
    prs: Vec<Complex32>,
    mapper: Vec<usize>,
    frame: Vec<Complex32>,
    bytes: Vec<u8>,
}

fn synthesize(mode: TransmissionMode) -> TestSignal {
    let params = OfdmParams::from_mode(mode);
    let prs = reference::prs_fft_reference(mode, &params);
    let mapper = reference::carrier_mapper(&params);
    let bytes = Scrambler::sequence(params.frame_bytes());
    let mut modulator = OfdmModulator::new(params, &prs, &mapper).unwrap();
    let mut frame = vec![Complex32::new(0.0, 0.0); params.frame_samples()];
    modulator.process_frame(&mut frame, &bytes).unwrap();
    TestSignal {
        params,
        prs,
        mapper,
        frame,
        bytes,
    }
}

fn repeat_frames(signal: &TestSignal, count: usize) -> Vec<Complex32> {
    let mut stream = Vec::with_capacity(signal.frame.len() * count);
    for _ in 0..count {
        stream.extend_from_slice(&signal.frame);
    }
    stream
}

fn shift_carrier(stream: &mut [Complex32], freq_hz: f32) {
    crate::dsp::apply_pll(stream, freq_hz / SAMPLE_RATE_HZ, 0.0);
}

fn make_demod(signal: &TestSignal, nb_threads: usize) -> OfdmDemodulator {
    OfdmDemodulator::new(
        signal.params,
        &signal.prs,
        &signal.mapper,
        DemodConfig::for_params(&signal.params),
        Some(nb_threads),
    )
    .unwrap()
}

type FrameLog = Arc<Mutex<Vec<Vec<i8>>>>;

fn collect_frames(demod: &OfdmDemodulator) -> FrameLog {
    let frames: FrameLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    demod.on_frame(move |bits| sink.lock().unwrap().push(bits.to_vec()));
    frames
}

/// Positive soft values decode as logical ones; pack most significant bit
/// first, mirroring the transmitter's bit layout.
fn hard_decision_bytes(bits: &[i8]) -> Vec<u8> {
    bits.chunks_exact(8)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0u8, |acc, &soft| (acc << 1) | u8::from(soft > 0))
        })
        .collect()
}

#[test]
fn clean_mode_i_frame_recovers_source_bytes() {
    let signal = synthesize(TransmissionMode::I);
    let stream = repeat_frames(&signal, 4);

    let mut demod = make_demod(&signal, 4);
    let frames = collect_frames(&demod);
    demod.process(&stream);

    // Lock happens on the second frame's null symbol.
    assert!(demod.total_frames_read() >= 1, "no frame within 4 periods");
    assert_eq!(demod.total_frames_desync(), 0);
    drop(demod);

    let frames = frames.lock().unwrap();
    assert!(!frames.is_empty());
    for bits in frames.iter() {
        assert_eq!(bits.len(), signal.params.frame_bits());
        assert_eq!(hard_decision_bytes(bits), signal.bytes);
    }
}

#[test]
fn small_carrier_offset_converges_to_fine_correction() {
    let signal = synthesize(TransmissionMode::I);
    let shift_hz = 330.0f32;
    let mut stream = repeat_frames(&signal, 8);
    shift_carrier(&mut stream, shift_hz);

    let mut demod = make_demod(&signal, 4);
    let frames = collect_frames(&demod);
    demod.process(&stream);

    let bin_spacing = signal.params.freq_bin_spacing();
    let shift_norm = shift_hz / SAMPLE_RATE_HZ;

    // 330 Hz is a third of a carrier spacing: the integral estimate stays
    // inside one bin and the cyclic-prefix loop absorbs the rest.
    let coarse = demod.coarse_freq_offset();
    assert!(
        coarse.abs() < bin_spacing,
        "coarse {coarse} should be below one bin"
    );
    let residual = shift_norm + coarse + demod.fine_freq_offset();
    assert!(
        residual.abs() < 0.1 * bin_spacing,
        "residual {residual} vs bin {bin_spacing}"
    );
    assert!(demod.total_frames_read() >= 3);
    drop(demod);

    let frames = frames.lock().unwrap();
    let last = frames.last().expect("frames demodulated");
    assert_eq!(hard_decision_bytes(last), signal.bytes);
}

#[test]
fn large_carrier_offset_is_absorbed_by_coarse_correction() {
    let signal = synthesize(TransmissionMode::I);
    let shift_hz = 8000.0f32;
    let mut stream = repeat_frames(&signal, 6);
    shift_carrier(&mut stream, shift_hz);

    let mut demod = make_demod(&signal, 4);
    let frames = collect_frames(&demod);
    demod.process(&stream);

    assert!(
        demod.total_frames_desync() <= 1,
        "desyncs: {}",
        demod.total_frames_desync()
    );
    assert!(demod.total_frames_read() >= 2);

    let bin_spacing = signal.params.freq_bin_spacing();
    let coarse = demod.coarse_freq_offset();
    let expected = -shift_hz / SAMPLE_RATE_HZ;
    assert!(
        (coarse - expected).abs() <= bin_spacing,
        "coarse {coarse} vs expected {expected}"
    );
    drop(demod);

    let frames = frames.lock().unwrap();
    let last = frames.last().expect("frames demodulated");
    assert_eq!(hard_decision_bytes(last), signal.bytes);
}

#[test]
fn lock_is_independent_of_stream_start_offset() {
    let signal = synthesize(TransmissionMode::II);
    let frame_len = signal.params.frame_samples();
    let stream = repeat_frames(&signal, 5);

    for start in [
        0usize,
        1,
        97,
        1000,
        signal.params.nb_null_period - 1,
        signal.params.nb_null_period,
        signal.params.nb_symbol_period + 13,
        frame_len / 2,
    ] {
        let mut demod = make_demod(&signal, 3);
        let frames = collect_frames(&demod);
        demod.process(&stream[start..]);
        assert!(
            demod.total_frames_read() >= 1,
            "no lock with start offset {start}"
        );
        drop(demod);

        let frames = frames.lock().unwrap();
        let last = frames.last().expect("frames demodulated");
        assert_eq!(
            hard_decision_bytes(last),
            signal.bytes,
            "start offset {start}"
        );
    }
}

#[test]
fn zeroed_symbol_burst_does_not_break_lock() {
    let signal = synthesize(TransmissionMode::I);
    let params = signal.params;
    let mut stream = repeat_frames(&signal, 6);

    // Blank one mid-frame data symbol in the third frame.
    let burst_start =
        2 * params.frame_samples() + params.nb_null_period + 10 * params.nb_symbol_period;
    stream[burst_start..burst_start + params.nb_symbol_period].fill(Complex32::new(0.0, 0.0));

    let mut demod = make_demod(&signal, 4);
    let frames = collect_frames(&demod);
    demod.process(&stream);

    // The PRS is untouched, so the engine either rides through the burst
    // or desyncs at most once before re-locking.
    assert!(demod.total_frames_desync() <= 1);
    assert!(demod.total_frames_read() >= 2);
    drop(demod);

    let frames = frames.lock().unwrap();
    let last = frames.last().expect("frames demodulated");
    assert_eq!(hard_decision_bytes(last), signal.bytes);
}

#[test]
fn frame_sequence_is_chunk_boundary_independent() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let signal = synthesize(TransmissionMode::II);
    let mut stream = repeat_frames(&signal, 4);
    shift_carrier(&mut stream, 330.0);

    let run = |chunks: &mut dyn FnMut(&mut OfdmDemodulator)| {
        let mut demod = make_demod(&signal, 3);
        let frames = collect_frames(&demod);
        chunks(&mut demod);
        let stats = (demod.total_frames_read(), demod.total_frames_desync());
        drop(demod);
        let frames = Arc::try_unwrap(frames).unwrap().into_inner().unwrap();
        (frames, stats)
    };

    let (frames_whole, stats_whole) = run(&mut |demod| demod.process(&stream));

    let mut rng = StdRng::seed_from_u64(0x0A9);
    let (frames_sliced, stats_sliced) = run(&mut |demod| {
        let mut index = 0usize;
        while index < stream.len() {
            let len = rng.gen_range(1..4096).min(stream.len() - index);
            demod.process(&stream[index..index + len]);
            index += len;
        }
    });

    assert_eq!(stats_whole, stats_sliced);
    assert_eq!(frames_whole, frames_sliced);
}

#[test]
fn observer_blocks_have_exact_output_size() {
    let signal = synthesize(TransmissionMode::III);
    let stream = repeat_frames(&signal, 5);

    let mut demod = make_demod(&signal, 3);
    let frames = collect_frames(&demod);
    demod.process(&stream);
    drop(demod);

    let frames = frames.lock().unwrap();
    assert!(!frames.is_empty());
    let expected = signal.params.frame_bits();
    for bits in frames.iter() {
        assert_eq!(bits.len(), expected);
    }
}

#[test]
fn fine_offset_stays_inside_wrap_bound() {
    let signal = synthesize(TransmissionMode::I);
    let mut stream = repeat_frames(&signal, 6);
    shift_carrier(&mut stream, 470.0);

    let mut demod = make_demod(&signal, 4);
    let bound = 0.5 * signal.params.freq_bin_spacing() * 1.01;
    for chunk in stream.chunks(10_000) {
        demod.process(chunk);
        assert!(
            demod.fine_freq_offset().abs() <= bound,
            "fine offset escaped the wrap bound"
        );
    }
}

#[test]
fn disabled_coarse_correction_forces_zero_offset() {
    let signal = synthesize(TransmissionMode::II);
    let stream = repeat_frames(&signal, 4);

    let mut config = DemodConfig::for_params(&signal.params);
    config.sync.is_coarse_freq_correction = false;
    let mut demod = OfdmDemodulator::new(
        signal.params,
        &signal.prs,
        &signal.mapper,
        config,
        Some(3),
    )
    .unwrap();
    let frames = collect_frames(&demod);

    demod.process(&stream);
    assert_eq!(demod.coarse_freq_offset(), 0.0);
    assert!(demod.total_frames_read() >= 1);
    drop(demod);

    let frames = frames.lock().unwrap();
    let last = frames.last().expect("frames demodulated");
    assert_eq!(hard_decision_bytes(last), signal.bytes);
}

#[test]
fn single_worker_configuration_still_demodulates() {
    let signal = synthesize(TransmissionMode::II);
    let stream = repeat_frames(&signal, 4);

    let mut demod = make_demod(&signal, 1);
    let frames = collect_frames(&demod);
    demod.process(&stream);
    drop(demod);

    let frames = frames.lock().unwrap();
    let last = frames.last().expect("frames demodulated");
    assert_eq!(hard_decision_bytes(last), signal.bytes);
}

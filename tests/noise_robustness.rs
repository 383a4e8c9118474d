use dab_ofdm::params::{OfdmParams, TransmissionMode};
use dab_ofdm::scrambler::Scrambler;
use dab_ofdm::{reference, DemodConfig, OfdmDemodulator, OfdmModulator};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::sync::{Arc, Mutex};

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
fn pure_noise_produces_no_frames() {
    let mode = TransmissionMode::II;
    let params = OfdmParams::from_mode(mode);
    let prs = reference::prs_fft_reference(mode, &params);
    let mapper = reference::carrier_mapper(&params);

    let mut demod = OfdmDemodulator::new(
        params,
        &prs,
        &mapper,
        DemodConfig::for_params(&params),
        Some(2),
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let n01 = Normal::<f32>::new(0.0, 1.0).unwrap();
    let noise: Vec<Complex32> = (0..5 * params.frame_samples())
        .map(|_| Complex32::new(n01.sample(&mut rng), n01.sample(&mut rng)))
        .collect();

    demod.process(&noise);
    assert_eq!(
        demod.total_frames_read(),
        0,
        "impulse threshold let noise through"
    );
}

#[test]
fn additive_noise_keeps_hard_decisions_intact() {
    let mode = TransmissionMode::I;
    let params = OfdmParams::from_mode(mode);
    let prs = reference::prs_fft_reference(mode, &params);
    let mapper = reference::carrier_mapper(&params);
    let bytes = Scrambler::sequence(params.frame_bytes());

    let mut modulator = OfdmModulator::new(params, &prs, &mapper).unwrap();
    let mut frame = vec![Complex32::new(0.0, 0.0); params.frame_samples()];
    modulator.process_frame(&mut frame, &bytes).unwrap();

    let mut stream = Vec::with_capacity(frame.len() * 4);
    for _ in 0..4 {
        stream.extend_from_slice(&frame);
    }

    // Signal rms is sqrt(C)/N; stay ~20 dB below it.
    let signal_rms =
        (params.nb_data_carriers as f32).sqrt() / params.nb_fft as f32;
    let mut rng = StdRng::seed_from_u64(1);
    let n = Normal::<f32>::new(0.0, 0.1 * signal_rms).unwrap();
    for v in &mut stream {
        *v += Complex32::new(n.sample(&mut rng), n.sample(&mut rng));
    }

    let mut demod = OfdmDemodulator::new(
        params,
        &prs,
        &mapper,
        DemodConfig::for_params(&params),
        Some(4),
    )
    .unwrap();
    let frames: Arc<Mutex<Vec<Vec<i8>>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = Arc::clone(&frames);
        demod.on_frame(move |bits| sink.lock().unwrap().push(bits.to_vec()));
    }

    demod.process(&stream);
    assert!(demod.total_frames_read() >= 1);
    assert_eq!(demod.total_frames_desync(), 0);
    drop(demod);

    let frames = frames.lock().unwrap();
    let last = frames.last().expect("frames demodulated");
    assert_eq!(hard_decision_bytes(last), bytes);
}

use dab_ofdm::params::{OfdmParams, TransmissionMode};
use dab_ofdm::scrambler::Scrambler;
use dab_ofdm::{reference, DemodConfig, OfdmDemodulator, OfdmModulator};
use num_complex::Complex32;
use std::sync::{Arc, Mutex};

fn synthesize_stream(
    mode: TransmissionMode,
    nb_frames: usize,
) -> (OfdmParams, Vec<Complex32>, Vec<usize>, Vec<Complex32>, Vec<u8>) {
    let params = OfdmParams::from_mode(mode);
    let prs = reference::prs_fft_reference(mode, &params);
    let mapper = reference::carrier_mapper(&params);
    let bytes = Scrambler::sequence(params.frame_bytes());

    let mut modulator = OfdmModulator::new(params, &prs, &mapper).unwrap();
    let mut frame = vec![Complex32::new(0.0, 0.0); params.frame_samples()];
    modulator.process_frame(&mut frame, &bytes).unwrap();

    let mut stream = Vec::with_capacity(frame.len() * nb_frames);
    for _ in 0..nb_frames {
        stream.extend_from_slice(&frame);
    }
    (params, prs, mapper, stream, bytes)
}

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
fn every_transmission_mode_locks_and_decodes() {
    for mode in [
        TransmissionMode::I,
        TransmissionMode::II,
        TransmissionMode::III,
        TransmissionMode::IV,
    ] {
        let (params, prs, mapper, stream, bytes) = synthesize_stream(mode, 4);

        let mut demod = OfdmDemodulator::new(
            params,
            &prs,
            &mapper,
            DemodConfig::for_params(&params),
            Some(3),
        )
        .unwrap();
        let frames: Arc<Mutex<Vec<Vec<i8>>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let sink = Arc::clone(&frames);
            demod.on_frame(move |bits| sink.lock().unwrap().push(bits.to_vec()));
        }

        demod.process(&stream);
        assert!(
            demod.total_frames_read() >= 1,
            "mode {mode:?}: no frame within two periods of lock"
        );
        // A statistical L1 dip in clean data may cost one relock at most.
        assert!(demod.total_frames_desync() <= 1, "mode {mode:?}");
        drop(demod);

        let frames = frames.lock().unwrap();
        assert!(!frames.is_empty(), "mode {mode:?}");
        for bits in frames.iter() {
            assert_eq!(bits.len(), params.frame_bits(), "mode {mode:?}");
            assert_eq!(hard_decision_bytes(bits), bytes, "mode {mode:?}");
        }
    }
}

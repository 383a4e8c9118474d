//! Produces a synthetic OFDM frame stream as raw IQ on stdout. No real
//! information is carried; the payload is a known scrambler sequence so a
//! receiver can check its demodulated bits against the source.

use anyhow::Context;
use clap::Parser;
use dab_ofdm::params::{OfdmParams, TransmissionMode, SAMPLE_RATE_HZ};
use dab_ofdm::scrambler::Scrambler;
use dab_ofdm::{dsp, reference, OfdmModulator};
use num_complex::Complex32;
use std::io::Write;

#[derive(Parser, Debug)]
#[command(about = "Synthetic OFDM transmitter, endless raw IQ frames on stdout")]
struct Args {
    /// Transmission mode 1..=4.
    #[arg(short = 'M', long, default_value_t = 1)]
    mode: u32,

    /// Carrier shift applied to the generated signal, in Hz.
    #[arg(long, default_value_t = 330.0)]
    freq_shift_hz: f32,

    /// Print the scrambled source bytes instead of IQ samples.
    #[arg(short = 'P', long, default_value_t = false)]
    print_source: bool,

    /// Emit interleaved f32 IQ instead of offset-binary u8 IQ.
    #[arg(long, default_value_t = false)]
    float_output: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mode = TransmissionMode::from_index(args.mode)?;
    let params = OfdmParams::from_mode(mode);
    let prs = reference::prs_fft_reference(mode, &params);
    let mapper = reference::carrier_mapper(&params);

    let source_bytes = Scrambler::sequence(params.frame_bytes());
    let mut stdout = std::io::stdout().lock();

    if args.print_source {
        tracing::info!(bytes = source_bytes.len(), "writing source bytes");
        stdout
            .write_all(&source_bytes)
            .context("write source bytes")?;
        return Ok(());
    }

    let mut modulator = OfdmModulator::new(params, &prs, &mapper)?;
    let mut frame = vec![Complex32::new(0.0, 0.0); params.frame_samples()];
    modulator.process_frame(&mut frame, &source_bytes)?;

    if args.freq_shift_hz != 0.0 {
        dsp::apply_pll(&mut frame, args.freq_shift_hz / SAMPLE_RATE_HZ, 0.0);
    }

    tracing::info!(
        ?mode,
        samples = frame.len(),
        shift_hz = args.freq_shift_hz,
        "streaming frames"
    );

    // Quantize once, then stream the same frame forever.
    let encoded: Vec<u8> = if args.float_output {
        frame
            .iter()
            .flat_map(|v| {
                let mut b = [0u8; 8];
                b[..4].copy_from_slice(&v.re.to_le_bytes());
                b[4..].copy_from_slice(&v.im.to_le_bytes());
                b
            })
            .collect()
    } else {
        let amplitude = 800.0 * params.nb_fft as f32 / params.nb_data_carriers as f32;
        frame
            .iter()
            .flat_map(|v| {
                let i = (v.re * amplitude + 128.0).clamp(0.0, 255.0) as u8;
                let q = (v.im * amplitude + 128.0).clamp(0.0, 255.0) as u8;
                [i, q]
            })
            .collect()
    };

    loop {
        if stdout.write_all(&encoded).is_err() {
            // Downstream closed the pipe.
            break;
        }
    }
    Ok(())
}

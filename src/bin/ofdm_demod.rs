//! Drives the OFDM demodulator from raw IQ on stdin and reports
//! synchronisation state; optionally forwards the soft-decision bits of
//! every frame to stdout for a downstream FEC decoder.

use anyhow::Context;
use clap::Parser;
use dab_ofdm::params::{OfdmParams, TransmissionMode, SAMPLE_RATE_HZ};
use dab_ofdm::{reference, DemodConfig, OfdmDemodulator};
use num_complex::Complex32;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(about = "OFDM demodulator fed by raw IQ samples on stdin")]
struct Args {
    /// Transmission mode 1..=4.
    #[arg(short = 'M', long, default_value_t = 1)]
    mode: u32,

    /// TOML file with demodulator tuning options.
    #[arg(long)]
    config: Option<String>,

    /// Read interleaved f32 IQ instead of offset-binary u8 IQ.
    #[arg(long, default_value_t = false)]
    float_input: bool,

    /// Write each frame's soft bits to stdout.
    #[arg(long, default_value_t = false)]
    emit_bits: bool,

    /// Samples per processing chunk.
    #[arg(long, default_value_t = 65536)]
    chunk_samples: usize,

    /// Pin the pipeline worker count instead of using the hardware
    /// parallelism.
    #[arg(long)]
    threads: Option<usize>,
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
    let config = match args.config.as_deref() {
        Some(path) => DemodConfig::from_file(path)?,
        None => DemodConfig::for_params(&params),
    };

    let mut demod = OfdmDemodulator::new(params, &prs, &mapper, config, args.threads)?;

    let frames_emitted = Arc::new(AtomicU64::new(0));
    {
        let frames_emitted = Arc::clone(&frames_emitted);
        let emit_bits = args.emit_bits;
        demod.on_frame(move |bits| {
            frames_emitted.fetch_add(1, Ordering::Relaxed);
            if emit_bits {
                let raw: &[u8] =
                    unsafe { std::slice::from_raw_parts(bits.as_ptr() as *const u8, bits.len()) };
                let _ = std::io::stdout().write_all(raw);
            }
        });
    }

    let bytes_per_sample = if args.float_input { 8 } else { 2 };
    let mut io_buf = vec![0u8; args.chunk_samples.max(1) * bytes_per_sample];
    let mut samples = vec![Complex32::new(0.0, 0.0); args.chunk_samples.max(1)];
    let mut stdin = std::io::stdin().lock();
    let mut pending = 0usize;
    let mut total_samples = 0u64;
    let mut last_report = 0u64;

    loop {
        let n = match stdin.read(&mut io_buf[pending..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read stdin"),
        };
        pending += n;
        let n_samples = pending / bytes_per_sample;
        if n_samples == 0 {
            continue;
        }

        for (i, sample) in samples[..n_samples].iter_mut().enumerate() {
            let off = i * bytes_per_sample;
            *sample = if args.float_input {
                Complex32::new(
                    f32::from_le_bytes(io_buf[off..off + 4].try_into().unwrap()),
                    f32::from_le_bytes(io_buf[off + 4..off + 8].try_into().unwrap()),
                )
            } else {
                Complex32::new(
                    (io_buf[off] as f32 - 128.0) / 128.0,
                    (io_buf[off + 1] as f32 - 128.0) / 128.0,
                )
            };
        }
        let used = n_samples * bytes_per_sample;
        io_buf.copy_within(used..pending, 0);
        pending -= used;

        demod.process(&samples[..n_samples]);
        total_samples += n_samples as u64;

        // Roughly one status line per second of signal.
        if total_samples - last_report >= SAMPLE_RATE_HZ as u64 {
            last_report = total_samples;
            tracing::info!(
                state = ?demod.state(),
                frames = demod.total_frames_read(),
                desyncs = demod.total_frames_desync(),
                coarse_hz = demod.coarse_freq_offset() * SAMPLE_RATE_HZ,
                fine_hz = demod.fine_freq_offset() * SAMPLE_RATE_HZ,
                "status"
            );
        }
    }

    tracing::info!(
        frames = demod.total_frames_read(),
        desyncs = demod.total_frames_desync(),
        emitted = frames_emitted.load(Ordering::Relaxed),
        "stream ended"
    );
    Ok(())
}

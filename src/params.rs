use anyhow::Context;

/// Baseband sampling rate the broadcast is transmitted at.
pub const SAMPLE_RATE_HZ: f32 = 2.048e6;

/// The four transmission modes of the broadcast standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
pub enum TransmissionMode {
    I,
    II,
    III,
    IV,
}

impl TransmissionMode {
    pub fn from_index(index: u32) -> anyhow::Result<Self> {
        match index {
            1 => Ok(Self::I),
            2 => Ok(Self::II),
            3 => Ok(Self::III),
            4 => Ok(Self::IV),
            _ => anyhow::bail!("transmission modes 1..=4 are supported, got {index}"),
        }
    }
}

/// OFDM dimensions for one session. All periods are in complex samples at
/// [`SAMPLE_RATE_HZ`].
#[derive(Clone, Copy, Debug, serde::Deserialize)]
pub struct OfdmParams {
    /// Symbols per transmission frame, excluding the null symbol.
    pub nb_frame_symbols: usize,
    /// FFT length.
    pub nb_fft: usize,
    /// Cyclic prefix length.
    pub nb_cyclic_prefix: usize,
    /// Symbol period: `nb_fft + nb_cyclic_prefix`.
    pub nb_symbol_period: usize,
    /// Null symbol period.
    pub nb_null_period: usize,
    /// Number of carriers that carry information.
    pub nb_data_carriers: usize,
}

impl OfdmParams {
    pub fn from_mode(mode: TransmissionMode) -> Self {
        match mode {
            TransmissionMode::I => Self {
                nb_frame_symbols: 76,
                nb_fft: 2048,
                nb_cyclic_prefix: 504,
                nb_symbol_period: 2552,
                nb_null_period: 2656,
                nb_data_carriers: 1536,
            },
            TransmissionMode::II => Self {
                nb_frame_symbols: 76,
                nb_fft: 512,
                nb_cyclic_prefix: 126,
                nb_symbol_period: 638,
                nb_null_period: 664,
                nb_data_carriers: 384,
            },
            TransmissionMode::III => Self {
                nb_frame_symbols: 153,
                nb_fft: 256,
                nb_cyclic_prefix: 63,
                nb_symbol_period: 319,
                nb_null_period: 345,
                nb_data_carriers: 192,
            },
            TransmissionMode::IV => Self {
                nb_frame_symbols: 76,
                nb_fft: 1024,
                nb_cyclic_prefix: 252,
                nb_symbol_period: 1276,
                nb_null_period: 1328,
                nb_data_carriers: 768,
            },
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read params file {path}"))?;
        let params: OfdmParams = toml::from_str(&content).context("parse params toml")?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.nb_symbol_period != self.nb_fft + self.nb_cyclic_prefix {
            anyhow::bail!("OfdmParams inconsistent: symbol period != fft + cyclic prefix");
        }
        if self.nb_null_period < self.nb_symbol_period {
            anyhow::bail!("OfdmParams inconsistent: null period shorter than symbol period");
        }
        if self.nb_data_carriers == 0 || self.nb_data_carriers % 2 != 0 {
            anyhow::bail!("OfdmParams inconsistent: data carrier count must be even");
        }
        if self.nb_data_carriers >= self.nb_fft {
            anyhow::bail!("OfdmParams inconsistent: more data carriers than FFT bins");
        }
        if self.nb_frame_symbols < 2 {
            anyhow::bail!("OfdmParams inconsistent: need at least two symbols per frame");
        }
        Ok(())
    }

    /// Samples per frame including the null symbol.
    pub fn frame_samples(&self) -> usize {
        self.nb_null_period + self.nb_frame_symbols * self.nb_symbol_period
    }

    /// Soft bits produced per frame.
    pub fn frame_bits(&self) -> usize {
        (self.nb_frame_symbols - 1) * self.nb_data_carriers * 2
    }

    /// Source bytes carried per frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bits() / 8
    }

    /// Carrier spacing normalized to the sampling rate.
    pub fn freq_bin_spacing(&self) -> f32 {
        1.0 / self.nb_fft as f32
    }
}

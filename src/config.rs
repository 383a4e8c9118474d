use crate::params::OfdmParams;
use anyhow::Context;

/// Running L1 signal average used to detect the null symbol power dip.
#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(default)]
pub struct SignalL1Config {
    /// Window size in samples for one L1 measurement.
    pub nb_samples: usize,
    /// Stride between measured windows, as a multiple of the window size.
    pub nb_decimate: usize,
    /// IIR update rate of the running average.
    pub update_beta: f32,
}

impl Default for SignalL1Config {
    fn default() -> Self {
        Self {
            nb_samples: 100,
            nb_decimate: 5,
            update_beta: 0.95,
        }
    }
}

/// Thresholds for entering and leaving the null symbol, as multipliers of the
/// running L1 average.
#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(default)]
pub struct NullSearchConfig {
    pub thresh_null_start: f32,
    pub thresh_null_end: f32,
}

impl Default for NullSearchConfig {
    fn default() -> Self {
        Self {
            thresh_null_start: 0.35,
            thresh_null_end: 0.75,
        }
    }
}

/// Frequency and time synchronisation tuning.
#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Disable to force the integral frequency offset to zero.
    pub is_coarse_freq_correction: bool,
    /// Half-width of the coarse peak search, normalized to the sampling rate.
    pub max_coarse_freq_correction_norm: f32,
    /// IIR rate of the coarse correction when already near lock.
    pub coarse_freq_slow_beta: f32,
    /// IIR rate of the fine frequency feedback from the cyclic prefix.
    pub fine_freq_update_beta: f32,
    /// Minimum height of the impulse peak over the mean, in dB.
    pub impulse_peak_threshold_db: f32,
    /// Probability weight retained by peaks far from the expected position.
    pub impulse_peak_distance_probability: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            is_coarse_freq_correction: true,
            // +-20.48 kHz at 2.048 MS/s
            max_coarse_freq_correction_norm: 0.01,
            coarse_freq_slow_beta: 0.1,
            fine_freq_update_beta: 0.5,
            impulse_peak_threshold_db: 20.0,
            impulse_peak_distance_probability: 0.15,
        }
    }
}

/// Runtime configuration of the demodulator.
#[derive(Clone, Copy, Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct DemodConfig {
    pub signal_l1: SignalL1Config,
    pub null_l1_search: NullSearchConfig,
    pub sync: SyncConfig,
}

impl DemodConfig {
    /// Defaults adapted to the transmission mode: the null detector cannot
    /// place the end of the power dip more precisely than its L1 window, so
    /// short-prefix modes need a finer window for the detected point to
    /// stay within one cyclic prefix of the true PRS start.
    pub fn for_params(params: &OfdmParams) -> Self {
        let mut config = Self::default();
        config.signal_l1.nb_samples = config
            .signal_l1
            .nb_samples
            .min((params.nb_cyclic_prefix / 4).max(8));
        config
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read config file {path}"))?;
        let config: DemodConfig = toml::from_str(&content).context("parse config toml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.signal_l1.nb_samples == 0 || self.signal_l1.nb_decimate == 0 {
            anyhow::bail!("signal_l1 window and decimation must be positive");
        }
        if !(0.0..1.0).contains(&self.signal_l1.update_beta) {
            anyhow::bail!("signal_l1.update_beta must be in [0,1)");
        }
        if self.null_l1_search.thresh_null_start >= self.null_l1_search.thresh_null_end {
            anyhow::bail!("null start threshold must be below the end threshold");
        }
        if !(0.0..=1.0).contains(&self.sync.coarse_freq_slow_beta)
            || !(0.0..=1.0).contains(&self.sync.fine_freq_update_beta)
        {
            anyhow::bail!("sync update betas must be in [0,1]");
        }
        if !(0.0..=1.0).contains(&self.sync.impulse_peak_distance_probability) {
            anyhow::bail!("impulse_peak_distance_probability must be in [0,1]");
        }
        Ok(())
    }
}

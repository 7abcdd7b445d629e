use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use tonescale_analysis::{
    AnnotationFilter, CorrelationMeasure, FingerprintParameters, FragmentSearchParameters, Kernel,
    MatchParameters, PeakDetectionParameters,
};

/// Settings read from the optional TOML file. Missing keys take their default, so a partial
/// file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bin_width_cents: f64,
    /// In bins.
    pub smoothing_stddev: f64,
    pub min_confidence: f64,
    pub exact_threshold: f64,
    /// `intersection`, `cosine` or `bhattacharyya`.
    pub measure: String,
    pub peak_window_size: usize,
    pub peak_threshold_factor: f64,
    pub fragment_step_seconds: f64,
    /// Width of the fragment search kernel, in bins.
    pub fragment_kernel_stddev: f64,
    /// Worker threads for matching; rayon picks when unset.
    pub threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        let fingerprint = FingerprintParameters::default();
        let matching = MatchParameters::default();
        let peaks = PeakDetectionParameters::default();
        Self {
            bin_width_cents: fingerprint.bin_width_cents,
            smoothing_stddev: fingerprint.smoothing_stddev,
            min_confidence: fingerprint.filter.min_confidence,
            exact_threshold: matching.exact_threshold,
            measure: matching.measure.to_string(),
            peak_window_size: peaks.window_size,
            peak_threshold_factor: peaks.threshold_factor,
            fragment_step_seconds: FragmentSearchParameters::default().step_seconds,
            fragment_kernel_stddev: 1.0,
            threads: None,
        }
    }
}

impl Config {
    /// Reads `path`, or returns the defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        debug!("loaded {config:?} from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        // surface a bad measure name at load time rather than at first use
        config.measure()?;
        Ok(config)
    }

    pub fn measure(&self) -> Result<CorrelationMeasure> {
        Ok(self.measure.parse::<CorrelationMeasure>()?)
    }

    fn filter(&self) -> AnnotationFilter {
        AnnotationFilter {
            min_confidence: self.min_confidence,
            ..Default::default()
        }
    }

    pub fn fingerprint_params(&self) -> FingerprintParameters {
        FingerprintParameters {
            bin_width_cents: self.bin_width_cents,
            smoothing_stddev: self.smoothing_stddev,
            filter: self.filter(),
        }
    }

    pub fn match_params(&self) -> Result<MatchParameters> {
        Ok(MatchParameters {
            exact_threshold: self.exact_threshold,
            measure: self.measure()?,
            fingerprint: self.fingerprint_params(),
        })
    }

    pub fn peak_params(&self) -> PeakDetectionParameters {
        PeakDetectionParameters {
            window_size: self.peak_window_size,
            threshold_factor: self.peak_threshold_factor,
            ..Default::default()
        }
    }

    pub fn fragment_params(&self) -> FragmentSearchParameters {
        FragmentSearchParameters {
            step_seconds: self.fragment_step_seconds,
            kernel: Kernel::Gaussian {
                stddev: self.fragment_kernel_stddev,
            },
            bin_width_cents: self.bin_width_cents,
            filter: self.filter(),
        }
    }

    /// Sizes the global rayon pool. Must run before the first parallel call.
    pub fn init_thread_pool(&self) -> Result<()> {
        if let Some(threads) = self.threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .context("failed to set up the worker pool")?;
        }
        Ok(())
    }
}

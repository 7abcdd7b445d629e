/// Pitch class histograms of whole recordings, the signature used for matching.
use log::debug;

use crate::annotation::{Annotation, AnnotationFilter};
use crate::correlation::{CorrelationMeasure, OptimalDisplacement};
use crate::error::{AnalysisError, Result};
use crate::histogram::{BinnedDistribution, DensityHistogram, Histogram, HistogramShape};
use crate::peaks::PeakDetectionParameters;
use crate::scale::ToneScale;

#[derive(Debug, Clone)]
pub struct FingerprintParameters {
    /// Width of a pitch class bin in cents.
    pub bin_width_cents: f64,
    /// Standard deviation, in bins, of the gaussian smoothing applied before normalization.
    /// Zero disables smoothing.
    pub smoothing_stddev: f64,
    /// Which annotations count.
    pub filter: AnnotationFilter,
}

impl Default for FingerprintParameters {
    fn default() -> Self {
        Self {
            bin_width_cents: 6.0,
            smoothing_stddev: 1.0,
            filter: AnnotationFilter::default(),
        }
    }
}

/// Normalized pitch class distribution of a recording, over `[0, 1200)` cents.
#[derive(Debug, Clone)]
pub struct PitchClassHistogram {
    counts: Histogram,
    density: DensityHistogram,
}

impl PitchClassHistogram {
    pub fn counts(&self) -> &Histogram {
        &self.counts
    }

    pub fn density(&self) -> &DensityHistogram {
        &self.density
    }

    pub fn bin_width_cents(&self) -> f64 {
        self.counts.shape().class_width()
    }

    /// Number of annotations that went into the histogram.
    pub fn annotation_count(&self) -> i64 {
        self.counts.total()
    }

    /// Best transposition of `other` onto `self` and the similarity there.
    pub fn compare(
        &self,
        other: &PitchClassHistogram,
        measure: CorrelationMeasure,
    ) -> Result<OptimalDisplacement> {
        self.density
            .displacement_for_optimal_correlation(&other.density, measure)
    }

    /// The peaks of the distribution as a tone scale.
    pub fn scale(
        &self,
        description: impl Into<String>,
        params: &PeakDetectionParameters,
    ) -> Result<ToneScale> {
        let peaks = self.density.peaks(params)?;
        debug!("{} scale degrees found", peaks.len());
        Ok(ToneScale::from_peaks(description, &peaks))
    }
}

/// Folds the voiced annotations accepted by the filter into a pitch class histogram, smooths
/// and normalizes it.
pub fn build_histogram(
    annotations: &[Annotation],
    params: &FingerprintParameters,
) -> Result<PitchClassHistogram> {
    let shape = HistogramShape::with_class_width(0.0, 1200.0, params.bin_width_cents)?
        .wrapping();
    let mut counts = Histogram::new(shape);
    counts.add_all(
        params
            .filter
            .apply(annotations)
            .filter_map(|a| a.pitch_class()),
    )?;
    if counts.total() == 0 {
        return Err(AnalysisError::DegenerateInput(
            "no voiced annotations to build a histogram from",
        ));
    }
    debug!(
        "pitch class histogram from {} of {} annotations",
        counts.total(),
        annotations.len()
    );

    let density = counts
        .gaussian_smooth(params.smoothing_stddev)?
        .normalize()?;
    Ok(PitchClassHistogram { counts, density })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::annotation::absolute_cents_to_hz;
    use crate::util::assert_close;

    /// An unequal seven tone scale, degrees placed on 6 cent bin centers.
    pub(crate) const DEGREES: [f64; 7] = [3.0, 207.0, 387.0, 501.0, 705.0, 885.0, 1089.0];

    /// Annotations cycling through the degrees, lower degrees more often.
    pub(crate) fn melody(transpose_cents: f64, len: usize) -> Vec<Annotation> {
        (0..len)
            .map(|k| {
                let degree = DEGREES[(k * k + k / 3) % DEGREES.len()];
                let octave = 4.0 + (k % 2) as f64;
                Annotation::new(
                    k as f64 * 0.125,
                    absolute_cents_to_hz(octave * 1200.0 + degree + transpose_cents),
                    0.9,
                )
            })
            .collect()
    }

    #[test]
    fn test_histogram_is_normalized() {
        let fp = build_histogram(&melody(0.0, 200), &FingerprintParameters::default()).unwrap();
        assert_eq!(fp.annotation_count(), 200);
        assert_eq!(fp.counts().shape().bin_count(), 200);
        assert_close(fp.density().total_mass(), 1.0, 1e-9);
        assert_eq!(fp.bin_width_cents(), 6.0);
    }

    #[test]
    fn test_transposition_is_recovered() {
        let params = FingerprintParameters::default();
        let a = build_histogram(&melody(0.0, 200), &params).unwrap();
        let up = build_histogram(&melody(30.0, 200), &params).unwrap();
        let down = build_histogram(&melody(-30.0, 200), &params).unwrap();

        let found = a.compare(&up, CorrelationMeasure::Intersection).unwrap();
        assert_eq!(found.displacement, 5);
        assert_close(found.correlation, 1.0, 1e-9);

        let found = a.compare(&down, CorrelationMeasure::Intersection).unwrap();
        assert_eq!(found.signed(200), -5);
        assert_close(found.correlation, 1.0, 1e-9);
    }

    #[test]
    fn test_no_voiced_annotations() {
        let silence = vec![Annotation::new(0.0, 0.0, 1.0); 10];
        assert!(matches!(
            build_histogram(&silence, &FingerprintParameters::default()),
            Err(AnalysisError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_confidence_filter() {
        let mut params = FingerprintParameters::default();
        params.filter.min_confidence = 0.95;
        let mut annotations = melody(0.0, 20);
        annotations[0].confidence = 1.0;
        let fp = build_histogram(&annotations, &params).unwrap();
        assert_eq!(fp.annotation_count(), 1);
    }

    #[test]
    fn test_scale_extraction_finds_degrees() {
        let fp = build_histogram(&melody(0.0, 400), &FingerprintParameters::default()).unwrap();
        let params = PeakDetectionParameters {
            window_size: 5,
            threshold_factor: 0.0,
            ..Default::default()
        };
        let scale = fp.scale("melody", &params).unwrap();
        assert_eq!(scale.degrees_cents(), DEGREES.to_vec());
    }
}

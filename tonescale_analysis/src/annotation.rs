/// Pitch annotations as delivered by a pitch detector, and the unit conversions around them.
use std::ops::Range;

/// Reference frequency of absolute cent zero: MIDI key 0, `440 * 2^(-69/12)` Hz.
pub const REFERENCE_FREQUENCY: f64 = 8.175_798_915_643_707;

pub const CENTS_PER_OCTAVE: f64 = 1200.0;

/// The detector backend that produced an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PitchDetectorSource {
    Yin,
    Mpm,
    Aubio,
    Ipem,
    Melodia,
    #[default]
    Other,
}

/// A single pitch estimate at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Annotation {
    pub time_seconds: f64,
    pub pitch_hz: f64,
    /// Probability reported by the detector that the pitch is correct, in `[0, 1]`.
    pub confidence: f64,
    pub source: PitchDetectorSource,
}

impl Annotation {
    pub fn new(time_seconds: f64, pitch_hz: f64, confidence: f64) -> Self {
        Self {
            time_seconds,
            pitch_hz,
            confidence: confidence.clamp(0.0, 1.0),
            source: PitchDetectorSource::Other,
        }
    }

    pub fn with_source(mut self, source: PitchDetectorSource) -> Self {
        self.source = source;
        self
    }

    /// `None` for unvoiced (non-positive or non-finite) pitches.
    pub fn absolute_cents(&self) -> Option<f64> {
        hz_to_absolute_cents(self.pitch_hz)
    }

    pub fn pitch_class(&self) -> Option<f64> {
        self.absolute_cents().map(pitch_class_cents)
    }
}

pub fn hz_to_absolute_cents(hz: f64) -> Option<f64> {
    if hz > 0.0 && hz.is_finite() {
        Some(CENTS_PER_OCTAVE * (hz / REFERENCE_FREQUENCY).log2())
    } else {
        None
    }
}

pub fn absolute_cents_to_hz(cents: f64) -> f64 {
    REFERENCE_FREQUENCY * 2.0_f64.powf(cents / CENTS_PER_OCTAVE)
}

/// Folds cents into one octave, `[0, 1200)`.
pub fn pitch_class_cents(cents: f64) -> f64 {
    let pc = cents.rem_euclid(CENTS_PER_OCTAVE);
    // rem_euclid may round up to the modulus itself
    if pc >= CENTS_PER_OCTAVE {
        0.0
    } else {
        pc
    }
}

/// Selects the annotations that go into a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationFilter {
    pub min_confidence: f64,
    pub pitch_range_hz: Range<f64>,
    pub time_range_seconds: Range<f64>,
}

impl Default for AnnotationFilter {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            pitch_range_hz: 20.0..20_000.0,
            time_range_seconds: 0.0..f64::INFINITY,
        }
    }
}

impl AnnotationFilter {
    pub fn accepts(&self, annotation: &Annotation) -> bool {
        annotation.confidence >= self.min_confidence
            && self.pitch_range_hz.contains(&annotation.pitch_hz)
            && self.time_range_seconds.contains(&annotation.time_seconds)
    }

    pub fn apply<'a>(
        &'a self,
        annotations: &'a [Annotation],
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        annotations.iter().filter(move |a| self.accepts(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::assert_close;

    #[test]
    fn test_cent_conversions() {
        assert_close(hz_to_absolute_cents(440.0).unwrap(), 6900.0, 1e-9);
        assert_close(absolute_cents_to_hz(6900.0), 440.0, 1e-9);
        assert_close(hz_to_absolute_cents(880.0).unwrap(), 8100.0, 1e-9);
        assert_eq!(hz_to_absolute_cents(0.0), None);
        assert_eq!(hz_to_absolute_cents(-3.0), None);
        assert_eq!(hz_to_absolute_cents(f64::NAN), None);
    }

    #[test]
    fn test_pitch_class() {
        let a4 = Annotation::new(1.0, 440.0, 0.9);
        assert_close(a4.pitch_class().unwrap(), 900.0, 1e-9);
        let a5 = Annotation::new(1.0, 880.0, 0.9);
        assert_close(a5.pitch_class().unwrap(), 900.0, 1e-9);
        assert_eq!(pitch_class_cents(-100.0), 1100.0);
        assert_eq!(pitch_class_cents(2400.0), 0.0);
    }

    #[test]
    fn test_filter() {
        let filter = AnnotationFilter {
            min_confidence: 0.5,
            pitch_range_hz: 50.0..1000.0,
            time_range_seconds: 1.0..2.0,
        };
        let annotations = [
            Annotation::new(1.5, 440.0, 0.9),
            Annotation::new(1.5, 440.0, 0.2),
            Annotation::new(1.5, 40.0, 0.9),
            Annotation::new(2.0, 440.0, 0.9),
            Annotation::new(1.0, 999.0, 1.5).with_source(PitchDetectorSource::Yin),
        ];
        let accepted: Vec<_> = filter.apply(&annotations).collect();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[1].confidence, 1.0);
        assert_eq!(accepted[1].source, PitchDetectorSource::Yin);
    }
}

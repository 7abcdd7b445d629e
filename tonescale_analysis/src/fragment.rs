/// Locating a short melodic fragment inside a long annotated recording.
///
/// A window as long as the fragment slides over the haystack; its pitch class density is
/// updated with the annotations entering and leaving the window instead of being rebuilt.
use log::{debug, trace};

use crate::annotation::{Annotation, AnnotationFilter};
use crate::error::{AnalysisError, Result};
use crate::histogram::{BinnedDistribution, HistogramShape};
use crate::kde::{Kernel, KernelDensityEstimate};

#[derive(Debug, Clone)]
pub struct FragmentSearchParameters {
    /// Distance between the starts of consecutive windows.
    pub step_seconds: f64,
    pub kernel: Kernel,
    pub bin_width_cents: f64,
    pub filter: AnnotationFilter,
}

impl Default for FragmentSearchParameters {
    fn default() -> Self {
        Self {
            step_seconds: 0.5,
            kernel: Kernel::Gaussian { stddev: 1.0 },
            bin_width_cents: 6.0,
            filter: AnnotationFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentMatch {
    pub start_seconds: f64,
    pub score: f64,
    /// Transposition of the fragment relative to the window, in bins, folded to
    /// `(-n/2, n/2]`.
    pub shift: i32,
    pub shift_cents: f64,
}

/// `(time, pitch class)` pairs of the usable annotations, sorted by time.
fn timed_pitch_classes(annotations: &[Annotation], filter: &AnnotationFilter) -> Vec<(f64, f64)> {
    let mut points: Vec<(f64, f64)> = filter
        .apply(annotations)
        .filter_map(|a| a.pitch_class().map(|pc| (a.time_seconds, pc)))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points
}

pub struct FragmentSearch {
    params: FragmentSearchParameters,
    needle: KernelDensityEstimate,
    duration: f64,
}

impl FragmentSearch {
    pub fn new(fragment: &[Annotation], params: FragmentSearchParameters) -> Result<Self> {
        if !(params.step_seconds > 0.0) || !params.step_seconds.is_finite() {
            return Err(AnalysisError::invalid(
                "step_seconds",
                format!("{} is not a positive duration", params.step_seconds),
            ));
        }
        let points = timed_pitch_classes(fragment, &params.filter);
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Err(AnalysisError::DegenerateInput("fragment has no voiced annotations"));
        };
        let duration = last.0 - first.0;
        let needle = KernelDensityEstimate::from_points(
            params.kernel,
            HistogramShape::with_class_width(0.0, 1200.0, params.bin_width_cents)?,
            points.iter().map(|p| p.1),
        )?;
        debug!(
            "fragment of {} annotations spanning {duration:.2}s",
            needle.points()
        );
        Ok(Self {
            params,
            needle,
            duration,
        })
    }

    /// Time from the first to the last usable annotation of the fragment.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Scores every window `[start, start + duration]` with `start` stepping from the first
    /// haystack annotation. Windows without annotations are left out.
    pub fn search(&self, haystack: &[Annotation]) -> Result<Vec<FragmentMatch>> {
        let points = timed_pitch_classes(haystack, &self.params.filter);
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Ok(Vec::new());
        };
        let (t0, t_end) = (first.0, last.0);

        let mut window = KernelDensityEstimate::new(self.params.kernel, *self.needle.shape())?;
        let mut entering = 0;
        let mut leaving = 0;
        let mut matches = Vec::new();
        let mut step = 0u64;
        loop {
            let start = t0 + step as f64 * self.params.step_seconds;
            if start > t_end {
                break;
            }
            let end = start + self.duration;
            while entering < points.len() && points[entering].0 <= end {
                window.add(points[entering].1)?;
                entering += 1;
            }
            while leaving < entering && points[leaving].0 < start {
                window.remove(points[leaving].1)?;
                leaving += 1;
            }

            if !window.is_empty() {
                let optimal = window.shift_for_optimal_correlation(&self.needle)?;
                let shift = optimal.signed(window.len()) as i32;
                matches.push(FragmentMatch {
                    start_seconds: start,
                    score: optimal.correlation,
                    shift,
                    shift_cents: shift as f64 * self.params.bin_width_cents,
                });
            }
            step += 1;
        }
        trace!("scored {} fragment windows", matches.len());
        Ok(matches)
    }

    /// The highest scoring window, the earliest one on ties.
    pub fn best(&self, haystack: &[Annotation]) -> Result<Option<FragmentMatch>> {
        let matches = self.search(haystack)?;
        Ok(matches
            .into_iter()
            .reduce(|best, m| if m.score > best.score { m } else { best }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::absolute_cents_to_hz;
    use crate::util::assert_close;

    /// A pseudo random tune, one note every eighth of a second, pitches on 6 cent bin centers.
    fn tune(len: usize) -> Vec<Annotation> {
        let mut state: u64 = 0x2545_f491;
        (0..len)
            .map(|k| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1);
                let bin = (state >> 33) % 200;
                Annotation::new(
                    k as f64 * 0.125,
                    absolute_cents_to_hz(6000.0 + 6.0 * bin as f64 + 3.0),
                    1.0,
                )
            })
            .collect()
    }

    fn excerpt(haystack: &[Annotation], from: usize, to: usize, transpose: f64) -> Vec<Annotation> {
        haystack[from..to]
            .iter()
            .map(|a| {
                Annotation::new(
                    a.time_seconds - haystack[from].time_seconds,
                    a.pitch_hz * 2.0_f64.powf(transpose / 1200.0),
                    a.confidence,
                )
            })
            .collect()
    }

    #[test]
    fn test_finds_transposed_fragment() {
        let _ = env_logger::builder().is_test(true).try_init();
        let haystack = tune(480);
        // 20.0 s up to and including 24.875 s
        let fragment = excerpt(&haystack, 160, 200, 30.0);
        let search = FragmentSearch::new(&fragment, FragmentSearchParameters::default()).unwrap();
        assert_eq!(search.duration(), 4.875);

        let best = search.best(&haystack).unwrap().unwrap();
        assert_eq!(best.start_seconds, 20.0);
        assert_close(best.score, 1.0, 1e-9);
        assert_eq!(best.shift, 5);
        assert_close(best.shift_cents, 30.0, 1e-9);
    }

    #[test]
    fn test_windows_step_through_the_haystack() {
        let haystack = tune(80);
        let fragment = excerpt(&haystack, 0, 8, 0.0);
        let search = FragmentSearch::new(&fragment, FragmentSearchParameters::default()).unwrap();
        let matches = search.search(&haystack).unwrap();
        // starts 0.0, 0.5, .., 9.5 up to the last annotation at 9.875
        assert_eq!(matches.len(), 20);
        assert_eq!(matches[3].start_seconds, 1.5);
        assert_close(matches[0].score, 1.0, 1e-9);
        assert_eq!(matches[0].shift, 0);
    }

    #[test]
    fn test_sliding_window_matches_rebuilt_window() {
        let haystack = tune(200);
        let fragment = excerpt(&haystack, 40, 60, 0.0);
        let params = FragmentSearchParameters::default();
        let search = FragmentSearch::new(&fragment, params.clone()).unwrap();
        for m in search.search(&haystack).unwrap() {
            let inside: Vec<Annotation> = haystack
                .iter()
                .filter(|a| {
                    a.time_seconds >= m.start_seconds
                        && a.time_seconds <= m.start_seconds + search.duration()
                })
                .cloned()
                .collect();
            let rebuilt = FragmentSearch::new(&inside, params.clone()).unwrap();
            let direct = rebuilt
                .needle
                .shift_for_optimal_correlation(&search.needle)
                .unwrap();
            assert_close(m.score, direct.correlation, 1e-9);
        }
    }

    #[test]
    fn test_gaps_are_skipped() {
        let mut haystack = tune(8);
        haystack.extend(tune(8).into_iter().map(|mut a| {
            a.time_seconds += 10.0;
            a
        }));
        let fragment = excerpt(&haystack, 0, 4, 0.0);
        let search = FragmentSearch::new(&fragment, FragmentSearchParameters::default()).unwrap();
        let matches = search.search(&haystack).unwrap();
        assert!(matches
            .iter()
            .all(|m| m.start_seconds < 1.0 || m.start_seconds >= 9.5));
        assert!(matches.iter().any(|m| m.start_seconds >= 10.0));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            FragmentSearch::new(&[], FragmentSearchParameters::default()),
            Err(AnalysisError::DegenerateInput(_))
        ));
        let params = FragmentSearchParameters {
            step_seconds: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            FragmentSearch::new(&tune(4), params),
            Err(AnalysisError::InvalidParameter { .. })
        ));
        let search = FragmentSearch::new(&tune(4), FragmentSearchParameters::default()).unwrap();
        assert!(search.search(&[]).unwrap().is_empty());
        assert_eq!(search.best(&[]).unwrap(), None);
    }
}

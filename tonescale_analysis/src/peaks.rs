/// Peak detection on circular bin values.
///
/// Every bin gets a score (zero unless it is a local maximum), bins scoring above
/// `mean + threshold_factor * stddev` of all scores become candidates, and candidates closer
/// than the window size to a larger neighbour are merged away. Neighbourhoods wrap around the
/// ends of the value slice, so a peak at the very first bin is found like any other.
use find_peaks::PeakFinder;
use log::trace;

use crate::error::{AnalysisError, Result};
use crate::util::{circular_distance, mean, standard_deviation, wrap_index};

/// A detected peak. `position` is expressed in the unit of whatever produced the values: the
/// raw bin index for [`detect_peaks`], the bin center for histogram and density peaks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: usize,
    pub position: f64,
    pub height: f64,
}

/// How a bin is scored before thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakScore {
    /// Average drop from the bin to each of its neighbours within the window. Only strict
    /// maxima of the window score.
    #[default]
    Difference,
    /// The bin height, for bins higher than both immediate neighbours.
    LocalHeight,
    /// Mass enclosed by the window around a strict maximum of that window.
    LocalVolume,
    /// Topographic prominence as computed by `find_peaks`.
    Prominence,
}

#[derive(Debug, Clone)]
pub struct PeakDetectionParameters {
    /// Half width of the neighbourhood, in bins. Also the minimum distance between two
    /// reported peaks.
    pub window_size: usize,
    /// Number of standard deviations above the mean score a bin has to reach. Zero or less
    /// reports every local maximum.
    pub threshold_factor: f64,
    /// Scoring strategy.
    pub score: PeakScore,
}

impl Default for PeakDetectionParameters {
    fn default() -> Self {
        Self {
            window_size: 5,
            threshold_factor: 0.5,
            score: PeakScore::Difference,
        }
    }
}

/// Finds the peaks of circular `values`. The result is sorted by bin.
pub fn detect_peaks(values: &[f64], params: &PeakDetectionParameters) -> Result<Vec<Peak>> {
    if params.window_size == 0 {
        return Err(AnalysisError::invalid("window_size", "must be positive"));
    }
    if !params.threshold_factor.is_finite() {
        return Err(AnalysisError::invalid("threshold_factor", "must be finite"));
    }
    let n = values.len();
    // a window reaching around the whole circle would compare bins with themselves
    let window = params.window_size.min(n.saturating_sub(1) / 2);
    if window == 0 {
        return Ok(Vec::new());
    }

    let scores = score_bins(values, window, params.score);
    let flat: Vec<f64> = scores.iter().map(|s| s.unwrap_or(0.0)).collect();
    let mean_score = mean(&flat);
    let stddev = standard_deviation(&flat);
    let threshold = if stddev > 0.0 {
        mean_score + params.threshold_factor * stddev
    } else {
        // no spread: the factor carries no information
        mean_score
    };

    let candidates: Vec<Peak> = scores
        .iter()
        .enumerate()
        .filter_map(|(bin, score)| match score {
            Some(s) if *s > threshold || (params.threshold_factor <= 0.0 && *s > 0.0) => {
                Some(Peak {
                    bin,
                    position: bin as f64,
                    height: values[bin],
                })
            }
            _ => None,
        })
        .collect();
    trace!(
        "{} peak candidates above threshold {threshold:.4}",
        candidates.len()
    );

    Ok(merge_close_peaks(candidates, params.window_size, n))
}

fn is_window_maximum(values: &[f64], i: usize, window: usize) -> bool {
    let n = values.len();
    (1..=window).all(|j| {
        values[i] > values[wrap_index(i as isize - j as isize, n)]
            && values[i] > values[(i + j) % n]
    })
}

fn score_bins(values: &[f64], window: usize, strategy: PeakScore) -> Vec<Option<f64>> {
    let n = values.len();
    match strategy {
        PeakScore::Difference => (0..n)
            .map(|i| {
                if !is_window_maximum(values, i, window) {
                    return None;
                }
                let drops: f64 = (1..=window)
                    .map(|j| {
                        (values[i] - values[wrap_index(i as isize - j as isize, n)])
                            + (values[i] - values[(i + j) % n])
                    })
                    .sum();
                Some(drops / (2 * window) as f64)
            })
            .collect(),
        PeakScore::LocalHeight => (0..n)
            .map(|i| is_window_maximum(values, i, 1).then_some(values[i]))
            .collect(),
        PeakScore::LocalVolume => (0..n)
            .map(|i| {
                is_window_maximum(values, i, window).then(|| {
                    (-(window as isize)..=window as isize)
                        .map(|j| values[wrap_index(i as isize + j, n)])
                        .sum()
                })
            })
            .collect(),
        PeakScore::Prominence => prominence_scores(values),
    }
}

/// Runs `find_peaks` on the values padded with half a period on each side, so that
/// prominence is measured around the circle.
fn prominence_scores(values: &[f64]) -> Vec<Option<f64>> {
    let n = values.len();
    let pad = n / 2;
    let padded: Vec<f64> = (0..n + 2 * pad)
        .map(|i| values[wrap_index(i as isize - pad as isize, n)])
        .collect();

    let mut fp = PeakFinder::new(&padded);
    fp.with_min_prominence(0.0);

    let mut scores = vec![None; n];
    for p in fp.find_peaks() {
        let middle = p.middle_position();
        if middle < pad || middle >= pad + n {
            continue;
        }
        let prominence = p.prominence.unwrap_or(0.0);
        if prominence > 0.0 {
            scores[middle - pad] = Some(prominence);
        }
    }
    scores
}

/// Repeatedly drops the lower of two peaks closer than `window` bins (circularly) until a pass
/// changes nothing. Each changing pass removes at least one peak; the pass count is
/// additionally capped at one and a half times the candidate count.
fn merge_close_peaks(mut peaks: Vec<Peak>, window: usize, period: usize) -> Vec<Peak> {
    peaks.sort_by_key(|p| p.bin);
    let max_passes = (peaks.len() * 3).div_ceil(2);

    for pass in 0..max_passes {
        let before = peaks.len();
        let mut merged: Vec<Peak> = Vec::with_capacity(before);
        for peak in peaks {
            match merged.last_mut() {
                Some(last) if circular_distance(last.bin, peak.bin, period) < window => {
                    if peak.height > last.height {
                        *last = peak;
                    }
                }
                _ => merged.push(peak),
            }
        }
        if merged.len() > 1 {
            let first = merged[0];
            let last = merged[merged.len() - 1];
            if circular_distance(first.bin, last.bin, period) < window {
                if last.height > first.height {
                    merged.remove(0);
                } else {
                    merged.pop();
                }
            }
        }
        peaks = merged;
        if peaks.len() == before {
            trace!("peak merging converged after {} passes", pass + 1);
            break;
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bumps(n: usize, centers: &[(usize, f64)], stddev: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                1.0 + centers
                    .iter()
                    .map(|(c, h)| {
                        let d = circular_distance(i, *c, n) as f64;
                        h * (-(d * d) / (2.0 * stddev * stddev)).exp()
                    })
                    .sum::<f64>()
            })
            .collect()
    }

    fn bins(peaks: &[Peak]) -> Vec<usize> {
        peaks.iter().map(|p| p.bin).collect()
    }

    #[test]
    fn test_three_bumps() {
        let values = bumps(100, &[(20, 10.0), (50, 6.0), (80, 8.0)], 3.0);
        let peaks = detect_peaks(&values, &PeakDetectionParameters::default()).unwrap();
        assert_eq!(bins(&peaks), vec![20, 50, 80]);
        assert_eq!(peaks[0].height, values[20]);
    }

    #[test]
    fn test_peak_at_the_wrap() {
        let values = bumps(100, &[(0, 10.0), (50, 5.0)], 3.0);
        let peaks = detect_peaks(&values, &PeakDetectionParameters::default()).unwrap();
        assert_eq!(bins(&peaks), vec![0, 50]);
    }

    #[test]
    fn test_all_strategies_agree_on_clear_peaks() {
        let values = bumps(100, &[(20, 10.0), (50, 6.0), (80, 8.0)], 3.0);
        for score in [
            PeakScore::Difference,
            PeakScore::LocalHeight,
            PeakScore::LocalVolume,
            PeakScore::Prominence,
        ] {
            let params = PeakDetectionParameters {
                score,
                ..Default::default()
            };
            let peaks = detect_peaks(&values, &params).unwrap();
            assert_eq!(bins(&peaks), vec![20, 50, 80], "{score:?}");
        }
    }

    #[test]
    fn test_merging_keeps_the_higher_peak() {
        let mut values = vec![0.0; 40];
        values[1] = 4.0;
        values[10] = 5.0;
        values[11] = 1.0;
        values[12] = 6.0;
        values[38] = 3.0;
        let params = PeakDetectionParameters {
            window_size: 5,
            threshold_factor: 0.0,
            score: PeakScore::LocalHeight,
        };
        let peaks = detect_peaks(&values, &params).unwrap();
        assert_eq!(bins(&peaks), vec![1, 12]);
    }

    #[test]
    fn test_merged_peaks_are_window_apart() {
        let values: Vec<f64> = (0..120)
            .map(|i| ((i as f64 * 0.9).sin() + (i as f64 * 0.31).cos() * 2.0).abs())
            .collect();
        for window in [1, 3, 7, 15] {
            let params = PeakDetectionParameters {
                window_size: window,
                threshold_factor: -1.0,
                score: PeakScore::LocalHeight,
            };
            let peaks = detect_peaks(&values, &params).unwrap();
            for (i, a) in peaks.iter().enumerate() {
                for b in peaks.iter().skip(i + 1) {
                    assert!(
                        peaks.len() <= 1 || circular_distance(a.bin, b.bin, 120) >= window,
                        "{} and {} closer than {window}",
                        a.bin,
                        b.bin
                    );
                }
            }
        }
    }

    #[test]
    fn test_non_positive_threshold_reports_all_maxima() {
        let values = bumps(100, &[(20, 10.0), (50, 0.5), (80, 8.0)], 3.0);
        let strict = detect_peaks(
            &values,
            &PeakDetectionParameters {
                threshold_factor: 3.0,
                ..Default::default()
            },
        )
        .unwrap();
        let all = detect_peaks(
            &values,
            &PeakDetectionParameters {
                threshold_factor: -2.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(strict.len() < 3);
        assert_eq!(bins(&all), vec![20, 50, 80]);
    }

    #[test]
    fn test_degenerate_inputs() {
        let params = PeakDetectionParameters::default();
        assert!(detect_peaks(&[], &params).unwrap().is_empty());
        assert!(detect_peaks(&[1.0; 50], &params).unwrap().is_empty());
        assert!(detect_peaks(&[1.0, 2.0], &params).unwrap().is_empty());
        assert!(matches!(
            detect_peaks(
                &[1.0, 2.0, 1.0],
                &PeakDetectionParameters {
                    window_size: 0,
                    ..Default::default()
                }
            ),
            Err(AnalysisError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_small_period_clamps_window() {
        let peaks = detect_peaks(&[1.0, 3.0, 1.0], &PeakDetectionParameters::default()).unwrap();
        assert_eq!(bins(&peaks), vec![1]);
    }
}

/// Fixed-resolution binned counters over a numeric domain, optionally circular.
///
/// A [`Histogram`] counts integer observations. Operations that produce fractional bin values
/// (normalization, smoothing, averaging) return a [`DensityHistogram`] of the same shape. Both
/// implement [`BinnedDistribution`], which carries the comparison and smoothing operations.
use std::borrow::Cow;
use std::fmt;

use log::trace;

use crate::correlation::{self, CorrelationMeasure, OptimalDisplacement};
use crate::error::{AnalysisError, Result};
use crate::peaks::{self, Peak, PeakDetectionParameters};
use crate::util::{arg_max, wrap_index};

/// Domain, resolution and out of range policy of a histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramShape {
    start: f64,
    stop: f64,
    bin_count: usize,
    wrap: bool,
    ignore_out_of_range: bool,
}

impl HistogramShape {
    /// A bounded shape over `[start, stop)` split into `bin_count` equally wide classes.
    /// Values outside of the domain are rejected until [`Self::wrapping`] or
    /// [`Self::ignoring_out_of_range`] says otherwise.
    pub fn new(start: f64, stop: f64, bin_count: usize) -> Result<Self> {
        if !start.is_finite() || !stop.is_finite() || stop <= start {
            return Err(AnalysisError::invalid(
                "domain",
                format!("[{start}, {stop}) is not a non-empty finite interval"),
            ));
        }
        if bin_count == 0 {
            return Err(AnalysisError::invalid("bin_count", "must be positive"));
        }
        Ok(Self {
            start,
            stop,
            bin_count,
            wrap: false,
            ignore_out_of_range: false,
        })
    }

    /// Like [`Self::new`], but with the number of bins derived from a class width. The width is
    /// rounded so that a whole number of bins covers the domain.
    pub fn with_class_width(start: f64, stop: f64, class_width: f64) -> Result<Self> {
        if !(class_width > 0.0) || !class_width.is_finite() {
            return Err(AnalysisError::invalid("class_width", "must be positive"));
        }
        let bin_count = ((stop - start) / class_width).round().max(1.0) as usize;
        Self::new(start, stop, bin_count)
    }

    /// Circular shape: values are folded into the domain before binning.
    pub fn wrapping(mut self) -> Self {
        self.wrap = true;
        self
    }

    /// Out of range values are silently dropped instead of being an error.
    pub fn ignoring_out_of_range(mut self) -> Self {
        self.ignore_out_of_range = true;
        self
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn stop(&self) -> f64 {
        self.stop
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn wraps(&self) -> bool {
        self.wrap
    }

    pub fn ignores_out_of_range(&self) -> bool {
        self.ignore_out_of_range
    }

    pub fn class_width(&self) -> f64 {
        (self.stop - self.start) / self.bin_count as f64
    }

    /// Bin for `value`, or `None` if the value is dropped by the out of range policy.
    pub fn bin_index(&self, value: f64) -> Result<Option<usize>> {
        let out_of_range = || {
            if self.ignore_out_of_range {
                Ok(None)
            } else {
                Err(AnalysisError::OutOfRange {
                    value,
                    start: self.start,
                    stop: self.stop,
                })
            }
        };

        if !value.is_finite() {
            return out_of_range();
        }
        let value = if self.wrap {
            let folded = (value - self.start).rem_euclid(self.stop - self.start) + self.start;
            // rem_euclid of a tiny negative offset may round up to the period
            if folded >= self.stop {
                self.start
            } else {
                folded
            }
        } else {
            value
        };
        if value < self.start || value >= self.stop {
            return out_of_range();
        }
        let idx = ((value - self.start) / self.class_width()).floor() as usize;
        // rounding right below `stop` can land one past the last class
        Ok(Some(idx.min(self.bin_count - 1)))
    }

    pub fn bin_start(&self, idx: usize) -> f64 {
        self.start + idx as f64 * self.class_width()
    }

    pub fn bin_center(&self, idx: usize) -> f64 {
        self.start + (idx as f64 + 0.5) * self.class_width()
    }

    /// Domain and resolution must agree for elementwise operations; the out of range policy
    /// may differ.
    pub fn check_compatible(&self, other: &HistogramShape) -> Result<()> {
        if self.start != other.start || self.stop != other.stop || self.bin_count != other.bin_count
        {
            return Err(AnalysisError::ShapeMismatch {
                expected: self.to_string(),
                got: other.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for HistogramShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) in {} bins{}",
            self.start,
            self.stop,
            self.bin_count,
            if self.wrap { " (circular)" } else { "" }
        )
    }
}

/// Bin values over a [`HistogramShape`], plus everything that can be computed from them.
pub trait BinnedDistribution {
    fn shape(&self) -> &HistogramShape;

    fn bin_values(&self) -> Cow<'_, [f64]>;

    fn total_mass(&self) -> f64 {
        self.bin_values().iter().sum()
    }

    /// Similarity of the aligned distributions.
    fn correlation<D: BinnedDistribution + ?Sized>(
        &self,
        other: &D,
        measure: CorrelationMeasure,
    ) -> Result<f64> {
        self.correlation_with_displacement(0, other, measure)
    }

    /// Similarity after rotating `other` by `displacement` bins (negative values wrap).
    fn correlation_with_displacement<D: BinnedDistribution + ?Sized>(
        &self,
        displacement: isize,
        other: &D,
        measure: CorrelationMeasure,
    ) -> Result<f64> {
        self.shape().check_compatible(other.shape())?;
        correlation::correlation_with_displacement(
            &self.bin_values(),
            &other.bin_values(),
            displacement,
            &measure,
        )
    }

    /// Brute force search for the displacement of `other` that maximizes the similarity. The
    /// smallest displacement wins on ties.
    fn displacement_for_optimal_correlation<D: BinnedDistribution + ?Sized>(
        &self,
        other: &D,
        measure: CorrelationMeasure,
    ) -> Result<OptimalDisplacement> {
        self.shape().check_compatible(other.shape())?;
        let optimal = correlation::displacement_for_optimal_correlation(
            &self.bin_values(),
            &other.bin_values(),
            &measure,
        )?;
        trace!(
            "optimal displacement {} ({} bins) with {measure} correlation {:.4}",
            optimal.displacement,
            optimal.signed(self.shape().bin_count()),
            optimal.correlation
        );
        Ok(optimal)
    }

    /// Bin values divided by the total mass.
    fn normalize(&self) -> Result<DensityHistogram> {
        let total = self.total_mass();
        if total == 0.0 {
            return Err(AnalysisError::DegenerateInput("normalizing an empty histogram"));
        }
        Ok(DensityHistogram {
            shape: *self.shape(),
            values: self.bin_values().iter().map(|v| v / total).collect(),
        })
    }

    /// Convolution with a discrete gaussian of `stddev` bins, rescaled so that the total mass is
    /// unchanged. Circular shapes wrap at the edges, bounded ones drop what leaves the domain
    /// before rescaling.
    fn gaussian_smooth(&self, stddev: f64) -> Result<DensityHistogram> {
        if !(stddev >= 0.0) || !stddev.is_finite() {
            return Err(AnalysisError::invalid(
                "stddev",
                format!("{stddev} is not a non-negative number"),
            ));
        }
        let values = self.bin_values();
        let shape = *self.shape();
        if stddev == 0.0 {
            return Ok(DensityHistogram {
                shape,
                values: values.into_owned(),
            });
        }

        let n = values.len();
        let mut radius = (4.0 * stddev).ceil() as usize;
        if shape.wraps() {
            // every source bin is visited at most once around the circle
            radius = radius.min((n - 1) / 2);
        }
        let weights: Vec<f64> = (0..=radius)
            .map(|d| (-((d * d) as f64) / (2.0 * stddev * stddev)).exp())
            .collect();

        let mut smoothed = vec![0.0; n];
        for (i, out) in smoothed.iter_mut().enumerate() {
            for offset in -(radius as isize)..=radius as isize {
                let j = i as isize + offset;
                let j = if shape.wraps() {
                    wrap_index(j, n)
                } else if j < 0 || j >= n as isize {
                    continue;
                } else {
                    j as usize
                };
                *out += values[j] * weights[offset.unsigned_abs()];
            }
        }

        let original_sum: f64 = values.iter().sum();
        let smoothed_sum: f64 = smoothed.iter().sum();
        if smoothed_sum != 0.0 {
            let factor = original_sum / smoothed_sum;
            smoothed.iter_mut().for_each(|v| *v *= factor);
        }
        Ok(DensityHistogram {
            shape,
            values: smoothed,
        })
    }

    /// Median over an odd `window` of bins centered on each bin. Circular shapes wrap, bounded
    /// ones shrink the window at the edges.
    fn median_filter(&self, window: usize) -> Result<DensityHistogram> {
        if window == 0 || window % 2 == 0 {
            return Err(AnalysisError::invalid(
                "window",
                format!("median filter window must be odd, got {window}"),
            ));
        }
        let values = self.bin_values();
        let shape = *self.shape();
        let n = values.len();
        let half = (window / 2) as isize;

        let filtered = (0..n as isize)
            .map(|i| {
                let mut neighbourhood: Vec<f64> = (i - half..=i + half)
                    .filter_map(|j| {
                        if shape.wraps() {
                            Some(values[wrap_index(j, n)])
                        } else if (0..n as isize).contains(&j) {
                            Some(values[j as usize])
                        } else {
                            None
                        }
                    })
                    .collect();
                neighbourhood.sort_by(|a, b| a.total_cmp(b));
                let m = neighbourhood.len();
                if m % 2 == 1 {
                    neighbourhood[m / 2]
                } else {
                    (neighbourhood[m / 2 - 1] + neighbourhood[m / 2]) / 2.0
                }
            })
            .collect();
        Ok(DensityHistogram {
            shape,
            values: filtered,
        })
    }

    /// Index of the highest bin, the lowest index on ties.
    fn max_bin(&self) -> usize {
        arg_max(&self.bin_values())
    }

    /// Scale degree like peaks of the distribution, positions in domain units.
    fn peaks(&self, params: &PeakDetectionParameters) -> Result<Vec<Peak>> {
        let shape = *self.shape();
        let found = peaks::detect_peaks(&self.bin_values(), params)?;
        Ok(found
            .into_iter()
            .map(|p| Peak {
                bin: p.bin,
                position: shape.bin_center(p.bin),
                height: p.height,
            })
            .collect())
    }
}

/// Integer counts over a [`HistogramShape`].
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    shape: HistogramShape,
    counts: Vec<i64>,
}

impl Histogram {
    pub fn new(shape: HistogramShape) -> Self {
        Self {
            shape,
            counts: vec![0; shape.bin_count()],
        }
    }

    /// A zero-filled histogram with the shape of `other`.
    pub fn empty_like<D: BinnedDistribution + ?Sized>(other: &D) -> Self {
        Self::new(*other.shape())
    }

    pub fn from_counts(shape: HistogramShape, counts: Vec<i64>) -> Result<Self> {
        if counts.len() != shape.bin_count() {
            return Err(AnalysisError::ShapeMismatch {
                expected: shape.to_string(),
                got: format!("{} counts", counts.len()),
            });
        }
        Ok(Self { shape, counts })
    }

    /// Counts one observation of `value`. Values dropped by the out of range policy are not
    /// counted; `Ok(false)` reports that.
    pub fn add(&mut self, value: f64) -> Result<bool> {
        match self.shape.bin_index(value)? {
            Some(idx) => {
                self.counts[idx] += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn add_all(&mut self, values: impl IntoIterator<Item = f64>) -> Result<()> {
        for value in values {
            self.add(value)?;
        }
        Ok(())
    }

    /// Count of the bin holding `value`, zero for dropped values.
    pub fn count(&self, value: f64) -> Result<i64> {
        Ok(self
            .shape
            .bin_index(value)?
            .map_or(0, |idx| self.counts[idx]))
    }

    /// # Panics
    /// If `idx` is not a bin of this histogram.
    pub fn count_for_class(&self, idx: usize) -> i64 {
        self.counts[idx]
    }

    /// # Panics
    /// If `idx` is not a bin of this histogram.
    pub fn set_count(&mut self, idx: usize, count: i64) {
        self.counts[idx] = count;
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    /// Number of accepted observations.
    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    pub fn clear(&mut self) {
        self.counts.fill(0);
    }

    /// Elementwise sum.
    pub fn add_histogram(&mut self, other: &Histogram) -> Result<()> {
        self.shape.check_compatible(&other.shape)?;
        self.counts
            .iter_mut()
            .zip(other.counts.iter())
            .for_each(|(a, b)| *a += b);
        Ok(())
    }

    /// Elementwise mean of several histograms of identical shape.
    pub fn mean(histograms: &[Histogram]) -> Result<DensityHistogram> {
        let first = histograms
            .first()
            .ok_or(AnalysisError::DegenerateInput("mean of no histograms"))?;
        let mut values = vec![0.0; first.shape.bin_count()];
        for h in histograms {
            first.shape.check_compatible(&h.shape)?;
            values
                .iter_mut()
                .zip(h.counts.iter())
                .for_each(|(v, c)| *v += *c as f64);
        }
        let n = histograms.len() as f64;
        values.iter_mut().for_each(|v| *v /= n);
        Ok(DensityHistogram {
            shape: first.shape,
            values,
        })
    }

    /// Bin contents rotated to the right by `displacement` bins.
    pub fn shifted(&self, displacement: isize) -> Histogram {
        Histogram {
            shape: self.shape,
            counts: rotate(&self.counts, displacement),
        }
    }
}

impl BinnedDistribution for Histogram {
    fn shape(&self) -> &HistogramShape {
        &self.shape
    }

    fn bin_values(&self) -> Cow<'_, [f64]> {
        Cow::Owned(self.counts.iter().map(|c| *c as f64).collect())
    }
}

/// Real valued bins over a [`HistogramShape`]; the result of normalizing, smoothing or
/// averaging histograms.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityHistogram {
    shape: HistogramShape,
    values: Vec<f64>,
}

impl DensityHistogram {
    pub fn new(shape: HistogramShape) -> Self {
        Self {
            shape,
            values: vec![0.0; shape.bin_count()],
        }
    }

    pub fn from_values(shape: HistogramShape, values: Vec<f64>) -> Result<Self> {
        if values.len() != shape.bin_count() {
            return Err(AnalysisError::ShapeMismatch {
                expected: shape.to_string(),
                got: format!("{} values", values.len()),
            });
        }
        Ok(Self { shape, values })
    }

    pub fn value(&self, idx: usize) -> f64 {
        self.values[idx]
    }

    pub fn set_value(&mut self, idx: usize, value: f64) {
        self.values[idx] = value;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn add_histogram<D: BinnedDistribution + ?Sized>(&mut self, other: &D) -> Result<()> {
        self.shape.check_compatible(other.shape())?;
        self.values
            .iter_mut()
            .zip(other.bin_values().iter())
            .for_each(|(a, b)| *a += b);
        Ok(())
    }

    pub fn shifted(&self, displacement: isize) -> DensityHistogram {
        DensityHistogram {
            shape: self.shape,
            values: rotate(&self.values, displacement),
        }
    }
}

impl BinnedDistribution for DensityHistogram {
    fn shape(&self) -> &HistogramShape {
        &self.shape
    }

    fn bin_values(&self) -> Cow<'_, [f64]> {
        Cow::Borrowed(&self.values)
    }
}

impl From<&Histogram> for DensityHistogram {
    fn from(h: &Histogram) -> Self {
        DensityHistogram {
            shape: h.shape,
            values: h.bin_values().into_owned(),
        }
    }
}

fn rotate<T: Copy>(values: &[T], displacement: isize) -> Vec<T> {
    let n = values.len();
    (0..n)
        .map(|i| values[wrap_index(i as isize - displacement, n)])
        .collect()
}

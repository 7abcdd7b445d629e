/// Kernel density estimation over a circular domain.
///
/// The estimate is kept as a dense accumulator: adding a point adds the kernel, centered on the
/// point's bin, to every bin within the kernel support; removing a point subtracts exactly the
/// same contribution. This makes sliding windows over annotation streams cheap, only the points
/// entering and leaving the window have to be touched.
use std::borrow::Cow;
use std::cell::OnceCell;

use log::trace;

use crate::correlation::{self, CorrelationMeasure, OptimalDisplacement};
use crate::error::{AnalysisError, Result};
use crate::histogram::{BinnedDistribution, DensityHistogram, HistogramShape};
use crate::util::{self, wrap_index};

/// Weight of a point as a function of its distance in bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// Unnormalized gaussian `exp(-d² / 2σ²)`, truncated at three standard deviations.
    Gaussian { stddev: f64 },
    /// Weight one up to `half_width` bins away, zero beyond.
    Rectangular { half_width: usize },
}

impl Kernel {
    fn validate(&self) -> Result<()> {
        match self {
            Kernel::Gaussian { stddev } if !(*stddev > 0.0) || !stddev.is_finite() => Err(
                AnalysisError::invalid("stddev", format!("kernel width {stddev} is not positive")),
            ),
            _ => Ok(()),
        }
    }

    /// Largest distance, in bins, with a non-zero weight.
    pub fn support(&self) -> usize {
        match self {
            Kernel::Gaussian { stddev } => (3.0 * stddev).ceil() as usize,
            Kernel::Rectangular { half_width } => *half_width,
        }
    }

    pub fn weight(&self, distance: f64) -> f64 {
        match self {
            Kernel::Gaussian { stddev } => {
                if distance.abs() > self.support() as f64 {
                    0.0
                } else {
                    (-(distance * distance) / (2.0 * stddev * stddev)).exp()
                }
            }
            Kernel::Rectangular { half_width } => {
                if distance.abs() <= *half_width as f64 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelDensityEstimate {
    shape: HistogramShape,
    kernel: Kernel,
    /// `table[d]` is the kernel weight at distance `d` bins.
    table: Vec<f64>,
    accumulator: Vec<f64>,
    points: usize,
}

impl KernelDensityEstimate {
    /// An empty estimate over `shape`, which is made circular.
    pub fn new(kernel: Kernel, shape: HistogramShape) -> Result<Self> {
        kernel.validate()?;
        let shape = shape.wrapping();
        let n = shape.bin_count();
        // the kernel must not reach around the circle onto itself
        let radius = kernel.support().min(n.saturating_sub(1) / 2);
        let table = (0..=radius).map(|d| kernel.weight(d as f64)).collect();
        Ok(Self {
            shape,
            kernel,
            table,
            accumulator: vec![0.0; n],
            points: 0,
        })
    }

    /// One bin per unit over `[0, size)`, e.g. `size = 1200` for cents in an octave.
    pub fn with_size(kernel: Kernel, size: usize) -> Result<Self> {
        Self::new(kernel, HistogramShape::new(0.0, size as f64, size)?)
    }

    /// Pitch classes in cents, `[0, 1200)`, with bins `bin_width_cents` wide.
    pub fn pitch_class(kernel: Kernel, bin_width_cents: f64) -> Result<Self> {
        Self::new(
            kernel,
            HistogramShape::with_class_width(0.0, 1200.0, bin_width_cents)?,
        )
    }

    pub fn from_points(
        kernel: Kernel,
        shape: HistogramShape,
        points: impl IntoIterator<Item = f64>,
    ) -> Result<Self> {
        let mut kde = Self::new(kernel, shape)?;
        kde.add_all(points)?;
        Ok(kde)
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    fn apply(&mut self, point: f64, sign: f64) -> Result<()> {
        let n = self.accumulator.len();
        let Some(center) = self.shape.bin_index(point)? else {
            return Ok(());
        };
        let radius = self.table.len() as isize - 1;
        for offset in -radius..=radius {
            let idx = wrap_index(center as isize + offset, n);
            self.accumulator[idx] += sign * self.table[offset.unsigned_abs()];
        }
        Ok(())
    }

    /// Adds the kernel around `point`. Costs O(kernel support).
    pub fn add(&mut self, point: f64) -> Result<()> {
        self.apply(point, 1.0)?;
        self.points += 1;
        Ok(())
    }

    /// Subtracts exactly what [`Self::add`] added for `point`.
    pub fn remove(&mut self, point: f64) -> Result<()> {
        self.apply(point, -1.0)?;
        self.points = self.points.saturating_sub(1);
        if self.points == 0 {
            // drop accumulated rounding noise
            self.accumulator.fill(0.0);
        }
        Ok(())
    }

    pub fn add_all(&mut self, points: impl IntoIterator<Item = f64>) -> Result<()> {
        for p in points {
            self.add(p)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.accumulator.fill(0.0);
        self.points = 0;
    }

    pub fn value(&self, idx: usize) -> f64 {
        self.accumulator[idx]
    }

    pub fn values(&self) -> &[f64] {
        &self.accumulator
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.accumulator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points == 0
    }

    /// Number of points currently added.
    pub fn points(&self) -> usize {
        self.points
    }

    pub fn sum(&self) -> f64 {
        self.accumulator.iter().sum()
    }

    pub fn max(&self) -> f64 {
        self.accumulator.iter().cloned().fold(0.0, f64::max)
    }

    /// Mean bin value.
    pub fn mean(&self) -> f64 {
        util::mean(&self.accumulator)
    }

    /// Population standard deviation of the bin values.
    pub fn standard_deviation(&self) -> f64 {
        util::standard_deviation(&self.accumulator)
    }

    /// Copy scaled to unit mass.
    pub fn normalized(&self) -> Result<DensityHistogram> {
        self.normalize()
    }

    pub fn to_density_histogram(&self) -> Result<DensityHistogram> {
        DensityHistogram::from_values(self.shape, self.accumulator.clone())
    }

    /// Intersection similarity of the two estimates with `other` rotated by `displacement`.
    pub fn correlation_at(&self, other: &Self, displacement: isize) -> Result<f64> {
        self.correlation_with_displacement(displacement, other, CorrelationMeasure::Intersection)
    }

    /// Brute force intersection search, the smallest shift wins on ties.
    pub fn shift_for_optimal_correlation(&self, other: &Self) -> Result<OptimalDisplacement> {
        self.displacement_for_optimal_correlation(other, CorrelationMeasure::Intersection)
    }
}

impl BinnedDistribution for KernelDensityEstimate {
    fn shape(&self) -> &HistogramShape {
        &self.shape
    }

    fn bin_values(&self) -> Cow<'_, [f64]> {
        Cow::Borrowed(&self.accumulator)
    }
}

/// Values derived from the accumulator, valid until the next mutation.
#[derive(Debug, Clone)]
struct Derived {
    rounded: Vec<i64>,
    rounded_sum: i64,
    peaks: Vec<usize>,
}

impl Derived {
    fn of(kde: &KernelDensityEstimate) -> Self {
        let rounded: Vec<i64> = kde.accumulator.iter().map(|v| v.round() as i64).collect();
        let rounded_sum = rounded.iter().sum();
        let n = kde.accumulator.len();
        let peaks = (0..n)
            .filter(|&i| {
                let v = kde.accumulator[i];
                n > 2
                    && v > kde.accumulator[wrap_index(i as isize - 1, n)]
                    && v > kde.accumulator[(i + 1) % n]
            })
            .collect();
        Self {
            rounded,
            rounded_sum,
            peaks,
        }
    }
}

/// A [`KernelDensityEstimate`] with a faster, slightly less precise comparison.
///
/// Comparisons run on the accumulator rounded to integers, so the quadratic displacement sweep
/// only does integer `min` and additions. Values well above one lose little; an estimate built
/// from few points with a narrow kernel loses a lot, use the exact search there. The rounded
/// values and the local maxima are derived lazily and thrown away on every `add`/`remove`.
#[derive(Debug, Clone)]
pub struct OptimizedKde {
    kde: KernelDensityEstimate,
    derived: OnceCell<Derived>,
}

impl OptimizedKde {
    pub fn new(kde: KernelDensityEstimate) -> Self {
        Self {
            kde,
            derived: OnceCell::new(),
        }
    }

    pub fn kde(&self) -> &KernelDensityEstimate {
        &self.kde
    }

    pub fn into_inner(self) -> KernelDensityEstimate {
        self.kde
    }

    pub fn add(&mut self, point: f64) -> Result<()> {
        self.derived.take();
        self.kde.add(point)
    }

    pub fn remove(&mut self, point: f64) -> Result<()> {
        self.derived.take();
        self.kde.remove(point)
    }

    fn derived(&self) -> &Derived {
        self.derived.get_or_init(|| Derived::of(&self.kde))
    }

    pub fn rounded_accumulator(&self) -> &[i64] {
        &self.derived().rounded
    }

    /// Bins higher than both neighbours.
    pub fn peak_bins(&self) -> &[usize] {
        &self.derived().peaks
    }

    fn rounded_intersection(&self, other: &Self, displacement: usize) -> f64 {
        let a = self.derived();
        let b = other.derived();
        let n = a.rounded.len();
        let overlap: i64 = (0..n)
            .map(|i| a.rounded[i].min(b.rounded[(i + displacement) % n]))
            .sum();
        let area = a.rounded_sum.max(b.rounded_sum);
        if area > 0 {
            overlap as f64 / area as f64
        } else {
            0.0
        }
    }

    /// Displacement search over the rounded accumulators. Same tie break as the exact search.
    pub fn optimal_correlation(&self, other: &Self) -> Result<OptimalDisplacement> {
        self.kde.shape().check_compatible(other.kde.shape())?;
        Ok(correlation::optimal_over(0..self.kde.len(), |d| {
            self.rounded_intersection(other, d)
        }))
    }

    /// Like [`Self::optimal_correlation`], but only tries shifts that put a local maximum of
    /// `other` onto one of `self`. Falls back to the full sweep when either side has no
    /// maxima.
    pub fn peak_aligned_shift(&self, other: &Self) -> Result<OptimalDisplacement> {
        self.kde.shape().check_compatible(other.kde.shape())?;
        let n = self.kde.len();
        let mut shifts: Vec<usize> = self
            .peak_bins()
            .iter()
            .flat_map(|p| {
                other
                    .peak_bins()
                    .iter()
                    .map(move |q| wrap_index(*q as isize - *p as isize, n))
            })
            .collect();
        if shifts.is_empty() {
            return self.optimal_correlation(other);
        }
        shifts.sort_unstable();
        shifts.dedup();
        trace!("peak aligned search over {} of {n} shifts", shifts.len());

        let mut best = OptimalDisplacement {
            displacement: 0,
            correlation: f64::NEG_INFINITY,
        };
        for d in shifts {
            let correlation = self.rounded_intersection(other, d);
            if correlation > best.correlation {
                best = OptimalDisplacement {
                    displacement: d,
                    correlation,
                };
            }
        }
        Ok(best)
    }
}

impl From<KernelDensityEstimate> for OptimizedKde {
    fn from(kde: KernelDensityEstimate) -> Self {
        Self::new(kde)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{assert_close, circular_distance};

    fn rectangular(half_width: usize, size: usize) -> KernelDensityEstimate {
        KernelDensityEstimate::with_size(Kernel::Rectangular { half_width }, size).unwrap()
    }

    const SCALE: [f64; 7] = [0.0, 204.0, 386.0, 498.0, 702.0, 884.0, 1088.0];

    fn gaussian(stddev: f64) -> Kernel {
        Kernel::Gaussian { stddev }
    }

    fn scale_points(offset: f64) -> Vec<f64> {
        SCALE
            .iter()
            .enumerate()
            .flat_map(|(i, d)| (0..(5 + 3 * i)).map(move |k| d + offset + (k % 4) as f64 * 3.0))
            .collect()
    }

    #[test]
    fn test_accumulator_is_sum_of_kernels() {
        let points = [3.2, 1195.0, 600.0, 610.5];
        let kde = KernelDensityEstimate::from_points(
            gaussian(5.0),
            HistogramShape::new(0.0, 1200.0, 1200).unwrap(),
            points,
        )
        .unwrap();
        for i in 0..1200 {
            let expected: f64 = points
                .iter()
                .map(|p| gaussian(5.0).weight(circular_distance(i, *p as usize, 1200) as f64))
                .sum();
            assert_close(kde.value(i), expected, 1e-12);
        }
        assert_eq!(kde.points(), 4);
    }

    #[test]
    fn test_add_touches_only_the_support() {
        let mut kde = KernelDensityEstimate::with_size(gaussian(2.0), 100).unwrap();
        kde.add(50.0).unwrap();
        let touched = kde.values().iter().filter(|v| **v > 0.0).count();
        assert_eq!(touched, 2 * 6 + 1);
        assert_eq!(kde.value(50), 1.0);

        let mut rect = rectangular(3, 10);
        rect.add(0.0).unwrap();
        assert_eq!(rect.values(), &[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_add_remove_round_trip() {
        let mut kde = KernelDensityEstimate::pitch_class(gaussian(3.0), 1.0).unwrap();
        kde.add_all(scale_points(0.0)).unwrap();
        let before = kde.values().to_vec();
        for p in [0.5, 599.9, 1199.0, 17.0] {
            kde.add(p).unwrap();
            kde.remove(p).unwrap();
        }
        for (a, b) in kde.values().iter().zip(before.iter()) {
            assert_close(*a, *b, 1e-9);
        }
        assert_eq!(kde.points(), scale_points(0.0).len());
    }

    #[test]
    fn test_sliding_window_matches_rebuild() {
        let stream: Vec<f64> = (0..200).map(|i| (i as f64 * 37.3) % 1200.0).collect();
        let window = 40;
        let mut sliding = KernelDensityEstimate::pitch_class(gaussian(4.0), 2.0).unwrap();
        sliding.add_all(stream[..window].iter().cloned()).unwrap();
        for start in 1..(stream.len() - window) {
            sliding.remove(stream[start - 1]).unwrap();
            sliding.add(stream[start + window - 1]).unwrap();
        }
        let last = stream.len() - window - 1;
        let rebuilt = KernelDensityEstimate::from_points(
            gaussian(4.0),
            *sliding.shape(),
            stream[last..last + window].iter().cloned(),
        )
        .unwrap();
        for (a, b) in sliding.values().iter().zip(rebuilt.values()) {
            assert_close(*a, *b, 1e-9);
        }
    }

    #[test]
    fn test_shift_recovery() {
        let shape = HistogramShape::new(0.0, 1200.0, 1200).unwrap();
        let a = KernelDensityEstimate::from_points(gaussian(6.0), shape, scale_points(0.0))
            .unwrap();
        let up = KernelDensityEstimate::from_points(gaussian(6.0), shape, scale_points(30.0))
            .unwrap();
        let down = KernelDensityEstimate::from_points(gaussian(6.0), shape, scale_points(-30.0))
            .unwrap();

        let optimal = a.shift_for_optimal_correlation(&up).unwrap();
        assert_eq!(optimal.displacement, 30);
        assert_close(optimal.correlation, 1.0, 1e-12);
        assert_close(a.correlation_at(&up, 30).unwrap(), 1.0, 1e-12);
        assert!(a.correlation_at(&up, 0).unwrap() < 0.9);

        let optimal = a.shift_for_optimal_correlation(&down).unwrap();
        assert_eq!(optimal.signed(1200), -30);
    }

    #[test]
    fn test_moments() {
        let mut kde = rectangular(0, 4);
        kde.add(1.0).unwrap();
        kde.add(1.0).unwrap();
        assert_eq!(kde.values(), &[0.0, 2.0, 0.0, 0.0]);
        assert_close(kde.mean(), 0.5, 1e-12);
        assert_close(kde.standard_deviation(), 0.75_f64.sqrt(), 1e-12);
        assert_eq!(kde.max(), 2.0);
        assert_close(kde.normalized().unwrap().value(1), 1.0, 1e-12);
    }

    #[test]
    fn test_invalid_kernel() {
        assert!(matches!(
            KernelDensityEstimate::with_size(gaussian(0.0), 10),
            Err(AnalysisError::InvalidParameter { .. })
        ));
        assert!(KernelDensityEstimate::with_size(gaussian(f64::NAN), 10).is_err());
    }

    #[test]
    fn test_optimized_cache_follows_mutations() {
        let kde = rectangular(1, 10);
        let mut fast = OptimizedKde::new(kde);
        assert_eq!(fast.rounded_accumulator().iter().sum::<i64>(), 0);
        assert!(fast.peak_bins().is_empty());

        fast.add(5.0).unwrap();
        fast.add(5.0).unwrap();
        assert_eq!(fast.rounded_accumulator()[5], 2);
        assert_eq!(fast.rounded_accumulator().iter().sum::<i64>(), 6);

        fast.add(2.0).unwrap();
        assert_eq!(fast.rounded_accumulator()[2], 1);
        fast.remove(5.0).unwrap();
        assert_eq!(fast.rounded_accumulator()[5], 1);
    }

    #[test]
    fn test_optimized_search_agrees_with_exact_search() {
        let shape = HistogramShape::new(0.0, 1200.0, 1200).unwrap();
        let build = |offset: f64| {
            // many points per degree so rounding costs little
            let points: Vec<f64> = (0..10).flat_map(|_| scale_points(offset)).collect();
            KernelDensityEstimate::from_points(gaussian(6.0), shape, points).unwrap()
        };
        let a = build(0.0);
        let b = build(30.0);
        let exact = a.shift_for_optimal_correlation(&b).unwrap();

        let fast_a = OptimizedKde::from(a);
        let fast_b = OptimizedKde::from(b);
        let fast = fast_a.optimal_correlation(&fast_b).unwrap();
        let aligned = fast_a.peak_aligned_shift(&fast_b).unwrap();

        assert_eq!(fast.displacement, exact.displacement);
        assert_eq!(aligned.displacement, exact.displacement);
        assert_close(fast.correlation, exact.correlation, 1e-2);
        assert_close(aligned.correlation, fast.correlation, 1e-12);
    }
}

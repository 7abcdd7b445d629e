/// Similarity measures and circular displacement search over equally shaped bin vectors.
///
/// Everything in here works on plain `&[f64]` slices of the same length; the histogram and
/// density types check their shapes and then delegate to these functions.
///
/// Displacement convention: at displacement `d`, bin `i` of the first operand is compared with
/// bin `(i + d) mod n` of the second one. If `b` is `a` rotated to the right by `k` bins, the
/// optimal displacement of `(a, b)` is `k`.
use std::fmt;
use std::str::FromStr;

use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::error::{AnalysisError, Result};
use crate::util::wrap_index;

/// A single similarity function. Implementations must be symmetric, return values in `[0, 1]`
/// for non-negative input and `1.0` when comparing a non-empty distribution with itself.
pub trait SimilarityMeasure {
    fn similarity(&self, a: &[f64], b: &[f64], displacement: usize) -> f64;
}

/// Overlapping area: `Σ min(a_i, b_i) / max(Σ a, Σ b)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Intersection;

/// Normalized inner product.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cosine;

/// Bhattacharyya coefficient of the two operands scaled to unit mass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bhattacharyya;

impl SimilarityMeasure for Intersection {
    fn similarity(&self, a: &[f64], b: &[f64], displacement: usize) -> f64 {
        let n = a.len();
        let mut overlap = 0.0;
        let mut sum_a = 0.0;
        let mut sum_b = 0.0;
        for i in 0..n {
            let bi = b[(i + displacement) % n];
            overlap += a[i].min(bi);
            sum_a += a[i];
            sum_b += b[i];
        }
        let area = sum_a.max(sum_b);
        if area > 0.0 {
            overlap / area
        } else {
            0.0
        }
    }
}

impl SimilarityMeasure for Cosine {
    fn similarity(&self, a: &[f64], b: &[f64], displacement: usize) -> f64 {
        let n = a.len();
        let dot: f64 = (0..n).map(|i| a[i] * b[(i + displacement) % n]).sum();
        let norm = norm(a) * norm(b);
        if norm > 0.0 {
            dot / norm
        } else {
            0.0
        }
    }
}

impl SimilarityMeasure for Bhattacharyya {
    fn similarity(&self, a: &[f64], b: &[f64], displacement: usize) -> f64 {
        let n = a.len();
        let sum_a: f64 = a.iter().sum();
        let sum_b: f64 = b.iter().sum();
        if sum_a <= 0.0 || sum_b <= 0.0 {
            return 0.0;
        }
        (0..n)
            .map(|i| (a[i] * b[(i + displacement) % n]).max(0.0).sqrt())
            .sum::<f64>()
            / (sum_a * sum_b).sqrt()
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// The closed set of measures selectable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrelationMeasure {
    #[default]
    Intersection,
    Cosine,
    Bhattacharyya,
}

impl SimilarityMeasure for CorrelationMeasure {
    fn similarity(&self, a: &[f64], b: &[f64], displacement: usize) -> f64 {
        match self {
            CorrelationMeasure::Intersection => Intersection.similarity(a, b, displacement),
            CorrelationMeasure::Cosine => Cosine.similarity(a, b, displacement),
            CorrelationMeasure::Bhattacharyya => Bhattacharyya.similarity(a, b, displacement),
        }
    }
}

impl fmt::Display for CorrelationMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CorrelationMeasure::Intersection => "intersection",
            CorrelationMeasure::Cosine => "cosine",
            CorrelationMeasure::Bhattacharyya => "bhattacharyya",
        };
        f.write_str(name)
    }
}

impl FromStr for CorrelationMeasure {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intersection" => Ok(CorrelationMeasure::Intersection),
            "cosine" => Ok(CorrelationMeasure::Cosine),
            "bhattacharyya" => Ok(CorrelationMeasure::Bhattacharyya),
            other => Err(AnalysisError::invalid(
                "measure",
                format!("unknown correlation measure '{other}'"),
            )),
        }
    }
}

/// Result of a displacement search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimalDisplacement {
    /// Winning displacement in `[0, n)`.
    pub displacement: usize,
    /// Similarity at that displacement.
    pub correlation: f64,
}

impl OptimalDisplacement {
    /// The displacement folded into `(-n/2, n/2]`, i.e. a shift to the left is negative.
    pub fn signed(&self, bin_count: usize) -> isize {
        signed_displacement(self.displacement, bin_count)
    }
}

pub fn signed_displacement(displacement: usize, bin_count: usize) -> isize {
    if displacement > bin_count / 2 {
        displacement as isize - bin_count as isize
    } else {
        displacement as isize
    }
}

fn check_operands(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(AnalysisError::ShapeMismatch {
            expected: format!("{} bins", a.len()),
            got: format!("{} bins", b.len()),
        });
    }
    if a.is_empty() {
        return Err(AnalysisError::DegenerateInput("correlation of empty operands"));
    }
    Ok(())
}

/// Similarity of `a` and `b` after rotating `b` by `displacement` bins. Negative displacements
/// wrap around.
pub fn correlation_with_displacement(
    a: &[f64],
    b: &[f64],
    displacement: isize,
    measure: &impl SimilarityMeasure,
) -> Result<f64> {
    check_operands(a, b)?;
    Ok(measure.similarity(a, b, wrap_index(displacement, a.len())))
}

/// Brute force search over every displacement in `[0, n)`. The first maximum wins, so ties
/// resolve to the smallest displacement.
pub fn displacement_for_optimal_correlation(
    a: &[f64],
    b: &[f64],
    measure: &impl SimilarityMeasure,
) -> Result<OptimalDisplacement> {
    check_operands(a, b)?;
    Ok(optimal_over(0..a.len(), |d| measure.similarity(a, b, d)))
}

/// Runs `score` over `displacements`, in order, and keeps the first maximum.
pub(crate) fn optimal_over(
    displacements: impl IntoIterator<Item = usize>,
    mut score: impl FnMut(usize) -> f64,
) -> OptimalDisplacement {
    let mut best = OptimalDisplacement {
        displacement: 0,
        correlation: f64::NEG_INFINITY,
    };
    for d in displacements {
        let correlation = score(d);
        if correlation > best.correlation {
            best = OptimalDisplacement {
                displacement: d,
                correlation,
            };
        }
    }
    best
}

/// Circular cross-correlation `c[d] = Σ_i a_i b_{(i+d) mod n}` for all `d`, computed through
/// the FFT.
pub fn circular_cross_correlation(a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
    check_operands(a, b)?;
    let n = a.len();

    let mut planner = FftPlanner::<f64>::new();
    let fwd = planner.plan_fft_forward(n);
    let inv = planner.plan_fft_inverse(n);

    let mut x_a: Vec<Complex64> = a.iter().map(|v| Complex64::new(*v, 0.0)).collect();
    let mut x_b: Vec<Complex64> = b.iter().map(|v| Complex64::new(*v, 0.0)).collect();
    fwd.process(&mut x_a);
    fwd.process(&mut x_b);

    let mut spectrum: Vec<Complex64> = x_a
        .iter()
        .zip(x_b.iter())
        .map(|(fa, fb)| fa.conj() * fb)
        .collect();
    inv.process(&mut spectrum);

    // rustfft does not normalize the inverse transform
    Ok(spectrum.iter().map(|c| c.re / n as f64).collect())
}

/// O(n log n) displacement search for the [`Cosine`] measure.
///
/// Gives the same result as [`displacement_for_optimal_correlation`] with `Cosine`. The FFT
/// only narrows the search: every displacement within a relative `1e-9` of the FFT maximum is
/// rescored exactly, and the first strict maximum among those wins.
pub fn displacement_for_optimal_cosine_fft(
    a: &[f64],
    b: &[f64],
) -> Result<OptimalDisplacement> {
    let xcorr = circular_cross_correlation(a, b)?;
    let max = xcorr.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let tolerance = 1e-9 * max.abs().max(f64::MIN_POSITIVE);
    let candidates = (0..xcorr.len()).filter(|&d| max - xcorr[d] <= tolerance);
    Ok(optimal_over(candidates, |d| Cosine.similarity(a, b, d)))
}

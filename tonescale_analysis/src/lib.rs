pub mod annotation;
pub mod correlation;
pub mod error;
pub mod fingerprint;
pub mod fragment;
pub mod histogram;
pub mod kde;
pub mod matching;
pub mod peaks;
pub mod scale;
pub mod table;
pub mod util;

pub use annotation::{Annotation, AnnotationFilter, PitchDetectorSource};
pub use correlation::{CorrelationMeasure, OptimalDisplacement};
pub use error::{AnalysisError, Result};
pub use fingerprint::{build_histogram, FingerprintParameters, PitchClassHistogram};
pub use fragment::{FragmentMatch, FragmentSearch, FragmentSearchParameters};
pub use histogram::{BinnedDistribution, DensityHistogram, Histogram, HistogramShape};
pub use kde::{Kernel, KernelDensityEstimate, OptimizedKde};
pub use matching::{
    AnnotatedRecording, HistogramCache, MatchKind, MatchParameters, MatchResult, Matcher,
    Recording, RecordingId,
};
pub use peaks::{detect_peaks, Peak, PeakDetectionParameters, PeakScore};
pub use scale::ToneScale;
pub use table::HistogramTable;

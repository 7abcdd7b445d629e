/// Ranking of recordings against a needle by pitch class histogram similarity.
///
/// Comparisons are independent of each other and run on the rayon pool. Histograms are built
/// at most once per recording through a [`HistogramCache`] owned by the caller.
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, warn};
use rayon::prelude::*;

use crate::annotation::Annotation;
use crate::correlation::CorrelationMeasure;
use crate::error::{AnalysisError, Result};
use crate::fingerprint::{build_histogram, FingerprintParameters, PitchClassHistogram};

/// Stable identity of a recording, e.g. its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordingId(String);

impl RecordingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordingId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordingId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&Path> for RecordingId {
    fn from(path: &Path) -> Self {
        Self(path.display().to_string())
    }
}

/// A source of annotations, typically a pitch detector run over an audio file.
pub trait Recording {
    fn id(&self) -> RecordingId;

    fn annotations(&self) -> Result<Vec<Annotation>>;
}

#[derive(Debug, Clone)]
pub struct MatchParameters {
    /// Scores above this are classified [`MatchKind::Exact`].
    pub exact_threshold: f64,
    pub measure: CorrelationMeasure,
    pub fingerprint: FingerprintParameters,
}

impl Default for MatchParameters {
    fn default() -> Self {
        Self {
            exact_threshold: 0.98,
            measure: CorrelationMeasure::default(),
            fingerprint: FingerprintParameters::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Close,
    /// The candidate's histogram could not be built.
    Failed,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchKind::Exact => "exact",
            MatchKind::Close => "close",
            MatchKind::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub candidate_id: RecordingId,
    pub score: f64,
    /// Transposition of the candidate relative to the needle, in bins, folded to
    /// `(-n/2, n/2]`.
    pub displacement: i32,
    pub displacement_cents: f64,
    pub kind: MatchKind,
}

impl MatchResult {
    fn failed(candidate_id: RecordingId) -> Self {
        Self {
            candidate_id,
            score: -1.0,
            displacement: 0,
            displacement_cents: 0.0,
            kind: MatchKind::Failed,
        }
    }
}

/// Compares two fingerprints. Pure, safe to call from any number of threads.
pub fn compare(
    candidate_id: RecordingId,
    needle: &PitchClassHistogram,
    candidate: &PitchClassHistogram,
    params: &MatchParameters,
) -> Result<MatchResult> {
    let optimal = needle.compare(candidate, params.measure)?;
    let bins = needle.density().values().len();
    let displacement = optimal.signed(bins) as i32;
    let kind = if optimal.correlation > params.exact_threshold {
        MatchKind::Exact
    } else {
        MatchKind::Close
    };
    Ok(MatchResult {
        candidate_id,
        score: optimal.correlation,
        displacement,
        displacement_cents: displacement as f64 * needle.bin_width_cents(),
        kind,
    })
}

type CacheSlot = Arc<OnceLock<Result<Arc<PitchClassHistogram>>>>;

/// Memoized histograms keyed by recording. Concurrent requests for the same key share one
/// build; failures are remembered like successes until [`HistogramCache::invalidate`].
#[derive(Debug, Default)]
pub struct HistogramCache {
    slots: Mutex<BTreeMap<RecordingId, CacheSlot>>,
}

impl HistogramCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &RecordingId) -> CacheSlot {
        // a panicking builder never runs under this lock, the map itself stays consistent
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(id.clone()).or_default().clone()
    }

    /// Returns the cached histogram for `id`, running `build` if there is none yet. The map
    /// lock is released before building, so builds for different keys run in parallel.
    pub fn get_or_build(
        &self,
        id: &RecordingId,
        build: impl FnOnce() -> Result<PitchClassHistogram>,
    ) -> Result<Arc<PitchClassHistogram>> {
        let slot = self.slot(id);
        if let Some(cached) = slot.get() {
            debug!("histogram cache hit for {id}");
            return cached.clone();
        }
        slot.get_or_init(|| {
            debug!("histogram cache miss for {id}, building");
            build().map(Arc::new)
        })
        .clone()
    }

    pub fn contains(&self, id: &RecordingId) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(id).is_some_and(|slot| slot.get().is_some())
    }

    /// Number of recordings with a finished build.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets the finished build of `id`, the next request rebuilds it. Returns `false` and
    /// keeps the entry when there is nothing finished to forget, in particular while a build
    /// for `id` is still running: callers waiting on that build get its result.
    pub fn invalidate(&self, id: &RecordingId) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get(id) {
            Some(slot) if slot.get().is_some() => {
                slots.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Forgets every finished build. Builds still running are kept.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| slot.get().is_none());
    }
}

pub struct Matcher<'a> {
    params: MatchParameters,
    cache: &'a HistogramCache,
}

impl<'a> Matcher<'a> {
    pub fn new(params: MatchParameters, cache: &'a HistogramCache) -> Self {
        Self { params, cache }
    }

    pub fn params(&self) -> &MatchParameters {
        &self.params
    }

    /// The fingerprint of `recording`, from the cache if it was built before.
    pub fn fingerprint<R: Recording + ?Sized>(
        &self,
        recording: &R,
    ) -> Result<Arc<PitchClassHistogram>> {
        self.cache.get_or_build(&recording.id(), || {
            let annotations = recording.annotations()?;
            build_histogram(&annotations, &self.params.fingerprint)
        })
    }

    /// Scores every haystack entry against the needle. The result is sorted by descending
    /// score; equal scores keep haystack order. Entries whose histogram cannot be built are
    /// reported as [`MatchKind::Failed`] with a score of `-1` instead of aborting the ranking.
    pub fn rank<N, R>(&self, needle: &N, haystack: &[R]) -> Result<Vec<MatchResult>>
    where
        N: Recording + ?Sized,
        R: Recording + Sync,
    {
        let needle_histogram = self.fingerprint(needle)?;

        let mut results: Vec<MatchResult> = haystack
            .par_iter()
            .map(|candidate| {
                let id = candidate.id();
                let outcome = self
                    .fingerprint(candidate)
                    .and_then(|h| compare(id.clone(), &needle_histogram, &h, &self.params));
                match outcome {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("could not match {id}: {e}");
                        MatchResult::failed(id)
                    }
                }
            })
            .collect();

        // stable, so ties keep haystack order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(
            "ranked {} candidates against {}",
            results.len(),
            needle.id()
        );
        Ok(results)
    }
}

/// Annotations already in memory.
#[derive(Debug, Clone)]
pub struct AnnotatedRecording {
    pub id: RecordingId,
    pub annotations: Vec<Annotation>,
}

impl Recording for AnnotatedRecording {
    fn id(&self) -> RecordingId {
        self.id.clone()
    }

    fn annotations(&self) -> Result<Vec<Annotation>> {
        if self.annotations.is_empty() {
            return Err(AnalysisError::Annotation(format!(
                "no annotations for {}",
                self.id
            )));
        }
        Ok(self.annotations.clone())
    }
}

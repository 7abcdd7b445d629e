/// Plain text annotation files: one `time;pitch_hz[;confidence]` line per annotation, `#`
/// starts a comment, `,` works as a separator as well.
use std::path::{Path, PathBuf};

use tonescale_analysis::{AnalysisError, Annotation, Recording, RecordingId};

fn field(line_no: usize, name: &str, value: Option<&str>) -> tonescale_analysis::Result<f64> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AnalysisError::Annotation(format!("line {line_no}: missing {name}")))?;
    value.parse().map_err(|_| {
        AnalysisError::Annotation(format!("line {line_no}: {name} '{value}' is not a number"))
    })
}

pub fn parse_annotations(text: &str) -> tonescale_analysis::Result<Vec<Annotation>> {
    let mut annotations = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = match line.split_once('#') {
            Some((content, _comment)) => content,
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split([';', ',']);
        let time = field(line_no, "time", fields.next())?;
        let pitch = field(line_no, "pitch", fields.next())?;
        let confidence = match fields.next() {
            Some(c) => field(line_no, "confidence", Some(c))?,
            None => 1.0,
        };
        if fields.next().is_some() {
            return Err(AnalysisError::Annotation(format!(
                "line {line_no}: too many fields"
            )));
        }
        annotations.push(Annotation::new(time, pitch, confidence));
    }
    Ok(annotations)
}

/// A recording whose annotations were written to a file by an external pitch detector.
#[derive(Debug, Clone)]
pub struct AnnotationFile {
    pub path: PathBuf,
}

impl AnnotationFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Recording for AnnotationFile {
    fn id(&self) -> RecordingId {
        RecordingId::from(self.path.as_path())
    }

    fn annotations(&self) -> tonescale_analysis::Result<Vec<Annotation>> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            AnalysisError::Annotation(format!("{}: {e}", self.path.display()))
        })?;
        parse_annotations(&text).map_err(|e| match e {
            AnalysisError::Annotation(msg) => {
                AnalysisError::Annotation(format!("{}: {msg}", self.path.display()))
            }
            other => other,
        })
    }
}

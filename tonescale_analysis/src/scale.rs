/// Tone scales: the scale degrees found in a recording or given as a reference, and their Scala
/// text form.
use std::fmt;
use std::str::FromStr;

use crate::annotation::{pitch_class_cents, CENTS_PER_OCTAVE};
use crate::error::{AnalysisError, Result};
use crate::histogram::HistogramShape;
use crate::kde::{Kernel, KernelDensityEstimate};
use crate::peaks::Peak;

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleDegree {
    pub cents: f64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToneScale {
    pub description: String,
    degrees: Vec<ScaleDegree>,
}

impl ToneScale {
    /// Degrees are kept sorted by cents.
    pub fn new(description: impl Into<String>, mut degrees: Vec<ScaleDegree>) -> Self {
        degrees.sort_by(|a, b| a.cents.total_cmp(&b.cents));
        Self {
            description: description.into(),
            degrees,
        }
    }

    pub fn from_cents(description: impl Into<String>, cents: &[f64]) -> Self {
        Self::new(
            description,
            cents
                .iter()
                .map(|c| ScaleDegree {
                    cents: *c,
                    name: String::new(),
                })
                .collect(),
        )
    }

    /// One degree per peak; peak positions are taken as cents.
    pub fn from_peaks(description: impl Into<String>, peaks: &[Peak]) -> Self {
        let mut scale = Self::from_cents(
            description,
            &peaks.iter().map(|p| p.position).collect::<Vec<_>>(),
        );
        for (i, degree) in scale.degrees.iter_mut().enumerate() {
            degree.name = format!("degree_{}", i + 1);
        }
        scale
    }

    pub fn degrees(&self) -> &[ScaleDegree] {
        &self.degrees
    }

    pub fn degrees_cents(&self) -> Vec<f64> {
        self.degrees.iter().map(|d| d.cents).collect()
    }

    pub fn len(&self) -> usize {
        self.degrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.degrees.is_empty()
    }

    /// Steps between consecutive degrees, including the step from the last degree back up to
    /// the first one an octave higher.
    pub fn intervals(&self) -> Vec<f64> {
        let classes: Vec<f64> = {
            let mut c: Vec<f64> = self.degrees.iter().map(|d| pitch_class_cents(d.cents)).collect();
            c.sort_by(|a, b| a.total_cmp(b));
            c
        };
        match classes.len() {
            0 => Vec::new(),
            1 => vec![CENTS_PER_OCTAVE],
            n => (0..n)
                .map(|i| {
                    let next = if i + 1 < n {
                        classes[i + 1]
                    } else {
                        classes[0] + CENTS_PER_OCTAVE
                    };
                    next - classes[i]
                })
                .collect(),
        }
    }

    /// A reference density with one kernel per degree, folded into the octave.
    pub fn to_kde(&self, kernel: Kernel, shape: HistogramShape) -> Result<KernelDensityEstimate> {
        KernelDensityEstimate::from_points(
            kernel,
            shape,
            self.degrees.iter().map(|d| pitch_class_cents(d.cents)),
        )
    }
}

impl fmt::Display for ToneScale {
    /// Scala text: description line, degree count, one `cents name` line per degree.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "! exported scale")?;
        writeln!(f, "{}", self.description.lines().next().unwrap_or(""))?;
        writeln!(f, " {}", self.degrees.len())?;
        writeln!(f, "!")?;
        for degree in &self.degrees {
            if degree.name.is_empty() {
                writeln!(f, " {:.3}", degree.cents)?;
            } else {
                writeln!(f, " {:.3} {}", degree.cents, degree.name)?;
            }
        }
        Ok(())
    }
}

fn scala_error(reason: impl Into<String>) -> AnalysisError {
    AnalysisError::invalid("scala", reason)
}

/// Pitch of a Scala degree token: cents if it contains a period, a ratio `a/b` or an integer
/// ratio `a` otherwise.
fn parse_pitch(token: &str) -> Result<f64> {
    if token.contains('.') {
        return token
            .parse::<f64>()
            .map_err(|_| scala_error(format!("bad cents value '{token}'")));
    }
    let (num, den) = match token.split_once('/') {
        Some((n, d)) => (n, d),
        None => (token, "1"),
    };
    let num: f64 = num
        .parse::<u64>()
        .map_err(|_| scala_error(format!("bad ratio '{token}'")))? as f64;
    let den: f64 = den
        .parse::<u64>()
        .map_err(|_| scala_error(format!("bad ratio '{token}'")))? as f64;
    if num == 0.0 || den == 0.0 {
        return Err(scala_error(format!("degenerate ratio '{token}'")));
    }
    Ok(CENTS_PER_OCTAVE * (num / den).log2())
}

impl FromStr for ToneScale {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        let mut lines = s.lines().filter(|l| !l.trim_start().starts_with('!'));
        let description = lines
            .next()
            .ok_or_else(|| scala_error("missing description"))?
            .trim()
            .to_string();
        let count: usize = lines
            .next()
            .ok_or_else(|| scala_error("missing degree count"))?
            .trim()
            .parse()
            .map_err(|_| scala_error("degree count is not a number"))?;

        let degrees = lines
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(count)
            .map(|line| {
                let mut tokens = line.split_whitespace();
                // non-empty line, there is a first token
                let pitch = parse_pitch(tokens.next().unwrap_or_default())?;
                Ok(ScaleDegree {
                    cents: pitch,
                    name: tokens.collect::<Vec<_>>().join(" "),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if degrees.len() != count {
            return Err(scala_error(format!(
                "expected {count} degrees, found {}",
                degrees.len()
            )));
        }
        Ok(ToneScale::new(description, degrees))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::assert_close;

    #[test]
    fn test_scala_text() {
        let scale = ToneScale::from_cents("pelog", &[702.0, 0.0, 204.0]);
        let text = scale.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "pelog");
        assert_eq!(lines[2], " 3");
        assert_eq!(lines[4], " 0.000");
        assert_eq!(lines[6], " 702.000");
        assert_eq!(text.parse::<ToneScale>().unwrap(), scale);
    }

    #[test]
    fn test_parse_ratios_and_names() {
        let text = "! meantone.scl\n!\nQuarter comma meantone\n 3\n!\n 3/2 fifth\n 193.157\n 2\n";
        let scale: ToneScale = text.parse().unwrap();
        assert_eq!(scale.description, "Quarter comma meantone");
        let cents = scale.degrees_cents();
        assert_close(cents[0], 193.157, 1e-9);
        assert_close(cents[1], 701.955, 1e-3);
        assert_close(cents[2], 1200.0, 1e-9);
        assert_eq!(scale.degrees()[1].name, "fifth");
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<ToneScale>().is_err());
        assert!("desc\nseven\n".parse::<ToneScale>().is_err());
        assert!("desc\n 2\n 100.0\n".parse::<ToneScale>().is_err());
        assert!("desc\n 1\n 0/3\n".parse::<ToneScale>().is_err());
        assert!("desc\n 1\n abc\n".parse::<ToneScale>().is_err());
    }

    #[test]
    fn test_intervals() {
        let scale = ToneScale::from_cents("", &[0.0, 240.0, 480.0, 720.0, 960.0]);
        assert_eq!(scale.intervals(), vec![240.0; 5]);
        assert_eq!(ToneScale::from_cents("", &[100.0]).intervals(), vec![1200.0]);
    }

    #[test]
    fn test_from_peaks_names_degrees() {
        let peaks = [
            Peak {
                bin: 100,
                position: 603.0,
                height: 2.0,
            },
            Peak {
                bin: 10,
                position: 63.0,
                height: 1.0,
            },
        ];
        let scale = ToneScale::from_peaks("found", &peaks);
        assert_eq!(scale.degrees_cents(), vec![63.0, 603.0]);
        assert_eq!(scale.degrees()[0].name, "degree_1");
        assert!(scale.to_string().contains(" 603.000 degree_2"));
    }

    #[test]
    fn test_reference_kde() {
        let scale = ToneScale::from_cents("", &[0.0, 1500.0]);
        let kde = scale
            .to_kde(
                Kernel::Gaussian { stddev: 2.0 },
                HistogramShape::new(0.0, 1200.0, 1200).unwrap(),
            )
            .unwrap();
        assert_eq!(kde.points(), 2);
        assert_eq!(kde.value(300), 1.0);
        assert_eq!(kde.value(0), 1.0);
    }
}

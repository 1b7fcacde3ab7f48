//! Calibration constraints: age bounds on tree nodes and tips.
//!
//! A calibration constrains the age of the most recent common ancestor of
//! a taxon pair (or of the root, via the `root` sentinel), or fixes the
//! age of a single sampled tip. Two surface grammars are accepted, one
//! line per constraint:
//!
//! - plain form: `taxonA taxonB young old` — explicit uniform bounds;
//! - dashed form: `-U|-E|-T taxonA [taxonB] …` — selecting a uniform,
//!   offset-exponential, or birth-death-tail prior.
//!
//! Calibration and tip-date files are count-prefixed: the first line is
//! the number of constraints, each following line is one constraint.
//! Parse errors are unrecoverable; callers must pre-validate input they
//! intend to survive.

use divtime_core::{DivtimeError, Result};
use std::fs;
use std::path::Path;

/// Sentinel taxon name selecting the root of the whole tree.
pub const ROOT_SENTINEL: &str = "root";

/// The prior distribution placed on a calibrated node age.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalibrationKind {
    /// Uniform on `[young, old]`.
    Uniform,
    /// Exponential with the given rate, offset so that its support starts
    /// at `young`. `mean` is the expected excess over the offset, `1/rate`.
    OffsetExponential { rate: f64, mean: f64 },
    /// Tail of the birth-death tree-time prior, bounded below at `young`.
    BirthDeathTail,
    /// A tip sampled at a fixed age (`young == old`).
    FixedTip,
}

/// One parsed age constraint. Immutable after parsing; the tree-age
/// machinery and root-height prior hold references, never ownership.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Calibration {
    taxon_a: String,
    taxon_b: String,
    is_root: bool,
    kind: CalibrationKind,
    young: f64,
    old: f64,
}

impl Calibration {
    /// Parse one node-calibration line (plain or dashed form).
    pub fn parse_node(line: &str) -> Result<Self> {
        let mut toks = line.split_whitespace();
        let first = next_token(&mut toks, line)?;

        let cal = if let Some(flag) = first.strip_prefix('-') {
            let kind_ch = flag.chars().next().unwrap_or('\0');
            match kind_ch {
                'U' | 'u' => {
                    let (taxon_a, taxon_b, is_root) = read_taxa(&mut toks, line)?;
                    let young = next_f64(&mut toks, line)?;
                    let old = next_f64(&mut toks, line)?;
                    Self::new_uniform(taxon_a, taxon_b, is_root, young, old)?
                }
                'E' | 'e' => {
                    let (taxon_a, taxon_b, is_root) = read_taxa(&mut toks, line)?;
                    let young = next_f64(&mut toks, line)?;
                    let (rate, mean) = read_expon_rate(&mut toks, line, young, is_root)?;
                    check_age(young, line)?;
                    Self {
                        taxon_a,
                        taxon_b,
                        is_root,
                        kind: CalibrationKind::OffsetExponential { rate, mean },
                        young,
                        old: f64::INFINITY,
                    }
                }
                'T' | 't' => {
                    let (taxon_a, taxon_b, is_root) = read_taxa(&mut toks, line)?;
                    let young = next_f64(&mut toks, line)?;
                    check_age(young, line)?;
                    Self {
                        taxon_a,
                        taxon_b,
                        is_root,
                        kind: CalibrationKind::BirthDeathTail,
                        young,
                        old: f64::INFINITY,
                    }
                }
                other => {
                    return Err(DivtimeError::Parse(format!(
                        "unrecognized calibration distribution flag '-{}' in line '{}'",
                        other, line
                    )));
                }
            }
        } else {
            // Plain form: explicit uniform bounds.
            let taxon_a = first.to_string();
            let (taxon_b, is_root) = if taxon_a == ROOT_SENTINEL {
                (ROOT_SENTINEL.to_string(), true)
            } else {
                (next_token(&mut toks, line)?.to_string(), false)
            };
            let young = next_f64(&mut toks, line)?;
            let old = next_f64(&mut toks, line)?;
            Self::new_uniform(taxon_a, taxon_b, is_root, young, old)?
        };

        cal.announce();
        Ok(cal)
    }

    /// Parse one tip-date line: `taxonName age`, a fixed tip age.
    pub fn parse_tip(line: &str) -> Result<Self> {
        let mut toks = line.split_whitespace();
        let taxon = next_token(&mut toks, line)?.to_string();
        let age = next_f64(&mut toks, line)?;
        check_age(age, line)?;
        log::info!("tip calibration on {} -> ({}, {})", taxon, age, age);
        Ok(Self {
            taxon_b: taxon.clone(),
            taxon_a: taxon,
            is_root: false,
            kind: CalibrationKind::FixedTip,
            young: age,
            old: age,
        })
    }

    fn new_uniform(
        taxon_a: String,
        taxon_b: String,
        is_root: bool,
        young: f64,
        old: f64,
    ) -> Result<Self> {
        check_age(young, &taxon_a)?;
        check_age(old, &taxon_a)?;
        if young > old {
            return Err(DivtimeError::Parse(format!(
                "calibration on [{}, {}] has young bound {} above old bound {}",
                taxon_a, taxon_b, young, old
            )));
        }
        Ok(Self {
            taxon_a,
            taxon_b,
            is_root,
            kind: CalibrationKind::Uniform,
            young,
            old,
        })
    }

    fn announce(&self) {
        match self.kind {
            CalibrationKind::Uniform => log::info!(
                "uniform calibration on MRCA[{}, {}] -> ({}, {})",
                self.taxon_a,
                self.taxon_b,
                self.young,
                self.old
            ),
            CalibrationKind::OffsetExponential { rate, mean } => log::info!(
                "offset-exponential calibration on MRCA[{}, {}] -> (offset={}, lambda={}, mean={})",
                self.taxon_a,
                self.taxon_b,
                self.young,
                rate,
                mean + self.young
            ),
            CalibrationKind::BirthDeathTail => log::info!(
                "birth-death tail calibration on MRCA[{}, {}] -> (offset={})",
                self.taxon_a,
                self.taxon_b,
                self.young
            ),
            CalibrationKind::FixedTip => {}
        }
    }

    /// First taxon of the constrained pair (or `root`).
    pub fn taxon_a(&self) -> &str {
        &self.taxon_a
    }

    /// Second taxon of the constrained pair. Equals `taxon_a` for tip
    /// constraints and `root` for root-level constraints.
    pub fn taxon_b(&self) -> &str {
        &self.taxon_b
    }

    /// True if this constraint applies to the root of the whole tree.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// The prior kind.
    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }

    /// Lower (younger) age bound.
    pub fn young(&self) -> f64 {
        self.young
    }

    /// Upper (older) age bound; infinite for unbounded priors.
    pub fn old(&self) -> f64 {
        self.old
    }

    /// True if the constrained age is fixed (`young == old`).
    pub fn is_fixed(&self) -> bool {
        self.young == self.old
    }

    /// True if this record is a fossil observation for the FBD prior
    /// (a fixed-age tip), as opposed to a clade bound.
    pub fn is_fossil(&self) -> bool {
        self.kind == CalibrationKind::FixedTip
    }

    /// Log prior density of an age under this constraint.
    pub fn ln_prior(&self, age: f64) -> f64 {
        match self.kind {
            CalibrationKind::Uniform | CalibrationKind::FixedTip => {
                if age >= self.young && age <= self.old {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            }
            CalibrationKind::OffsetExponential { rate, .. } => {
                if age < self.young {
                    f64::NEG_INFINITY
                } else {
                    rate.ln() - rate * (age - self.young)
                }
            }
            // The tail constraint only bounds the age; its density comes
            // from the tree-time prior itself.
            CalibrationKind::BirthDeathTail => {
                if age >= self.young {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            }
        }
    }
}

/// Parse a count-prefixed calibration file body into constraints.
pub fn parse_calibration_file(text: &str) -> Result<Vec<Calibration>> {
    parse_count_prefixed(text, Calibration::parse_node)
}

/// Parse a count-prefixed tip-date file body into fixed tip constraints.
pub fn parse_tip_date_file(text: &str) -> Result<Vec<Calibration>> {
    parse_count_prefixed(text, Calibration::parse_tip)
}

/// Read and parse a calibration file from disk.
pub fn load_calibration_file<P: AsRef<Path>>(path: P) -> Result<Vec<Calibration>> {
    parse_calibration_file(&fs::read_to_string(path)?)
}

/// Read and parse a tip-date file from disk.
pub fn load_tip_date_file<P: AsRef<Path>>(path: P) -> Result<Vec<Calibration>> {
    parse_tip_date_file(&fs::read_to_string(path)?)
}

fn parse_count_prefixed(
    text: &str,
    parse_line: fn(&str) -> Result<Calibration>,
) -> Result<Vec<Calibration>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let count_line = lines
        .next()
        .ok_or_else(|| DivtimeError::Parse("empty calibration input".into()))?;
    let count: usize = count_line.trim().parse().map_err(|_| {
        DivtimeError::Parse(format!("bad constraint count '{}'", count_line.trim()))
    })?;

    let mut cals = Vec::with_capacity(count);
    for _ in 0..count {
        let line = lines.next().ok_or_else(|| {
            DivtimeError::Parse(format!(
                "calibration input declares {} constraints but ran out of lines",
                count
            ))
        })?;
        cals.push(parse_line(line)?);
    }
    Ok(cals)
}

fn next_token<'a>(toks: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<&'a str> {
    toks.next()
        .ok_or_else(|| DivtimeError::Parse(format!("truncated calibration line '{}'", line)))
}

fn next_f64<'a>(toks: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<f64> {
    let tok = next_token(toks, line)?;
    tok.parse::<f64>()
        .map_err(|_| DivtimeError::Parse(format!("malformed numeric token '{}' in '{}'", tok, line)))
}

fn read_taxa<'a>(
    toks: &mut impl Iterator<Item = &'a str>,
    line: &str,
) -> Result<(String, String, bool)> {
    let taxon_a = next_token(toks, line)?.to_string();
    if taxon_a == ROOT_SENTINEL {
        Ok((taxon_a, ROOT_SENTINEL.to_string(), true))
    } else {
        let taxon_b = next_token(toks, line)?.to_string();
        Ok((taxon_a, taxon_b, false))
    }
}

/// Resolve the exponential rate/mean pair: an optional trailing `-r <rate>`
/// or `-m <mean>` flag overrides the legacy offset-scaled defaults.
fn read_expon_rate<'a>(
    toks: &mut impl Iterator<Item = &'a str>,
    line: &str,
    young: f64,
    is_root: bool,
) -> Result<(f64, f64)> {
    match toks.next() {
        Some("-r") => {
            let rate = next_f64(toks, line)?;
            if rate <= 0.0 {
                return Err(DivtimeError::Parse(format!(
                    "exponential rate must be positive in '{}'",
                    line
                )));
            }
            Ok((rate, 1.0 / rate))
        }
        Some("-m") => {
            // The flag carries the absolute mean; the excess over the
            // offset determines the rate.
            let mean = next_f64(toks, line)?;
            if mean <= young {
                return Err(DivtimeError::Parse(format!(
                    "exponential mean {} must exceed the offset {} in '{}'",
                    mean, young, line
                )));
            }
            let offset_mean = mean - young;
            Ok((1.0 / offset_mean, offset_mean))
        }
        Some(other) => Err(DivtimeError::Parse(format!(
            "unexpected token '{}' after exponential offset in '{}'",
            other, line
        ))),
        None => {
            // Legacy defaults, reproduced exactly: the root prior is more
            // diffuse than a non-root prior.
            let rate = if is_root {
                1.0 / (young * 0.4)
            } else {
                1.0 / (young * 0.25)
            };
            Ok((rate, 1.0 / rate))
        }
    }
}

fn check_age(age: f64, context: &str) -> Result<()> {
    if !age.is_finite() || age < 0.0 {
        return Err(DivtimeError::Parse(format!(
            "age {} is not a finite non-negative value ({})",
            age, context
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_uniform_constraint() {
        let cals = parse_calibration_file("1\nroot\t70\t80").unwrap();
        assert_eq!(cals.len(), 1);
        let cal = &cals[0];
        assert!(cal.is_root());
        assert_eq!(cal.kind(), CalibrationKind::Uniform);
        assert_eq!(cal.young(), 70.0);
        assert_eq!(cal.old(), 80.0);
        assert!(!cal.is_fixed());
    }

    #[test]
    fn root_fixed_constraint() {
        let cals = parse_calibration_file("1\nroot\t75\t75").unwrap();
        assert!(cals[0].is_fixed());
        assert_eq!(cals[0].young(), 75.0);
        assert_eq!(cals[0].old(), 75.0);
    }

    #[test]
    fn plain_pair_constraint() {
        let cals = parse_calibration_file("2\nT1\tT3\t8\t12\nT8\tT9\t30\t40").unwrap();
        assert_eq!(cals.len(), 2);
        assert_eq!(cals[0].taxon_a(), "T1");
        assert_eq!(cals[0].taxon_b(), "T3");
        assert!(!cals[0].is_root());
        assert_eq!(cals[1].young(), 30.0);
        assert_eq!(cals[1].old(), 40.0);
    }

    #[test]
    fn dashed_uniform_constraint() {
        let cal = Calibration::parse_node("-U T1 T6 0.04 0.14").unwrap();
        assert_eq!(cal.kind(), CalibrationKind::Uniform);
        assert_eq!(cal.young(), 0.04);
        assert_eq!(cal.old(), 0.14);
    }

    #[test]
    fn exponential_default_rate_root() {
        let cal = Calibration::parse_node("-E root 10").unwrap();
        match cal.kind() {
            CalibrationKind::OffsetExponential { rate, mean } => {
                assert!((rate - 1.0 / (10.0 * 0.4)).abs() < 1e-12);
                assert!((mean - 1.0 / rate).abs() < 1e-12);
            }
            other => panic!("expected offset-exponential, got {:?}", other),
        }
        assert!(cal.is_root());
        assert!(cal.old().is_infinite());
    }

    #[test]
    fn exponential_default_rate_non_root() {
        let cal = Calibration::parse_node("-E T1 T2 10").unwrap();
        match cal.kind() {
            CalibrationKind::OffsetExponential { rate, .. } => {
                assert!((rate - 1.0 / (10.0 * 0.25)).abs() < 1e-12);
            }
            other => panic!("expected offset-exponential, got {:?}", other),
        }
    }

    #[test]
    fn exponential_rate_override() {
        let cal = Calibration::parse_node("-E T1 T2 10 -r 0.5").unwrap();
        match cal.kind() {
            CalibrationKind::OffsetExponential { rate, mean } => {
                assert_eq!(rate, 0.5);
                assert_eq!(mean, 2.0);
            }
            other => panic!("expected offset-exponential, got {:?}", other),
        }
    }

    #[test]
    fn exponential_mean_override() {
        let cal = Calibration::parse_node("-E T1 T2 10 -m 14").unwrap();
        match cal.kind() {
            CalibrationKind::OffsetExponential { rate, mean } => {
                assert!((rate - 0.25).abs() < 1e-12);
                assert!((mean - 4.0).abs() < 1e-12);
            }
            other => panic!("expected offset-exponential, got {:?}", other),
        }
    }

    #[test]
    fn exponential_mean_below_offset_rejected() {
        assert!(Calibration::parse_node("-E T1 T2 10 -m 9").is_err());
    }

    #[test]
    fn birth_death_tail_constraint() {
        let cal = Calibration::parse_node("-T T4 T5 22.5").unwrap();
        assert_eq!(cal.kind(), CalibrationKind::BirthDeathTail);
        assert_eq!(cal.young(), 22.5);
    }

    #[test]
    fn unknown_flag_is_fatal() {
        let err = Calibration::parse_node("-X T1 T2 5 10").unwrap_err();
        assert!(err.to_string().contains("unrecognized"));
    }

    #[test]
    fn young_above_old_rejected() {
        assert!(Calibration::parse_node("T1 T2 12 8").is_err());
    }

    #[test]
    fn malformed_numeric_rejected() {
        assert!(Calibration::parse_node("T1 T2 abc 8").is_err());
    }

    #[test]
    fn tip_date_line() {
        let cals = parse_tip_date_file("1\nX50\t20.4").unwrap();
        let cal = &cals[0];
        assert_eq!(cal.taxon_a(), "X50");
        assert_eq!(cal.kind(), CalibrationKind::FixedTip);
        assert_eq!(cal.young(), 20.4);
        assert_eq!(cal.old(), 20.4);
        assert!(cal.is_fixed());
        assert!(cal.is_fossil());
    }

    #[test]
    fn count_mismatch_rejected() {
        assert!(parse_calibration_file("2\nroot\t70\t80").is_err());
    }

    #[test]
    fn uniform_ln_prior_in_and_out_of_bounds() {
        let cal = Calibration::parse_node("root 70 80").unwrap();
        assert_eq!(cal.ln_prior(75.0), 0.0);
        assert_eq!(cal.ln_prior(69.0), f64::NEG_INFINITY);
        assert_eq!(cal.ln_prior(81.0), f64::NEG_INFINITY);
    }

    #[test]
    fn exponential_ln_prior_decreases_with_age() {
        let cal = Calibration::parse_node("-E root 10 -r 0.5").unwrap();
        let near = cal.ln_prior(11.0);
        let far = cal.ln_prior(30.0);
        assert!(near > far, "{} should exceed {}", near, far);
        assert_eq!(cal.ln_prior(9.0), f64::NEG_INFINITY);
    }
}

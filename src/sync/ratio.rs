use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reduced, non-negative fraction. Frame rates such as NTSC's 30000/1001
/// are not representable as floats without loss, so rates and ratios are
/// carried as integers until the filter string is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    numer: u64,
    denom: u64,
}

impl Rational {
    /// Returns `None` for a zero denominator.
    pub fn new(numer: u64, denom: u64) -> Option<Self> {
        if denom == 0 {
            return None;
        }
        let g = gcd(numer as u128, denom as u128) as u64;
        let g = g.max(1);
        Some(Self {
            numer: numer / g,
            denom: denom / g,
        })
    }

    pub fn numer(&self) -> u64 {
        self.numer
    }

    pub fn denom(&self) -> u64 {
        self.denom
    }

    pub fn is_zero(&self) -> bool {
        self.numer == 0
    }

    pub fn as_f64(&self) -> f64 {
        self.numer as f64 / self.denom as f64
    }

    /// Parse an ffprobe rate string: `"30000/1001"`, `"25"` or `"29.97"`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some((num, den)) = text.split_once('/') {
            let num: u64 = num.trim().parse().ok()?;
            let den: u64 = den.trim().parse().ok()?;
            return Self::new(num, den);
        }

        match text.split_once('.') {
            Some((whole, frac)) => {
                if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
                let scale = 10u64.pow(frac.len() as u32);
                let frac: u64 = frac.parse().ok()?;
                let numer = whole.checked_mul(scale)?.checked_add(frac)?;
                Self::new(numer, scale)
            }
            None => Self::new(text.parse().ok()?, 1),
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numer, self.denom)
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn reduce_wide(numer: u128, denom: u128) -> Result<Rational> {
    let g = gcd(numer, denom).max(1);
    let numer = u64::try_from(numer / g)
        .map_err(|_| SyncError::DegenerateRatio("ratio numerator overflows".to_string()))?;
    let denom = u64::try_from(denom / g)
        .map_err(|_| SyncError::DegenerateRatio("ratio denominator overflows".to_string()))?;
    Rational::new(numer, denom)
        .ok_or_else(|| SyncError::DegenerateRatio("zero denominator".to_string()))
}

fn ensure_usable(ratio: Rational) -> Result<Rational> {
    let value = ratio.as_f64();
    if ratio.is_zero() || !value.is_finite() || value <= 0.0 {
        return Err(SyncError::DegenerateRatio(format!("{} is not a usable ratio", ratio)));
    }
    Ok(ratio)
}

/// Timeline scale factor between two frame rates: `source / target`.
///
/// Above 1 the audio timeline is stretched, below 1 it is compressed.
pub fn compute_ratio(source_rate: Rational, target_rate: Rational) -> Result<Rational> {
    if source_rate.is_zero() {
        return Err(SyncError::DegenerateRatio("source frame rate is zero".to_string()));
    }
    if target_rate.is_zero() {
        return Err(SyncError::DegenerateRatio("target frame rate is zero".to_string()));
    }

    let numer = source_rate.numer as u128 * target_rate.denom as u128;
    let denom = source_rate.denom as u128 * target_rate.numer as u128;
    ensure_usable(reduce_wide(numer, denom)?)
}

/// Timeline scale factor that stretches the source audio to exactly the
/// target's duration, at microsecond resolution.
pub fn duration_ratio(source_seconds: f64, target_seconds: f64) -> Result<Rational> {
    for (label, secs) in [("source", source_seconds), ("target", target_seconds)] {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(SyncError::DegenerateRatio(format!(
                "{} duration {} is not positive",
                label, secs
            )));
        }
    }

    let numer = (target_seconds * 1_000_000.0).round() as u128;
    let denom = (source_seconds * 1_000_000.0).round() as u128;
    if denom == 0 || numer == 0 {
        return Err(SyncError::DegenerateRatio("duration rounds to zero".to_string()));
    }
    ensure_usable(reduce_wide(numer, denom)?)
}

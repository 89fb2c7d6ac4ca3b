//! Row comparison with pluggable value equality

use crate::dataset::{DatasetRef, RowSnapshot, Value};
use crate::error::DiffError;
use num_bigint::BigInt;
use num_traits::{Num, Signed, Zero};

/// Classification of two rows sharing a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowComparison {
    Identical,
    /// Source-side names of the compare columns whose values differ
    Changed(Vec<String>),
}

impl RowComparison {
    pub fn is_identical(&self) -> bool {
        matches!(self, Self::Identical)
    }
}

/// A source compare column and the target column it is checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPair {
    pub source: String,
    pub target: String,
}

/// Pair compare columns positionally. Both sides must declare the same number.
pub fn pair_columns(source: &DatasetRef, target: &DatasetRef) -> Result<Vec<ColumnPair>, DiffError> {
    if source.key_columns().len() != target.key_columns().len() {
        return Err(DiffError::config(format!(
            "key column count differs: {} declares {}, {} declares {}",
            source.name(),
            source.key_columns().len(),
            target.name(),
            target.key_columns().len()
        )));
    }
    if source.compare_columns().len() != target.compare_columns().len() {
        return Err(DiffError::config(format!(
            "compare column count differs: {} declares {}, {} declares {}",
            source.name(),
            source.compare_columns().len(),
            target.name(),
            target.compare_columns().len()
        )));
    }

    Ok(source
        .compare_columns()
        .iter()
        .zip(target.compare_columns())
        .map(|(s, t)| ColumnPair {
            source: s.clone(),
            target: t.clone(),
        })
        .collect())
}

/// Decides whether two cell values are equal.
pub trait EqualityPolicy: Send + Sync {
    fn values_equal(&self, column: &str, source: &Value, target: &Value) -> bool;
}

/// Exact equality after normalizing numeric representations.
///
/// `Int(99)`, `Decimal("99.00")` and `Float(99.0)` are all equal. Text is never
/// coerced to a number.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedEquality;

impl EqualityPolicy for NormalizedEquality {
    fn values_equal(&self, _column: &str, source: &Value, target: &Value) -> bool {
        if source.is_numeric() && target.is_numeric() {
            return match (canonical_decimal(source), canonical_decimal(target)) {
                (Some(a), Some(b)) => a == b,
                // Non-finite floats only
                _ => match (as_f64(source), as_f64(target)) {
                    (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
                    _ => false,
                },
            };
        }
        source == target
    }
}

/// Numeric values within `epsilon` of each other are equal; everything else
/// falls back to [`NormalizedEquality`].
#[derive(Debug, Clone, Copy)]
pub struct FloatTolerance {
    pub epsilon: f64,
}

impl EqualityPolicy for FloatTolerance {
    fn values_equal(&self, column: &str, source: &Value, target: &Value) -> bool {
        if source.is_numeric() && target.is_numeric() {
            if let (Some(a), Some(b)) = (as_f64(source), as_f64(target)) {
                if a.is_finite() && b.is_finite() {
                    return (a - b).abs() <= self.epsilon;
                }
            }
        }
        NormalizedEquality.values_equal(column, source, target)
    }
}

/// Compare two rows sharing a key over the paired compare columns.
///
/// A column missing from a snapshot is read as NULL.
pub fn compare_rows(
    source: &RowSnapshot,
    target: &RowSnapshot,
    pairs: &[ColumnPair],
    policy: &dyn EqualityPolicy,
) -> RowComparison {
    debug_assert_eq!(source.key, target.key);

    let changed: Vec<String> = pairs
        .iter()
        .filter(|pair| {
            let a = source.get(&pair.source).unwrap_or(&Value::Null);
            let b = target.get(&pair.target).unwrap_or(&Value::Null);
            !policy.values_equal(&pair.source, a, b)
        })
        .map(|pair| pair.source.clone())
        .collect();

    if changed.is_empty() {
        RowComparison::Identical
    } else {
        RowComparison::Changed(changed)
    }
}

/// Exact decimal in lowest terms: `mantissa * 10^-scale`, no trailing zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDecimal {
    mantissa: BigInt,
    scale: u32,
}

impl CanonicalDecimal {
    /// Parse a decimal literal such as `-12.500`, `99`, `1.5e3`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (number, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
            Some(pos) => (&text[..pos], text[pos + 1..].parse::<i64>().ok()?),
            None => (text, 0),
        };

        let (negative, unsigned) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number.strip_prefix('+').unwrap_or(number)),
        };

        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return None;
        }

        let digits = format!("{}{}", int_part, frac_part);
        let mut mantissa = BigInt::from_str_radix(&digits, 10).ok()?;
        if negative {
            mantissa = -mantissa;
        }

        let mut scale = frac_part.len() as i64 - exponent;
        if scale < 0 {
            mantissa *= BigInt::from(10u32).pow(u32::try_from(-scale).ok()?);
            scale = 0;
        }

        Some(Self::normalized(mantissa, u32::try_from(scale).ok()?))
    }

    fn normalized(mut mantissa: BigInt, mut scale: u32) -> Self {
        if mantissa.is_zero() {
            return Self {
                mantissa: BigInt::zero(),
                scale: 0,
            };
        }
        let ten = BigInt::from(10u32);
        while scale > 0 && (&mantissa % &ten).is_zero() {
            mantissa /= &ten;
            scale -= 1;
        }
        Self { mantissa, scale }
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }
}

/// Canonical form of a numeric value; `None` for non-numeric or non-finite values.
pub fn canonical_decimal(value: &Value) -> Option<CanonicalDecimal> {
    match value {
        Value::Int(i) => Some(CanonicalDecimal::normalized(BigInt::from(*i), 0)),
        // Display for f64 yields the shortest round-tripping decimal, never exponent form
        Value::Float(x) if x.is_finite() => CanonicalDecimal::parse(&x.to_string()),
        Value::Decimal(d) => CanonicalDecimal::parse(d),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        Value::Decimal(d) => d.trim().parse().ok(),
        _ => None,
    }
}

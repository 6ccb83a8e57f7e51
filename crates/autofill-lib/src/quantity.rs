//! Kubernetes resource quantities
//!
//! Parses the string form used by resource requests, limits and the metrics
//! API (`250m`, `1.5`, `300Mi`, `1e3`, `123456789n`) into an exact value that
//! can be compared, added and printed back in canonical form.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use thiserror::Error;

/// Nano-units per whole unit; the finest precision a quantity keeps
const NANOS_PER_UNIT: i128 = 1_000_000_000;

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Notation a quantity was written in, preserved when it is printed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    /// Powers of 1024 (`Ki`, `Mi`, ...)
    BinarySI,
    /// Powers of 1000 (`m`, `k`, `M`, ...)
    DecimalSI,
    /// Scientific notation (`1e3`)
    DecimalExponent,
}

/// Errors raised while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),
    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },
    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// An exact resource quantity
///
/// Equality and ordering compare values only, so `500m` equals `0.5`.
#[derive(Debug, Clone, Copy)]
pub struct Quantity {
    nanos: i128,
    format: QuantityFormat,
}

enum Scale {
    Decimal(i32),
    Binary(u32),
}

impl Quantity {
    /// Build a quantity from whole units
    #[cfg(test)]
    pub fn from_units(units: i64, format: QuantityFormat) -> Self {
        Self {
            nanos: i128::from(units) * NANOS_PER_UNIT,
            format,
        }
    }

    /// Build a quantity from milli-units (e.g. millicores)
    #[cfg(test)]
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: i128::from(millis) * 1_000_000,
            format: QuantityFormat::DecimalSI,
        }
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }
}

/// Addition keeps the format of the left operand
impl Add for Quantity {
    type Output = Quantity;

    fn add(self, other: Quantity) -> Quantity {
        Quantity {
            nanos: self.nanos.saturating_add(other.nanos),
            format: self.format,
        }
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let number_len = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let digits = format!("{whole}{fraction}");
        let digits = digits.trim_start_matches('0');
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| QuantityError::OutOfRange(input.to_string()))?
        };
        let fraction_len = i32::try_from(fraction.len())
            .map_err(|_| QuantityError::OutOfRange(input.to_string()))?;

        let (scale, format) = parse_suffix(input, suffix)?;
        let nanos = match scale {
            Scale::Decimal(exponent) => exponent
                .checked_add(9)
                .and_then(|e| e.checked_sub(fraction_len))
                .and_then(|pow10| scale_nanos(mantissa, 1, pow10)),
            Scale::Binary(power) => 1024i128
                .checked_pow(power)
                .and_then(|multiplier| scale_nanos(mantissa, multiplier, 9 - fraction_len)),
        }
        .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;

        Ok(Quantity {
            nanos: if negative { -nanos } else { nanos },
            format,
        })
    }
}

fn parse_suffix(input: &str, suffix: &str) -> Result<(Scale, QuantityFormat), QuantityError> {
    type Parsed = Result<(Scale, QuantityFormat), QuantityError>;
    let decimal = |exponent: i32| -> Parsed {
        Ok((Scale::Decimal(exponent), QuantityFormat::DecimalSI))
    };
    let binary = |power: u32| -> Parsed {
        Ok((Scale::Binary(power), QuantityFormat::BinarySI))
    };

    match suffix {
        "" => decimal(0),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        s if s.len() > 1 && (s.starts_with('e') || s.starts_with('E')) => s[1..]
            .parse::<i32>()
            .map(|exponent| (Scale::Decimal(exponent), QuantityFormat::DecimalExponent))
            .map_err(|_| QuantityError::UnknownSuffix {
                input: input.to_string(),
                suffix: suffix.to_string(),
            }),
        _ => Err(QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        }),
    }
}

/// `mantissa * multiplier * 10^pow10`, rounded up to a whole nano-unit
fn scale_nanos(mantissa: i128, multiplier: i128, pow10: i32) -> Option<i128> {
    let base = mantissa.checked_mul(multiplier)?;
    if pow10 >= 0 {
        return base.checked_mul(10i128.checked_pow(pow10.unsigned_abs())?);
    }
    match 10i128.checked_pow(pow10.unsigned_abs()) {
        Some(divisor) => {
            let quotient = base / divisor;
            Some(if base % divisor == 0 { quotient } else { quotient + 1 })
        }
        None => Some(if base == 0 { 0 } else { 1 }),
    }
}

fn decimal_suffix(exponent: i32) -> &'static str {
    match exponent {
        -9 => "n",
        -6 => "u",
        -3 => "m",
        3 => "k",
        6 => "M",
        9 => "G",
        12 => "T",
        15 => "P",
        18 => "E",
        _ => "",
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        let sign = if self.nanos < 0 { "-" } else { "" };
        let magnitude = self.nanos.unsigned_abs();
        let nanos_per_unit = NANOS_PER_UNIT.unsigned_abs();

        // Binary notation only for whole values of at least 1Ki
        if self.format == QuantityFormat::BinarySI
            && magnitude % nanos_per_unit == 0
            && magnitude >= 1024 * nanos_per_unit
        {
            let mut units = magnitude / nanos_per_unit;
            let mut power = 0;
            while power < BINARY_SUFFIXES.len() - 1 && units % 1024 == 0 {
                units /= 1024;
                power += 1;
            }
            return write!(f, "{sign}{units}{}", BINARY_SUFFIXES[power]);
        }

        let mut mantissa = magnitude;
        let mut exponent = -9;
        while exponent < 18 && mantissa % 1000 == 0 {
            mantissa /= 1000;
            exponent += 3;
        }

        match self.format {
            QuantityFormat::DecimalExponent if exponent != 0 => {
                write!(f, "{sign}{mantissa}e{exponent}")
            }
            QuantityFormat::DecimalExponent => write!(f, "{sign}{mantissa}"),
            _ => write!(f, "{sign}{mantissa}{}", decimal_suffix(exponent)),
        }
    }
}

impl TryFrom<&K8sQuantity> for Quantity {
    type Error = QuantityError;

    fn try_from(quantity: &K8sQuantity) -> Result<Self, Self::Error> {
        quantity.0.parse()
    }
}

impl From<Quantity> for K8sQuantity {
    fn from(quantity: Quantity) -> Self {
        K8sQuantity(quantity.to_string())
    }
}

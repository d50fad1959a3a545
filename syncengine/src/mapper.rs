//! Declarative field mapping from raw external records to normalized records.

use serde_json::{Number, Value};
use syncstore::models::{FieldMappings, MappingRule, NormalizedRecord, Transform};

/// Outcome of resolving and transforming one source field.
#[derive(Debug, Clone, PartialEq)]
enum Mapped {
    Missing,
    NotANumber,
    Value(Value),
}

impl Mapped {
    fn is_falsy(&self) -> bool {
        match self {
            Mapped::Missing | Mapped::NotANumber => true,
            Mapped::Value(value) => match value {
                Value::Null => true,
                Value::Bool(flag) => !flag,
                Value::String(text) => text.is_empty(),
                Value::Number(number) => number.as_f64() == Some(0.0),
                Value::Array(_) | Value::Object(_) => false,
            },
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FieldMapper;

impl FieldMapper {
    /// Applies `rules` to one raw record. With no rules the record passes through unchanged.
    pub fn map(raw: &Value, rules: &FieldMappings) -> NormalizedRecord {
        if rules.is_empty() {
            return NormalizedRecord::passthrough(raw);
        }

        let mut record = NormalizedRecord::new();
        for (target, rule) in rules {
            let resolved = rule.source().resolve(raw);
            let (transform, default) = match rule {
                MappingRule::Direct(_) => (Transform::None, None),
                MappingRule::Transformed {
                    transform, default, ..
                } => (*transform, default.as_ref()),
            };

            let mut mapped = apply_transform(transform, resolved);
            if mapped.is_falsy() {
                if let Some(default) = default {
                    mapped = Mapped::Value(default.clone());
                }
            }

            match mapped {
                Mapped::Missing => {}
                Mapped::NotANumber => record.mark_not_a_number(target.as_str()),
                Mapped::Value(value) => record.insert(target.as_str(), value),
            }
        }
        record
    }
}

fn apply_transform(transform: Transform, value: Option<&Value>) -> Mapped {
    match (transform, value) {
        (Transform::ParseInt, value) => parse_int(value),
        (_, None) => Mapped::Missing,
        (Transform::Uppercase, Some(Value::String(text))) => {
            Mapped::Value(Value::String(text.to_uppercase()))
        }
        (Transform::Lowercase, Some(Value::String(text))) => {
            Mapped::Value(Value::String(text.to_lowercase()))
        }
        (_, Some(value)) => Mapped::Value(value.clone()),
    }
}

/// Integer coercion with `parseInt` semantics: leading whitespace, an
/// optional sign, then the longest run of digits. Floats truncate toward zero.
fn parse_int(value: Option<&Value>) -> Mapped {
    match value {
        Some(Value::Number(number)) => {
            if let Some(int) = number.as_i64() {
                return Mapped::Value(Value::from(int));
            }
            if let Some(int) = number.as_u64() {
                return Mapped::Value(Value::from(int));
            }
            match number.as_f64().map(f64::trunc) {
                Some(truncated) if truncated.is_finite() => float_value(truncated),
                _ => Mapped::NotANumber,
            }
        }
        Some(Value::String(text)) => parse_int_str(text),
        _ => Mapped::NotANumber,
    }
}

fn parse_int_str(text: &str) -> Mapped {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, rest) = match rest.get(..2) {
        Some("0x") | Some("0X") => (16, &rest[2..]),
        _ => (10, rest),
    };

    let end = rest
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() {
        return Mapped::NotANumber;
    }

    match i64::from_str_radix(digits, radix) {
        Ok(int) => Mapped::Value(Value::from(if negative { -int } else { int })),
        Err(_) => {
            // Too large for i64: keep the magnitude as a float.
            let magnitude = digits
                .chars()
                .filter_map(|c| c.to_digit(radix))
                .fold(0f64, |acc, digit| acc * f64::from(radix) + f64::from(digit));
            float_value(if negative { -magnitude } else { magnitude })
        }
    }
}

fn float_value(value: f64) -> Mapped {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        return Mapped::Value(Value::from(value as i64));
    }
    Number::from_f64(value)
        .map(|number| Mapped::Value(Value::Number(number)))
        .unwrap_or(Mapped::NotANumber)
}

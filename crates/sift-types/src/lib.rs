#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Int(v) => Ok(*v as f64),
            Self::Float(v) => Ok(*v),
            Self::Null => Err(TypeError::ValueIsMissing),
            Self::Bool(_) | Self::Text(_) => Err(TypeError::NonNumericValue { kind: self.kind() }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("kinds {left:?} and {right:?} have no compatible common kind")]
    IncompatibleKinds { left: ValueKind, right: ValueKind },
    #[error("cannot compare {left:?} with {right:?}")]
    MismatchedKinds { left: ValueKind, right: ValueKind },
    #[error("value of kind {kind:?} is not numeric")]
    NonNumericValue { kind: ValueKind },
    #[error("value is missing")]
    ValueIsMissing,
}

pub fn common_kind(left: ValueKind, right: ValueKind) -> Result<ValueKind, TypeError> {
    use ValueKind::{Float, Int, Null};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Int, Float) | (Float, Int) => Float,
        _ => return Err(TypeError::IncompatibleKinds { left, right }),
    };

    Ok(out)
}

pub fn infer_kind(values: &[Value]) -> Result<ValueKind, TypeError> {
    let mut current = ValueKind::Null;
    for value in values {
        current = common_kind(current, value.kind())?;
    }
    Ok(current)
}

/// Widens a value to the kind its column stores; only `Int` -> `Float`
/// changes representation, everything else passes through.
#[must_use]
pub fn promote(value: Value, kind: ValueKind) -> Value {
    match (value, kind) {
        (Value::Int(v), ValueKind::Float) => Value::Float(v as f64),
        (value, _) => value,
    }
}

/// Three-way comparison between two values. Missing values (null or NaN)
/// compare as `None`; values of unrelated kinds are an error.
pub fn partial_cmp_values(left: &Value, right: &Value) -> Result<Option<Ordering>, TypeError> {
    if left.is_missing() || right.is_missing() {
        return Ok(None);
    }

    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (left.to_f64()?, right.to_f64()?);
            // NaN operands were caught by the missing check above.
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        _ => {
            return Err(TypeError::MismatchedKinds {
                left: left.kind(),
                right: right.kind(),
            });
        }
    };

    Ok(Some(ordering))
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{TypeError, Value, ValueKind, common_kind, infer_kind, partial_cmp_values, promote};

    #[test]
    fn kind_inference_widens_numeric_values() {
        let values = vec![Value::Null, Value::Int(7), Value::Float(3.5)];
        assert_eq!(
            infer_kind(&values).expect("kind should infer"),
            ValueKind::Float
        );
    }

    #[test]
    fn common_kind_treats_null_as_bottom() {
        assert_eq!(
            common_kind(ValueKind::Null, ValueKind::Text).expect("null widens"),
            ValueKind::Text
        );
        assert_eq!(
            infer_kind(&[]).expect("empty input infers"),
            ValueKind::Null
        );
    }

    #[test]
    fn common_kind_rejects_text_numeric_mix() {
        let err = common_kind(ValueKind::Text, ValueKind::Int).expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "kinds Text and Int have no compatible common kind"
        );
    }

    #[test]
    fn common_kind_rejects_bool_int_mix() {
        assert!(matches!(
            common_kind(ValueKind::Bool, ValueKind::Int),
            Err(TypeError::IncompatibleKinds { .. })
        ));
    }

    #[test]
    fn nan_counts_as_missing() {
        assert!(Value::Float(f64::NAN).is_missing());
        assert!(Value::Null.is_missing());
        assert!(!Value::Float(0.0).is_missing());
    }

    #[test]
    fn promote_widens_int_under_float_kind() {
        assert_eq!(promote(Value::Int(4), ValueKind::Float), Value::Float(4.0));
        assert_eq!(promote(Value::Null, ValueKind::Float), Value::Null);
        assert_eq!(promote(Value::Int(4), ValueKind::Int), Value::Int(4));
    }

    #[test]
    fn cross_numeric_comparison_goes_through_f64() {
        let ordering = partial_cmp_values(&Value::Int(2), &Value::Float(2.5)).expect("comparable");
        assert_eq!(ordering, Some(Ordering::Less));
    }

    #[test]
    fn missing_values_compare_as_none() {
        assert_eq!(
            partial_cmp_values(&Value::Null, &Value::Int(1)).expect("missing is not an error"),
            None
        );
        assert_eq!(
            partial_cmp_values(&Value::Float(f64::NAN), &Value::Float(1.0))
                .expect("missing is not an error"),
            None
        );
    }

    #[test]
    fn mismatched_kinds_fail_to_compare() {
        let err = partial_cmp_values(&Value::Text("a".to_owned()), &Value::Int(1))
            .expect_err("must fail");
        assert_eq!(
            err,
            TypeError::MismatchedKinds {
                left: ValueKind::Text,
                right: ValueKind::Int,
            }
        );
    }

    #[test]
    fn value_serde_round_trips_through_json() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(-3),
            Value::Float(1.25),
            Value::Text("abc".to_owned()),
        ];
        let encoded = serde_json::to_string(&values).expect("encode");
        let decoded: Vec<Value> = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, values);
    }
}

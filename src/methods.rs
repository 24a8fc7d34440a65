//! Built-in methods

use serde_json::{Number, Value};

use crate::{
    envelope::Params,
    errors::{MethodError, RegistryError},
    registry::MethodRegistry,
};

pub fn builtin_registry() -> Result<MethodRegistry, RegistryError> {
    let mut registry = MethodRegistry::new();
    registry.register("sum", sum)?;
    Ok(registry)
}

/// Adds up a positional list of numbers.
///
/// Integers are summed exactly; the result switches to floating point as soon as a float is
/// seen or the integer sum would overflow. Absent params sum to `0`.
pub fn sum(params: Option<&Params>) -> Result<Value, MethodError> {
    let items: &[Value] = match params {
        None => &[],
        Some(Params::Positional(items)) => items,
        Some(Params::Named(_)) => {
            return Err(MethodError::invalid_params(
                "sum expects a positional list of numbers",
            ))
        }
    };

    let mut total = Total::Integer(0);
    for (index, item) in items.iter().enumerate() {
        let Value::Number(number) = item else {
            return Err(MethodError::invalid_params(format!(
                "sum params[{index}] is not a number"
            )));
        };
        total = total.add(number);
    }

    total.into_value()
}

enum Total {
    Integer(i64),
    Float(f64),
}

impl Total {
    fn add(self, number: &Number) -> Self {
        match (self, number.as_i64()) {
            (Self::Integer(acc), Some(value)) => match acc.checked_add(value) {
                Some(sum) => Self::Integer(sum),
                None => Self::Float(acc as f64 + value as f64),
            },
            (Self::Integer(acc), None) => Self::Float(acc as f64 + as_f64(number)),
            (Self::Float(acc), _) => Self::Float(acc + as_f64(number)),
        }
    }

    fn into_value(self) -> Result<Value, MethodError> {
        match self {
            Self::Integer(sum) => Ok(Value::from(sum)),
            Self::Float(sum) => Number::from_f64(sum)
                .map(Value::Number)
                .ok_or_else(|| MethodError::internal(format!("sum is not finite: {sum}"))),
        }
    }
}

// serde_json numbers without arbitrary_precision always have an f64 view
fn as_f64(number: &Number) -> f64 {
    number.as_f64().unwrap_or(f64::NAN)
}

// JBasic Type Coercion
// Conversions between kinds along the promotion lattice

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{VmError, VmResult};
use crate::vm::value::{Table, Value, ValueKind};

impl ValueKind {
    /// Resolve the kind an arithmetic or comparison operation runs in.
    ///
    /// Scalars promote along the lattice; BOOLEAN operands compute as
    /// INTEGER. Composite kinds win over scalars and are resolved by the
    /// operator's special cases.
    pub fn best(a: ValueKind, b: ValueKind) -> ValueKind {
        let best = a.max(b);
        if best == ValueKind::Boolean {
            ValueKind::Integer
        } else {
            best
        }
    }
}

fn mismatch(value: &Value, kind: ValueKind) -> VmError {
    VmError::type_mismatch(format!("cannot convert {} to {}", value.type_name(), kind))
}

/// Parse numeric text as INTEGER when it is integral, DOUBLE otherwise
pub fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::Integer(n));
    }
    text.parse::<f64>().ok().map(Value::Double)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_uppercase().as_str() {
        "TRUE" | "YES" | "Y" | "T" => Some(true),
        "FALSE" | "NO" | "N" | "F" => Some(false),
        _ => None,
    }
}

fn f64_to_decimal(n: f64) -> Option<Decimal> {
    if !n.is_finite() {
        return None;
    }
    Decimal::from_str(&n.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(n))
}

impl Value {
    pub fn to_bool(&self) -> VmResult<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Integer(n) => Ok(*n != 0),
            Value::Double(n) => Ok(*n != 0.0),
            Value::Decimal(d) => Ok(!d.is_zero()),
            Value::String(s) => match parse_bool(s) {
                Some(b) => Ok(b),
                None => match parse_number(s) {
                    Some(n) => n.to_bool(),
                    None => Err(mismatch(self, ValueKind::Boolean)),
                },
            },
            _ => Err(mismatch(self, ValueKind::Boolean)),
        }
    }

    pub fn to_i64(&self) -> VmResult<i64> {
        match self {
            Value::Boolean(b) => Ok(i64::from(*b)),
            Value::Integer(n) => Ok(*n),
            Value::Double(n) => {
                let truncated = n.trunc();
                if truncated.is_finite()
                    && truncated >= i64::MIN as f64
                    && truncated <= i64::MAX as f64
                {
                    Ok(truncated as i64)
                } else {
                    Err(mismatch(self, ValueKind::Integer))
                }
            }
            Value::Decimal(d) => d
                .trunc()
                .to_i64()
                .ok_or_else(|| mismatch(self, ValueKind::Integer)),
            Value::String(s) => match parse_number(s) {
                Some(n) => n.to_i64(),
                None => Err(mismatch(self, ValueKind::Integer)),
            },
            _ => Err(mismatch(self, ValueKind::Integer)),
        }
    }

    pub fn to_f64(&self) -> VmResult<f64> {
        match self {
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Integer(n) => Ok(*n as f64),
            Value::Double(n) => Ok(*n),
            Value::Decimal(d) => d.to_f64().ok_or_else(|| mismatch(self, ValueKind::Double)),
            Value::String(s) => match parse_number(s) {
                Some(n) => n.to_f64(),
                None => Err(mismatch(self, ValueKind::Double)),
            },
            _ => Err(mismatch(self, ValueKind::Double)),
        }
    }

    pub fn to_decimal(&self) -> VmResult<Decimal> {
        match self {
            Value::Boolean(b) => Ok(Decimal::from(i64::from(*b))),
            Value::Integer(n) => Ok(Decimal::from(*n)),
            Value::Double(n) => f64_to_decimal(*n).ok_or_else(|| mismatch(self, ValueKind::Decimal)),
            Value::Decimal(d) => Ok(*d),
            Value::String(s) => {
                let text = s.trim();
                Decimal::from_str(text)
                    .or_else(|_| Decimal::from_scientific(text))
                    .map_err(|_| mismatch(self, ValueKind::Decimal))
            }
            _ => Err(mismatch(self, ValueKind::Decimal)),
        }
    }

    /// A converted copy of this value
    pub fn coerced(&self, kind: ValueKind) -> VmResult<Value> {
        if self.kind() == kind {
            return Ok(self.clone());
        }
        match kind {
            ValueKind::Boolean => self.to_bool().map(Value::Boolean),
            ValueKind::Integer => self.to_i64().map(Value::Integer),
            ValueKind::Double => self.to_f64().map(Value::Double),
            ValueKind::Decimal => self.to_decimal().map(Value::Decimal),
            ValueKind::String => Ok(Value::from(self.to_string())),
            ValueKind::Array => match self {
                Value::Table(table) => Ok(Value::array(table.records())),
                Value::Object(_) => Err(mismatch(self, kind)),
                scalar => Ok(Value::array(vec![scalar.clone()])),
            },
            ValueKind::Table => match self {
                Value::Array(items) => Table::from_records(items).map(Value::table),
                _ => Err(mismatch(self, kind)),
            },
            ValueKind::Record | ValueKind::Object => Err(mismatch(self, kind)),
        }
    }

    /// Convert in place
    pub fn coerce(&mut self, kind: ValueKind) -> VmResult<()> {
        if self.kind() != kind {
            *self = self.coerced(kind)?;
        }
        Ok(())
    }
}

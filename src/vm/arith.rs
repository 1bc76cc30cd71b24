// JBasic Value Arithmetic
// Binary operators resolve a best type for the pair and then apply the
// container special cases (concatenation, append, union, row merge).
// The left operand is the target, the right operand the source.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::value::{Value, ValueKind};

/// Binary operators that go through best-type resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "MOD",
            BinaryOp::Pow => "^",
        }
    }
}

fn unsupported(op: BinaryOp, lhs: &Value, rhs: &Value) -> VmError {
    VmError::type_mismatch(format!(
        "{} {} {}",
        lhs.type_name(),
        op.symbol(),
        rhs.type_name()
    ))
}

fn divide_by_zero() -> VmError {
    VmError::new(ErrorKind::DivideByZero)
}

impl Value {
    pub fn add(&self, rhs: &Value) -> VmResult<Value> {
        match (self, rhs) {
            (Value::Table(table), Value::Table(other)) => {
                let mut merged = table.clone();
                Arc::make_mut(&mut merged).merge(other)?;
                Ok(Value::Table(merged))
            }
            (Value::Table(table), Value::Array(row)) => {
                let mut extended = table.clone();
                Arc::make_mut(&mut extended).push_row(row.to_vec())?;
                Ok(Value::Table(extended))
            }
            (Value::Table(table), Value::Record(record)) => {
                let mut extended = table.clone();
                Arc::make_mut(&mut extended).push_record(record)?;
                Ok(Value::Table(extended))
            }
            (Value::Record(record), Value::Record(other)) => {
                let mut union = record.clone();
                Arc::make_mut(&mut union).union(other);
                Ok(Value::Record(union))
            }
            (Value::Record(_), _) => Err(unsupported(BinaryOp::Add, self, rhs)),
            (Value::Array(items), Value::Array(other)) => {
                let mut joined = items.clone();
                Arc::make_mut(&mut joined).extend(other.iter().cloned());
                Ok(Value::Array(joined))
            }
            (Value::Array(items), scalar) if scalar.kind().is_scalar() => {
                let mut appended = items.clone();
                Arc::make_mut(&mut appended).push(scalar.clone());
                Ok(Value::Array(appended))
            }
            (scalar, Value::Array(items)) if scalar.kind().is_scalar() => {
                let mut prepended = Vec::with_capacity(items.len() + 1);
                prepended.push(scalar.clone());
                prepended.extend(items.iter().cloned());
                Ok(Value::array(prepended))
            }
            _ => self.scalar_op(BinaryOp::Add, rhs),
        }
    }

    pub fn sub(&self, rhs: &Value) -> VmResult<Value> {
        match (self, rhs) {
            (Value::Array(items), Value::Array(remove)) => {
                let mut remaining = items.to_vec();
                for value in remove.iter() {
                    remove_first(&mut remaining, value);
                }
                Ok(Value::array(remaining))
            }
            (Value::Array(items), scalar) if scalar.kind().is_scalar() => {
                let mut remaining = items.to_vec();
                remove_first(&mut remaining, scalar);
                Ok(Value::array(remaining))
            }
            _ => self.scalar_op(BinaryOp::Sub, rhs),
        }
    }

    pub fn mul(&self, rhs: &Value) -> VmResult<Value> {
        self.scalar_op(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: &Value) -> VmResult<Value> {
        self.scalar_op(BinaryOp::Div, rhs)
    }

    pub fn modulo(&self, rhs: &Value) -> VmResult<Value> {
        self.scalar_op(BinaryOp::Mod, rhs)
    }

    pub fn pow(&self, rhs: &Value) -> VmResult<Value> {
        self.scalar_op(BinaryOp::Pow, rhs)
    }

    pub fn binary(&self, op: BinaryOp, rhs: &Value) -> VmResult<Value> {
        match op {
            BinaryOp::Add => self.add(rhs),
            BinaryOp::Sub => self.sub(rhs),
            BinaryOp::Mul => self.mul(rhs),
            BinaryOp::Div => self.div(rhs),
            BinaryOp::Mod => self.modulo(rhs),
            BinaryOp::Pow => self.pow(rhs),
        }
    }

    /// Unary minus. Negating a STRING reverses its characters.
    pub fn negate(&self) -> VmResult<Value> {
        match self {
            Value::Boolean(b) => Ok(Value::Integer(-i64::from(*b))),
            Value::Integer(n) => Ok(n
                .checked_neg()
                .map(Value::Integer)
                .unwrap_or(Value::Double(-(*n as f64)))),
            Value::Double(n) => Ok(Value::Double(-n)),
            Value::Decimal(d) => Ok(Value::Decimal(-*d)),
            Value::String(s) => Ok(Value::from(s.chars().rev().collect::<String>())),
            other => Err(VmError::type_mismatch(format!("-{}", other.type_name()))),
        }
    }

    fn scalar_op(&self, op: BinaryOp, rhs: &Value) -> VmResult<Value> {
        let (lk, rk) = (self.kind(), rhs.kind());
        if !lk.is_scalar() || !rk.is_scalar() {
            return Err(unsupported(op, self, rhs));
        }
        match ValueKind::best(lk, rk) {
            ValueKind::String => string_op(op, &self.to_string(), &rhs.to_string())
                .ok_or_else(|| unsupported(op, self, rhs)),
            ValueKind::Decimal => decimal_op(op, self.to_decimal()?, rhs.to_decimal()?),
            ValueKind::Double => double_op(op, self.to_f64()?, rhs.to_f64()?),
            _ => integer_op(op, self.to_i64()?, rhs.to_i64()?),
        }
    }

    /// Ordering on the best type of the pair
    pub fn compare(&self, rhs: &Value) -> VmResult<Ordering> {
        let (lk, rk) = (self.kind(), rhs.kind());
        if !lk.is_scalar() || !rk.is_scalar() {
            return Err(VmError::type_mismatch(format!(
                "cannot order {} and {}",
                self.type_name(),
                rhs.type_name()
            )));
        }
        if lk == ValueKind::Boolean && rk == ValueKind::Boolean {
            return Ok(self.to_bool()?.cmp(&rhs.to_bool()?));
        }
        Ok(match ValueKind::best(lk, rk) {
            ValueKind::String => self.to_string().cmp(&rhs.to_string()),
            ValueKind::Decimal => self.to_decimal()?.cmp(&rhs.to_decimal()?),
            ValueKind::Double => self.to_f64()?.total_cmp(&rhs.to_f64()?),
            _ => self.to_i64()?.cmp(&rhs.to_i64()?),
        })
    }

    /// Equality: best-type comparison for scalars, structural for containers,
    /// identity for objects. A container never equals a scalar.
    pub fn equals(&self, rhs: &Value) -> VmResult<bool> {
        match (self, rhs) {
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.equals(y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Record(a), Value::Record(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (name, value) in a.iter() {
                    match b.get(name) {
                        Some(other) if value.equals(other)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Value::Table(a), Value::Table(b)) => {
                if !a.same_schema(b) || a.row_count() != b.row_count() {
                    return Ok(false);
                }
                Value::array(a.records()).equals(&Value::array(b.records()))
            }
            (Value::Object(a), Value::Object(b)) => Ok(a.ptr_eq(b)),
            (a, b) if a.kind().is_scalar() && b.kind().is_scalar() => {
                Ok(a.compare(b)? == Ordering::Equal)
            }
            _ => Ok(false),
        }
    }
}

fn remove_first(items: &mut Vec<Value>, value: &Value) {
    if let Some(pos) = items.iter().position(|item| item == value) {
        items.remove(pos);
    }
}

fn string_op(op: BinaryOp, lhs: &str, rhs: &str) -> Option<Value> {
    match op {
        BinaryOp::Add => Some(Value::from(format!("{}{}", lhs, rhs))),
        BinaryOp::Sub => Some(Value::from(lhs.replacen(rhs, "", 1))),
        _ => None,
    }
}

fn integer_op(op: BinaryOp, a: i64, b: i64) -> VmResult<Value> {
    let promoted = || double_op(op, a as f64, b as f64);
    match op {
        BinaryOp::Add => a.checked_add(b).map(Value::Integer).map_or_else(promoted, Ok),
        BinaryOp::Sub => a.checked_sub(b).map(Value::Integer).map_or_else(promoted, Ok),
        BinaryOp::Mul => a.checked_mul(b).map(Value::Integer).map_or_else(promoted, Ok),
        BinaryOp::Div => {
            if b == 0 {
                return Err(divide_by_zero());
            }
            if a % b == 0 {
                a.checked_div(b).map(Value::Integer).map_or_else(promoted, Ok)
            } else {
                Ok(Value::Double(a as f64 / b as f64))
            }
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(divide_by_zero());
            }
            Ok(Value::Integer(a.checked_rem(b).unwrap_or(0)))
        }
        BinaryOp::Pow => {
            if (0..=u32::MAX as i64).contains(&b) {
                a.checked_pow(b as u32).map(Value::Integer).map_or_else(promoted, Ok)
            } else {
                promoted()
            }
        }
    }
}

fn double_op(op: BinaryOp, a: f64, b: f64) -> VmResult<Value> {
    Ok(Value::Double(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(divide_by_zero());
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(divide_by_zero());
            }
            a % b
        }
        BinaryOp::Pow => a.powf(b),
    }))
}

fn decimal_overflow() -> VmError {
    VmError::with_param(ErrorKind::InvalidValue, "DECIMAL overflow")
}

fn decimal_op(op: BinaryOp, a: Decimal, b: Decimal) -> VmResult<Value> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b.is_zero() {
                return Err(divide_by_zero());
            }
            let scale = a.scale().max(b.scale());
            a.checked_div(b)
                .map(|q| q.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero))
        }
        BinaryOp::Mod => {
            if b.is_zero() {
                return Err(divide_by_zero());
            }
            a.checked_rem(b)
        }
        BinaryOp::Pow => {
            if b.fract().is_zero() {
                let exp = b.to_i64().ok_or_else(decimal_overflow)?;
                a.checked_powi(exp)
            } else {
                a.checked_powd(b)
            }
        }
    };
    result.map(Value::Decimal).ok_or_else(decimal_overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::{Record, Table};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn arr(items: &[i64]) -> Value {
        Value::array(items.iter().map(|&n| Value::Integer(n)).collect())
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        assert!(matches!(Value::from(2).add(&Value::from(3)).unwrap(), Value::Integer(5)));
        assert!(matches!(Value::from(6).div(&Value::from(3)).unwrap(), Value::Integer(2)));
        assert!(matches!(Value::from(7).div(&Value::from(2)).unwrap(), Value::Double(n) if n == 3.5));
        assert!(matches!(Value::from(2).pow(&Value::from(10)).unwrap(), Value::Integer(1024)));
    }

    #[test]
    fn test_overflow_promotes_to_double() {
        let result = Value::from(i64::MAX).add(&Value::from(1)).unwrap();
        assert_eq!(result.kind(), ValueKind::Double);
    }

    #[test]
    fn test_mixed_kinds_use_best_type() {
        let result = Value::from(1).add(&Value::Double(0.5)).unwrap();
        assert_eq!(result.kind(), ValueKind::Double);
        let result = Value::from("a").add(&Value::from(1)).unwrap();
        assert_eq!(result, Value::from("a1"));
        let result = Value::Boolean(true).add(&Value::Boolean(true)).unwrap();
        assert!(matches!(result, Value::Integer(2)));
    }

    #[test]
    fn test_commutative_numeric_results() {
        let pairs = [
            (Value::from(3), Value::Double(1.5)),
            (Value::from(4), Value::Decimal(Decimal::from_str("0.25").unwrap())),
            (Value::Boolean(true), Value::from(7)),
        ];
        for (a, b) in pairs {
            assert_eq!(a.add(&b).unwrap().kind(), b.add(&a).unwrap().kind());
            assert_eq!(a.add(&b).unwrap(), b.add(&a).unwrap());
            assert_eq!(a.mul(&b).unwrap(), b.mul(&a).unwrap());
        }
    }

    #[test]
    fn test_division_by_zero() {
        let err = Value::from(1).div(&Value::from(0)).unwrap_err();
        assert!(err.is(ErrorKind::DivideByZero));
        let err = Value::Double(1.0).modulo(&Value::Double(0.0)).unwrap_err();
        assert!(err.is(ErrorKind::DivideByZero));
    }

    #[test]
    fn test_decimal_division_rounds_half_up_at_scale() {
        let one = Value::Decimal(Decimal::from_str("1.00").unwrap());
        let three = Value::Decimal(Decimal::from_str("3.00").unwrap());
        let result = one.div(&three).unwrap();
        assert_eq!(result.to_string(), "0.33");

        let two = Value::Decimal(Decimal::from_str("2.00").unwrap());
        assert_eq!(two.div(&three).unwrap().to_string(), "0.67");
    }

    #[test]
    fn test_decimal_power_with_integer_exponent() {
        let base = Value::Decimal(Decimal::from_str("1.5").unwrap());
        let result = base.pow(&Value::from(2)).unwrap();
        assert_eq!(result.kind(), ValueKind::Decimal);
        assert_eq!(result.to_string(), "2.25");
    }

    #[test]
    fn test_string_concat_and_removal() {
        let s = Value::from("hello").add(&Value::from(" world")).unwrap();
        assert_eq!(s, Value::from("hello world"));
        let s = Value::from("banana").sub(&Value::from("an")).unwrap();
        assert_eq!(s, Value::from("bana"));
        assert!(Value::from("a").mul(&Value::from("b")).is_err());
    }

    #[test]
    fn test_negate_reverses_strings() {
        assert_eq!(Value::from("abc").negate().unwrap(), Value::from("cba"));
        assert!(matches!(Value::from(5).negate().unwrap(), Value::Integer(-5)));
    }

    #[test]
    fn test_array_append_and_concat_order() {
        assert_eq!(arr(&[1, 2]).add(&Value::from(3)).unwrap(), arr(&[1, 2, 3]));
        assert_eq!(Value::from(0).add(&arr(&[1])).unwrap(), arr(&[0, 1]));
        assert_eq!(arr(&[1]).add(&arr(&[2, 3])).unwrap(), arr(&[1, 2, 3]));
        assert_eq!(arr(&[2, 3]).add(&arr(&[1])).unwrap(), arr(&[2, 3, 1]));
    }

    #[test]
    fn test_array_subtraction_is_by_value() {
        assert_eq!(arr(&[1, 2, 3]).sub(&arr(&[2])).unwrap(), arr(&[1, 3]));
        assert_eq!(arr(&[1, 2, 2, 3]).sub(&arr(&[2])).unwrap(), arr(&[1, 2, 3]));
        assert_eq!(arr(&[5, 6]).sub(&Value::from(5)).unwrap(), arr(&[6]));
        assert_eq!(arr(&[1, 2]).sub(&arr(&[9])).unwrap(), arr(&[1, 2]));
    }

    #[test]
    fn test_record_union_requires_record() {
        let a = Value::record(Record::new().with("x", 1).with("y", 2));
        let b = Value::record(Record::new().with("y", 3).with("z", 4));
        let union = a.add(&b).unwrap();
        let record = union.as_record().unwrap();
        assert_eq!(record.len(), 3);
        assert_eq!(record.get("Y"), Some(&Value::from(3)));
        assert!(a.add(&Value::from(1)).unwrap_err().is(ErrorKind::TypeMismatch));
    }

    #[test]
    fn test_table_row_append_and_merge() {
        let mut table = Table::new(["id", "name"]);
        table.push_row(vec![Value::from(1), Value::from("a")]).unwrap();
        let table = Value::table(table);

        let appended = table
            .add(&Value::array(vec![Value::from(2), Value::from("b")]))
            .unwrap();
        assert_eq!(appended.as_table().unwrap().row_count(), 2);
        assert_eq!(table.as_table().unwrap().row_count(), 1);

        let merged = appended.add(&table).unwrap();
        assert_eq!(merged.as_table().unwrap().row_count(), 3);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(Value::from(1).compare(&Value::Double(1.5)).unwrap(), Ordering::Less);
        assert_eq!(Value::from("b").compare(&Value::from("a")).unwrap(), Ordering::Greater);
        assert_eq!(Value::Boolean(false).compare(&Value::Boolean(true)).unwrap(), Ordering::Less);
        assert!(arr(&[1]).compare(&arr(&[1])).is_err());
        assert!(arr(&[1, 2]).equals(&arr(&[1, 2])).unwrap());
        assert!(!arr(&[1]).equals(&Value::from(1)).unwrap());
        assert!(Value::from(1).equals(&Value::from("1")).unwrap());
    }
}

// JBasic Runtime Values
// Containers are Arc-shared and copy-on-write, so a value read out of a
// symbol table can sit on the stack without aliasing the binding mutably

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::interner::{fold, normalize};
use crate::vm::object::ObjectRef;

/// The kinds a value can take.
///
/// Declaration order of the scalar kinds is the arithmetic promotion lattice
/// BOOLEAN < INTEGER < DOUBLE < DECIMAL < STRING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Boolean,
    Integer,
    Double,
    Decimal,
    String,
    Array,
    Record,
    Table,
    Object,
}

impl ValueKind {
    pub const ALL: [ValueKind; 9] = [
        ValueKind::Boolean,
        ValueKind::Integer,
        ValueKind::Double,
        ValueKind::Decimal,
        ValueKind::String,
        ValueKind::Array,
        ValueKind::Record,
        ValueKind::Table,
        ValueKind::Object,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::Integer => "INTEGER",
            ValueKind::Double => "DOUBLE",
            ValueKind::Decimal => "DECIMAL",
            ValueKind::String => "STRING",
            ValueKind::Array => "ARRAY",
            ValueKind::Record => "RECORD",
            ValueKind::Table => "TABLE",
            ValueKind::Object => "OBJECT",
        }
    }

    /// Numeric code used by the CVT, DIM and ISKIND operands
    pub fn code(&self) -> i64 {
        match self {
            ValueKind::Boolean => 1,
            ValueKind::Integer => 2,
            ValueKind::Double => 3,
            ValueKind::Decimal => 4,
            ValueKind::String => 5,
            ValueKind::Array => 6,
            ValueKind::Record => 7,
            ValueKind::Table => 8,
            ValueKind::Object => 9,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().find(|kind| kind.code() == code).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .copied()
    }

    /// Kind implied by a BASIC variable-name suffix, if any
    pub fn from_suffix(name: &str) -> Option<Self> {
        match name.chars().last()? {
            '$' => Some(ValueKind::String),
            '%' => Some(ValueKind::Integer),
            '#' => Some(ValueKind::Double),
            '!' => Some(ValueKind::Boolean),
            '@' => Some(ValueKind::Decimal),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        *self <= ValueKind::String
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueKind::Integer | ValueKind::Double | ValueKind::Decimal
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Runtime value
#[derive(Clone)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Decimal(Decimal),
    String(Arc<str>),
    Array(Arc<Vec<Value>>),
    Record(Arc<Record>),
    Table(Arc<Table>),
    Object(ObjectRef),
}

impl Value {
    pub fn string(text: &str) -> Self {
        Value::String(Arc::from(text))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }

    pub fn record(record: Record) -> Self {
        Value::Record(Arc::new(record))
    }

    pub fn table(table: Table) -> Self {
        Value::Table(Arc::new(table))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Double(_) => ValueKind::Double,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Record(_) => ValueKind::Record,
            Value::Table(_) => ValueKind::Table,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// The zero/blank value of a kind, used for DIM and auto-extension
    pub fn default_of(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Boolean => Value::Boolean(false),
            ValueKind::Integer | ValueKind::Object => Value::Integer(0),
            ValueKind::Double => Value::Double(0.0),
            ValueKind::Decimal => Value::Decimal(Decimal::ZERO),
            ValueKind::String => Value::string(""),
            ValueKind::Array => Value::array(Vec::new()),
            ValueKind::Record => Value::record(Record::new()),
            ValueKind::Table => Value::table(Table::default()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Deep copy: containers get fresh storage all the way down
    pub fn copy(&self) -> Value {
        match self {
            Value::Array(items) => Value::array(items.iter().map(Value::copy).collect()),
            Value::Record(record) => {
                let mut copy = Record::new();
                for (name, value) in record.iter() {
                    copy.fields.insert(name.clone(), value.copy());
                }
                Value::record(copy)
            }
            Value::Table(table) => Value::table(Table {
                columns: table.columns.clone(),
                rows: table
                    .rows
                    .iter()
                    .map(|row| row.iter().map(Value::copy).collect())
                    .collect(),
            }),
            other => other.clone(),
        }
    }

    /// Number of elements for containers, characters for strings
    pub fn length(&self) -> VmResult<usize> {
        match self {
            Value::Array(items) => Ok(items.len()),
            Value::Record(record) => Ok(record.len()),
            Value::Table(table) => Ok(table.row_count()),
            Value::String(s) => Ok(s.chars().count()),
            Value::Object(_) => Err(VmError::type_mismatch("OBJECT has no length")),
            scalar => Ok(scalar.to_string().chars().count()),
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::record(record)
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Self {
        Value::table(table)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Double(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                write!(f, "]")
            }
            Value::Record(record) => {
                write!(f, "{{ ")?;
                for (i, name) in record.names().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", name)?;
                    if let Some(value) = record.get(name) {
                        value.fmt_nested(f)?;
                    }
                }
                write!(f, " }}")
            }
            Value::Table(table) => write!(
                f,
                "<table [{}] {} rows>",
                table.columns.join(", "),
                table.rows.len()
            ),
            Value::Object(object) => write!(f, "<object {}>", object.class_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f)
    }
}

/// Case-insensitive name → value mapping
#[derive(Clone, Default)]
pub struct Record {
    fields: FxHashMap<Arc<str>, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(fold(name).as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(fold(name).as_ref())
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.fields.insert(normalize(name), value);
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(fold(name).as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(fold(name).as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in sorted order
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self.fields.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.fields.iter()
    }

    /// Copy every field of `other` into self; `other` wins on name clashes
    pub fn union(&mut self, other: &Record) {
        for (name, value) in other.iter() {
            self.fields.insert(name.clone(), value.clone());
        }
    }
}

/// Row store: every row follows the same column schema
#[derive(Clone, Default, Debug)]
pub struct Table {
    columns: Vec<Arc<str>>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: AsRef<str>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|name| normalize(name.as_ref()))
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Arc<str>] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = fold(name);
        self.columns.iter().position(|column| **column == *name)
    }

    /// Row as a record (0-based)
    pub fn row(&self, index: usize) -> Option<Record> {
        let row = self.rows.get(index)?;
        let mut record = Record::new();
        for (column, value) in self.columns.iter().zip(row) {
            record.fields.insert(column.clone(), value.clone());
        }
        Some(record)
    }

    pub fn records(&self) -> Vec<Value> {
        (0..self.rows.len())
            .filter_map(|i| self.row(i))
            .map(Value::record)
            .collect()
    }

    /// Append a positional row
    pub fn push_row(&mut self, row: Vec<Value>) -> VmResult<()> {
        if row.len() != self.columns.len() {
            return Err(VmError::type_mismatch(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a row given by column name
    pub fn push_record(&mut self, record: &Record) -> VmResult<()> {
        let mut row = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = record
                .fields
                .get(column)
                .ok_or_else(|| VmError::no_member(column))?;
            row.push(value.clone());
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn same_schema(&self, other: &Table) -> bool {
        self.columns.len() == other.columns.len()
            && other
                .columns
                .iter()
                .all(|column| self.columns.contains(column))
    }

    /// Append all rows of `other`, reordering its columns to match
    pub fn merge(&mut self, other: &Table) -> VmResult<()> {
        if !self.same_schema(other) {
            return Err(VmError::type_mismatch("table schemas differ"));
        }
        let order: Vec<usize> = self
            .columns
            .iter()
            .filter_map(|column| other.columns.iter().position(|c| c == column))
            .collect();
        for row in &other.rows {
            self.rows.push(order.iter().map(|&i| row[i].clone()).collect());
        }
        Ok(())
    }

    /// Build a table from an array of records; the first record fixes the schema
    pub fn from_records(records: &[Value]) -> VmResult<Table> {
        let mut table = match records.first() {
            Some(Value::Record(first)) => Table {
                columns: first.names(),
                rows: Vec::new(),
            },
            Some(other) => {
                return Err(VmError::type_mismatch(format!(
                    "cannot build a table from {}",
                    other.type_name()
                )))
            }
            None => return Ok(Table::default()),
        };
        for value in records {
            match value {
                Value::Record(record) => table.push_record(record)?,
                other => {
                    return Err(VmError::type_mismatch(format!(
                        "cannot build a table from {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(table)
    }
}

/// Raise a NoMember error unless the record holds the field
pub fn require_member<'a>(record: &'a Record, name: &str) -> VmResult<&'a Value> {
    record
        .get(name)
        .ok_or_else(|| VmError::with_param(ErrorKind::NoMember, name.to_uppercase()))
}

// JBasic Binary Record Layouts
// Field-descriptor arrays describe fixed-size records used by GET, PUT and SIZEOF

use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::interner::normalize;
use crate::vm::value::{Record, Value};

/// Storage class of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Fixed-width text, space padded
    String(usize),
    /// Text with a 4-byte length prefix
    Varying(usize),
    /// UTF-16 text, `SIZE` code units
    Unicode(usize),
    Integer(usize),
    Byte,
    Word,
    Double,
    Float(usize),
    Boolean,
    Bitfield(u32),
}

impl FieldType {
    /// Bytes occupied by a non-bitfield field
    fn width(&self) -> usize {
        match self {
            FieldType::String(size) => *size,
            FieldType::Varying(size) => size + 4,
            FieldType::Unicode(size) => size * 2,
            FieldType::Integer(size) | FieldType::Float(size) => *size,
            FieldType::Byte | FieldType::Boolean => 1,
            FieldType::Word => 2,
            FieldType::Double => 8,
            FieldType::Bitfield(_) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Arc<str>,
    pub kind: FieldType,
}

/// Largest encoded record GET or PUT will handle
pub const MAX_RECORD_BYTES: usize = 1 << 24;

fn invalid(message: impl Into<String>) -> VmError {
    VmError::with_param(ErrorKind::InvalidRecord, message)
}

fn descriptor_size(record: &Record, name: &str) -> VmResult<Option<i64>> {
    match record.get("SIZE") {
        None => Ok(None),
        Some(size) => size
            .to_i64()
            .map(Some)
            .map_err(|_| invalid(format!("{}: SIZE is not numeric", name))),
    }
}

fn parse_field(descriptor: &Value) -> VmResult<Field> {
    let record = descriptor
        .as_record()
        .ok_or_else(|| invalid(format!("field descriptor is {}", descriptor.type_name())))?;
    let name = record
        .get("NAME")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("field descriptor has no NAME"))?;
    let type_name = record
        .get("TYPE")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{}: missing TYPE", name)))?
        .to_uppercase();
    let size = descriptor_size(record, name)?;

    let sized = |size: Option<i64>| -> VmResult<usize> {
        match size {
            Some(n) if n > 0 && n <= (MAX_RECORD_BYTES / 2) as i64 => Ok(n as usize),
            Some(n) if n > 0 => Err(invalid(format!("{}: SIZE {} is too large", name, n))),
            _ => Err(invalid(format!("{}: {} needs a positive SIZE", name, type_name))),
        }
    };

    let kind = match type_name.as_str() {
        "STRING" => FieldType::String(sized(size)?),
        "VARYING" => FieldType::Varying(sized(size)?),
        "UNICODE" => FieldType::Unicode(sized(size)?),
        "INTEGER" => match size.unwrap_or(4) {
            n @ (1 | 2 | 4) => FieldType::Integer(n as usize),
            n => return Err(invalid(format!("{}: INTEGER size {}", name, n))),
        },
        "BYTE" => FieldType::Byte,
        "WORD" => FieldType::Word,
        "DOUBLE" => FieldType::Double,
        "FLOAT" => match size.unwrap_or(8) {
            n @ (4 | 8) => FieldType::Float(n as usize),
            n => return Err(invalid(format!("{}: FLOAT size {}", name, n))),
        },
        "BOOLEAN" => FieldType::Boolean,
        "BITFIELD" => match size.unwrap_or(1) {
            n @ 1..=32 => FieldType::Bitfield(n as u32),
            n => return Err(invalid(format!("{}: BITFIELD size {}", name, n))),
        },
        other => return Err(invalid(format!("{}: unknown TYPE {}", name, other))),
    };

    Ok(Field {
        name: normalize(name),
        kind,
    })
}

/// Writes bitfield runs most-significant bit first
struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    start: usize,
    bits: usize,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        let start = out.len();
        Self { out, start, bits: 0 }
    }

    fn write(&mut self, value: u32, width: u32) {
        for shift in (0..width).rev() {
            let byte = self.start + self.bits / 8;
            if byte >= self.out.len() {
                self.out.push(0);
            }
            if (value >> shift) & 1 == 1 {
                self.out[byte] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }
}

fn read_bits(bytes: &[u8], offset: usize, width: u32) -> u32 {
    let mut value = 0u32;
    for i in 0..width as usize {
        let bit = offset + i;
        let set = bytes[bit / 8] & (0x80 >> (bit % 8)) != 0;
        value = (value << 1) | u32::from(set);
    }
    value
}

fn pad_text(text: &str, size: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.bytes().take(size).collect();
    bytes.resize(size, b' ');
    bytes
}

/// A parsed record definition
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    fields: Vec<Field>,
    size: usize,
}

/// Encoded size of a field list, bounded by `MAX_RECORD_BYTES`
fn encoded_size(fields: &[Field]) -> VmResult<usize> {
    let too_large = || invalid(format!("record exceeds {} bytes", MAX_RECORD_BYTES));
    let mut total = 0usize;
    let mut run_bits = 0usize;
    for field in fields {
        match field.kind {
            FieldType::Bitfield(bits) => {
                run_bits = run_bits.checked_add(bits as usize).ok_or_else(too_large)?
            }
            other => {
                total = total
                    .checked_add(run_bits.div_ceil(8))
                    .and_then(|total| total.checked_add(other.width()))
                    .ok_or_else(too_large)?;
                run_bits = 0;
            }
        }
    }
    total
        .checked_add(run_bits.div_ceil(8))
        .filter(|&total| total <= MAX_RECORD_BYTES)
        .ok_or_else(too_large)
}

impl RecordLayout {
    /// Parse an ARRAY of `{NAME, TYPE, SIZE}` records
    pub fn from_value(definition: &Value) -> VmResult<Self> {
        let descriptors = definition.as_array().ok_or_else(|| {
            invalid(format!(
                "record definition must be an ARRAY, got {}",
                definition.type_name()
            ))
        })?;
        let fields = descriptors
            .iter()
            .map(parse_field)
            .collect::<VmResult<Vec<_>>>()?;
        let size = encoded_size(&fields)?;
        Ok(Self { fields, size })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Total encoded size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Encode a record into the big-endian layout. Missing fields encode as zero/blank.
    pub fn encode(&self, record: &Record) -> VmResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size());
        let mut i = 0;
        while i < self.fields.len() {
            if let FieldType::Bitfield(_) = self.fields[i].kind {
                let mut writer = BitWriter::new(&mut out);
                while let Some(Field {
                    name,
                    kind: FieldType::Bitfield(width),
                }) = self.fields.get(i)
                {
                    let value = match record.get(name) {
                        Some(value) => value.to_i64()?,
                        None => 0,
                    };
                    let mask = if *width == 32 { u32::MAX } else { (1u32 << width) - 1 };
                    writer.write((value as u32) & mask, *width);
                    i += 1;
                }
                continue;
            }

            let field = &self.fields[i];
            let value = record.get(&field.name);
            encode_field(&mut out, field.kind, value)?;
            i += 1;
        }
        Ok(out)
    }

    pub fn decode(&self, bytes: &[u8]) -> VmResult<Record> {
        if bytes.len() < self.size() {
            return Err(VmError::with_param(
                ErrorKind::EndOfFile,
                format!("record needs {} bytes, got {}", self.size(), bytes.len()),
            ));
        }
        let mut record = Record::new();
        let mut offset = 0;
        let mut bit_offset: Option<usize> = None;
        let mut run_bits = 0usize;

        for field in &self.fields {
            if let FieldType::Bitfield(width) = field.kind {
                let base = *bit_offset.get_or_insert(offset * 8);
                let value = read_bits(bytes, base + run_bits, width);
                run_bits += width as usize;
                record.set(&field.name, Value::Integer(i64::from(value)));
                continue;
            }
            if bit_offset.take().is_some() {
                offset += run_bits.div_ceil(8);
                run_bits = 0;
            }
            let width = field.kind.width();
            let value = decode_field(&bytes[offset..offset + width], field.kind);
            record.set(&field.name, value);
            offset += width;
        }
        Ok(record)
    }
}

fn encode_field(out: &mut Vec<u8>, kind: FieldType, value: Option<&Value>) -> VmResult<()> {
    let text = || value.map(|v| v.to_string()).unwrap_or_default();
    let int = || value.map(Value::to_i64).transpose().map(|n| n.unwrap_or(0));
    let float = || value.map(Value::to_f64).transpose().map(|n| n.unwrap_or(0.0));

    match kind {
        FieldType::String(size) => out.extend(pad_text(&text(), size)),
        FieldType::Varying(size) => {
            let text = text();
            let bytes: Vec<u8> = text.bytes().take(size).collect();
            out.extend((bytes.len() as u32).to_be_bytes());
            out.extend(&bytes);
            out.resize(out.len() + size - bytes.len(), 0);
        }
        FieldType::Unicode(size) => {
            let mut units: Vec<u16> = text().encode_utf16().take(size).collect();
            units.resize(size, 0);
            for unit in units {
                out.extend(unit.to_be_bytes());
            }
        }
        FieldType::Integer(1) | FieldType::Byte => out.push(int()? as u8),
        FieldType::Integer(2) | FieldType::Word => out.extend((int()? as i16).to_be_bytes()),
        FieldType::Integer(_) => out.extend((int()? as i32).to_be_bytes()),
        FieldType::Float(4) => out.extend((float()? as f32).to_be_bytes()),
        FieldType::Float(_) | FieldType::Double => out.extend(float()?.to_be_bytes()),
        FieldType::Boolean => {
            let flag = value.map(Value::to_bool).transpose()?.unwrap_or(false);
            out.push(u8::from(flag));
        }
        FieldType::Bitfield(_) => {}
    }
    Ok(())
}

fn decode_field(bytes: &[u8], kind: FieldType) -> Value {
    match kind {
        FieldType::String(_) => {
            let text = String::from_utf8_lossy(bytes);
            Value::from(text.trim_end_matches([' ', '\0']))
        }
        FieldType::Varying(size) => {
            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&bytes[..4]);
            let len = (u32::from_be_bytes(prefix) as usize).min(size);
            Value::from(String::from_utf8_lossy(&bytes[4..4 + len]).into_owned())
        }
        FieldType::Unicode(_) => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .take_while(|&unit| unit != 0)
                .collect();
            Value::from(String::from_utf16_lossy(&units))
        }
        FieldType::Byte => Value::Integer(i64::from(bytes[0])),
        FieldType::Integer(1) => Value::Integer(i64::from(bytes[0] as i8)),
        FieldType::Word => Value::Integer(i64::from(u16::from_be_bytes([bytes[0], bytes[1]]))),
        FieldType::Integer(2) => Value::Integer(i64::from(i16::from_be_bytes([bytes[0], bytes[1]]))),
        FieldType::Integer(_) => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(bytes);
            Value::Integer(i64::from(i32::from_be_bytes(raw)))
        }
        FieldType::Float(4) => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(bytes);
            Value::Double(f64::from(f32::from_be_bytes(raw)))
        }
        FieldType::Float(_) | FieldType::Double => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::Double(f64::from_be_bytes(raw))
        }
        FieldType::Boolean => Value::Boolean(bytes[0] != 0),
        FieldType::Bitfield(_) => Value::Integer(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(name: &str, kind: &str, size: Option<i64>) -> Value {
        let mut record = Record::new().with("NAME", name).with("TYPE", kind);
        if let Some(size) = size {
            record.set("SIZE", Value::from(size));
        }
        Value::record(record)
    }

    #[test]
    fn test_sizes() {
        let definition = Value::array(vec![
            field("NAME", "STRING", Some(10)),
            field("NOTE", "VARYING", Some(6)),
            field("WIDE", "UNICODE", Some(3)),
            field("ID", "INTEGER", None),
            field("SMALL", "INTEGER", Some(2)),
            field("B", "BYTE", None),
            field("W", "WORD", None),
            field("D", "DOUBLE", None),
            field("F", "FLOAT", Some(4)),
            field("OK", "BOOLEAN", None),
        ]);
        let layout = RecordLayout::from_value(&definition).unwrap();
        assert_eq!(layout.size(), 10 + 10 + 6 + 4 + 2 + 1 + 2 + 8 + 4 + 1);
    }

    #[test]
    fn test_bitfields_pack_into_bytes() {
        let definition = Value::array(vec![
            field("A", "BITFIELD", Some(3)),
            field("B", "BITFIELD", Some(7)),
            field("C", "BYTE", None),
            field("D", "BITFIELD", Some(1)),
        ]);
        let layout = RecordLayout::from_value(&definition).unwrap();
        assert_eq!(layout.size(), 2 + 1 + 1);

        let record = Record::new().with("a", 5).with("b", 100).with("c", 9).with("d", 1);
        let bytes = layout.encode(&record).unwrap();
        assert_eq!(bytes.len(), 4);
        let decoded = layout.decode(&bytes).unwrap();
        assert_eq!(decoded.get("A"), Some(&Value::Integer(5)));
        assert_eq!(decoded.get("B"), Some(&Value::Integer(100)));
        assert_eq!(decoded.get("C"), Some(&Value::Integer(9)));
        assert_eq!(decoded.get("D"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_text_fields_pad_and_trim() {
        let definition = Value::array(vec![
            field("CODE", "STRING", Some(5)),
            field("LABEL", "VARYING", Some(8)),
            field("WIDE", "UNICODE", Some(4)),
            field("PRICE", "DOUBLE", None),
        ]);
        let layout = RecordLayout::from_value(&definition).unwrap();
        let record = Record::new()
            .with("code", "AB")
            .with("label", "hello")
            .with("wide", "ÅÖ")
            .with("price", 2.5);
        let bytes = layout.encode(&record).unwrap();
        assert_eq!(&bytes[..5], b"AB   ");
        assert_eq!(bytes.len(), layout.size());

        let decoded = layout.decode(&bytes).unwrap();
        assert_eq!(decoded.get("CODE"), Some(&Value::from("AB")));
        assert_eq!(decoded.get("LABEL"), Some(&Value::from("hello")));
        assert_eq!(decoded.get("WIDE"), Some(&Value::from("ÅÖ")));
        assert_eq!(decoded.get("PRICE"), Some(&Value::Double(2.5)));
    }

    #[test]
    fn test_invalid_definitions() {
        let bad = [
            Value::array(vec![field("X", "NIBBLE", None)]),
            Value::array(vec![field("X", "INTEGER", Some(3))]),
            Value::array(vec![field("X", "STRING", None)]),
            Value::array(vec![field("X", "BITFIELD", Some(33))]),
            Value::array(vec![Value::from(1)]),
            Value::from("not an array"),
        ];
        for definition in &bad {
            let err = RecordLayout::from_value(definition).unwrap_err();
            assert!(err.is(ErrorKind::InvalidRecord), "{:?}", definition);
        }
    }

    #[test]
    fn test_oversized_layouts_are_rejected() {
        let huge = Value::array(vec![field("BLOB", "UNICODE", Some(i64::MAX))]);
        let err = RecordLayout::from_value(&huge).unwrap_err();
        assert!(err.is(ErrorKind::InvalidRecord));

        let half = (MAX_RECORD_BYTES / 2) as i64;
        let wide = Value::array(vec![
            field("A", "STRING", Some(half)),
            field("B", "STRING", Some(half)),
            field("C", "BYTE", None),
        ]);
        let err = RecordLayout::from_value(&wide).unwrap_err();
        assert!(err.is(ErrorKind::InvalidRecord));
    }
}

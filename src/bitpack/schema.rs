use thiserror::Error;

use super::{FieldSpec, MAX_PACKED_BITS, pack, unpack};

/// How a field is laid out in an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Goes through the bit packer.
    Packed { resolution: u8, unsigned: bool },
    /// Big-endian `u64` written straight into 8 byte-aligned bytes.
    /// The bit packer only reserves the space for it.
    Aligned64,
}

impl Layout {
    pub const fn bits(&self) -> usize {
        match self {
            Layout::Packed { resolution, .. } => *resolution as usize,
            Layout::Aligned64 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaField {
    pub name: &'static str,
    pub layout: Layout,
}

impl SchemaField {
    pub const fn packed(name: &'static str, resolution: u8, unsigned: bool) -> Self {
        Self {
            name,
            layout: Layout::Packed {
                resolution,
                unsigned,
            },
        }
    }

    pub const fn aligned64(name: &'static str) -> Self {
        Self {
            name,
            layout: Layout::Aligned64,
        }
    }
}

/// A value for (or from) one schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Packed(i64),
    Aligned64(u64),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("field `{name}` has resolution {resolution}, packed fields take 1..={MAX_PACKED_BITS} bits")]
    Resolution { name: &'static str, resolution: u8 },
    #[error("field `{name}` starts at bit {bit}, aligned fields must start on a byte boundary")]
    Unaligned { name: &'static str, bit: usize },
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    /// index into `Schema::specs`
    Packed(usize),
    /// byte offset of the aligned value
    Aligned(usize),
}

/// A fixed entry layout shared by writer and reader.
///
/// Aligned fields appear to the bit packer as two zero-valued 32-bit
/// placeholders, so every later field lands at the right offset, then the real
/// value is written over the placeholder bytes.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<SchemaField>,
    specs: Vec<FieldSpec>,
    slots: Vec<Slot>,
}

impl Schema {
    pub fn new(fields: &[SchemaField]) -> Result<Self, SchemaError> {
        let mut specs = Vec::with_capacity(fields.len() + 1);
        let mut slots = Vec::with_capacity(fields.len());
        let mut bit = 0;

        for field in fields {
            match field.layout {
                Layout::Packed {
                    resolution,
                    unsigned,
                } => {
                    if !(1..=MAX_PACKED_BITS).contains(&resolution) {
                        return Err(SchemaError::Resolution {
                            name: field.name,
                            resolution,
                        });
                    }
                    slots.push(Slot::Packed(specs.len()));
                    specs.push(FieldSpec {
                        resolution,
                        unsigned,
                        value: 0,
                    });
                }
                Layout::Aligned64 => {
                    if bit % 8 != 0 {
                        return Err(SchemaError::Unaligned {
                            name: field.name,
                            bit,
                        });
                    }
                    slots.push(Slot::Aligned(bit / 8));
                    specs.push(FieldSpec::unsigned(32));
                    specs.push(FieldSpec::unsigned(32));
                }
            }
            bit += field.layout.bits();
        }

        Ok(Self {
            fields: fields.to_vec(),
            specs,
            slots,
        })
    }

    /// Bytes per entry.
    pub fn entry_length(&self) -> usize {
        super::length(&self.specs)
    }

    /// Encodes one entry. `values` must line up with the fields the schema was built from.
    ///
    /// Panics on a count or kind mismatch.
    pub fn encode(&self, values: &[Value]) -> Vec<u8> {
        assert_eq!(
            values.len(),
            self.fields.len(),
            "schema has {} fields, got {} values",
            self.fields.len(),
            values.len()
        );

        let mut specs = self.specs.clone();
        for ((field, slot), value) in self.fields.iter().zip(&self.slots).zip(values) {
            match (slot, value) {
                (Slot::Packed(i), Value::Packed(v)) => specs[*i].value = *v,
                (Slot::Aligned(_), Value::Aligned64(_)) => {}
                _ => panic!("value {value:?} does not fit the layout of field `{}`", field.name),
            }
        }

        let mut buf = pack(&specs);
        for (slot, value) in self.slots.iter().zip(values) {
            if let (Slot::Aligned(offset), Value::Aligned64(v)) = (slot, value) {
                buf[*offset..*offset + 8].copy_from_slice(&v.to_be_bytes());
            }
        }
        buf
    }

    /// Decodes one entry from the front of `buf`.
    ///
    /// Panics if `buf` is shorter than [`Self::entry_length`].
    pub fn decode(&self, buf: &[u8]) -> Vec<Value> {
        let unpacked = unpack(buf, &self.specs);

        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Packed(i) => Value::Packed(unpacked[*i].value),
                Slot::Aligned(offset) => {
                    let mut wide = [0u8; 8];
                    wide.copy_from_slice(&buf[*offset..*offset + 8]);
                    Value::Aligned64(u64::from_be_bytes(wide))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: [SchemaField; 4] = [
        SchemaField::packed("flags", 8, true),
        SchemaField::aligned64("stamp"),
        SchemaField::packed("delta", 13, false),
        SchemaField::packed("count", 3, true),
    ];

    #[test]
    fn test_layout() {
        let schema = Schema::new(&FIELDS).unwrap();
        assert_eq!(schema.entry_length(), 11);
    }

    #[test]
    fn test_round_trip() {
        let schema = Schema::new(&FIELDS).unwrap();
        let values = [
            Value::Packed(0xa5),
            Value::Aligned64(u64::MAX - 1),
            Value::Packed(-4096),
            Value::Packed(7),
        ];

        let buf = schema.encode(&values);
        assert_eq!(buf.len(), 11);
        assert_eq!(buf[0], 0xa5);
        assert_eq!(&buf[1..9], &(u64::MAX - 1).to_be_bytes());
        assert_eq!(schema.decode(&buf), values);
    }

    #[test]
    fn test_rejects_unaligned() {
        let err = Schema::new(&[SchemaField::packed("a", 3, true), SchemaField::aligned64("b")])
            .unwrap_err();
        assert_eq!(err, SchemaError::Unaligned { name: "b", bit: 3 });
    }

    #[test]
    fn test_rejects_bad_resolution() {
        let err = Schema::new(&[SchemaField::packed("wide", 48, true)]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::Resolution {
                name: "wide",
                resolution: 48
            }
        );
        assert!(Schema::new(&[SchemaField::packed("empty", 0, true)]).is_err());
    }

    #[test]
    #[should_panic(expected = "does not fit the layout")]
    fn test_encode_kind_mismatch() {
        let schema = Schema::new(&FIELDS).unwrap();
        schema.encode(&[
            Value::Aligned64(1),
            Value::Aligned64(1),
            Value::Packed(0),
            Value::Packed(0),
        ]);
    }
}

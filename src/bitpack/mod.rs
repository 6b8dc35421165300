//! Bit-level packing of narrow integer fields.
//!
//! Fields are written back to back starting at bit 0 of the buffer, least
//! significant bit first within each byte, with no padding between them.
//! Bit arithmetic is done on `u32`, so a single field is at most
//! [`MAX_PACKED_BITS`] wide. Wider values go through [`schema::Layout::Aligned64`].

use std::ops::RangeInclusive;

pub mod schema;

pub use schema::{Layout, Schema, SchemaError, SchemaField, Value};

const BYTE_BITS: usize = 8;

/// Widest field the bit packer accepts.
pub const MAX_PACKED_BITS: u8 = 32;

/// One field of a packed buffer.
///
/// `value` is what gets packed, or what was unpacked. Packing only ever keeps
/// the low `resolution` bits of it, so `unsigned` matters only when unpacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub resolution: u8,
    pub unsigned: bool,
    pub value: i64,
}

impl FieldSpec {
    pub const fn unsigned(resolution: u8) -> Self {
        Self {
            resolution,
            unsigned: true,
            value: 0,
        }
    }

    pub const fn signed(resolution: u8) -> Self {
        Self {
            resolution,
            unsigned: false,
            value: 0,
        }
    }

    pub const fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    /// Values this field holds without truncation.
    ///
    /// Panics if the resolution is outside `1..=32`.
    pub fn range(&self) -> RangeInclusive<i64> {
        check_resolution(self.resolution);
        let bits = self.resolution as u32;
        if self.unsigned {
            0..=(1i64 << bits) - 1
        } else {
            -(1i64 << (bits - 1))..=(1i64 << (bits - 1)) - 1
        }
    }
}

/// Packed byte length of `fields`: `ceil(sum(resolution) / 8)`.
pub fn length(fields: &[FieldSpec]) -> usize {
    let bits: usize = fields.iter().map(|f| f.resolution as usize).sum();
    bits.div_ceil(BYTE_BITS)
}

/// Packs `fields` in order into a zeroed buffer of [`length`] bytes.
///
/// Panics if a field's resolution is outside `1..=32`.
pub fn pack(fields: &[FieldSpec]) -> Vec<u8> {
    let mut buf = vec![0; length(fields)];
    let mut bit = 0;
    for field in fields {
        write_field(&mut buf, bit, field.value, field.resolution);
        bit += field.resolution as usize;
    }
    buf
}

/// Reads `fields` back out of `buf`, returning them with `value` filled in.
///
/// Panics if `buf` is shorter than [`length`] or a resolution is outside `1..=32`.
pub fn unpack(buf: &[u8], fields: &[FieldSpec]) -> Vec<FieldSpec> {
    let needed = length(fields);
    assert!(
        buf.len() >= needed,
        "unpack needs {needed} bytes, buffer has {}",
        buf.len()
    );

    let mut bit = 0;
    fields
        .iter()
        .map(|field| {
            let value = read_field(buf, bit, field.resolution, field.unsigned);
            bit += field.resolution as usize;
            FieldSpec { value, ..*field }
        })
        .collect()
}

fn check_resolution(resolution: u8) {
    assert!(
        (1..=MAX_PACKED_BITS).contains(&resolution),
        "resolution {resolution} is outside 1..={MAX_PACKED_BITS}, wide fields need an aligned layout"
    );
}

/// Mask of the low `bits` bits, `bits <= 8`.
#[inline]
fn low_mask(bits: usize) -> u32 {
    (1u32 << bits) - 1
}

/// ORs the low `resolution` bits of `value` into `buf` starting at absolute bit `start`.
fn write_field(buf: &mut [u8], start: usize, value: i64, resolution: u8) {
    check_resolution(resolution);

    // two's complement low bits, so negatives need no separate handling
    let mut value = value as u32;
    let mut bit = start;
    let mut bits_left = resolution as usize;

    while bits_left > 0 {
        let index = bit / BYTE_BITS;
        let offset = bit % BYTE_BITS;
        // never cross a byte boundary in one step
        let write_bits = bits_left.min(BYTE_BITS - offset);

        buf[index] |= ((value & low_mask(write_bits)) << offset) as u8;

        bit += write_bits;
        bits_left -= write_bits;
        value >>= write_bits;
    }
}

/// Reads `resolution` bits starting at absolute bit `start`, sign extending if signed.
fn read_field(buf: &[u8], start: usize, resolution: u8, unsigned: bool) -> i64 {
    check_resolution(resolution);

    let resolution = resolution as usize;
    let mut value = 0u32;
    let mut bit = start;
    let mut bits_read = 0;

    while bits_read < resolution {
        let index = bit / BYTE_BITS;
        let offset = bit % BYTE_BITS;
        let read_bits = (resolution - bits_read).min(BYTE_BITS - offset);

        value |= ((buf[index] as u32 >> offset) & low_mask(read_bits)) << bits_read;

        bit += read_bits;
        bits_read += read_bits;
    }

    if unsigned {
        return value as i64;
    }

    let sign = (value >> (resolution - 1)) & 1;
    if sign == 1 && resolution < MAX_PACKED_BITS as usize {
        value |= u32::MAX << resolution;
    }
    value as i32 as i64
}

#[cfg(test)]
mod tests {
    use bitvec::{field::BitField, order::Lsb0, vec::BitVec};
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_length() {
        assert_eq!(length(&[]), 0);
        assert_eq!(length(&[FieldSpec::unsigned(1)]), 1);
        assert_eq!(length(&[FieldSpec::unsigned(8)]), 1);
        assert_eq!(length(&[FieldSpec::unsigned(8), FieldSpec::signed(1)]), 2);
        assert_eq!(
            length(&[FieldSpec::unsigned(16), FieldSpec::signed(27), FieldSpec::unsigned(14)]),
            8
        );
    }

    #[test]
    fn test_concrete_byte() {
        let fields = [
            FieldSpec::unsigned(3).with_value(5),
            FieldSpec::signed(4).with_value(-1),
        ];

        let packed = pack(&fields);
        assert_eq!(packed, vec![0b0111_1101]);

        let unpacked = unpack(&packed, &fields);
        assert_eq!(unpacked[0].value, 5);
        assert_eq!(unpacked[1].value, -1);
        assert_eq!(unpacked, fields);
    }

    #[test]
    fn test_sign_extension() {
        let fields = [FieldSpec::signed(10).with_value(-1)];
        let packed = pack(&fields);
        assert_eq!(unpack(&packed, &fields)[0].value, -1);

        // same bits read as unsigned
        let as_unsigned = [FieldSpec::unsigned(10)];
        assert_eq!(unpack(&packed, &as_unsigned)[0].value, 1023);
    }

    #[test]
    fn test_byte_boundaries() {
        for (a, b) in [(5u8, 11u8), (11, 5)] {
            let fields = [
                FieldSpec::signed(a).with_value(-7),
                FieldSpec::unsigned(b).with_value(13),
            ];
            let packed = pack(&fields);
            assert_eq!(packed.len(), 2);
            assert_eq!(unpack(&packed, &fields), fields);
        }
    }

    #[test]
    fn test_full_width() {
        let fields = [
            FieldSpec::unsigned(32).with_value(u32::MAX as i64),
            FieldSpec::signed(32).with_value(i32::MIN as i64),
            FieldSpec::signed(32).with_value(i32::MAX as i64),
            FieldSpec::unsigned(1).with_value(1),
        ];
        let packed = pack(&fields);
        assert_eq!(packed.len(), 13);
        assert_eq!(unpack(&packed, &fields), fields);
    }

    #[test]
    fn test_truncates_to_resolution() {
        let packed = pack(&[FieldSpec::unsigned(4).with_value(0x1f)]);
        assert_eq!(packed, vec![0x0f]);
    }

    #[test]
    fn test_unpack_ignores_trailing_bytes() {
        let fields = [FieldSpec::unsigned(6).with_value(42)];
        let mut packed = pack(&fields);
        packed.extend_from_slice(&[0xff, 0xff]);
        assert_eq!(unpack(&packed, &fields)[0].value, 42);
    }

    #[test]
    #[should_panic(expected = "outside 1..=32")]
    fn test_pack_rejects_wide_field() {
        pack(&[FieldSpec::unsigned(33)]);
    }

    #[test]
    #[should_panic(expected = "outside 1..=32")]
    fn test_pack_rejects_zero_width() {
        pack(&[FieldSpec::unsigned(0)]);
    }

    #[test]
    #[should_panic(expected = "outside 1..=32")]
    fn test_range_rejects_zero_width_signed() {
        let _ = FieldSpec::signed(0).range();
    }

    #[test]
    #[should_panic(expected = "outside 1..=32")]
    fn test_range_rejects_wide_field() {
        let _ = FieldSpec::unsigned(64).range();
    }

    #[test]
    #[should_panic(expected = "unpack needs 2 bytes")]
    fn test_unpack_rejects_short_buffer() {
        unpack(&[0], &[FieldSpec::unsigned(9)]);
    }

    fn field_strategy() -> impl Strategy<Value = FieldSpec> {
        (1u8..=MAX_PACKED_BITS, any::<bool>())
            .prop_flat_map(|(resolution, unsigned)| {
                let spec = FieldSpec {
                    resolution,
                    unsigned,
                    value: 0,
                };
                spec.range().prop_map(move |value| spec.with_value(value))
            })
    }

    proptest! {
        #[test]
        fn prop_round_trip(fields in prop::collection::vec(field_strategy(), 0..40)) {
            let packed = pack(&fields);
            prop_assert_eq!(packed.len(), length(&fields));
            prop_assert_eq!(unpack(&packed, &fields), fields);
        }

        #[test]
        fn prop_matches_lsb0_bitvec(fields in prop::collection::vec(field_strategy(), 1..20)) {
            let mut expected: BitVec<u8, Lsb0> = BitVec::new();
            for field in &fields {
                let start = expected.len();
                expected.resize(start + field.resolution as usize, false);
                expected[start..].store_le(field.value as u32);
            }
            expected.set_uninitialized(false);

            prop_assert_eq!(pack(&fields), expected.into_vec());
        }
    }
}

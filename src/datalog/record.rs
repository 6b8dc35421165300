use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bitpack::{FieldSpec, Schema, SchemaField, Value};

use super::stream::Entry;

/// Bytes per record on disk.
pub const RECORD_LENGTH: usize = 26;

/// Power and percentage are stored as `real * SCALE`.
const SCALE: f64 = 100.0;

const RECORD_VERSION: i64 = 0;

const POWER: FieldSpec = FieldSpec::signed(27);
const PERCENTAGE: FieldSpec = FieldSpec::unsigned(14);

/// version(16u) timestamp(64u) site(27) battery(27) load(27) solar(27) percentage(14u)
const RECORD_FIELDS: [SchemaField; 7] = [
    SchemaField::packed("version", 16, true),
    SchemaField::aligned64("timestamp"),
    SchemaField::packed("site", POWER.resolution, POWER.unsigned),
    SchemaField::packed("battery", POWER.resolution, POWER.unsigned),
    SchemaField::packed("load", POWER.resolution, POWER.unsigned),
    SchemaField::packed("solar", POWER.resolution, POWER.unsigned),
    SchemaField::packed("percentage", PERCENTAGE.resolution, PERCENTAGE.unsigned),
];

pub static RECORD_SCHEMA: LazyLock<Schema> =
    LazyLock::new(|| Schema::new(&RECORD_FIELDS).expect("record schema is valid"));

/// One reading in real units, as handed to the log.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub site: f64,
    pub battery: f64,
    pub load: f64,
    pub solar: f64,
    pub percentage: f64,
}

/// One decoded log record in real units. `timestamp` is unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: u64,
    pub site: f64,
    pub battery: f64,
    pub load: f64,
    pub solar: f64,
    pub percentage: f64,
}

impl Record {
    pub fn sample(&self) -> Sample {
        Sample {
            site: self.site,
            battery: self.battery,
            load: self.load,
            solar: self.solar,
            percentage: self.percentage,
        }
    }
}

/// Encodes `sample` taken at `timestamp` into one [`RECORD_LENGTH`] byte record.
pub fn encode_sample(sample: &Sample, timestamp: u64) -> Vec<u8> {
    let power = |name: &str, real: f64| Value::Packed(to_stored(name, real, POWER));

    RECORD_SCHEMA.encode(&[
        Value::Packed(RECORD_VERSION),
        Value::Aligned64(timestamp),
        power("site", sample.site),
        power("battery", sample.battery),
        power("load", sample.load),
        power("solar", sample.solar),
        Value::Packed(to_stored("percentage", sample.percentage, PERCENTAGE)),
    ])
}

/// Decodes one record from the front of `buf`.
pub fn decode_record(buf: &[u8]) -> Record {
    let values = RECORD_SCHEMA.decode(buf);
    let &[
        _version,
        Value::Aligned64(timestamp),
        Value::Packed(site),
        Value::Packed(battery),
        Value::Packed(load),
        Value::Packed(solar),
        Value::Packed(percentage),
    ] = values.as_slice()
    else {
        unreachable!("record schema decoded {values:?}");
    };

    Record {
        timestamp,
        site: site as f64 / SCALE,
        battery: battery as f64 / SCALE,
        load: load as f64 / SCALE,
        solar: solar as f64 / SCALE,
        percentage: percentage as f64 / SCALE,
    }
}

/// Scales a real value into the stored integer, clamped to what `spec` can hold.
fn to_stored(name: &str, real: f64, spec: FieldSpec) -> i64 {
    let scaled = (real * SCALE).round() as i64;
    let range = spec.range();
    if !range.contains(&scaled) {
        warn!("{name} value {real} does not fit {} bits, clamping", spec.resolution);
    }
    scaled.clamp(*range.start(), *range.end())
}

impl Entry for Record {
    fn entry_length() -> usize {
        RECORD_SCHEMA.entry_length()
    }

    fn decode(buf: &[u8]) -> Self {
        decode_record(buf)
    }
}

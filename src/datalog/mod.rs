//! The binary telemetry log: record layout, on-disk files and streaming replay.

pub mod file;
pub mod record;
pub mod stream;

pub use file::LogStore;
pub use record::{RECORD_LENGTH, Record, Sample};
pub use stream::{RecordStream, json_array, records};

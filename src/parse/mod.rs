//! Ruleset-driven file parsers for transfer reports and instrument data.

mod rawdata;
mod transfer;

pub use rawdata::{parse_rawdata, Dataset, RawData};
pub use transfer::{parse_transfer, TransferParse};

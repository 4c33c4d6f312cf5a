pub mod correlator;
pub mod discovery;
pub mod evaluator;
pub mod fetcher;
pub mod ports;
pub mod process_table;
pub mod snapshot;
pub mod status_parser;
pub mod terminator;
pub mod units;

pub use fetcher::StatusFetcher;
pub use process_table::SysinfoProcessTable;
pub use snapshot::SnapshotWriter;
pub use terminator::NixSignaller;

//! Result output
//!
//! - `sink`: Where records go (NDJSON file, console, memory)
//! - `results`: Measurements and script logs written by scripts

pub mod results;
pub mod sink;

pub use results::{LogLevel, ResultWriter};
pub use sink::{sink_for, ConsoleSink, FileSink, MemorySink, Record, ResultSink};

//! Audio sink nodes (consumers with no audio outputs)

mod output_sink;

pub use output_sink::OutputSink;

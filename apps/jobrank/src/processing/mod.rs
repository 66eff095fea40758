// Scoring passes over the job store: candidate queries, evaluation under a
// concurrency gate, ranking, and write-back.

pub mod processor;
pub mod store;

pub use processor::Processor;

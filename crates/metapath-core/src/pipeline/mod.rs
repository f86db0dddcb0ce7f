pub mod chunker;
pub mod combinations;
pub mod dispatcher;
pub mod estimate;
pub mod runner;

pub use chunker::{checked_chunk_size, chunk_triples, Chunks};
pub use combinations::{generate_combinations, Combinations};
pub use dispatcher::{BatchAbort, FetchDispatcher};
pub use estimate::RunEstimate;
pub use runner::{CancelFlag, Pipeline, RunStatus, RunSummary};

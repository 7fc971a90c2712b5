pub mod config;
pub mod engine;
pub mod errors;
pub mod index;
pub mod job;
pub mod metrics;
pub mod results;
pub mod search;
pub mod stop;
pub mod storage;

pub use config::{RunConfig, RunOverrides};
pub use engine::{
    CatalogEngine, EngineFactory, EngineSettings, Hit, SearchEngine, SearchType,
};
pub use errors::{SearchError, SearchResult};
pub use index::{ComponentIndex, MatchIndex, MatchRecord, VariantIndex};
pub use job::{load_job_list, partition, Chunk, Job};
pub use metrics::{RunMetrics, RunStats};
pub use results::{JobOutcome, RunReport, WorkerResult};
pub use search::{
    ChunkRunner, ChunkStrategy, ExecutionMode, InProcessRunner, IsolatedRunner, PoolOptions,
    Worker, WorkerPool,
};
pub use stop::{RunContext, SentinelStop, StopSignal};

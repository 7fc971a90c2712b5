//! Distribution of search jobs over parallel workers.
//!
//! A run partitions the job list into chunks and hands each chunk to one
//! [`ChunkRunner`]. Two strategies exist behind the same contract:
//!
//! - [`InProcessRunner`] builds a fresh engine per chunk and runs the jobs on
//!   the worker thread. Engines are not safe to enter from several threads of
//!   one process, so this runner allows a single chunk at a time.
//! - [`IsolatedRunner`] writes the chunk to a request file and runs it in a
//!   separate OS process (the `exec` command), parsing the lists it emits.
//!
//! The [`WorkerPool`] only sees `ChunkRunner` and is agnostic to which one
//! executes a chunk.
mod exec;
mod isolated;
mod materialize;
mod pool;
mod worker;

pub use exec::{exec_job_list, ExecOutputs};
pub use isolated::{
    IsolatedCommand, IsolatedRunner, EXEC_LOG_FILE_NAME, HIT_LIST_FILE_NAME,
    QUERY_LIST_FILE_NAME,
};
pub use materialize::{HitWriter, QueryRef};
pub use pool::{PoolOptions, WorkerPool};
pub use worker::{InProcessRunner, Worker};

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::engine::EngineFactory;
use crate::errors::SearchResult;
use crate::job::Chunk;
use crate::results::WorkerResult;
use crate::stop::RunContext;

/// Executes one chunk to completion and reports per-job outcomes.
///
/// Implementations never fail as a whole: anything that goes wrong while a
/// chunk runs is reported through the `fail_list` of the returned result.
pub trait ChunkRunner: Sync {
    fn run_chunk(&self, chunk: &Chunk, ctx: &RunContext) -> WorkerResult;

    /// Most chunks this runner may execute at the same time, `None` for no limit
    fn max_concurrent_chunks(&self) -> Option<NonZeroUsize> {
        None
    }
}

/// Where the jobs of a chunk are executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// On a pool thread, one engine per chunk and one chunk at a time
    InProcess,
    /// In a freshly spawned OS process per chunk
    #[default]
    Isolated,
}

/// Chunk runner selected from configuration
pub enum ChunkStrategy {
    InProcess(InProcessRunner),
    Isolated(IsolatedRunner),
}

impl ChunkStrategy {
    /// Builds the runner named by `config.mode`.
    ///
    /// `factory` is only used in-process; isolated runs build their engine in
    /// the child process.
    pub fn from_config(config: &RunConfig, factory: Arc<EngineFactory>) -> SearchResult<Self> {
        config.engine.validate()?;
        match config.mode {
            ExecutionMode::InProcess => Ok(ChunkStrategy::InProcess(InProcessRunner::new(
                factory,
                config.engine.clone(),
            )?)),
            ExecutionMode::Isolated => {
                // The child reloads the same explicit config file
                let command = match (&config.exec_program, &config.source) {
                    (Some(program), _) => IsolatedCommand::new(program),
                    (None, Some(source)) => IsolatedCommand::current_exe()?
                        .arg("--config")
                        .arg(source),
                    (None, None) => IsolatedCommand::current_exe()?,
                };
                let runner = IsolatedRunner::new(
                    command,
                    config.engine.search_type,
                    config.engine_home.clone(),
                )
                .with_timeout(config.chunk_timeout());
                Ok(ChunkStrategy::Isolated(runner))
            }
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            ChunkStrategy::InProcess(_) => ExecutionMode::InProcess,
            ChunkStrategy::Isolated(_) => ExecutionMode::Isolated,
        }
    }
}

impl ChunkRunner for ChunkStrategy {
    fn run_chunk(&self, chunk: &Chunk, ctx: &RunContext) -> WorkerResult {
        match self {
            ChunkStrategy::InProcess(runner) => runner.run_chunk(chunk, ctx),
            ChunkStrategy::Isolated(runner) => runner.run_chunk(chunk, ctx),
        }
    }

    fn max_concurrent_chunks(&self) -> Option<NonZeroUsize> {
        match self {
            ChunkStrategy::InProcess(runner) => runner.max_concurrent_chunks(),
            ChunkStrategy::Isolated(runner) => runner.max_concurrent_chunks(),
        }
    }
}

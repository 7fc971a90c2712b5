use std::time::Duration;

use crate::job::Job;
use crate::metrics::RunStats;

/// What happened to a single job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The engine returned hits; `records` match records were indexed
    Matched { hits: usize, records: usize },
    /// The search ran cleanly and found nothing
    NoMatch,
    /// The search could not be completed
    Failed(String),
}

/// Outcome of one chunk.
///
/// `success_list` and `result_list` always have equal length. Jobs never
/// reached because of a cooperative stop appear in no list.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResult<T = String> {
    pub success_list: Vec<Job>,
    pub result_list: Vec<T>,
    pub no_match_list: Vec<Job>,
    pub fail_list: Vec<Job>,
    /// Set when the chunk ended early on a stop request
    pub stopped: bool,
}

impl<T> WorkerResult<T> {
    pub fn new() -> Self {
        Self {
            success_list: Vec::new(),
            result_list: Vec::new(),
            no_match_list: Vec::new(),
            fail_list: Vec::new(),
            stopped: false,
        }
    }

    /// A result in which every job of `jobs` failed
    pub fn failed(jobs: &[Job]) -> Self {
        let mut result = Self::new();
        result.fail_list.extend_from_slice(jobs);
        result
    }

    pub fn push_success(&mut self, job: Job, result: T) {
        self.success_list.push(job);
        self.result_list.push(result);
    }

    pub fn push_no_match(&mut self, job: Job) {
        self.no_match_list.push(job);
    }

    pub fn push_failure(&mut self, job: Job) {
        self.fail_list.push(job);
    }

    /// Number of jobs that reached a final outcome
    pub fn processed(&self) -> usize {
        self.success_list.len() + self.no_match_list.len() + self.fail_list.len()
    }

    /// Appends `other`, keeping success and result lists aligned.
    pub fn merge(&mut self, other: WorkerResult<T>) {
        self.success_list.extend(other.success_list);
        self.result_list.extend(other.result_list);
        self.no_match_list.extend(other.no_match_list);
        self.fail_list.extend(other.fail_list);
        self.stopped |= other.stopped;
    }
}

impl<T> Default for WorkerResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate of every chunk of a pool run
#[derive(Debug, Clone)]
pub struct RunReport<T = String> {
    pub total_jobs: usize,
    pub total_chunks: usize,
    pub combined: WorkerResult<T>,
    pub stats: RunStats,
    pub elapsed: Duration,
}

impl<T> RunReport<T> {
    pub fn success_count(&self) -> usize {
        self.combined.success_list.len()
    }

    pub fn no_match_count(&self) -> usize {
        self.combined.no_match_list.len()
    }

    pub fn failure_count(&self) -> usize {
        self.combined.fail_list.len()
    }

    /// Jobs dropped without an outcome because a stop was requested
    pub fn unprocessed_count(&self) -> usize {
        self.total_jobs.saturating_sub(self.combined.processed())
    }

    pub fn stopped(&self) -> bool {
        self.combined.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Job {
        Job::from_path(format!("/q/{}.mol2", id))
    }

    #[test]
    fn test_push_keeps_lists_aligned() {
        let mut result: WorkerResult = WorkerResult::new();
        result.push_success(job("A"), "/q/A.mol2".to_string());
        result.push_no_match(job("B"));
        result.push_failure(job("C"));

        assert_eq!(result.success_list.len(), result.result_list.len());
        assert_eq!(result.processed(), 3);
        assert!(!result.stopped);
    }

    #[test]
    fn test_failed_chunk() {
        let jobs = vec![job("A"), job("B")];
        let result: WorkerResult = WorkerResult::failed(&jobs);
        assert!(result.success_list.is_empty());
        assert!(result.result_list.is_empty());
        assert_eq!(result.fail_list, jobs);
    }

    #[test]
    fn test_merge() {
        let mut left: WorkerResult = WorkerResult::new();
        left.push_success(job("A"), "A".to_string());

        let mut right: WorkerResult = WorkerResult::new();
        right.push_success(job("B"), "B".to_string());
        right.push_failure(job("C"));
        right.stopped = true;

        left.merge(right);
        assert_eq!(left.result_list, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(left.fail_list.len(), 1);
        assert!(left.stopped);
    }
}

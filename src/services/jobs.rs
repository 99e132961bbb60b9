//! Generic job operations

use std::sync::Arc;

use crate::domain::Job;
use crate::error::CoreResult;
use crate::queue::JobEngine;
use crate::store::JobFilter;

/// Pagination for job listings.
#[derive(Debug, Clone)]
pub struct Page {
    pub limit: usize,
    pub skip: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 20, skip: 0 }
    }
}

#[derive(Debug)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: usize,
}

#[derive(Clone)]
pub struct JobService {
    engine: Arc<JobEngine>,
}

impl JobService {
    pub fn new(engine: Arc<JobEngine>) -> Self {
        Self { engine }
    }

    pub fn get(&self, user_id: &str, job_id: &str) -> CoreResult<Job> {
        self.engine.get_owned(job_id, user_id)
    }

    pub fn cancel(&self, user_id: &str, job_id: &str) -> CoreResult<Job> {
        self.engine.cancel(job_id, user_id)
    }

    pub fn retry(&self, user_id: &str, job_id: &str) -> CoreResult<Job> {
        self.engine.retry(job_id, user_id)
    }

    pub fn list(&self, user_id: &str, filter: JobFilter, page: Page) -> CoreResult<JobPage> {
        let (jobs, total) = self.engine.list(user_id, &filter, page.limit, page.skip)?;
        Ok(JobPage { jobs, total })
    }
}

//! Typed collection accessors
//!
//! One impl block per collection family. Filtered listings are partition
//! scans; the collections this system retains stay small enough that the
//! retention sweep (see `pruning`) is what bounds scan cost.

use fjall::Batch;

use super::keys;
use super::{CoreStore, Result, StoreError};
use crate::domain::{
    AtsAnalysis, Cv, CvParsingJob, CvVersion, Generation, Job, JobStatus, JobType, User, Webhook,
    WebhookDelivery, WebhookStatus,
};

// Users

impl CoreStore {
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        Self::get_doc(&self.users, id.as_bytes())
    }

    pub fn put_user(&self, user: &User) -> Result<()> {
        Self::put_doc(&self.users, user.id.as_bytes(), user)
    }

    /// Fetch the usage record for an opaque upstream user id, creating the
    /// default-limits row on first contact.
    pub fn ensure_user(&self, id: &str) -> Result<User> {
        if let Some(user) = self.get_user(id)? {
            return Ok(user);
        }
        let user = User::new(id);
        self.put_user(&user)?;
        Ok(user)
    }

    pub fn update_user_with<F>(&self, id: &str, apply: F) -> Result<User>
    where
        F: FnOnce(&mut User),
    {
        self.update_doc(&self.users, "users", id, |user: &mut User| {
            apply(user);
            user.updated_at = chrono::Utc::now();
            user.revision += 1;
        })
    }
}

// CVs

impl CoreStore {
    pub fn get_cv(&self, id: &str) -> Result<Option<Cv>> {
        Self::get_doc(&self.cvs, id.as_bytes())
    }

    pub fn put_cv(&self, cv: &Cv) -> Result<()> {
        Self::put_doc(&self.cvs, cv.id.as_bytes(), cv)
    }

    pub fn update_cv_with<F>(&self, id: &str, apply: F) -> Result<Cv>
    where
        F: FnOnce(&mut Cv),
    {
        self.update_doc(&self.cvs, "cvs", id, |cv: &mut Cv| {
            apply(cv);
            cv.updated_at = chrono::Utc::now();
            cv.revision += 1;
        })
    }

    pub fn list_cvs_by_user(&self, user_id: &str) -> Result<Vec<Cv>> {
        let mut cvs: Vec<Cv> = Self::scan_docs(&self.cvs)?
            .into_iter()
            .filter(|cv: &Cv| cv.user_id == user_id)
            .collect();
        cvs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(cvs)
    }

    pub fn stage_cv(&self, batch: &mut Batch, cv: &Cv) -> Result<()> {
        Self::stage_doc(batch, &self.cvs, cv.id.as_bytes(), cv)
    }
}

// Versions

impl CoreStore {
    /// Insert a new version row. The composite `(cv_id, version_number)` key
    /// is the uniqueness constraint; hitting an existing key is a conflict.
    pub fn insert_version(&self, version: &CvVersion) -> Result<()> {
        let key = keys::encode_version_key(&version.cv_id, version.version_number);
        if self.versions.get(&key)?.is_some() {
            return Err(StoreError::DuplicateKey {
                collection: "versions",
                key: String::from_utf8_lossy(&key).to_string(),
            });
        }
        Self::put_doc(&self.versions, &key, version)?;
        self.indexes
            .insert(keys::encode_version_id_index(&version.id), key)?;
        Ok(())
    }

    pub fn stage_version(&self, batch: &mut Batch, version: &CvVersion) -> Result<()> {
        let key = keys::encode_version_key(&version.cv_id, version.version_number);
        Self::stage_doc(batch, &self.versions, &key, version)?;
        batch.insert(
            &self.indexes,
            keys::encode_version_id_index(&version.id),
            key,
        );
        Ok(())
    }

    pub fn get_version_by_id(&self, version_id: &str) -> Result<Option<CvVersion>> {
        let index_key = keys::encode_version_id_index(version_id);
        let Some(version_key) = self.indexes.get(index_key)? else {
            return Ok(None);
        };
        Self::get_doc(&self.versions, &version_key)
    }

    /// All versions of a CV, ordered by version number ascending.
    pub fn list_versions(&self, cv_id: &str) -> Result<Vec<CvVersion>> {
        let prefix = keys::encode_version_prefix(cv_id);
        let mut versions = Vec::new();
        for item in self.versions.prefix(prefix) {
            let (_, value) = item?;
            versions.push(serde_json::from_slice(&value)?);
        }
        Ok(versions)
    }

    pub fn max_version_number(&self, cv_id: &str) -> Result<u32> {
        let prefix = keys::encode_version_prefix(cv_id);
        let mut max = 0;
        for item in self.versions.prefix(prefix) {
            let (key, _) = item?;
            if let Some((_, number)) = keys::decode_version_key(&key) {
                max = max.max(number);
            }
        }
        Ok(max)
    }

    /// Remove an inactive version row and its id index entry.
    pub fn delete_version(&self, version: &CvVersion) -> Result<()> {
        let key = keys::encode_version_key(&version.cv_id, version.version_number);
        self.versions.remove(key)?;
        self.indexes
            .remove(keys::encode_version_id_index(&version.id))?;
        Ok(())
    }
}

// Jobs

/// Filters for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
}

impl CoreStore {
    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Self::get_doc(&self.jobs, id.as_bytes())
    }

    pub fn put_job(&self, job: &Job) -> Result<()> {
        Self::put_doc(&self.jobs, job.id.as_bytes(), job)
    }

    pub fn update_job_with<F>(&self, id: &str, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        self.update_doc(&self.jobs, "jobs", id, |job: &mut Job| {
            apply(job);
            job.revision += 1;
        })
    }

    pub fn stage_job(&self, batch: &mut Batch, job: &Job) -> Result<()> {
        Self::stage_doc(batch, &self.jobs, job.id.as_bytes(), job)
    }

    /// Jobs for a user, newest first, with total count before pagination.
    pub fn list_jobs(
        &self,
        user_id: &str,
        filter: &JobFilter,
        limit: usize,
        skip: usize,
    ) -> Result<(Vec<Job>, usize)> {
        let mut jobs: Vec<Job> = Self::scan_docs(&self.jobs)?
            .into_iter()
            .filter(|job: &Job| {
                job.user_id == user_id
                    && filter.status.map_or(true, |s| job.status == s)
                    && filter.job_type.map_or(true, |t| job.job_type == t)
            })
            .collect();
        jobs.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));

        let total = jobs.len();
        let page = jobs.into_iter().skip(skip).take(limit).collect();
        Ok((page, total))
    }

    pub fn scan_jobs(&self) -> Result<Vec<Job>> {
        Self::scan_docs(&self.jobs)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        self.jobs.remove(id.as_bytes())?;
        Ok(())
    }
}

// Companions (keyed by job id, 1:1)

impl CoreStore {
    pub fn get_generation(&self, job_id: &str) -> Result<Option<Generation>> {
        Self::get_doc(&self.generations, job_id.as_bytes())
    }

    pub fn put_generation(&self, generation: &Generation) -> Result<()> {
        Self::put_doc(&self.generations, generation.job_id.as_bytes(), generation)
    }

    pub fn update_generation_with<F>(&self, job_id: &str, apply: F) -> Result<Generation>
    where
        F: FnOnce(&mut Generation),
    {
        self.update_doc(&self.generations, "generations", job_id, apply)
    }

    pub fn stage_generation(&self, batch: &mut Batch, generation: &Generation) -> Result<()> {
        Self::stage_doc(batch, &self.generations, generation.job_id.as_bytes(), generation)
    }

    pub fn get_analysis(&self, job_id: &str) -> Result<Option<AtsAnalysis>> {
        Self::get_doc(&self.analyses, job_id.as_bytes())
    }

    pub fn put_analysis(&self, analysis: &AtsAnalysis) -> Result<()> {
        Self::put_doc(&self.analyses, analysis.job_id.as_bytes(), analysis)
    }

    pub fn update_analysis_with<F>(&self, job_id: &str, apply: F) -> Result<AtsAnalysis>
    where
        F: FnOnce(&mut AtsAnalysis),
    {
        self.update_doc(&self.analyses, "analyses", job_id, apply)
    }

    pub fn stage_analysis(&self, batch: &mut Batch, analysis: &AtsAnalysis) -> Result<()> {
        Self::stage_doc(batch, &self.analyses, analysis.job_id.as_bytes(), analysis)
    }

    pub fn get_parsing_job(&self, job_id: &str) -> Result<Option<CvParsingJob>> {
        Self::get_doc(&self.parsing_jobs, job_id.as_bytes())
    }

    pub fn put_parsing_job(&self, parsing_job: &CvParsingJob) -> Result<()> {
        Self::put_doc(&self.parsing_jobs, parsing_job.job_id.as_bytes(), parsing_job)
    }

    pub fn update_parsing_job_with<F>(&self, job_id: &str, apply: F) -> Result<CvParsingJob>
    where
        F: FnOnce(&mut CvParsingJob),
    {
        self.update_doc(&self.parsing_jobs, "parsing_jobs", job_id, apply)
    }

    pub fn stage_parsing_job(&self, batch: &mut Batch, parsing_job: &CvParsingJob) -> Result<()> {
        Self::stage_doc(batch, &self.parsing_jobs, parsing_job.job_id.as_bytes(), parsing_job)
    }
}

// Webhooks & deliveries

impl CoreStore {
    pub fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        Self::get_doc(&self.webhooks, id.as_bytes())
    }

    pub fn put_webhook(&self, webhook: &Webhook) -> Result<()> {
        Self::put_doc(&self.webhooks, webhook.id.as_bytes(), webhook)
    }

    pub fn update_webhook_with<F>(&self, id: &str, apply: F) -> Result<Webhook>
    where
        F: FnOnce(&mut Webhook),
    {
        self.update_doc(&self.webhooks, "webhooks", id, |hook: &mut Webhook| {
            apply(hook);
            hook.updated_at = chrono::Utc::now();
            hook.revision += 1;
        })
    }

    pub fn delete_webhook(&self, id: &str) -> Result<()> {
        self.webhooks.remove(id.as_bytes())?;
        Ok(())
    }

    pub fn list_webhooks_by_user(&self, user_id: &str) -> Result<Vec<Webhook>> {
        let mut hooks: Vec<Webhook> = Self::scan_docs(&self.webhooks)?
            .into_iter()
            .filter(|hook: &Webhook| hook.user_id == user_id)
            .collect();
        hooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(hooks)
    }

    /// Active webhooks subscribed to the given event type.
    pub fn list_active_webhooks(&self, event: &str) -> Result<Vec<Webhook>> {
        Ok(Self::scan_docs(&self.webhooks)?
            .into_iter()
            .filter(|hook: &Webhook| {
                hook.status == WebhookStatus::Active && hook.events.iter().any(|e| e == event)
            })
            .collect())
    }

    pub fn get_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>> {
        Self::get_doc(&self.deliveries, id.as_bytes())
    }

    pub fn put_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        Self::put_doc(&self.deliveries, delivery.id.as_bytes(), delivery)
    }

    pub fn update_delivery_with<F>(&self, id: &str, apply: F) -> Result<WebhookDelivery>
    where
        F: FnOnce(&mut WebhookDelivery),
    {
        self.update_doc(&self.deliveries, "deliveries", id, apply)
    }

    /// Deliveries for a webhook, newest first.
    pub fn list_deliveries(&self, webhook_id: &str, limit: usize) -> Result<Vec<WebhookDelivery>> {
        let mut deliveries: Vec<WebhookDelivery> = Self::scan_docs(&self.deliveries)?
            .into_iter()
            .filter(|d: &WebhookDelivery| d.webhook_id == webhook_id)
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deliveries.truncate(limit);
        Ok(deliveries)
    }

    pub fn scan_deliveries(&self) -> Result<Vec<WebhookDelivery>> {
        Self::scan_docs(&self.deliveries)
    }

    pub fn remove_delivery(&self, id: &str) -> Result<()> {
        self.deliveries.remove(id.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangeType, CvContent};
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store() -> (CoreStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = CoreStore::open(temp_dir.path().join("docs")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_ensure_user_is_idempotent() {
        let (store, _temp) = test_store();
        let first = store.ensure_user("user-1").unwrap();
        let second = store.ensure_user("user-1").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_update_bumps_revision() {
        let (store, _temp) = test_store();
        store.ensure_user("user-1").unwrap();

        let updated = store
            .update_user_with("user-1", |user| user.usage.generations += 1)
            .unwrap();
        assert_eq!(updated.revision, 1);
        assert_eq!(updated.usage.generations, 1);
    }

    #[test]
    fn test_version_uniqueness() {
        let (store, _temp) = test_store();
        let version = CvVersion::new("cv-1", "user-1", 1, CvContent::default(), ChangeType::Manual);

        store.insert_version(&version).unwrap();
        let duplicate =
            CvVersion::new("cv-1", "user-1", 1, CvContent::default(), ChangeType::Manual);
        let result = store.insert_version(&duplicate);
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
    }

    #[test]
    fn test_version_lookup_by_id_and_ordering() {
        let (store, _temp) = test_store();
        for number in [1, 2, 10] {
            let version = CvVersion::new(
                "cv-1",
                "user-1",
                number,
                CvContent::default(),
                ChangeType::Manual,
            );
            store.insert_version(&version).unwrap();
        }

        let versions = store.list_versions("cv-1").unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
        assert_eq!(store.max_version_number("cv-1").unwrap(), 10);

        let by_id = store.get_version_by_id(&versions[1].id).unwrap().unwrap();
        assert_eq!(by_id.version_number, 2);
    }

    #[test]
    fn test_job_listing_with_filters() {
        let (store, _temp) = test_store();

        for i in 0..3 {
            let mut job = Job::new(JobType::Parsing, "user-1", json!({"i": i}));
            if i == 2 {
                job.status = JobStatus::Completed;
            }
            store.put_job(&job).unwrap();
        }
        store
            .put_job(&Job::new(JobType::Ats, "user-2", json!({})))
            .unwrap();

        let (all, total) = store
            .list_jobs("user-1", &JobFilter::default(), 10, 0)
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(all.len(), 3);

        let filter = JobFilter {
            status: Some(JobStatus::Completed),
            job_type: None,
        };
        let (completed, total) = store.list_jobs("user-1", &filter, 10, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(completed[0].status, JobStatus::Completed);

        let (page, total) = store
            .list_jobs("user-1", &JobFilter::default(), 2, 2)
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_companion_round_trip() {
        let (store, _temp) = test_store();
        let generation = Generation::new("job-1", "user-1", None, json!({"fmt": "pdf"}));
        store.put_generation(&generation).unwrap();

        let loaded = store.get_generation("job-1").unwrap().unwrap();
        assert_eq!(loaded.id, generation.id);
        assert!(store.get_generation("job-2").unwrap().is_none());
    }

    #[test]
    fn test_active_webhook_listing() {
        let (store, _temp) = test_store();

        let active = Webhook::new(
            "user-1",
            "https://a.example.com",
            vec!["parse.completed".to_string()],
        );
        let mut suspended = Webhook::new(
            "user-1",
            "https://b.example.com",
            vec!["parse.completed".to_string()],
        );
        suspended.status = WebhookStatus::Suspended;
        let other_event = Webhook::new(
            "user-1",
            "https://c.example.com",
            vec!["ats.completed".to_string()],
        );

        store.put_webhook(&active).unwrap();
        store.put_webhook(&suspended).unwrap();
        store.put_webhook(&other_event).unwrap();

        let matched = store.list_active_webhooks("parse.completed").unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, active.id);
    }
}

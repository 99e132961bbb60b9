//! Retention sweep
//!
//! Enforces the §3 retention floors: completed jobs kept at least 1 day,
//! failed jobs at least 7 days, webhook deliveries at least 30 days. Expired
//! jobs take their companion rows with them. The sweep runs from the `prune`
//! CLI subcommand and on a timer inside the runtime.

use chrono::{Duration, Utc};
use tracing::{debug, info};

use super::{CoreStore, Result, keys};
use crate::config::RetentionConfig;
use crate::domain::{DeliveryStatus, JobStatus};

#[derive(Debug, Default, Clone)]
pub struct PruneStats {
    pub jobs_pruned: usize,
    pub companions_pruned: usize,
    pub deliveries_pruned: usize,
}

impl CoreStore {
    /// Remove expired terminal jobs, their companions, and old deliveries.
    pub fn prune_expired(&self, retention: &RetentionConfig) -> Result<PruneStats> {
        info!("Starting retention sweep");
        let mut stats = PruneStats::default();
        let now = Utc::now();

        let completed_cutoff = now - Duration::days(retention.completed_jobs_days as i64);
        let failed_cutoff = now - Duration::days(retention.failed_jobs_days as i64);

        for job in self.scan_jobs()? {
            let expired = match job.status {
                JobStatus::Completed | JobStatus::Cancelled => job
                    .completed_at
                    .is_some_and(|at| at < completed_cutoff),
                JobStatus::Failed | JobStatus::Timeout => job
                    .completed_at
                    .is_some_and(|at| at < failed_cutoff),
                JobStatus::Pending | JobStatus::Processing => false,
            };
            if !expired {
                continue;
            }

            self.remove_job(&job.id)?;
            stats.jobs_pruned += 1;

            // Companions share the job id as their key
            for partition in [&self.generations, &self.analyses, &self.parsing_jobs] {
                if partition.get(job.id.as_bytes())?.is_some() {
                    partition.remove(job.id.as_bytes())?;
                    stats.companions_pruned += 1;
                }
            }
            debug!(job_id = %job.id, status = ?job.status, "Pruned expired job");
        }

        let delivery_cutoff = now - Duration::days(retention.deliveries_days as i64);
        for delivery in self.scan_deliveries()? {
            // In-flight chains are never pruned regardless of age
            let terminal = matches!(
                delivery.status,
                DeliveryStatus::Success | DeliveryStatus::Exhausted | DeliveryStatus::Failed
            );
            if terminal && delivery.created_at < delivery_cutoff {
                self.remove_delivery(&delivery.id)?;
                stats.deliveries_pruned += 1;
            }
        }

        self.meta.insert(
            keys::encode_meta_key("last_prune"),
            now.to_rfc3339().as_bytes(),
        )?;

        info!(
            jobs = stats.jobs_pruned,
            companions = stats.companions_pruned,
            deliveries = stats.deliveries_pruned,
            "Retention sweep completed"
        );
        Ok(stats)
    }
}

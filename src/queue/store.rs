//! Durable queue broker
//!
//! Fjall-backed multi-queue broker with the contract the engine needs:
//! ordered waiting set per `(queue, priority)` bucket, per-job lease with
//! deadline, delayed jobs, requeue with backoff, pause/resume, and a dead
//! letter partition.
//!
//! Key layout:
//! - `waiting`: `{queue}:{10 - priority:02}:{ready_at_ms:013}:{seq:016}` -> envelope
//!   (inverted priority makes higher priorities sort first; within a bucket,
//!   ready time then enqueue sequence give FIFO)
//! - `inflight`: `{queue}:{seq:016}` -> leased envelope
//! - `dlq`: `{seq:016}` -> dead envelope
//! - `meta`: `next_seq` counter, `paused:{queue}` flags

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{CoreError, ErrorCode};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope not found: {queue}:{seq}")]
    EnvelopeNotFound { queue: String, seq: u64 },
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        CoreError::new(ErrorCode::JobQueueError, err.to_string())
    }
}

/// What travels through the broker: a pointer to a persistent job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub seq: u64,
    pub queue: String,
    pub job_id: String,
    pub priority: u8,
    pub attempt: u32,
    pub ready_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeasedEnvelope {
    pub envelope: QueueEnvelope,
    pub lease_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadEnvelope {
    pub envelope: QueueEnvelope,
    pub failure_code: String,
    pub failure_message: String,
    pub failed_at: DateTime<Utc>,
}

pub struct QueueStore {
    keyspace: Keyspace,
    waiting: PartitionHandle,
    inflight: PartitionHandle,
    dlq: PartitionHandle,
    meta: PartitionHandle,
    seq_counter: AtomicU64,
    /// Serializes pop-and-lease so two workers never lease the same envelope.
    pop_lock: Mutex<()>,
}

fn waiting_key(queue: &str, priority: u8, ready_at: DateTime<Utc>, seq: u64) -> Vec<u8> {
    // Inverted priority: 10 (highest) sorts as 00
    format!(
        "{}:{:02}:{:013}:{:016}",
        queue,
        10 - priority.min(10),
        ready_at.timestamp_millis().max(0),
        seq
    )
    .into_bytes()
}

fn inflight_key(queue: &str, seq: u64) -> Vec<u8> {
    format!("{}:{:016}", queue, seq).into_bytes()
}

fn dlq_key(seq: u64) -> Vec<u8> {
    format!("{:016}", seq).into_bytes()
}

fn paused_key(queue: &str) -> Vec<u8> {
    format!("paused:{}", queue).into_bytes()
}

impl QueueStore {
    /// Open or create the broker keyspace at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening queue broker at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let keyspace = Config::new(path).open()?;

        let waiting = keyspace.open_partition("waiting", PartitionCreateOptions::default())?;
        let inflight = keyspace.open_partition("inflight", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;

        let current_seq = meta
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(current_seq, "Queue broker opened");

        Ok(Self {
            keyspace,
            waiting,
            inflight,
            dlq,
            meta,
            seq_counter: AtomicU64::new(current_seq),
            pop_lock: Mutex::new(()),
        })
    }

    /// Persist an envelope on the waiting set. `delay_ms` defers visibility.
    pub fn enqueue(
        &self,
        queue: &str,
        job_id: &str,
        priority: u8,
        attempt: u32,
        delay_ms: u64,
    ) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let envelope = QueueEnvelope {
            seq,
            queue: queue.to_string(),
            job_id: job_id.to_string(),
            priority: priority.min(10),
            attempt,
            ready_at: now + chrono::Duration::milliseconds(delay_ms as i64),
            enqueued_at: now,
        };

        let key = waiting_key(queue, envelope.priority, envelope.ready_at, seq);
        self.waiting.insert(key, serde_json::to_vec(&envelope)?)?;
        self.meta.insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(queue, job_id, seq, priority, delay_ms, "Envelope enqueued");
        Ok(seq)
    }

    /// Lease the next ready envelope: highest priority first, FIFO within a
    /// bucket, delayed entries skipped until their `ready_at`. Returns `None`
    /// when the queue is paused or nothing is ready.
    pub fn pop_ready(&self, queue: &str, lease_ms: u64) -> Result<Option<LeasedEnvelope>> {
        if self.is_paused(queue)? {
            return Ok(None);
        }

        let _guard = self
            .pop_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Utc::now();
        let prefix = format!("{}:", queue).into_bytes();

        for item in self.waiting.prefix(prefix) {
            let (key, value) = item?;
            let envelope: QueueEnvelope = serde_json::from_slice(&value)?;
            if envelope.ready_at > now {
                // Later entries in this priority bucket are even less ready,
                // but a lower-priority bucket may still hold ready work.
                continue;
            }

            let leased = LeasedEnvelope {
                lease_deadline: now + chrono::Duration::milliseconds(lease_ms as i64),
                envelope,
            };

            // Atomic move waiting -> inflight
            let mut batch = self.keyspace.batch();
            batch.remove(&self.waiting, key);
            batch.insert(
                &self.inflight,
                inflight_key(queue, leased.envelope.seq),
                serde_json::to_vec(&leased)?,
            );
            batch.commit()?;

            debug!(queue, seq = leased.envelope.seq, job_id = %leased.envelope.job_id, "Envelope leased");
            return Ok(Some(leased));
        }

        Ok(None)
    }

    /// Acknowledge a leased envelope, removing it for good.
    pub fn ack(&self, queue: &str, seq: u64) -> Result<()> {
        self.inflight.remove(inflight_key(queue, seq))?;
        debug!(queue, seq, "Envelope acked");
        Ok(())
    }

    /// Return a leased envelope to the waiting set for a retry delivery.
    pub fn requeue(&self, queue: &str, seq: u64, delay_ms: u64) -> Result<u64> {
        self.unlease(queue, seq, delay_ms, true)
    }

    /// Return a leased envelope untouched (attempt preserved), e.g. when the
    /// worker popped it but the rate limiter had no slot.
    pub fn return_lease(&self, queue: &str, seq: u64, delay_ms: u64) -> Result<u64> {
        self.unlease(queue, seq, delay_ms, false)
    }

    fn unlease(&self, queue: &str, seq: u64, delay_ms: u64, bump_attempt: bool) -> Result<u64> {
        let key = inflight_key(queue, seq);
        let leased: LeasedEnvelope = match self.inflight.get(&key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => {
                return Err(QueueError::EnvelopeNotFound {
                    queue: queue.to_string(),
                    seq,
                });
            }
        };
        self.inflight.remove(key)?;

        let attempt = if bump_attempt {
            leased.envelope.attempt + 1
        } else {
            leased.envelope.attempt
        };
        self.enqueue(
            queue,
            &leased.envelope.job_id,
            leased.envelope.priority,
            attempt,
            delay_ms,
        )
    }

    /// Move a leased envelope to the dead letter partition.
    pub fn dead_letter(&self, queue: &str, seq: u64, code: &str, message: &str) -> Result<()> {
        let key = inflight_key(queue, seq);
        let leased: LeasedEnvelope = match self.inflight.get(&key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => {
                return Err(QueueError::EnvelopeNotFound {
                    queue: queue.to_string(),
                    seq,
                });
            }
        };

        let dead = DeadEnvelope {
            envelope: leased.envelope,
            failure_code: code.to_string(),
            failure_message: message.to_string(),
            failed_at: Utc::now(),
        };

        let mut batch = self.keyspace.batch();
        batch.remove(&self.inflight, key);
        batch.insert(&self.dlq, dlq_key(seq), serde_json::to_vec(&dead)?);
        batch.commit()?;

        info!(queue, seq, code, "Envelope dead-lettered");
        Ok(())
    }

    /// Leases whose deadline has passed (crashed or stalled workers).
    pub fn expired_leases(&self) -> Result<Vec<LeasedEnvelope>> {
        let now = Utc::now();
        let mut expired = Vec::new();
        for item in self.inflight.iter() {
            let (_, value) = item?;
            let leased: LeasedEnvelope = serde_json::from_slice(&value)?;
            if leased.lease_deadline <= now {
                expired.push(leased);
            }
        }
        Ok(expired)
    }

    pub fn pause(&self, queue: &str) -> Result<()> {
        self.meta.insert(paused_key(queue), b"1")?;
        info!(queue, "Queue paused");
        Ok(())
    }

    pub fn resume(&self, queue: &str) -> Result<()> {
        self.meta.remove(paused_key(queue))?;
        info!(queue, "Queue resumed");
        Ok(())
    }

    pub fn is_paused(&self, queue: &str) -> Result<bool> {
        Ok(self.meta.get(paused_key(queue))?.is_some())
    }

    pub fn waiting_count(&self, queue: &str) -> Result<usize> {
        let prefix = format!("{}:", queue).into_bytes();
        let mut count = 0;
        for item in self.waiting.prefix(prefix) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn list_dead(&self, limit: usize) -> Result<Vec<DeadEnvelope>> {
        let mut dead = Vec::new();
        for item in self.dlq.iter().take(limit) {
            let (_, value) = item?;
            dead.push(serde_json::from_slice(&value)?);
        }
        Ok(dead)
    }

    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

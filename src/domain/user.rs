use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
}

/// Monthly usage counters. The `period` stamp (`YYYY-MM`) makes the lazy
/// month rollover safe: an increment that observes a stale period zeroes the
/// counters in the same compare-and-swap pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub period: String,
    pub generations: u32,
    pub enhancements: u32,
    pub analyses: u32,
}

impl UsageStats {
    pub fn current_period() -> String {
        let now = Utc::now();
        format!("{:04}-{:02}", now.year(), now.month())
    }

    /// Zero the counters when the stored period is not the current month.
    pub fn roll_over_if_stale(&mut self) -> bool {
        let current = Self::current_period();
        if self.period != current {
            self.period = current;
            self.generations = 0;
            self.enhancements = 0;
            self.analyses = 0;
            true
        } else {
            false
        }
    }
}

/// Subscription-derived monthly allowances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub monthly_generations: u32,
    pub monthly_enhancements: u32,
    pub monthly_analyses: u32,
    pub storage_mb: u32,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            monthly_generations: 20,
            monthly_enhancements: 20,
            monthly_analyses: 20,
            storage_mb: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub status: UserStatus,
    pub lockout_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage: UsageStats,
    #[serde(default)]
    pub limits: UsageLimits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency stamp, bumped on every store update.
    #[serde(default)]
    pub revision: u64,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: None,
            status: UserStatus::Active,
            lockout_until: None,
            usage: UsageStats {
                period: UsageStats::current_period(),
                ..Default::default()
            },
            limits: UsageLimits::default(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Whether this user may start new jobs right now.
    pub fn can_start_jobs(&self) -> bool {
        self.status == UserStatus::Active
            && self.lockout_until.map_or(true, |until| until <= Utc::now())
    }
}

/// The three metered pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Generation,
    Enhancement,
    Analysis,
}

impl UsageKind {
    pub fn count(&self, usage: &UsageStats) -> u32 {
        match self {
            UsageKind::Generation => usage.generations,
            UsageKind::Enhancement => usage.enhancements,
            UsageKind::Analysis => usage.analyses,
        }
    }

    pub fn limit(&self, limits: &UsageLimits) -> u32 {
        match self {
            UsageKind::Generation => limits.monthly_generations,
            UsageKind::Enhancement => limits.monthly_enhancements,
            UsageKind::Analysis => limits.monthly_analyses,
        }
    }

    pub fn increment(&self, usage: &mut UsageStats) {
        match self {
            UsageKind::Generation => usage.generations += 1,
            UsageKind::Enhancement => usage.enhancements += 1,
            UsageKind::Analysis => usage.analyses += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_user_can_start_jobs() {
        let user = User::new("user-1");
        assert!(user.can_start_jobs());
    }

    #[test]
    fn test_suspended_user_blocked() {
        let mut user = User::new("user-1");
        user.status = UserStatus::Suspended;
        assert!(!user.can_start_jobs());
    }

    #[test]
    fn test_lockout_blocks_until_expiry() {
        let mut user = User::new("user-1");
        user.lockout_until = Some(Utc::now() + Duration::hours(1));
        assert!(!user.can_start_jobs());

        user.lockout_until = Some(Utc::now() - Duration::hours(1));
        assert!(user.can_start_jobs());
    }

    #[test]
    fn test_usage_rollover() {
        let mut usage = UsageStats {
            period: "2020-01".to_string(),
            generations: 9,
            enhancements: 4,
            analyses: 2,
        };
        assert!(usage.roll_over_if_stale());
        assert_eq!(usage.generations, 0);
        assert_eq!(usage.period, UsageStats::current_period());

        // Second call in the same month is a no-op
        usage.generations = 3;
        assert!(!usage.roll_over_if_stale());
        assert_eq!(usage.generations, 3);
    }

    #[test]
    fn test_usage_kind_accessors() {
        let mut usage = UsageStats::default();
        UsageKind::Enhancement.increment(&mut usage);
        UsageKind::Enhancement.increment(&mut usage);
        assert_eq!(UsageKind::Enhancement.count(&usage), 2);
        assert_eq!(UsageKind::Generation.count(&usage), 0);
    }
}

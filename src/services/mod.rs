//! Service surface
//!
//! The methods a thin HTTP layer calls into. Every method takes the caller's
//! opaque user id, enforces ownership (foreign resources look missing, never
//! forbidden, so ids cannot be probed), and returns structured results
//! rather than transport shapes.

pub mod ats;
pub mod cvs;
pub mod generation;
pub mod jobs;
pub mod optimize;
pub mod parsing;
pub mod webhooks;

pub use ats::AtsService;
pub use cvs::CvService;
pub use generation::GenerationService;
pub use jobs::JobService;
pub use optimize::OptimizeService;
pub use parsing::ParsingService;
pub use webhooks::WebhookService;

use crate::domain::{UsageKind, User};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::store::CoreStore;

/// Gate every `*.start`: the user must be active, not locked out, and under
/// the metered pipeline's monthly allowance.
pub(crate) fn check_user_can_start(
    store: &CoreStore,
    user_id: &str,
    metered: Option<UsageKind>,
) -> CoreResult<User> {
    let user = store.ensure_user(user_id)?;

    match user.status {
        crate::domain::UserStatus::Active => {}
        crate::domain::UserStatus::Suspended | crate::domain::UserStatus::Deleted => {
            return Err(CoreError::new(ErrorCode::UserInactive, "user is not active"));
        }
    }
    if user
        .lockout_until
        .is_some_and(|until| until > chrono::Utc::now())
    {
        return Err(CoreError::new(ErrorCode::UserLocked, "user is locked out"));
    }

    if let Some(kind) = metered {
        // A stale period means the stored counters no longer apply
        let mut usage = user.usage.clone();
        usage.roll_over_if_stale();
        if kind.count(&usage) >= kind.limit(&user.limits) {
            return Err(CoreError::new(
                ErrorCode::UsageLimitExceeded,
                "monthly allowance exhausted",
            ));
        }
    }

    Ok(user)
}

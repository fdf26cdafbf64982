//! Advisory skill locks
//!
//! Locks are nullable timestamps on the skill row; there is no distributed
//! lock service behind them. A writer stamps the field with its own instant,
//! reads it straight back, and proceeds only when the read matches — the
//! double-check-after-write pattern. Readers treat a lock older than its
//! timeout as abandoned and may steal it. Every acquisition is paired with a
//! best-effort release.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use skillopt_core::{Skill, SkillPatch, StorageResult};

use crate::engine::EngineCtx;

/// The two background passes arbitrated through the skill row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockKind {
    /// Arm-replacement reflection, 10 minute staleness window
    Reflection,
    /// Evaluation regeneration, 5 minute staleness window
    Evaluation,
}

impl LockKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Reflection => "reflection",
            Self::Evaluation => "evaluation",
        }
    }

    /// Read this lock's field off a skill row.
    pub(crate) fn read(&self, skill: &Skill) -> Option<DateTime<Utc>> {
        match self {
            Self::Reflection => skill.reflection_lock_at,
            Self::Evaluation => skill.evaluation_lock_at,
        }
    }

    /// Patch writing this lock's field.
    fn write(&self, at: Option<DateTime<Utc>>) -> SkillPatch {
        match self {
            Self::Reflection => SkillPatch::new().reflection_lock(at),
            Self::Evaluation => SkillPatch::new().evaluation_lock(at),
        }
    }

    /// Staleness window for this lock.
    fn timeout(&self, ctx: &EngineCtx) -> ChronoDuration {
        let secs = match self {
            Self::Reflection => ctx.config.reflection_lock_timeout_secs,
            Self::Evaluation => ctx.config.evaluation_lock_timeout_secs,
        };
        ChronoDuration::seconds(secs as i64)
    }
}

/// Whether a lock stamped at `acquired_at` has outlived its timeout.
pub(crate) fn is_stale(
    acquired_at: DateTime<Utc>,
    timeout: ChronoDuration,
    now: DateTime<Utc>,
) -> bool {
    now.signed_duration_since(acquired_at) > timeout
}

/// Try to take a skill lock.
///
/// Returns the stamped instant on success and `None` when the lock is held
/// by someone else or another writer won the re-read race. Instants are
/// compared at millisecond precision, which is what timestamp columns
/// survive serialization with.
pub(crate) async fn try_acquire(
    ctx: &EngineCtx,
    skill_id: &str,
    kind: LockKind,
) -> StorageResult<Option<DateTime<Utc>>> {
    let Some(skill) = ctx.storage.get_skill(skill_id).await? else {
        return Ok(None);
    };

    let now = Utc::now();
    if let Some(held_at) = kind.read(&skill) {
        if !is_stale(held_at, kind.timeout(ctx), now) {
            debug!(skill_id, lock = kind.as_str(), "lock held; skipping");
            return Ok(None);
        }
        debug!(skill_id, lock = kind.as_str(), "stealing stale lock");
    }

    ctx.storage
        .update_skill(skill_id, kind.write(Some(now)))
        .await?;

    // Double check: re-read and make sure our stamp survived. A mismatch
    // means another writer raced us between the write and the read.
    let Some(reread) = ctx.storage.get_skill(skill_id).await? else {
        return Ok(None);
    };
    let held = kind
        .read(&reread)
        .is_some_and(|at| at.timestamp_millis() == now.timestamp_millis());
    if !held {
        debug!(skill_id, lock = kind.as_str(), "lost lock race");
        return Ok(None);
    }

    Ok(Some(now))
}

/// Clear a skill lock, best effort. Failures are logged and swallowed — a
/// lost clear degrades into a stale lock the next writer steals.
pub(crate) async fn release(ctx: &EngineCtx, skill_id: &str, kind: LockKind) {
    if let Err(error) = ctx.storage.update_skill(skill_id, kind.write(None)).await {
        warn!(
            skill_id,
            lock = kind.as_str(),
            %error,
            "failed to clear lock; it will expire by timeout"
        );
    }
}

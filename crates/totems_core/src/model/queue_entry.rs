//! Queue entry projection and "held/waited for" rendering.
//!
//! # Responsibility
//! - Describe one requester's position in a totem's waiting line.
//! - Render elapsed time since `joined_at` for listings.
//!
//! # Invariants
//! - `rank` is 1-based and dense within one snapshot; rank 1 is the holder.
//! - For the holder, `joined_at` is the moment it became holder, not its
//!   original join time.

use super::requester::RequesterId;
use chrono::{Duration, Utc};
use chrono_humanize::{Accuracy, HumanTime, Tense};
use serde::{Deserialize, Serialize};

/// One requester's place in a waiting line, as read at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub requester_id: RequesterId,
    /// Unix epoch milliseconds.
    pub joined_at: i64,
    pub rank: u32,
}

impl QueueEntry {
    pub fn is_holder(&self) -> bool {
        self.rank == 1
    }

    /// Milliseconds since `joined_at`, clamped at zero for clock skew
    /// between processes sharing one store.
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.joined_at).max(0)
    }

    /// `held for ...` for the holder, `waiting for ...` for everyone else.
    pub fn display_duration(&self, now_ms: i64) -> String {
        let elapsed = humanize_elapsed(self.elapsed_ms(now_ms));
        if self.is_holder() {
            format!("held for {elapsed}")
        } else {
            format!("waiting for {elapsed}")
        }
    }
}

/// Current wall clock as Unix epoch milliseconds.
pub fn current_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn humanize_elapsed(elapsed_ms: i64) -> String {
    let elapsed = Duration::milliseconds(elapsed_ms);
    if elapsed < Duration::minutes(1) {
        return "less than a minute".to_string();
    }
    // Sub-minute precision only adds noise to a chat listing.
    let whole_minutes = Duration::minutes(elapsed.num_minutes());
    HumanTime::from(whole_minutes).to_text_en(Accuracy::Precise, Tense::Present)
}

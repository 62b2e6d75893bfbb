//! Per-source message tracking: UID epochs, the watermark and seen messages.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::db::{seen_message_repo, source_repo, Database, MailboxSource};

use super::connector::MessageRef;
use super::error::Result;

/// Tracks which messages of one source still need processing.
pub struct MessageTracker {
    db: Database,
    source_id: String,
    uid_validity: u32,
    watermark: Option<u32>,
}

impl MessageTracker {
    /// Binds the tracker to the folder's current UIDVALIDITY.
    ///
    /// When UIDVALIDITY differs from the stored one, uids from the old epoch
    /// are meaningless: the watermark and seen records are cleared.
    pub fn open(db: Database, source: &MailboxSource, uid_validity: u32) -> Result<Self> {
        let mut watermark = source.last_seen_uid;

        if source.uid_validity != Some(uid_validity) {
            if let Some(previous) = source.uid_validity {
                warn!(
                    "UIDVALIDITY changed for source '{}': {} -> {}. Clearing tracking data.",
                    source.id, previous, uid_validity
                );
            }
            let deleted = seen_message_repo::delete_for_source(&db, &source.id)?;
            source_repo::reset_uid_epoch(&db, &source.id, uid_validity)?;
            if deleted > 0 {
                info!(
                    "Cleared {} seen records for source '{}'",
                    deleted, source.id
                );
            }
            watermark = None;
        }

        Ok(Self {
            db,
            source_id: source.id.clone(),
            uid_validity,
            watermark,
        })
    }

    pub fn watermark(&self) -> Option<u32> {
        self.watermark
    }

    /// Drops refs at or below the watermark or already seen, keeping order,
    /// and truncates to `limit`.
    pub fn filter_pending(&self, refs: Vec<MessageRef>, limit: usize) -> Result<Vec<MessageRef>> {
        let above: Vec<MessageRef> = refs
            .into_iter()
            .filter(|r| self.watermark.is_none_or(|w| r.uid > w))
            .collect();

        let uids: Vec<u32> = above.iter().map(|r| r.uid).collect();
        let seen: HashSet<u32> =
            seen_message_repo::find_seen_uids(&self.db, &self.source_id, self.uid_validity, &uids)?
                .into_iter()
                .collect();

        let total = above.len();
        let mut pending: Vec<MessageRef> =
            above.into_iter().filter(|r| !seen.contains(&r.uid)).collect();
        if pending.len() > limit {
            debug!(
                "Limiting source '{}' to {} of {} pending messages",
                self.source_id,
                limit,
                pending.len()
            );
            pending.truncate(limit);
        }

        debug!(
            "Filtered {} uids above watermark, {} already seen, {} pending",
            total,
            seen.len(),
            pending.len()
        );
        Ok(pending)
    }

    /// Records a fully handled message so it is never processed again.
    pub fn mark_seen(&self, uid: u32, message_id: Option<String>) -> Result<()> {
        let row =
            seen_message_repo::SeenMessageRow::new(&self.source_id, self.uid_validity, uid, message_id);
        seen_message_repo::insert(&self.db, &row)?;
        Ok(())
    }

    /// Moves the watermark forward. Never moves it back.
    pub fn advance(&mut self, uid: u32) -> Result<()> {
        if self.watermark.is_some_and(|w| w >= uid) {
            return Ok(());
        }
        source_repo::advance_watermark(&self.db, &self.source_id, uid)?;
        self.watermark = Some(uid);
        Ok(())
    }
}

//! Notifications raised by booking transitions and the pollable inbox that stores them
use super::error::{BookingError, Result};
use super::types::{BookingId, NotificationId, TimeStamp, UserId};
use super::utils::{index_entry, index_key, index_prefix};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum NotificationKind {
    #[n(0)]
    Booking, // a new request arrived
    #[n(1)]
    BookingStatus,
    #[n(2)]
    Completion,
    #[n(3)]
    Completed,
    #[n(4)]
    Dispute,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Notification {
    #[n(0)]
    pub id: NotificationId,
    #[n(1)]
    pub recipient: UserId,
    #[n(2)]
    pub kind: NotificationKind,
    #[n(3)]
    pub text: String,
    #[n(4)]
    pub link: String,
    #[n(5)]
    pub booking_id: BookingId,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub read: bool,
}

/// Notification content before it is bound to a committed booking revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub text: String,
    pub link: String,
}

/// Sink for notifications. Delivery is fire-and-forget from the booking core's
/// point of view: an error here is logged by the caller, never surfaced.
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// sled-backed read model users poll for their notifications.
#[derive(Clone)]
pub struct NotificationInbox {
    notes: sled::Tree,
    by_recipient: sled::Tree,
}

fn recipient_key(recipient: &UserId, id: &NotificationId) -> Vec<u8> {
    index_key(recipient.as_str(), id.as_str())
}

impl NotificationInbox {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            notes: db.open_tree("notifications")?,
            by_recipient: db.open_tree("notifications_by_recipient")?,
        })
    }

    fn load(&self, id: &NotificationId) -> Result<Notification> {
        let bytes = self
            .notes
            .get(id.as_str())?
            .ok_or(BookingError::NotFound("Notification"))?;
        Ok(minicbor::decode(&bytes)?)
    }

    fn load_owned(
        &self,
        id: &NotificationId,
        principal: &UserId,
        denial: &'static str,
    ) -> Result<Notification> {
        let notification = self.load(id)?;
        if notification.recipient != *principal {
            return Err(BookingError::Forbidden(denial));
        }
        Ok(notification)
    }

    fn store(&self, notification: &Notification) -> Result<()> {
        self.notes
            .insert(notification.id.as_str(), minicbor::to_vec(notification)?)?;
        Ok(())
    }

    /// Notifications for `recipient`, newest first.
    pub fn list_for(&self, recipient: &UserId) -> Result<Vec<Notification>> {
        let mut notes = Vec::new();
        for entry in self.by_recipient.scan_prefix(index_prefix(recipient.as_str())) {
            let (key, _) = entry?;
            let Some(id) = index_entry(recipient.as_str(), &key) else {
                continue;
            };
            if let Some(bytes) = self.notes.get(id.as_str())? {
                notes.push(minicbor::decode::<Notification>(&bytes)?);
            }
        }
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notes)
    }

    pub fn unread_count(&self, recipient: &UserId) -> Result<usize> {
        Ok(self.list_for(recipient)?.iter().filter(|n| !n.read).count())
    }

    pub fn mark_read(&self, id: &NotificationId, principal: &UserId) -> Result<Notification> {
        let mut notification =
            self.load_owned(id, principal, "Not authorized to update this notification")?;
        notification.read = true;
        self.store(&notification)?;
        Ok(notification)
    }

    /// Marks every unread notification of `principal` as read, returning how many changed.
    pub fn mark_all_read(&self, principal: &UserId) -> Result<usize> {
        let mut changed = 0;
        for mut notification in self.list_for(principal)? {
            if !notification.read {
                notification.read = true;
                self.store(&notification)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub fn delete(&self, id: &NotificationId, principal: &UserId) -> Result<()> {
        let notification =
            self.load_owned(id, principal, "Not authorized to delete this notification")?;
        let index_key = recipient_key(&notification.recipient, id);

        (&self.notes, &self.by_recipient)
            .transaction(|(notes, by_recipient)| {
                notes.remove(id.as_str())?;
                by_recipient.remove(index_key.as_slice())?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => BookingError::from(e),
                TransactionError::Abort(()) => BookingError::NotFound("Notification"),
            })
    }
}

impl NotificationPublisher for NotificationInbox {
    // Publishing an id that is already stored is a no-op, so redelivery never duplicates.
    fn publish(&self, notification: &Notification) -> anyhow::Result<()> {
        let cbor = minicbor::to_vec(notification)?;
        let index_key = recipient_key(&notification.recipient, &notification.id);

        (&self.notes, &self.by_recipient)
            .transaction(|(notes, by_recipient)| {
                if notes.get(notification.id.as_str())?.is_some() {
                    return Ok(());
                }
                notes.insert(notification.id.as_str(), cbor.as_slice())?;
                by_recipient.insert(index_key.as_slice(), &[] as &[u8])?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|e| anyhow::anyhow!("failed to store notification: {e:?}"))
    }
}

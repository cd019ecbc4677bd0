//! sled persistence for bookings.
//!
//! Each booking is one CBOR document keyed by its id. Two index trees map a
//! user to the bookings they made or received. Notifications raised by a write
//! land in the `outbox` tree inside the same transaction as the booking, so a
//! committed transition can never lose its notifications.
use super::booking::Booking;
use super::error::{BookingError, Result};
use super::notification::{Draft, Notification};
use super::types::{BookingId, NotificationId, UserId};
use super::utils::{index_entry, index_key, index_prefix, revision_digest};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};

#[derive(Debug)]
enum Abort {
    Missing,
    Stale,
    Duplicate,
    Corrupt(minicbor::decode::Error),
}

impl From<TransactionError<Abort>> for BookingError {
    fn from(value: TransactionError<Abort>) -> Self {
        match value {
            TransactionError::Abort(Abort::Missing) => BookingError::NotFound("Booking"),
            TransactionError::Abort(Abort::Stale | Abort::Duplicate) => BookingError::Conflict,
            TransactionError::Abort(Abort::Corrupt(e)) => e.into(),
            TransactionError::Storage(e) => e.into(),
        }
    }
}

/// Attach deterministic ids to the drafts raised by `booking`'s current revision.
fn bind(booking: &Booking, drafts: &[Draft]) -> Vec<Notification> {
    drafts
        .iter()
        .enumerate()
        .map(|(i, draft)| Notification {
            id: NotificationId::from(revision_digest(
                booking.id.as_str(),
                booking.version,
                i,
            )),
            recipient: draft.recipient.clone(),
            kind: draft.kind,
            text: draft.text.clone(),
            link: draft.link.clone(),
            booking_id: booking.id.clone(),
            created_at: booking.updated_at.clone(),
            read: false,
        })
        .collect()
}

fn encode_all(notifications: &[Notification]) -> Result<Vec<(String, Vec<u8>)>> {
    notifications
        .iter()
        .map(|n| -> Result<(String, Vec<u8>)> { Ok((n.id.to_string(), minicbor::to_vec(n)?)) })
        .collect()
}

#[derive(Clone)]
pub struct BookingStore {
    bookings: sled::Tree,
    by_booker: sled::Tree,
    by_owner: sled::Tree,
    outbox: sled::Tree,
}

impl BookingStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            bookings: db.open_tree("bookings")?,
            by_booker: db.open_tree("bookings_by_booker")?,
            by_owner: db.open_tree("bookings_by_owner")?,
            outbox: db.open_tree("outbox")?,
        })
    }

    /// Persist a new booking at version 1 together with its notifications.
    pub fn create(&self, mut booking: Booking, drafts: &[Draft]) -> Result<(Booking, Vec<Notification>)> {
        booking.version = 1;
        let notifications = bind(&booking, drafts);
        let entries = encode_all(&notifications)?;
        let cbor = minicbor::to_vec(&booking)?;
        let key = booking.id.to_string();
        let booker_key = index_key(booking.booked_by_id.as_str(), booking.id.as_str());
        let owner_key = index_key(booking.offer_owner_id.as_str(), booking.id.as_str());

        (&self.bookings, &self.by_booker, &self.by_owner, &self.outbox).transaction(
            |(bookings, by_booker, by_owner, outbox)| {
                if bookings.get(key.as_str())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(Abort::Duplicate));
                }
                bookings.insert(key.as_str(), cbor.as_slice())?;
                by_booker.insert(booker_key.as_slice(), &[] as &[u8])?;
                by_owner.insert(owner_key.as_slice(), &[] as &[u8])?;
                for (id, bytes) in &entries {
                    outbox.insert(id.as_str(), bytes.as_slice())?;
                }
                Ok(())
            },
        )?;

        Ok((booking, notifications))
    }

    pub fn find(&self, id: &BookingId) -> Result<Option<Booking>> {
        match self.bookings.get(id.as_str())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: &BookingId) -> Result<Booking> {
        self.find(id)?.ok_or(BookingError::NotFound("Booking"))
    }

    /// Overwrite a booking if nobody else wrote it since `expected_version` was read.
    ///
    /// The stored copy gets `expected_version + 1`; a mismatch fails with
    /// `Conflict` and writes nothing.
    pub fn update(
        &self,
        mut booking: Booking,
        expected_version: u64,
        drafts: &[Draft],
    ) -> Result<(Booking, Vec<Notification>)> {
        booking.version = expected_version + 1;
        let notifications = bind(&booking, drafts);
        let entries = encode_all(&notifications)?;
        let cbor = minicbor::to_vec(&booking)?;
        let key = booking.id.to_string();

        (&self.bookings, &self.outbox).transaction(|(bookings, outbox)| {
            let stored = bookings
                .get(key.as_str())?
                .ok_or(ConflictableTransactionError::Abort(Abort::Missing))?;
            let stored: Booking = minicbor::decode(&stored)
                .map_err(|e| ConflictableTransactionError::Abort(Abort::Corrupt(e)))?;
            if stored.version != expected_version {
                return Err(ConflictableTransactionError::Abort(Abort::Stale));
            }

            bookings.insert(key.as_str(), cbor.as_slice())?;
            for (id, bytes) in &entries {
                outbox.insert(id.as_str(), bytes.as_slice())?;
            }
            Ok(())
        })?;

        Ok((booking, notifications))
    }

    fn list_indexed(&self, index: &sled::Tree, user: &UserId) -> Result<Vec<Booking>> {
        let mut bookings = Vec::new();
        for entry in index.scan_prefix(index_prefix(user.as_str())) {
            let (key, _) = entry?;
            let Some(id) = index_entry(user.as_str(), &key) else {
                continue;
            };
            if let Some(booking) = self.find(&BookingId::from(id))? {
                bookings.push(booking);
            }
        }
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    /// Bookings `user` requested, newest first.
    pub fn list_by_booker(&self, user: &UserId) -> Result<Vec<Booking>> {
        self.list_indexed(&self.by_booker, user)
    }

    /// Bookings received on offers `user` owns, newest first.
    pub fn list_by_owner(&self, user: &UserId) -> Result<Vec<Booking>> {
        self.list_indexed(&self.by_owner, user)
    }

    /// Notifications committed but not yet handed to the publisher.
    pub fn pending_notifications(&self) -> Result<Vec<Notification>> {
        let mut pending = self
            .outbox
            .iter()
            .values()
            .map(|bytes| -> Result<Notification> { Ok(minicbor::decode(&bytes?)?) })
            .collect::<Result<Vec<_>>>()?;
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    pub fn acknowledge(&self, id: &NotificationId) -> Result<()> {
        self.outbox.remove(id.as_str())?;
        Ok(())
    }
}

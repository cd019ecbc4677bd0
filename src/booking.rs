//! The booking record and its lifecycle vocabulary
use super::types::{BookingId, OfferId, TimeStamp, UserId};
use chrono::Utc;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum BookingStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
    #[n(3)]
    Cancelled,
    #[n(4)]
    InProgress,
    #[n(5)]
    Completed,
    #[n(6)]
    Disputed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Disputed => "disputed",
        }
    }

    /// Rejected, cancelled and completed bookings accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }

    /// Statuses from which either party may confirm completion or raise a dispute.
    pub fn is_engaged(&self) -> bool {
        matches!(self, BookingStatus::Accepted | BookingStatus::InProgress)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown booking status: {s}"))
    }
}

/// The two sides of an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    Booker,
    Owner,
}

impl Party {
    pub fn other(&self) -> Party {
        match self {
            Party::Booker => Party::Owner,
            Party::Owner => Party::Booker,
        }
    }
}

/// Per-party completion confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Confirmation {
    #[n(0)]
    pub confirmed: bool,
    #[n(1)]
    pub confirmed_at: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Booking {
    #[n(0)]
    pub id: BookingId,
    #[n(1)]
    pub offer_id: OfferId,
    #[n(2)]
    pub offer_owner_id: UserId, // copied from the offer when the booking is made
    #[n(3)]
    pub booked_by_id: UserId,
    #[n(4)]
    pub status: BookingStatus,
    #[n(5)]
    pub message: String,
    #[n(6)]
    pub booker: Confirmation,
    #[n(7)]
    pub owner: Confirmation,
    #[n(8)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub dispute_reason: String,
    #[n(10)]
    pub disputed_by: Option<UserId>,
    #[n(11)]
    pub disputed_at: Option<TimeStamp<Utc>>,
    #[n(12)]
    pub session_notes: String,
    #[n(13)]
    pub created_at: TimeStamp<Utc>,
    #[n(14)]
    pub updated_at: TimeStamp<Utc>,
    #[n(15)]
    pub version: u64, // bumped by the store on every committed write
}

impl Booking {
    pub fn new(
        id: BookingId,
        offer_id: OfferId,
        offer_owner_id: UserId,
        booked_by_id: UserId,
        message: String,
        now: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            offer_id,
            offer_owner_id,
            booked_by_id,
            status: BookingStatus::Pending,
            message,
            booker: Confirmation::default(),
            owner: Confirmation::default(),
            completed_at: None,
            dispute_reason: String::new(),
            disputed_by: None,
            disputed_at: None,
            session_notes: String::new(),
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        }
    }

    pub fn party_id(&self, party: Party) -> &UserId {
        match party {
            Party::Booker => &self.booked_by_id,
            Party::Owner => &self.offer_owner_id,
        }
    }

    pub fn confirmation(&self, party: Party) -> &Confirmation {
        match party {
            Party::Booker => &self.booker,
            Party::Owner => &self.owner,
        }
    }

    pub fn confirmation_mut(&mut self, party: Party) -> &mut Confirmation {
        match party {
            Party::Booker => &mut self.booker,
            Party::Owner => &mut self.owner,
        }
    }

    pub fn completed_by_booker(&self) -> bool {
        self.booker.confirmed
    }

    pub fn completed_by_owner(&self) -> bool {
        self.owner.confirmed
    }

    /// Checks the record-level invariants, returning the first one that is broken.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.offer_owner_id == self.booked_by_id {
            return Err("booker and offer owner are the same user");
        }
        let both = self.booker.confirmed && self.owner.confirmed;
        let one = self.booker.confirmed ^ self.owner.confirmed;

        if (self.status == BookingStatus::Completed) != both {
            return Err("completed status must coincide with both confirmations");
        }
        if self.completed_at.is_some() != both {
            return Err("completed_at must be set exactly when both parties confirmed");
        }
        if self.status == BookingStatus::InProgress && !one {
            return Err("in_progress requires exactly one confirmation");
        }
        if self.status == BookingStatus::Accepted && (self.booker.confirmed || self.owner.confirmed) {
            return Err("accepted booking carries a confirmation");
        }
        for confirmation in [&self.booker, &self.owner] {
            if confirmation.confirmed != confirmation.confirmed_at.is_some() {
                return Err("confirmation flag and timestamp disagree");
            }
        }
        if self.status == BookingStatus::Disputed {
            if self.dispute_reason.trim().is_empty() {
                return Err("disputed booking lacks a reason");
            }
            match &self.disputed_by {
                Some(by) if *by == self.booked_by_id || *by == self.offer_owner_id => {}
                _ => return Err("dispute raised by a non-participant"),
            }
        }
        Ok(())
    }
}

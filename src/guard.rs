//! Role checks for every booking action.
//!
//! The guard runs before any state check so that a caller who is not part of
//! a booking learns nothing about where that booking is in its lifecycle.
use super::booking::{Booking, Party};
use super::error::{BookingError, Result};
use super::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Reject,
    Cancel,
    MarkComplete,
    WithdrawCompletion,
    RaiseDispute,
    View,
}

impl Action {
    fn denial(&self) -> &'static str {
        match self {
            Action::Accept | Action::Reject => "Not authorized to update this booking",
            Action::Cancel => "Not authorized to cancel this booking",
            Action::MarkComplete => "Not authorized to complete this booking",
            Action::WithdrawCompletion | Action::RaiseDispute | Action::View => "Not authorized",
        }
    }
}

pub struct AuthorizationGuard;

impl AuthorizationGuard {
    /// Which side of `booking` the principal is on, if any.
    pub fn party_of(principal: &UserId, booking: &Booking) -> Option<Party> {
        if *principal == booking.booked_by_id {
            Some(Party::Booker)
        } else if *principal == booking.offer_owner_id {
            Some(Party::Owner)
        } else {
            None
        }
    }

    /// Only someone other than the offer owner may book an offer.
    pub fn authorize_create(principal: &UserId, offer_owner: &UserId) -> Result<()> {
        if principal == offer_owner {
            return Err(BookingError::SelfBooking);
        }
        Ok(())
    }

    /// Resolve the acting party for `action`, or refuse with `Forbidden`.
    pub fn authorize(principal: &UserId, booking: &Booking, action: Action) -> Result<Party> {
        let party = Self::party_of(principal, booking);

        let allowed = match (action, party) {
            (Action::Accept | Action::Reject, Some(Party::Owner)) => party,
            (Action::Cancel, Some(Party::Booker)) => party,
            (
                Action::MarkComplete
                | Action::WithdrawCompletion
                | Action::RaiseDispute
                | Action::View,
                Some(_),
            ) => party,
            _ => None,
        };

        allowed.ok_or(BookingError::Forbidden(action.denial()))
    }
}

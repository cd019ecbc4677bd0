//! Booking state machine.
//!
//! Every transition is computed here as a pure function of the current record,
//! the acting principal and the request payload. The result is the next record
//! plus the notifications that must accompany it; persisting and publishing
//! them is left to the caller.
use super::booking::{Booking, BookingStatus, Party};
use super::config::BookingConfig;
use super::error::{BookingError, Result};
use super::guard::{Action, AuthorizationGuard};
use super::notification::{Draft, NotificationKind};
use super::offer::OfferSummary;
use super::types::{BookingId, TimeStamp, UserId};
use super::utils::preview;
use chrono::Utc;
use std::str::FromStr;

/// The only targets an owner may pick when answering a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn status(&self) -> BookingStatus {
        match self {
            Decision::Accept => BookingStatus::Accepted,
            Decision::Reject => BookingStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.parse::<BookingStatus>() {
            Ok(BookingStatus::Accepted) => Ok(Decision::Accept),
            Ok(BookingStatus::Rejected) => Ok(Decision::Reject),
            _ => Err(BookingError::Validation(
                "Status must be either accepted or rejected".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    SetStatus(Decision),
    Cancel,
    MarkComplete { notes: Option<String> },
    WithdrawCompletion,
    RaiseDispute { reason: String },
}

impl Transition {
    pub fn action(&self) -> Action {
        match self {
            Transition::SetStatus(Decision::Accept) => Action::Accept,
            Transition::SetStatus(Decision::Reject) => Action::Reject,
            Transition::Cancel => Action::Cancel,
            Transition::MarkComplete { .. } => Action::MarkComplete,
            Transition::WithdrawCompletion => Action::WithdrawCompletion,
            Transition::RaiseDispute { .. } => Action::RaiseDispute,
        }
    }
}

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub booking: Booking,
    pub notifications: Vec<Draft>,
    pub from: BookingStatus,
    pub actor: Party,
}

fn label(party: Party) -> &'static str {
    match party {
        Party::Booker => "The booker",
        Party::Owner => "The offer owner",
    }
}

// Where each side finds its own list of bookings.
fn bookings_link(party: Party) -> &'static str {
    match party {
        Party::Booker => "/my-bookings",
        Party::Owner => "/owner-bookings",
    }
}

#[derive(Debug, Clone)]
pub struct BookingStateMachine {
    min_dispute_reason_chars: usize,
    dispute_preview_chars: usize,
}

impl Default for BookingStateMachine {
    fn default() -> Self {
        Self::new(&BookingConfig::default())
    }
}

impl BookingStateMachine {
    pub fn new(config: &BookingConfig) -> Self {
        Self {
            min_dispute_reason_chars: config.min_dispute_reason_chars,
            dispute_preview_chars: config.dispute_preview_chars,
        }
    }

    /// Build a fresh pending booking for `booker` on `offer`.
    pub fn open(
        &self,
        id: BookingId,
        offer: &OfferSummary,
        booker: &UserId,
        message: Option<String>,
        now: TimeStamp<Utc>,
    ) -> Result<Outcome> {
        AuthorizationGuard::authorize_create(booker, &offer.owner_id)?;

        let booking = Booking::new(
            id,
            offer.id.clone(),
            offer.owner_id.clone(),
            booker.clone(),
            message.unwrap_or_default(),
            now,
        );
        let notifications = vec![Draft {
            recipient: offer.owner_id.clone(),
            kind: NotificationKind::Booking,
            text: format!(
                "You have a new booking request for your offer: {}.",
                offer.title
            ),
            link: format!("/offers/{}", offer.id),
        }];

        Ok(Outcome {
            booking,
            notifications,
            from: BookingStatus::Pending,
            actor: Party::Booker,
        })
    }

    /// Checks that need nothing but the request payload.
    pub fn validate_input(&self, transition: &Transition) -> Result<()> {
        if let Transition::RaiseDispute { reason } = transition {
            if reason.trim().chars().count() < self.min_dispute_reason_chars {
                return Err(BookingError::Validation(format!(
                    "Please provide a detailed reason for the dispute (at least {} characters)",
                    self.min_dispute_reason_chars
                )));
            }
        }
        Ok(())
    }

    /// Apply `transition` requested by `principal` to `booking`.
    ///
    /// Checks run in a fixed order: payload, role, current status, then the
    /// per-party confirmation guards.
    pub fn apply(
        &self,
        booking: &Booking,
        principal: &UserId,
        transition: Transition,
        offer_title: &str,
        now: TimeStamp<Utc>,
    ) -> Result<Outcome> {
        self.validate_input(&transition)?;
        self.apply_validated(booking, principal, transition, offer_title, now)
    }

    /// [`Self::apply`] for a transition whose payload already passed
    /// [`Self::validate_input`].
    pub(crate) fn apply_validated(
        &self,
        booking: &Booking,
        principal: &UserId,
        transition: Transition,
        offer_title: &str,
        now: TimeStamp<Utc>,
    ) -> Result<Outcome> {
        let actor = AuthorizationGuard::authorize(principal, booking, transition.action())?;

        let mut next = booking.clone();
        let notifications = match transition {
            Transition::SetStatus(decision) => self.decide(&mut next, decision, offer_title)?,
            Transition::Cancel => self.cancel(&mut next)?,
            Transition::MarkComplete { notes } => {
                self.confirm(&mut next, actor, notes, offer_title, &now)?
            }
            Transition::WithdrawCompletion => self.withdraw(&mut next, actor, offer_title)?,
            Transition::RaiseDispute { reason } => {
                self.dispute(&mut next, actor, principal, &reason, offer_title, &now)?
            }
        };
        next.updated_at = now;

        Ok(Outcome {
            booking: next,
            notifications,
            from: booking.status,
            actor,
        })
    }

    fn decide(&self, b: &mut Booking, decision: Decision, title: &str) -> Result<Vec<Draft>> {
        if b.status != BookingStatus::Pending {
            return Err(BookingError::InvalidState(
                "Only pending bookings can be accepted or rejected",
            ));
        }
        b.status = decision.status();

        Ok(vec![Draft {
            recipient: b.booked_by_id.clone(),
            kind: NotificationKind::BookingStatus,
            text: format!("Your booking for \"{title}\" was {}.", b.status),
            link: format!("/bookings/{}", b.id),
        }])
    }

    fn cancel(&self, b: &mut Booking) -> Result<Vec<Draft>> {
        if !matches!(b.status, BookingStatus::Pending | BookingStatus::Accepted) {
            return Err(BookingError::InvalidState(
                "Only pending or accepted bookings can be cancelled",
            ));
        }
        b.status = BookingStatus::Cancelled;
        Ok(vec![])
    }

    fn confirm(
        &self,
        b: &mut Booking,
        actor: Party,
        notes: Option<String>,
        title: &str,
        now: &TimeStamp<Utc>,
    ) -> Result<Vec<Draft>> {
        if !b.status.is_engaged() {
            return Err(BookingError::InvalidState(
                "Only accepted or in-progress bookings can be marked as complete",
            ));
        }
        if b.confirmation(actor).confirmed {
            return Err(BookingError::AlreadyConfirmed);
        }

        if !b.booker.confirmed && !b.owner.confirmed {
            b.status = BookingStatus::InProgress;
        }

        let confirmation = b.confirmation_mut(actor);
        confirmation.confirmed = true;
        confirmation.confirmed_at = Some(now.clone());

        // booker's notes win; the owner only fills an empty slot
        if let Some(notes) = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            if actor == Party::Booker || b.session_notes.is_empty() {
                b.session_notes = notes;
            }
        }

        let other = actor.other();
        let mut notifications = vec![Draft {
            recipient: b.party_id(other).clone(),
            kind: NotificationKind::Completion,
            text: format!(
                "{} has confirmed completion for \"{title}\". Please confirm from your side to finalize.",
                label(actor)
            ),
            link: bookings_link(other).into(),
        }];

        if b.booker.confirmed && b.owner.confirmed {
            b.status = BookingStatus::Completed;
            b.completed_at = Some(now.clone());

            let link = format!("/offers/{}", b.offer_id);
            notifications.push(Draft {
                recipient: b.booked_by_id.clone(),
                kind: NotificationKind::Completed,
                text: format!(
                    "Booking for \"{title}\" has been completed! You can now leave a review."
                ),
                link: link.clone(),
            });
            notifications.push(Draft {
                recipient: b.offer_owner_id.clone(),
                kind: NotificationKind::Completed,
                text: format!("Booking for \"{title}\" has been completed successfully!"),
                link,
            });
        }

        Ok(notifications)
    }

    fn withdraw(&self, b: &mut Booking, actor: Party, title: &str) -> Result<Vec<Draft>> {
        if b.status != BookingStatus::InProgress {
            return Err(BookingError::InvalidState(
                "Can only withdraw confirmation while booking is in progress",
            ));
        }
        if !b.confirmation(actor).confirmed {
            return Err(BookingError::NothingToWithdraw);
        }

        let confirmation = b.confirmation_mut(actor);
        confirmation.confirmed = false;
        confirmation.confirmed_at = None;

        if !b.booker.confirmed && !b.owner.confirmed {
            b.status = BookingStatus::Accepted;
        }

        let other = actor.other();
        Ok(vec![Draft {
            recipient: b.party_id(other).clone(),
            kind: NotificationKind::Completion,
            text: format!(
                "{} has withdrawn their completion confirmation for \"{title}\".",
                label(actor)
            ),
            link: bookings_link(other).into(),
        }])
    }

    fn dispute(
        &self,
        b: &mut Booking,
        actor: Party,
        principal: &UserId,
        reason: &str,
        title: &str,
        now: &TimeStamp<Utc>,
    ) -> Result<Vec<Draft>> {
        if !b.status.is_engaged() {
            return Err(BookingError::InvalidState(
                "Can only dispute accepted or in-progress bookings",
            ));
        }
        let reason = reason.trim();

        b.status = BookingStatus::Disputed;
        b.dispute_reason = reason.to_string();
        b.disputed_by = Some(principal.clone());
        b.disputed_at = Some(now.clone());

        let other = actor.other();
        Ok(vec![Draft {
            recipient: b.party_id(other).clone(),
            kind: NotificationKind::Dispute,
            text: format!(
                "{} has raised a dispute for booking \"{title}\". Reason: {}",
                label(actor),
                preview(reason, self.dispute_preview_chars)
            ),
            link: bookings_link(other).into(),
        }])
    }
}

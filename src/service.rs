//! Service layer API for booking workflow operations
use super::booking::{Booking, Party};
use super::config::BookingConfig;
use super::error::{BookingError, Result};
use super::guard::{Action, AuthorizationGuard};
use super::machine::{BookingStateMachine, Decision, Transition};
use super::notification::{Notification, NotificationPublisher};
use super::offer::{OfferLookup, OfferSummary};
use super::store::BookingStore;
use super::types::{BookingId, OfferId, TimeStamp, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A booking as returned to a participant, with the offer resolved for display.
#[derive(Debug, Clone)]
pub struct BookingView {
    pub booking: Booking,
    pub offer: OfferSummary,
    pub viewer: Party,
}

pub struct BookingService {
    store: BookingStore,
    offers: Arc<dyn OfferLookup>,
    publisher: Arc<dyn NotificationPublisher>,
    machine: BookingStateMachine,
}

impl BookingService {
    pub fn new(
        instance: Arc<sled::Db>,
        offers: Arc<dyn OfferLookup>,
        publisher: Arc<dyn NotificationPublisher>,
        config: &BookingConfig,
    ) -> Result<Self> {
        Ok(Self {
            store: BookingStore::open(&instance)?,
            offers,
            publisher,
            machine: BookingStateMachine::new(config),
        })
    }

    pub fn store(&self) -> &BookingStore {
        &self.store
    }

    /// Offer details for display. A lookup failure only degrades the text.
    fn offer_for(&self, booking: &Booking) -> OfferSummary {
        match self.offers.find_offer(&booking.offer_id) {
            Ok(Some(offer)) => offer,
            Ok(None) => OfferSummary::unavailable(booking.offer_id.clone(), booking.offer_owner_id.clone()),
            Err(error) => {
                warn!(offer = %booking.offer_id, error = %error, "offer lookup failed");
                OfferSummary::unavailable(booking.offer_id.clone(), booking.offer_owner_id.clone())
            }
        }
    }

    fn view(&self, booking: Booking, viewer: Party) -> BookingView {
        let offer = self.offer_for(&booking);
        BookingView {
            booking,
            offer,
            viewer,
        }
    }

    /// Hand committed notifications to the publisher. Failures stay in the
    /// outbox for `redeliver_pending` and never fail the request.
    fn dispatch(&self, notifications: &[Notification]) -> usize {
        let mut delivered = 0;
        for notification in notifications {
            match self.publisher.publish(notification) {
                Ok(()) => {
                    delivered += 1;
                    if let Err(error) = self.store.acknowledge(&notification.id) {
                        warn!(notification = %notification.id, error = %error, "failed to clear outbox entry");
                    }
                }
                Err(error) => warn!(
                    notification = %notification.id,
                    recipient = %notification.recipient,
                    error = %error,
                    "notification publish failed, kept for redelivery"
                ),
            }
        }
        delivered
    }

    /// Request a booking on someone else's offer
    pub fn create_booking(
        &self,
        offer_id: &OfferId,
        booker: &UserId,
        message: Option<String>,
    ) -> Result<BookingView> {
        let offer = self
            .offers
            .find_offer(offer_id)
            .map_err(BookingError::Dependency)?
            .ok_or(BookingError::NotFound("Offer"))?;

        let id = BookingId::generate().map_err(BookingError::Dependency)?;
        let outcome = self
            .machine
            .open(id, &offer, booker, message, TimeStamp::new())?;
        let (booking, notifications) = self.store.create(outcome.booking, &outcome.notifications)?;

        info!(booking = %booking.id, offer = %offer.id, booker = %booker, "booking requested");
        self.dispatch(&notifications);

        Ok(BookingView {
            booking,
            offer,
            viewer: Party::Booker,
        })
    }

    /// Fetch a single booking; only its two participants may see it.
    pub fn get_booking(&self, id: &BookingId, principal: &UserId) -> Result<BookingView> {
        let booking = self.store.get(id)?;
        let viewer = AuthorizationGuard::authorize(principal, &booking, Action::View)?;
        Ok(self.view(booking, viewer))
    }

    /// Bookings the principal requested
    pub fn bookings_made_by(&self, principal: &UserId) -> Result<Vec<BookingView>> {
        let bookings = self.store.list_by_booker(principal)?;
        debug!(user = %principal, count = bookings.len(), "listed bookings made");
        Ok(bookings
            .into_iter()
            .map(|b| self.view(b, Party::Booker))
            .collect())
    }

    /// Bookings received on the principal's offers
    pub fn bookings_received_by(&self, principal: &UserId) -> Result<Vec<BookingView>> {
        let bookings = self.store.list_by_owner(principal)?;
        debug!(user = %principal, count = bookings.len(), "listed bookings received");
        Ok(bookings
            .into_iter()
            .map(|b| self.view(b, Party::Owner))
            .collect())
    }

    fn transition(
        &self,
        id: &BookingId,
        principal: &UserId,
        transition: Transition,
    ) -> Result<BookingView> {
        // payload errors win over a missing booking
        self.machine.validate_input(&transition)?;

        let current = self.store.get(id)?;
        let offer = self.offer_for(&current);
        let outcome = self.machine.apply_validated(
            &current,
            principal,
            transition,
            &offer.title,
            TimeStamp::new(),
        )?;
        let (booking, notifications) =
            self.store
                .update(outcome.booking, current.version, &outcome.notifications)?;

        info!(
            booking = %booking.id,
            from = %outcome.from,
            to = %booking.status,
            actor = ?outcome.actor,
            version = booking.version,
            "booking transition applied"
        );
        self.dispatch(&notifications);

        Ok(BookingView {
            booking,
            offer,
            viewer: outcome.actor,
        })
    }

    /// Owner answers a pending request
    pub fn set_status(
        &self,
        id: &BookingId,
        principal: &UserId,
        target: Decision,
    ) -> Result<BookingView> {
        self.transition(id, principal, Transition::SetStatus(target))
    }

    /// Booker withdraws a pending or accepted request
    pub fn cancel(&self, id: &BookingId, principal: &UserId) -> Result<BookingView> {
        self.transition(id, principal, Transition::Cancel)
    }

    /// Either party confirms the engagement took place
    pub fn mark_complete(
        &self,
        id: &BookingId,
        principal: &UserId,
        notes: Option<String>,
    ) -> Result<BookingView> {
        self.transition(id, principal, Transition::MarkComplete { notes })
    }

    /// Either party takes back an earlier completion confirmation
    pub fn withdraw_completion(&self, id: &BookingId, principal: &UserId) -> Result<BookingView> {
        self.transition(id, principal, Transition::WithdrawCompletion)
    }

    /// Either party escalates an engagement that did not go as expected
    pub fn raise_dispute(
        &self,
        id: &BookingId,
        principal: &UserId,
        reason: &str,
    ) -> Result<BookingView> {
        self.transition(
            id,
            principal,
            Transition::RaiseDispute {
                reason: reason.to_string(),
            },
        )
    }

    /// Retry notifications whose first publish failed. Returns how many went out.
    pub fn redeliver_pending(&self) -> Result<usize> {
        let pending = self.store.pending_notifications()?;
        let delivered = self.dispatch(&pending);
        if delivered < pending.len() {
            warn!(
                remaining = pending.len() - delivered,
                "notifications still waiting for redelivery"
            );
        }
        Ok(delivered)
    }
}

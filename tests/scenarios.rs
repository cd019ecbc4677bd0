use anyhow::Context;
use skill_booking::{
    BookingConfig, BookingError, BookingService, BookingStatus, Decision,
    notification::{Notification, NotificationInbox, NotificationKind, NotificationPublisher},
    offer::{InMemoryOffers, OfferSummary},
    types::{BookingId, OfferId, UserId},
};
use sled::open;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

/// Inbox that can be switched off to simulate a notification outage.
struct SwitchableInbox {
    inner: NotificationInbox,
    down: AtomicBool,
}

impl NotificationPublisher for SwitchableInbox {
    fn publish(&self, notification: &Notification) -> anyhow::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("notification sink unavailable");
        }
        self.inner.publish(notification)
    }
}

struct Fixture {
    _dir: TempDir,
    service: BookingService,
    sink: Arc<SwitchableInbox>,
    offers: Arc<InMemoryOffers>,
    offer: OfferSummary,
    owner: UserId,
    booker: UserId,
}

impl Fixture {
    fn inbox(&self) -> &NotificationInbox {
        &self.sink.inner
    }
}

// Sled locks its files, so every test gets its own database under a temp dir.
fn setup(name: &str) -> anyhow::Result<Fixture> {
    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join(name))?);

    let sink = Arc::new(SwitchableInbox {
        inner: NotificationInbox::open(&db)?,
        down: AtomicBool::new(false),
    });
    let offers = Arc::new(InMemoryOffers::new());

    let owner = UserId::generate()?;
    let booker = UserId::generate()?;
    let offer = OfferSummary::new(OfferId::generate()?, owner.clone(), "Spanish conversation");
    offers.insert(offer.clone());

    let service = BookingService::new(db, offers.clone(), sink.clone(), &BookingConfig::default())?;

    Ok(Fixture {
        _dir: dir,
        service,
        sink,
        offers,
        offer,
        owner,
        booker,
    })
}

fn accepted_booking(fx: &Fixture) -> anyhow::Result<BookingId> {
    let view = fx
        .service
        .create_booking(&fx.offer.id, &fx.booker, Some("interested".into()))
        .context("Booking failed on create: ")?;
    fx.service
        .set_status(&view.booking.id, &fx.owner, Decision::Accept)
        .context("Booking failed on accept: ")?;
    Ok(view.booking.id)
}

#[test]
fn create_notifies_owner() -> anyhow::Result<()> {
    let fx = setup("create_notifies_owner.db")?;

    let view = fx
        .service
        .create_booking(&fx.offer.id, &fx.booker, Some("interested".into()))?;

    assert_eq!(view.booking.status, BookingStatus::Pending);
    assert_eq!(view.booking.message, "interested");
    assert_eq!(view.booking.offer_owner_id, fx.owner);
    assert_eq!(view.offer.title, "Spanish conversation");

    let notes = fx.inbox().list_for(&fx.owner)?;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Booking);
    assert!(notes[0].text.contains("Spanish conversation"));
    assert!(fx.service.store().pending_notifications()?.is_empty());

    Ok(())
}

#[test]
fn accept_notifies_booker() -> anyhow::Result<()> {
    let fx = setup("accept_notifies_booker.db")?;
    let id = accepted_booking(&fx)?;

    let view = fx.service.get_booking(&id, &fx.booker)?;
    assert_eq!(view.booking.status, BookingStatus::Accepted);

    let notes = fx.inbox().list_for(&fx.booker)?;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::BookingStatus);
    assert!(notes[0].text.contains("accepted"));

    Ok(())
}

#[test]
fn both_confirmations_complete_the_booking() -> anyhow::Result<()> {
    let fx = setup("dual_confirmation.db")?;
    let id = accepted_booking(&fx)?;

    let view = fx.service.mark_complete(&id, &fx.booker, None)?;
    assert_eq!(view.booking.status, BookingStatus::InProgress);
    assert!(view.booking.completed_by_booker());
    assert!(view.booking.completed_at.is_none());

    let owner_notes = fx.inbox().list_for(&fx.owner)?;
    assert_eq!(owner_notes[0].kind, NotificationKind::Completion);

    let view = fx
        .service
        .mark_complete(&id, &fx.owner, Some("great session".into()))?;
    assert_eq!(view.booking.status, BookingStatus::Completed);
    assert!(view.booking.completed_at.is_some());
    assert_eq!(view.booking.session_notes, "great session");

    for party in [&fx.booker, &fx.owner] {
        let completed = fx
            .inbox()
            .list_for(party)?
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Completed)
            .count();
        assert_eq!(completed, 1);
    }

    Ok(())
}

#[test]
fn second_confirmation_by_same_party_is_refused() -> anyhow::Result<()> {
    let fx = setup("already_confirmed.db")?;
    let id = accepted_booking(&fx)?;

    fx.service.mark_complete(&id, &fx.booker, None)?;
    let again = fx.service.mark_complete(&id, &fx.booker, None);
    assert!(matches!(again, Err(BookingError::AlreadyConfirmed)));

    let view = fx.service.get_booking(&id, &fx.booker)?;
    assert_eq!(view.booking.status, BookingStatus::InProgress);
    assert!(view.booking.completed_at.is_none());

    Ok(())
}

#[test]
fn withdraw_without_confirming_is_refused() -> anyhow::Result<()> {
    let fx = setup("nothing_to_withdraw.db")?;
    let id = accepted_booking(&fx)?;

    fx.service.mark_complete(&id, &fx.booker, None)?;
    let result = fx.service.withdraw_completion(&id, &fx.owner);

    assert!(matches!(result, Err(BookingError::NothingToWithdraw)));

    Ok(())
}

#[test]
fn withdraw_reverts_to_accepted() -> anyhow::Result<()> {
    let fx = setup("withdraw_round_trip.db")?;
    let id = accepted_booking(&fx)?;

    fx.service.mark_complete(&id, &fx.owner, None)?;
    let view = fx.service.withdraw_completion(&id, &fx.owner)?;

    assert_eq!(view.booking.status, BookingStatus::Accepted);
    assert!(!view.booking.completed_by_owner());
    assert!(view.booking.owner.confirmed_at.is_none());

    // the withdrawal can be followed by a fresh confirmation
    let view = fx.service.mark_complete(&id, &fx.owner, None)?;
    assert_eq!(view.booking.status, BookingStatus::InProgress);

    Ok(())
}

#[test]
fn dispute_requires_detailed_reason() -> anyhow::Result<()> {
    let fx = setup("dispute.db")?;
    let id = accepted_booking(&fx)?;

    let short = fx.service.raise_dispute(&id, &fx.booker, "less than");
    assert!(matches!(short, Err(BookingError::Validation(_))));

    let view = fx
        .service
        .raise_dispute(&id, &fx.booker, "service was not delivered as described")?;
    assert_eq!(view.booking.status, BookingStatus::Disputed);
    assert_eq!(view.booking.disputed_by.as_ref(), Some(&fx.booker));
    assert!(view.booking.disputed_at.is_some());

    let dispute_notes: Vec<_> = fx
        .inbox()
        .list_for(&fx.owner)?
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Dispute)
        .collect();
    assert_eq!(dispute_notes.len(), 1);

    // dispute is final for this workflow
    let result = fx.service.mark_complete(&id, &fx.owner, None);
    assert!(matches!(result, Err(BookingError::InvalidState(_))));

    Ok(())
}

#[test]
fn disputed_booking_refuses_every_transition() -> anyhow::Result<()> {
    let fx = setup("disputed_final.db")?;
    let id = accepted_booking(&fx)?;
    fx.service.mark_complete(&id, &fx.booker, None)?;
    let disputed = fx
        .service
        .raise_dispute(&id, &fx.owner, "session ended after ten minutes")?;
    assert_eq!(disputed.booking.status, BookingStatus::Disputed);

    for party in [&fx.booker, &fx.owner] {
        let attempts = [
            fx.service.mark_complete(&id, party, None),
            fx.service.withdraw_completion(&id, party),
            fx.service.raise_dispute(&id, party, "raising the same dispute twice"),
        ];
        for result in attempts {
            assert!(matches!(result, Err(BookingError::InvalidState(_))));
        }
    }
    assert!(matches!(
        fx.service.cancel(&id, &fx.booker),
        Err(BookingError::InvalidState(_))
    ));
    assert!(matches!(
        fx.service.set_status(&id, &fx.owner, Decision::Accept),
        Err(BookingError::InvalidState(_))
    ));

    let after = fx.service.get_booking(&id, &fx.booker)?;
    assert_eq!(after.booking.status, BookingStatus::Disputed);
    assert_eq!(after.booking.version, disputed.booking.version);

    Ok(())
}

#[test]
fn concurrent_confirmations_by_one_party_apply_once() -> anyhow::Result<()> {
    let fx = setup("confirmation_race.db")?;

    for _ in 0..8 {
        let id = accepted_booking(&fx)?;

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| fx.service.mark_complete(&id, &fx.booker, None)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("confirming thread panicked"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in &results {
            assert!(matches!(
                result,
                Ok(_) | Err(BookingError::AlreadyConfirmed) | Err(BookingError::Conflict)
            ));
        }

        let booking = fx.service.get_booking(&id, &fx.booker)?.booking;
        assert_eq!(booking.status, BookingStatus::InProgress);
        assert!(booking.completed_by_booker());
        assert!(!booking.completed_by_owner());

        let completions = fx
            .inbox()
            .list_for(&fx.owner)?
            .into_iter()
            .filter(|n| n.booking_id == id && n.kind == NotificationKind::Completion)
            .count();
        assert_eq!(completions, 1);
    }

    Ok(())
}

#[test]
fn slash_in_user_ids_keeps_listings_apart() -> anyhow::Result<()> {
    let fx = setup("slashed_ids.db")?;
    let owner = UserId::from("tenant/owner");
    let booker = UserId::from("tenant/booker");
    let tenant = UserId::from("tenant");
    let offer = OfferSummary::new(OfferId::generate()?, owner.clone(), "Welding");
    fx.offers.insert(offer.clone());

    let view = fx.service.create_booking(&offer.id, &booker, None)?;
    fx.service.set_status(&view.booking.id, &owner, Decision::Accept)?;

    assert_eq!(fx.service.bookings_made_by(&booker)?.len(), 1);
    assert_eq!(fx.service.bookings_received_by(&owner)?.len(), 1);
    assert!(fx.service.bookings_made_by(&tenant)?.is_empty());
    assert!(fx.service.bookings_received_by(&tenant)?.is_empty());

    assert_eq!(fx.inbox().list_for(&owner)?.len(), 1);
    assert_eq!(fx.inbox().list_for(&booker)?.len(), 1);
    assert!(fx.inbox().list_for(&tenant)?.is_empty());

    Ok(())
}

#[test]
fn dispute_reason_is_checked_before_the_booking_is_loaded() -> anyhow::Result<()> {
    let fx = setup("dispute_payload_first.db")?;
    let missing = BookingId::from("booking1missing");

    let short = fx.service.raise_dispute(&missing, &fx.booker, "too short");
    assert!(matches!(short, Err(BookingError::Validation(_))));

    let detailed = fx
        .service
        .raise_dispute(&missing, &fx.booker, "a detailed enough reason");
    assert!(matches!(detailed, Err(BookingError::NotFound(_))));

    Ok(())
}

#[test]
fn rejected_booking_cannot_be_cancelled() -> anyhow::Result<()> {
    let fx = setup("rejected_cancel.db")?;
    let view = fx.service.create_booking(&fx.offer.id, &fx.booker, None)?;

    let view = fx
        .service
        .set_status(&view.booking.id, &fx.owner, Decision::Reject)?;
    assert_eq!(view.booking.status, BookingStatus::Rejected);

    let result = fx.service.cancel(&view.booking.id, &fx.booker);
    assert!(matches!(result, Err(BookingError::InvalidState(_))));

    Ok(())
}

#[test]
fn booker_cancels_accepted_booking() -> anyhow::Result<()> {
    let fx = setup("cancel_accepted.db")?;
    let id = accepted_booking(&fx)?;

    let owner_cancel = fx.service.cancel(&id, &fx.owner);
    assert!(matches!(owner_cancel, Err(BookingError::Forbidden(_))));

    let view = fx.service.cancel(&id, &fx.booker)?;
    assert_eq!(view.booking.status, BookingStatus::Cancelled);

    let again = fx.service.set_status(&id, &fx.owner, Decision::Accept);
    assert!(matches!(again, Err(BookingError::InvalidState(_))));

    Ok(())
}

#[test]
fn self_booking_and_missing_records() -> anyhow::Result<()> {
    let fx = setup("self_booking.db")?;

    let own = fx.service.create_booking(&fx.offer.id, &fx.owner, None);
    assert!(matches!(own, Err(BookingError::SelfBooking)));

    let missing_offer = fx
        .service
        .create_booking(&OfferId::from("offer1missing"), &fx.booker, None);
    assert!(matches!(missing_offer, Err(BookingError::NotFound("Offer"))));

    let missing_booking = fx.service.cancel(&BookingId::from("booking1missing"), &fx.booker);
    assert!(matches!(missing_booking, Err(BookingError::NotFound("Booking"))));

    Ok(())
}

#[test]
fn strangers_cannot_see_or_touch_bookings() -> anyhow::Result<()> {
    let fx = setup("strangers.db")?;
    let id = accepted_booking(&fx)?;
    let stranger = UserId::generate()?;

    assert!(matches!(
        fx.service.get_booking(&id, &stranger),
        Err(BookingError::Forbidden(_))
    ));
    assert!(matches!(
        fx.service
            .raise_dispute(&id, &stranger, "this is a long enough reason"),
        Err(BookingError::Forbidden(_))
    ));

    Ok(())
}

#[test]
fn listings_split_by_role() -> anyhow::Result<()> {
    let fx = setup("listings.db")?;
    fx.service.create_booking(&fx.offer.id, &fx.booker, None)?;
    fx.service.create_booking(&fx.offer.id, &fx.booker, None)?;

    let made = fx.service.bookings_made_by(&fx.booker)?;
    let received = fx.service.bookings_received_by(&fx.owner)?;

    assert_eq!(made.len(), 2);
    assert_eq!(received.len(), 2);
    assert!(fx.service.bookings_made_by(&fx.owner)?.is_empty());
    assert!(received.iter().all(|v| v.offer.title == "Spanish conversation"));

    Ok(())
}

#[test]
fn removed_offer_still_displays() -> anyhow::Result<()> {
    let fx = setup("removed_offer.db")?;
    let id = accepted_booking(&fx)?;

    fx.offers.remove(&fx.offer.id);
    let view = fx.service.mark_complete(&id, &fx.booker, None)?;

    assert_eq!(view.booking.status, BookingStatus::InProgress);
    assert_ne!(view.offer.title, "Spanish conversation");

    Ok(())
}

#[test]
fn notification_outage_never_blocks_a_transition() -> anyhow::Result<()> {
    let fx = setup("notification_outage.db")?;
    let id = accepted_booking(&fx)?;

    fx.sink.down.store(true, Ordering::SeqCst);
    let view = fx.service.mark_complete(&id, &fx.booker, None)?;
    assert_eq!(view.booking.status, BookingStatus::InProgress);

    let pending = fx.service.store().pending_notifications()?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recipient, fx.owner);
    assert_eq!(fx.service.redeliver_pending()?, 0);

    fx.sink.down.store(false, Ordering::SeqCst);
    assert_eq!(fx.service.redeliver_pending()?, 1);
    assert_eq!(fx.service.redeliver_pending()?, 0);

    let completions = fx
        .inbox()
        .list_for(&fx.owner)?
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Completion)
        .count();
    assert_eq!(completions, 1);

    Ok(())
}

#[test]
fn inbox_read_model() -> anyhow::Result<()> {
    let fx = setup("inbox.db")?;
    let id = accepted_booking(&fx)?;
    fx.service.mark_complete(&id, &fx.owner, None)?;

    // accepted + owner confirmed
    assert_eq!(fx.inbox().unread_count(&fx.booker)?, 2);

    let newest = fx.inbox().list_for(&fx.booker)?;
    assert_eq!(newest[0].kind, NotificationKind::Completion);

    fx.inbox().mark_read(&newest[0].id, &fx.booker)?;
    assert_eq!(fx.inbox().unread_count(&fx.booker)?, 1);
    assert_eq!(fx.inbox().mark_all_read(&fx.booker)?, 1);

    fx.inbox().delete(&newest[1].id, &fx.booker)?;
    assert_eq!(fx.inbox().list_for(&fx.booker)?.len(), 1);

    Ok(())
}

//! Walks one booking from request to a mutually confirmed completion.
//!
//! Run with `cargo run --example walkthrough`. The database path comes from
//! `SKILL_BOOKING_DB_PATH` (default `skill_booking.db`).

use anyhow::Context;
use skill_booking::{
    BookingConfig, BookingService, Decision,
    notification::NotificationInbox,
    offer::{OfferSummary, SledOffers},
    telemetry,
    types::{OfferId, UserId},
};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let config = BookingConfig::from_env().context("Failed to load configuration")?;
    telemetry::init(&config.log_filter);

    let db = Arc::new(sled::open(&config.db_path)?);
    let offers = Arc::new(SledOffers::open(&db)?);
    let inbox = Arc::new(NotificationInbox::open(&db)?);

    let owner = UserId::generate()?;
    let booker = UserId::generate()?;
    let offer = OfferSummary::new(OfferId::generate()?, owner.clone(), "Sourdough baking");
    offers.insert(&offer)?;

    let service = BookingService::new(db.clone(), offers, inbox.clone(), &config)?;

    let view = service.create_booking(&offer.id, &booker, Some("interested".into()))?;
    let id = view.booking.id;
    service.set_status(&id, &owner, Decision::Accept)?;
    service.mark_complete(&id, &booker, Some("learned a lot".into()))?;
    let view = service.mark_complete(&id, &owner, None)?;

    println!("booking {} is {}", view.booking.id, view.booking.status);
    for party in [&booker, &owner] {
        for note in inbox.list_for(party)? {
            println!("  [{party}] {:?}: {} ({})", note.kind, note.text, note.link);
        }
    }

    db.flush()?;
    Ok(())
}

//! Read-only view of the offer catalog
use super::types::{OfferId, UserId};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OfferSummary {
    #[n(0)]
    pub id: OfferId,
    #[n(1)]
    pub owner_id: UserId,
    #[n(2)]
    pub title: String,
}

impl OfferSummary {
    pub fn new(id: OfferId, owner_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id,
            owner_id,
            title: title.into(),
        }
    }

    // Stand-in for display when the offer has been removed after booking.
    pub(crate) fn unavailable(id: OfferId, owner_id: UserId) -> Self {
        Self::new(id, owner_id, "an offer that is no longer listed")
    }
}

/// Resolves an offer id to its owner and title.
pub trait OfferLookup: Send + Sync {
    fn find_offer(&self, id: &OfferId) -> anyhow::Result<Option<OfferSummary>>;
}

/// In-process catalog, handy for tests and single-node setups.
#[derive(Default)]
pub struct InMemoryOffers {
    offers: RwLock<HashMap<OfferId, OfferSummary>>,
}

impl InMemoryOffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, offer: OfferSummary) {
        if let Ok(mut offers) = self.offers.write() {
            offers.insert(offer.id.clone(), offer);
        }
    }

    pub fn remove(&self, id: &OfferId) {
        if let Ok(mut offers) = self.offers.write() {
            offers.remove(id);
        }
    }
}

impl OfferLookup for InMemoryOffers {
    fn find_offer(&self, id: &OfferId) -> anyhow::Result<Option<OfferSummary>> {
        let offers = self
            .offers
            .read()
            .map_err(|_| anyhow::anyhow!("offer catalog lock poisoned"))?;
        Ok(offers.get(id).cloned())
    }
}

/// Offer summaries kept in a sled tree next to the bookings.
#[derive(Clone)]
pub struct SledOffers {
    tree: sled::Tree,
}

impl SledOffers {
    pub fn open(db: &sled::Db) -> anyhow::Result<Self> {
        Ok(Self {
            tree: db.open_tree("offers")?,
        })
    }

    pub fn insert(&self, offer: &OfferSummary) -> anyhow::Result<()> {
        self.tree
            .insert(offer.id.as_str(), minicbor::to_vec(offer)?)?;
        Ok(())
    }
}

impl OfferLookup for SledOffers {
    fn find_offer(&self, id: &OfferId) -> anyhow::Result<Option<OfferSummary>> {
        match self.tree.get(id.as_str())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

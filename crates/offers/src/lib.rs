//! `faktura-offers` — offers (Angebote).
//!
//! An offer quotes lines to a customer under an `AN-` document number. Once
//! accepted it can be converted into an invoice by the application layer.

pub mod offer;

pub use offer::{
    AcceptOffer, CreateOffer, ExpireOffer, Offer, OfferAccepted, OfferCommand, OfferCreated,
    OfferEvent, OfferExpired, OfferId, OfferLine, OfferRejected, OfferSent, OfferStatus,
    RejectOffer, SendOffer,
};

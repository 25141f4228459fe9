//! Database schemas for the ledger
//!
//! Defines MongoDB document structures for players and referral records.

mod metadata;
mod referral;
mod user;

pub use metadata::Metadata;
pub use referral::{
    ReferralDoc, REFERRAL_COLLECTION, REFERRAL_STATUS_PENDING, REFERRAL_STATUS_SETTLED,
};
pub use user::{UserDoc, RANK_UNRANKED, USER_COLLECTION};

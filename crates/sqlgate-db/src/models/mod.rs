//! Repositories for the bot's own tables, built on [`Mapper`](crate::Mapper).
//!
//! - [`users`] -- user flags (admin, banned) and referral links
//! - [`sponsor_verifications`] -- audit trail of sponsor-channel checks

pub mod sponsor_verifications;
pub mod users;

pub use sponsor_verifications::{SPONSOR_VERIFICATIONS, SponsorVerification, SponsorVerifications};
pub use users::{USERS, UserRow, Users};

#![warn(clippy::unwrap_used)]

pub mod cards;
pub mod snapshots;
pub mod users;

pub use cards::{CardFilter, CardInsert, CardRepository, CardSearchPage, InMemoryCardRepository};
pub use snapshots::{InMemorySnapshotStore, SnapshotStore};
pub use users::{InMemoryUserDirectory, UserDirectory, UserRecord};

//! Core functionality of the firewall.
//! This module contains address parsing and matching, the list store, the
//! classifier built on top of it and the attack detector.

mod address;
mod attack_detector;
mod classifier;
mod countries;
mod list_store;
mod response;

pub use address::{AddressMatcher, AddressSpec};
pub use attack_detector::{AttackDetector, AttackRecord, AttackType};
pub use classifier::{Classification, Classifier};
pub use countries::is_known as is_known_country;
pub use list_store::{EntrySource, ListEntry, ListOutcome, ListOutcomeKind, ListStore};
pub use response::ActionSignal;

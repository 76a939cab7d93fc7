//! Preimage discovery and fan-out for a payment-channel node.
//!
//! [`PreimageBeacon`] answers "is the preimage for this hash known?", keeps
//! retrying external preimages in the background and announces every newly
//! cached preimage to its subscribers. Invoice resolution lives on
//! [`ContractTerm`] through the [`PreimageResolver`] trait.

pub mod beacon;
pub mod config;
pub mod error;
pub mod invoice;
pub mod subscription;
pub mod witness;

#[cfg(test)]
mod test_support;

pub use beacon::{PollOutcome, PreimageBeacon, WitnessBeacon};
pub use config::BeaconConfig;
pub use error::{InvoiceStoreError, PaymentHashError, WitnessCacheError};
pub use invoice::{
    ContractTerm, Invoice, InvoiceDatabase, InvoiceRegistry, MemoryInvoiceStore, PreimageResolver,
};
pub use subscription::WitnessSubscription;
pub use witness::{MemoryWitnessCache, WitnessCache, WitnessType};

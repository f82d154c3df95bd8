// iptables chain and rule management for the network policy manager
pub mod chain;
pub mod entry;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod manager;
pub mod reconcile;

#[cfg(test)]
pub(crate) mod testing;

pub use entry::*;
pub use error::*;
pub use executor::*;
pub use manager::*;
pub use reconcile::ReconcileAction;

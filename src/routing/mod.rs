//! Destination selection for encoded keys.

pub mod router;
pub mod table;

pub use router::Router;
pub use table::RoutingTable;

//! Trigger/behavior event alignment.
//!
//! Recording-side triggers and behavior-log timestamps live on independent
//! clocks. The single `start` trigger anchors the behavior clock onto the
//! recording clock; everything else is matched by nearest timestamp.

pub mod align;
pub mod check;
pub mod kind;
pub mod table;

pub use align::*;
pub use check::*;
pub use kind::*;
pub use table::*;

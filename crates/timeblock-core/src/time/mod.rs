//! Time interval algebra.
//!
//! Pure, in-memory interval data structures used by the scheduling engine:
//! - [`Timespan`]: immutable half-open interval of absolute instants
//! - [`TimeWindow`]: mutable busy/free workspace for one scheduling attempt
//! - [`Availability`] / [`SlotRule`]: constraints bounding where and how long
//!   placed work may be

pub mod rules;
pub mod span;
pub mod window;

pub use rules::{Availability, ClockWindow, DurationRule, SlotRule};
pub use span::Timespan;
pub use window::TimeWindow;

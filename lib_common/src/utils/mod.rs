//! # Utilities Module
//!
//! General-purpose helpers that do not belong to a specific component.
//!
//! ## Contained Modules:
//!
//! - **`schedule`**: Calendar-aligned wake-up times ("every 10 minutes at
//!   :00, :10, :20 ...") and the matching async wait.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Calendar-aligned scheduling helpers.
pub mod schedule;

pub use schedule::{next_boundary, wait_until_next_boundary};

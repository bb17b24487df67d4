//! # lib_common
//!
//! Building blocks of the Upbit trade broadcaster. Each folder is gated
//! behind a cargo feature of the same name; `full` (the default) enables
//! all of them.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "markets")]
pub mod markets;
#[cfg(feature = "notify")]
pub mod notify;
#[cfg(feature = "publish")]
pub mod publish;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "utils")]
pub mod utils;

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod diff;
pub mod entities;
pub mod events;
pub mod message;
pub mod processors;
pub mod store;
pub mod utils;

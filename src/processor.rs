//! Epoch processing: the per-epoch fetch/write unit, bulk catch-up, the
//! single-flight guard, live head handling, and the service that sequences
//! them at startup.

pub mod catchup;
pub mod epoch;
pub mod guard;
pub(crate) mod lifecycle;
pub mod listener;
pub mod service;

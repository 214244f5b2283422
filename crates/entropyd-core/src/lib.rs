//! # entropyd-core
//!
//! Core library for entropyd, a three-tier random-number service:
//!
//! ```text
//! [secure element TRNG] --hash--> [TRNG queue] --drain--> [Fortuna pools]
//!                                      |                        |
//!                                      v                        v
//!                                 consume API             [Fortuna queue]
//!                                                               |
//!                                                               v
//!                                                          consume API
//! ```
//!
//! A periodic producer draws 32-byte blocks from an ATECC608A-class secure
//! element (or the OS entropy source when the hardware is unavailable),
//! hashes them and appends the result to a bounded persistent queue with
//! consume-once semantics. A second periodic loop drains that queue into a
//! Fortuna accumulator, reseeds an AES-256-CTR generator on the doubling
//! schedule, and emits amplified pseudo-random chunks into a second queue.
//! Both queues are served to clients by `entropyd-server`.
//!
//! Records carry their provenance (`hardware` or `software`) so consumers
//! with attestation requirements can tell the two apart; software output is
//! still cryptographically strong.

pub mod config;
pub mod error;
pub mod fortuna;
pub mod producer;
pub mod scheduler;
pub mod secure_element;
pub mod store;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use fortuna::{pool_drains, Fortuna, FortunaProcessor, FortunaSnapshot, TickSummary};
pub use producer::{EntropyDevice, ProducerMode, TrngProducer};
pub use scheduler::spawn_periodic;
pub use secure_element::SecureElement;
pub use store::{DailySourceCounts, FortunaRecord, Source, StatsSnapshot, Store, TrngRecord};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#![deny(unsafe_code)]

//! Producer-side Kafka egress for single-threaded cooperative callers.
//!
//! The caller runs on one cooperative task: [`Producer::produce`] and
//! [`Producer::drain_deliveries`] are synchronous and bounded, while
//! [`Producer::poll_once`] and [`Producer::close`] offload the broker
//! client's blocking calls to the tokio blocking pool. Delivery
//! confirmations cross from the client's callback thread back to the caller
//! through a mutex-guarded FIFO and are handed to per-message completion
//! callbacks during a drain.
//!
//! ```rust,ignore
//! use kafka_egress::{KafkaProducer, Message, ProducerConfig};
//!
//! let cfg = ProducerConfig::new("localhost:9092").option("queue.buffering.max.ms", "100");
//! let mut producer = KafkaProducer::connect(cfg)?;
//! producer.produce(
//!     Message::new("events").value("payload").on_delivery(|err| {
//!         match err {
//!             None => log::info!("delivered"),
//!             Some(reason) => log::warn!("delivery failed: {}", reason),
//!         }
//!         Ok(())
//!     }),
//! )?;
//! loop {
//!     producer.poll_once().await?;
//!     let (_count, err) = producer.drain_deliveries(128);
//!     if let Some(err) = err {
//!         log::warn!("{}", err);
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod offload;
pub mod queue;
pub mod session;
pub mod topics;
pub mod transport;

#[cfg(feature = "rdkafka")]
pub mod kafka;

pub use config::ProducerConfig;
pub use error::EgressError;
pub use queue::{DeliveryOutcome, DeliveryQueue, DeliveryToken};
pub use session::{DeliveryCallback, Message, Producer};
pub use transport::Transport;

#[cfg(feature = "rdkafka")]
pub use kafka::{KafkaProducer, KafkaTransport};

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

pub type Result<T, E = EgressError> = std::result::Result<T, E>;

//! Photo Album Pipeline - queue and fan-out transport for the ingestion pipeline
//!
//! This library provides the delivery primitives the catalog services are built on:
//!
//! - Object-store event and fan-out envelopes, including nested unwrapping and
//!   object key decoding
//! - A fan-out [`FanoutChannel`] whose subscriptions carry declarative filter policies
//! - Batched, at-least-once queue consumption with per-entry acknowledgement
//! - Dead-letter publishing
//!
//! # Example
//!
//! ```rust,no_run
//! use album_pipeline::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = Arc::new(MemoryBroker::new());
//!     broker.create_queue("uploads").await;
//!
//!     let channel = FanoutChannel::builder("new-images")
//!         .subscribe(
//!             "uploads",
//!             FilterPolicy::allowlist("x-object-event", ["ObjectCreated"]),
//!             Arc::new(QueueEndpoint::new(broker.clone(), "uploads")),
//!         )
//!         .build();
//!
//!     channel.publish(Notification::new("{}")).await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod producer;
pub mod transport;

// Re-export main types
pub use channel::{
    ChannelError, FanoutChannel, FanoutChannelBuilder, FilterPolicy, Notification,
    PublishReport, QueueEndpoint, SubscriptionEndpoint,
};
pub use config::{AwsConfig, ConfigError, ConsumerConfig, QueueConfig, QueueUrls};
pub use consumer::{
    async_trait, BatchReport, ConsumerError, ConsumerSettings, IncomingMessage, MessageHandler,
    MessageMetadata, QueueConsumer,
};
pub use envelope::{
    decode_object_key, unwrap_object_events, Envelope, EnvelopeError, FanoutEnvelope,
    ObjectEvent, ObjectEventKind, ObjectEventRecord,
};
pub use producer::{DeadLetterEntry, OutgoingMessage, PublishError, QueuePublisher};
pub use transport::memory::{MemoryBroker, QueueOptions, RedrivePolicy};
pub use transport::sqs::SqsQueueClient;
pub use transport::{QueueClient, ReceivedMessage, TransportError};

/// Message attribute carrying the metadata update type
pub const METADATA_TYPE_ATTRIBUTE: &str = "x-metadata-type";

/// Message attribute carrying the object event family set by the ingress router
pub const OBJECT_EVENT_ATTRIBUTE: &str = "x-object-event";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::{FanoutChannel, FilterPolicy, Notification, QueueEndpoint};
    pub use crate::consumer::{
        async_trait, ConsumerError, IncomingMessage, MessageHandler, QueueConsumer,
    };
    pub use crate::producer::{DeadLetterEntry, OutgoingMessage, QueuePublisher};
    pub use crate::transport::memory::MemoryBroker;
    pub use crate::transport::QueueClient;
}

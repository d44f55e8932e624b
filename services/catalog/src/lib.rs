//! Photo Album Catalog Service
//!
//! Keeps the image catalog in step with the image bucket. Object-store
//! notifications and metadata messages arrive on an ingress queue, are routed
//! onto a filtered fan-out channel, and are processed by one handler per
//! subscription queue. Committed catalog changes drive upload confirmations, and
//! dead-lettered uploads drive rejection notices.
//!
//! ## Architecture
//!
//! ```text
//!  ingress queue
//!        │
//!        ▼
//! ┌──────────────┐   ObjectCreated   ┌──────────────┐   reject   ┌──────────────┐
//! │ Ingress      │──────────────────▶│ Validator    │───────────▶│ bad-images   │
//! │ Router       │                   └──────────────┘            └──────────────┘
//! └──────────────┘                          │ insert                    │
//!     │      │  ObjectRemoved               ▼                           ▼
//!     │      │       ┌──────────────┐  ┌──────────────┐          ┌──────────────┐
//!     │      └──────▶│ Deletion     │─▶│ images       │          │ Rejection    │
//!     │              │ Handler      │  │ (PostgreSQL) │          │ Notifier     │
//!     │              └──────────────┘  └──────────────┘          └──────────────┘
//!     │  Caption/Date/Photographer ▲          │ NOTIFY
//!     │       ┌──────────────┐     │          ▼
//!     └──────▶│ Metadata     │─────┘   ┌──────────────┐
//!             │ Updater      │         │ Change       │
//!             └──────────────┘         │ Notifier     │
//!                                      └──────────────┘
//! ```

pub mod catalog_store;
pub mod change_feed;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod memory;
pub mod model;
pub mod object_store;
pub mod update_builder;

pub use catalog_store::{CatalogStore, PgCatalogStore, PutOutcome};
pub use change_feed::PgChangeFeed;
pub use config::Config;
pub use error::{CatalogError, MailError, ObjectStoreError, PipelineError};
pub use handlers::{
    ChangeNotifier, DeletionHandler, IngressRouter, MetadataUpdater, NotifyOutcome,
    RejectionNotifier, UploadDecision, Validator,
};
pub use mailer::{Mailer, Notice, SmtpMailer};
pub use model::{ChangeEvent, ChangeKind, ImageRecord, MetadataType, MetadataUpdateEvent};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use update_builder::{UpdateBuilder, UpdateStatement};

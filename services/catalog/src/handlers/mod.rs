//! Queue and change-feed handlers, one per pipeline stage.

pub mod confirmation;
pub mod deletion;
pub mod metadata;
pub mod rejection;
pub mod router;
pub mod validator;

pub use confirmation::ChangeNotifier;
pub use deletion::DeletionHandler;
pub use metadata::MetadataUpdater;
pub use rejection::RejectionNotifier;
pub use router::IngressRouter;
pub use validator::{UploadDecision, Validator};

/// Result of an attempt to notify the uploader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// The event does not call for a notification
    Ignored,
    /// The mail could not be sent; logged and not retried
    Failed,
}

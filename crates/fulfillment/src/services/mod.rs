//! External collaborator interfaces.
//!
//! The core depends only on these shapes; concrete bindings (a directory
//! API, a drive API, an SMTP relay) live behind them. Every in-memory
//! implementation carries fail toggles so tests can exercise the
//! best-effort policy of the dispatcher.

pub mod directory;
pub mod drive;
pub mod mail;
pub mod template_fetch;

use thiserror::Error;

pub use directory::{DirectoryService, InMemoryDirectoryService, MemberInsert};
pub use drive::{DriveService, InMemoryDriveService, extract_file_id};
pub use mail::{InMemoryMailService, MailService, OutboundEmail};
pub use template_fetch::{HttpTemplateFetcher, InMemoryTemplateFetcher, TemplateFetcher};

/// Error returned by an external collaborator call.
#[derive(Debug, Clone, Error)]
pub enum SideEffectError {
    /// The service could not be reached or refused the call.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service rejected the request as invalid.
    #[error("request rejected: {0}")]
    Rejected(String),
}

pub mod engine;
pub mod filter;
pub mod folder;
pub mod ledger;
pub mod uploader;

pub use engine::{SyncConfig, SyncEngine, SyncReport, DEFAULT_EXTENSIONS, DEFAULT_TARGET_FOLDER};
pub use filter::{CandidateFilter, FilterPolicy, DEFAULT_RECENCY_WINDOW};
pub use folder::{FolderResolver, RemoteFolderPath};
pub use ledger::Ledger;
pub use uploader::{UploadOutcome, Uploader};

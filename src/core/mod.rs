pub mod checkpoint;
pub mod engine;
pub mod hasher;
pub mod path;
pub mod scanner;
pub mod session;
pub mod state;

pub use checkpoint::Checkpoint;
pub use engine::{FailedItem, ItemKind, SyncEngine, SyncReport, SyncStatus};
pub use hasher::{hash_bytes, hash_file};
pub use path::{is_excluded, normalize_path, ExcludeRules};
pub use scanner::{LocalScanner, ScanError};
pub use session::{SessionState, TransferSession};
pub use state::{diff, StateEntry, StateStore, SyncState, UploadPlan};

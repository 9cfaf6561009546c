pub mod cache;
pub mod checksum;
pub mod engine;
pub mod index;
pub mod lock;
pub mod scanner;
pub mod upload;

pub use cache::{IndexCache, IndexLoader};
pub use checksum::{ChecksumProvider, ChecksumStrategy, ContentHash, ExternalTool};
pub use engine::{ChangeBatch, FileUpdate, SyncEngine};
pub use index::{FileIndex, FileInfo, ProjectFile};
pub use lock::ProjectLocks;
pub use scanner::FileScanner;
pub use upload::{MemoryUploads, StreamUploads, UploadReader, UploadSource};

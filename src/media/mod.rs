pub mod catalog;
pub mod descriptor;
pub mod error;
pub mod kind;
pub mod preload;
pub mod resolver;
pub mod store;
pub mod transport;
pub mod upload;

pub use catalog::MediaCatalog;
pub use error::MediaError;
pub use kind::MediaKind;
pub use preload::{run_startup_preload, PreloadOptions, PreloadOrchestrator, PreloadSettings};
pub use resolver::{HandleSource, MediaResolver, ResolveRequest, StaticHandles};
pub use store::{FileHandleBackend, HandleStore};
pub use transport::{MediaTransport, TelegramTransport};

// Public modules
pub mod chat;
pub mod client;
pub mod client_logger;
pub mod credentials;
pub mod error;
pub mod observability;
pub mod refresh;
pub mod render;
pub mod sse;
pub mod transport;
pub mod types;
pub mod utils;

// Re-exports
pub use client::ZeroX;
pub use client_logger::ClientLogger;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use refresh::{RefreshCoordinator, SessionEvent};
pub use render::{PlainTextRenderer, Renderer};
pub use sse::{FrameStream, decode_frames, dispatch_frames};
pub use transport::{ByteStream, CallDescriptor, ReqwestTransport, Transport, TransportResponse};
pub use types::*;

pub mod backend;
pub mod error;
pub mod http;

pub use self::backend::GameBackend;
pub use self::error::{BackendError, BackendResult};

// Session-maintaining HTTP client module
// Keeps a long-lived signed-in session alive: bearer-token attachment,
// refresh-then-retry on expired tokens, single-flight refresh, and a
// proactive expiry monitor. Forced logouts are surfaced explicitly.

pub mod error;
pub mod session;
pub mod storage;

pub use error::ClientError;
pub use session::{SessionClient, SessionStatus};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenPair, TokenStorage};

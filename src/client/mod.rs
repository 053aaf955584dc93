//! Editor-side collaboration client: connection manager plus presence reducers.

pub mod backoff;
pub mod color;
pub mod connection;
pub mod presence;

pub use backoff::{Backoff, BackoffConfig};
pub use color::{color_for_user, USER_COLORS};
pub use connection::{ClientConfig, ClientError, ClientEvent, CollabClient, CollabHandler, ConnectionState};
pub use presence::{CollabState, UserPresence, TYPING_TIMEOUT};

//! Types related to [`SessionConfig`][crate::SessionConfig].
mod cookie;
mod state;
mod tracking;

pub use cookie::SessionCookieConfig;
pub use state::{InactivityTimeout, SessionStateConfig};
pub use tracking::SessionTrackingConfig;

//! Credential identities, token grants, redacted secrets, and validated identifiers.

pub mod credential;
pub mod grant;
pub mod id;
pub mod secret;

pub use credential::*;
pub use grant::*;
pub use id::*;
pub use secret::*;

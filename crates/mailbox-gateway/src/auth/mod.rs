//! Authentication: pre-auth signing and the login handshakes.

pub mod manager;
pub mod preauth;

pub use manager::{AuthError, AuthenticationManager, AUTH_REQUEST};
pub use preauth::{PreauthCredential, PreauthError};

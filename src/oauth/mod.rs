//! OAuth 2.0 authorization code flow, relying-party side
//!
//! - Redirect anonymous browsers to the IdP's authorize endpoint
//! - Recognize the IdP's callback (`code` or `error` with `state`)
//! - Exchange the code server-to-server as proof of login

mod authorize;
mod callback;
mod exchange;

pub use authorize::AuthorizationRedirector;
pub use callback::{Callback, CallbackParams, error_response};
pub use exchange::CodeExchanger;

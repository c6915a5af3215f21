//! Principal registration, token lifecycle and login orchestration.

pub mod api;
pub mod context;
pub mod proxy;
pub mod registry;
pub mod token;
pub mod traits;

pub use api::{AuthenticationApi, HttpAuthenticationApi, AUTHENTICATE_PATH};
pub use context::{
    AuthenticationContext, ClientCertificate, HttpTransport, LoginFailure, PrincipalKind,
    TokenSnapshot,
};
pub use proxy::AuthenticationProxy;
pub use registry::PrincipalRegistry;
pub use token::{AuthenticationToken, SessionToken};
pub use traits::{SessionReAuthenticator, TokenProvider, TransportProvider};

//! tandem-core — shared plumbing for the mail and calendar agents
//!
//! Scoped delegation between agents, bearer-token gatekeeping, the response
//! envelope and error taxonomy, configuration and the mock fallback policy.

pub mod config;
pub mod delegation;
pub mod envelope;
pub mod error;
pub mod event;
pub mod fallback;
pub mod gatekeeper;
pub mod google;
pub mod protocol;
pub mod rate_limit;
pub mod redact;
pub mod scope;
pub mod secrets;
pub mod server;
pub mod token;
pub mod validator;

pub use config::TandemConfig;
pub use delegation::{CredentialProvider, DelegatedCredential, DelegationClient};
pub use envelope::{Envelope, Reply};
pub use error::{ApiError, ProviderError, Service};
pub use event::{CalendarEvent, CalendarEventDraft, EventPatch};
pub use fallback::{CallKind, with_fallback};
pub use gatekeeper::{Authenticated, CalendarRead, CalendarWrite, Gatekeeper, Scoped, ValidJson, ValidQuery};
pub use google::GoogleTokenSource;
pub use rate_limit::RateLimiter;
pub use scope::{CALENDAR_AUDIENCE, CALENDAR_READ, CALENDAR_WRITE, ScopeSet};
pub use token::LocalIssuer;
pub use validator::{TokenValidator, ValidatedToken};

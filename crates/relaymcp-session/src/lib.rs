//! Credential, session, and transport-persistence stores (spec §4.2/§4.5).

mod credential;
mod session;
mod transport_persistence;

pub use credential::{CredentialStore, OAuthCredentials};
pub use session::{Session, SessionStats, SessionStore};
pub use transport_persistence::{
    RestoreOutcome, TransportConfigSnapshot, TransportPersistenceStats, TransportPersistenceStore, TransportSession,
};

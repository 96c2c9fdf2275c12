//! Transport Manager / Session Manager (spec §4.13): the stdio and HTTP
//! transport bindings, session resolution/persistence, and the request
//! pipeline wiring the OAuth, session, and event-store layers together.

mod session_manager;
mod stdio;
mod transport;

pub use session_manager::{
    DispatchOutcome, ManagerConfig, ReplayedEvent, RestoreReport, SessionManager, ShutdownReport,
};
pub use stdio::run_stdio;
pub use transport::{BroadcastTransport, MessageDispatcher, Transport};

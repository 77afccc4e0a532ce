pub mod breakpoints;
pub mod events;
pub mod handles;
pub mod inspect;
pub mod request;
pub mod session;
pub mod state;

pub use events::EventPublisher;
pub use request::DebugRequest;
pub use session::{DebugSession, SessionHandle, SessionParts};
pub use state::SessionState;

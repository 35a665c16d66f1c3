pub mod clock;
pub mod domain;
pub mod expiry;
pub mod manager;
pub mod memory;
pub mod ports;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    Component, Difficulty, ImageAnalysis, ImageRef, NewSession, Role, SessionRecord, SessionUpdate,
    TapPoint, Turn,
};
pub use expiry::ExpiryPolicy;
pub use manager::{BackendKind, SessionManager, SessionStats};
pub use memory::{InMemoryBackend, Lookup};
pub use ports::{PortError, PortResult, SessionBackend, VisionService};

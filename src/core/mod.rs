pub mod audio;
pub mod realtime;
pub mod session;
pub mod telephony;
pub mod tools;

pub use realtime::{ModelConnector, ModelLeg, RealtimeError, RealtimeResult, SharedConnector};
pub use session::{RelayContext, RelaySettings, SessionRegistry, SessionRelay, TelephonyLeg};
pub use tools::{ToolRegistry, ToolSpec};

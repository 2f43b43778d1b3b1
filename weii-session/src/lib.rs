pub mod collector;
pub mod config;
pub mod link;
pub mod session;
pub mod trigger;

pub use collector::{CollectorConfig, CollectorState, Feed, InvalidTransition, SampleCollector};
pub use config::{Config, ConfigError, LinkConfig, OutputConfig, SessionConfig};
pub use link::mock::{MockBoard, MockBoardConfig};
pub use link::stream::StreamLink;
pub use link::{LinkChannel, LinkError};
pub use session::{AbortReason, Session, SessionError};
pub use trigger::{StartSignal, StartTrigger, start_trigger};

pub mod audio;
pub mod config;
pub mod error;
pub mod kernel;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Result, VoiceError};
pub use kernel::controller::SessionController;
pub use kernel::state::{SessionState, SessionView};
pub use kernel::transcript::{Sender, TranscriptEntry};

mod log;

pub use log::{ChatLog, ChatTurnLogEntry, SourceKind};

pub mod error;
pub mod log_event;
pub mod source;
pub mod update;

pub use error::{CoreError, CoreErrorKind};
pub use log_event::{LogAction, LogEvent};
pub use source::{SourceDescriptor, SourceId};
pub use update::{Snapshot, Update, format_checked};

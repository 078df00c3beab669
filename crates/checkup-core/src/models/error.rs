use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::models::SourceId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    NotInstalled,
    InvalidInput,
    ParseFailure,
    ProcessFailure,
    StorageFailure,
    NoData,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreError {
    pub source: Option<SourceId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            source: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_source(source: SourceId, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            source: Some(source),
            kind,
            message: message.into(),
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.source {
            Some(source) => write!(f, "{:?} ({source}): {}", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl Error for CoreError {}

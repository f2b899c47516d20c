// Structured error type shared by the cursor, production graph, and blob layers.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    NullArgument,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Ambiguous,
    InvalidState,
    TypeMismatch,
    BufferTooSmall,
    Corrupt,
    MemoryExhausted,
    Interrupted,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    row_id: Option<i64>,
    column: Option<String>,
    required_len: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            row_id: None,
            column: None,
            required_len: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn row_id(&self) -> Option<i64> {
        self.row_id
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// Length the caller must provide, in elements of the requested width.
    pub fn required_len(&self) -> Option<u64> {
        self.required_len
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind == ErrorKind::BufferTooSmall
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_row_id(mut self, row_id: i64) -> Self {
        self.row_id = Some(row_id);
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_required_len(mut self, required_len: u64) -> Self {
        self.required_len = Some(required_len);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(column) = &self.column {
            write!(f, " (column: {column})")?;
        }
        if let Some(row_id) = self.row_id {
            write!(f, " (row: {row_id})")?;
        }
        if let Some(required_len) = self.required_len {
            write!(f, " (required: {required_len})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub(crate) fn corrupt(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Corrupt).with_message(message)
}

// Cursor tuning knobs, constructible in code or loaded from JSON.
use crate::core::error::{Error, ErrorKind};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_PRODUCTION_CACHE_SLOTS: usize = 4;
pub const DEFAULT_WORKER_LAUNCH_AFTER: u32 = 5;
pub const DEFAULT_REGROUP_WINDOW_MAX: u64 = 256;
pub const DEFAULT_CURSOR_CACHE_MIN_ROWS: u64 = 5;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CursorOptions {
    /// Capacity of the cursor-level blob cache in bytes; 0 disables it and the worker.
    pub cursor_cache_bytes: usize,
    pub production_cache_slots: usize,
    pub worker_launch_after: u32,
    pub regroup_window_max: u64,
    pub cursor_cache_min_rows: u64,
}

impl CursorOptions {
    pub fn new() -> Self {
        Self {
            cursor_cache_bytes: 0,
            production_cache_slots: DEFAULT_PRODUCTION_CACHE_SLOTS,
            worker_launch_after: DEFAULT_WORKER_LAUNCH_AFTER,
            regroup_window_max: DEFAULT_REGROUP_WINDOW_MAX,
            cursor_cache_min_rows: DEFAULT_CURSOR_CACHE_MIN_ROWS,
        }
    }

    pub fn with_cursor_cache_bytes(mut self, bytes: usize) -> Self {
        self.cursor_cache_bytes = bytes;
        self
    }

    pub fn with_production_cache_slots(mut self, slots: usize) -> Self {
        self.production_cache_slots = slots;
        self
    }

    pub fn with_worker_launch_after(mut self, count: u32) -> Self {
        self.worker_launch_after = count;
        self
    }

    pub fn with_regroup_window_max(mut self, max: u64) -> Self {
        self.regroup_window_max = max;
        self
    }

    pub fn with_cursor_cache_min_rows(mut self, rows: u64) -> Self {
        self.cursor_cache_min_rows = rows;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        let options: CursorOptions = serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message("invalid cursor options")
                .with_source(err)
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("cannot read options file {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.regroup_window_max == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("regroup_window_max must be positive"));
        }
        Ok(())
    }
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{CursorOptions, DEFAULT_PRODUCTION_CACHE_SLOTS};
    use crate::core::error::ErrorKind;

    #[test]
    fn partial_json_keeps_defaults() {
        let options =
            CursorOptions::from_json_str(r#"{"cursor_cache_bytes": 65536}"#).expect("parse");
        assert_eq!(options.cursor_cache_bytes, 65536);
        assert_eq!(options.production_cache_slots, DEFAULT_PRODUCTION_CACHE_SLOTS);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = CursorOptions::from_json_str(r#"{"cache": 1}"#).expect_err("unknown field");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = CursorOptions::from_json_str(r#"{"regroup_window_max": 0}"#)
            .expect_err("zero window");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

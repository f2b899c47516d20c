//! Purpose: Process-wide "should stop" flag polled by multi-row fetch loops.
//! Exports: `should_stop`, `request_stop`, `reset`, `install_signal_handlers`, `check`.
//! Role: Lets long materializations abort between row and page boundaries.
//! Invariants: Aborted fetches leave already-cached blobs valid; nothing is rolled back.

use crate::core::error::{Error, ErrorKind};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

fn flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

pub fn should_stop() -> bool {
    flag().load(Ordering::Acquire)
}

pub fn request_stop() {
    flag().store(true, Ordering::Release);
}

pub fn reset() {
    flag().store(false, Ordering::Release);
}

/// Route SIGINT and SIGTERM into the stop flag.
pub fn install_signal_handlers() -> Result<(), Error> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(flag())).map_err(|err: io::Error| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to register stop signal")
                .with_source(err)
        })?;
    }
    Ok(())
}

pub(crate) fn check(row_id: i64) -> Result<(), Error> {
    if should_stop() {
        return Err(Error::new(ErrorKind::Interrupted)
            .with_message("fetch interrupted")
            .with_row_id(row_id));
    }
    Ok(())
}

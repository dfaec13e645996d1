//! Ordered, blocking shutdown of a scenario's sockets.
//!
//! Order: accepted connection, originating connection, listener. Each
//! close is waited on before the next begins. A failing step is recorded
//! and the sequence carries on.

use crate::error::{HarnessError, TeardownStep};
use crate::runtime::{CompletionHandle, Connection, ListenHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Close all three resources and return the failures encountered.
///
/// `accepted` is `None` when the accepting side never activated.
pub fn teardown(
    accepted: Option<&Connection>,
    originating: &Connection,
    listener: &ListenHandle,
    timeout: Duration,
) -> Vec<HarnessError> {
    let mut errors = Vec::new();

    match accepted {
        Some(conn) => close_step(
            TeardownStep::AcceptedConnection,
            conn.close(),
            timeout,
            &mut errors,
        ),
        None => {
            warn!("Accepting side never activated, nothing to close");
            errors.push(HarnessError::Teardown {
                step: TeardownStep::AcceptedConnection,
                message: "accepting side never activated".to_string(),
            });
        }
    }

    close_step(
        TeardownStep::OriginatingConnection,
        originating.close(),
        timeout,
        &mut errors,
    );
    close_step(TeardownStep::Listener, listener.close(), timeout, &mut errors);

    errors
}

fn close_step(
    step: TeardownStep,
    closed: CompletionHandle,
    timeout: Duration,
    errors: &mut Vec<HarnessError>,
) {
    match closed.wait_timeout(timeout) {
        Ok(()) => debug!(%step, "Closed"),
        Err(e) => {
            warn!(%step, error = %e, "Teardown step failed");
            errors.push(HarnessError::Teardown {
                step,
                message: e.to_string(),
            });
        }
    }
}

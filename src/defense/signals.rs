//! Best-effort termination-signal deterrence.
//!
//! Handlers are installed that swallow the common termination signals
//! instead of acting on them, so a casual `kill` does not stop the
//! guarded process. SIGKILL and SIGSTOP cannot be intercepted by any
//! process; this is a deterrent, not a guarantee. If the process dies
//! anyway, the external supervisor restarts it - this module only makes
//! sure dying takes more than one polite signal.

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Install handlers that ignore SIGTERM, SIGINT, SIGHUP, and SIGQUIT.
///
/// Each handler runs as its own task for the life of the process and
/// logs every swallowed signal.
pub fn install_termination_guards() -> Result<()> {
    let guarded = [
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::hangup(), "SIGHUP"),
        (SignalKind::quit(), "SIGQUIT"),
    ];

    for (kind, name) in guarded {
        let mut stream =
            signal(kind).with_context(|| format!("failed to install {} handler", name))?;
        tokio::spawn(async move {
            loop {
                stream.recv().await;
                warn!("Ignored termination signal {}", name);
            }
        });
    }

    info!("Termination-signal guards installed (SIGKILL remains uninterceptable)");
    Ok(())
}

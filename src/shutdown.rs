//! operator interrupt plumbing.
//!
//! ctrl-c (and SIGTERM on unix) flips a watch channel; the server and the
//! agent both wait on a receiver.

use std::future::Future;
use tokio::sync::watch;

pub type ShutdownSignal = watch::Receiver<bool>;

/// spawn the signal listener and hand back a receiver
pub fn listen() -> ShutdownSignal {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        interrupted().await;
        tracing::info!("[SHUTDOWN] Interrupt received");
        let _ = tx.send(true);
    });
    rx
}

/// resolves once shutdown was requested. never resolves if the sender is
/// gone without having asked.
pub async fn requested(signal: &mut ShutdownSignal) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn interrupted() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("[SHUTDOWN] SIGTERM handler unavailable: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn interrupted() {
    ctrl_c().await;
}

async fn ctrl_c() {
    fired(tokio::signal::ctrl_c()).await
}

/// a handler that can't be installed never fires
async fn fired(handler: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = handler.await {
        tracing::warn!("[SHUTDOWN] Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

//! Signal-driven logger reconfiguration
//!
//! A dedicated task waits on two trigger channels and performs
//! reconfiguration work inline, one trigger at a time:
//! - reopen-logs (SIGUSR1): rebuild the sink from the current provider
//!   values. This is the reopen hook external log rotation relies on,
//!   like sending a reload to a standard server process.
//! - reload-config (SIGUSR2): invoke the host's [`SignalReload`] hook so
//!   it can swap its own configuration first, then rebuild the sink from
//!   the (possibly changed) provider values.
//!
//! Each trigger kind buffers at most one pending event; a trigger arriving
//! while one of the same kind is pending is coalesced, and the
//! reconfiguration pass is idempotent so coalescing is safe.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracekit_logging::{reload_log, TraceContext};

/// Host hook invoked on the reload-config trigger, synchronously, before
/// the reconfiguration pass re-reads the provider.
pub trait SignalReload: Send + Sync {
    fn reload(&self);
}

enum Trigger {
    ReopenLogs,
    ReloadConfig,
}

/// Clonable trigger surface feeding the controller. The OS signal
/// forwarders hold one for the process lifetime; tests drive the
/// controller through it directly.
#[derive(Clone)]
pub struct ReloadHandle {
    reopen_tx: mpsc::Sender<()>,
    reload_tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Requests a reopen-logs pass. Coalesced while one is already pending.
    pub fn trigger_reopen(&self) {
        let _ = self.reopen_tx.try_send(());
    }

    /// Requests a reload-config pass. Coalesced while one is already
    /// pending.
    pub fn trigger_reload(&self) {
        let _ = self.reload_tx.try_send(());
    }
}

/// Control loop owning the two trigger channels.
pub struct ReloadController {
    reopen_rx: mpsc::Receiver<()>,
    reload_rx: mpsc::Receiver<()>,
    hook: Option<Arc<dyn SignalReload>>,
}

impl ReloadController {
    pub fn new(hook: Option<Arc<dyn SignalReload>>) -> (Self, ReloadHandle) {
        let (reopen_tx, reopen_rx) = mpsc::channel(1);
        let (reload_tx, reload_rx) = mpsc::channel(1);
        (
            Self {
                reopen_rx,
                reload_rx,
                hook,
            },
            ReloadHandle {
                reopen_tx,
                reload_tx,
            },
        )
    }

    /// Handles triggers one at a time until every [`ReloadHandle`] is gone.
    /// With the OS forwarders installed that means the process lifetime.
    pub async fn run(mut self) {
        loop {
            let trigger = tokio::select! {
                Some(()) = self.reopen_rx.recv() => Some(Trigger::ReopenLogs),
                Some(()) = self.reload_rx.recv() => Some(Trigger::ReloadConfig),
                else => None,
            };
            match trigger {
                Some(Trigger::ReopenLogs) => self.handle_reopen(),
                Some(Trigger::ReloadConfig) => self.handle_reload(),
                None => break,
            }
        }
    }

    fn handle_reopen(&self) {
        let ctx = TraceContext::new("signal");
        ctx.notice("received reopen-logs signal");
        if let Err(err) = reload_log() {
            ctx.error(format!("log reopen failed: {err}"));
        }
    }

    fn handle_reload(&self) {
        let ctx = TraceContext::new("signal");
        ctx.notice("received reload-config signal");
        if let Some(hook) = &self.hook {
            hook.reload();
        }
        if let Err(err) = reload_log() {
            ctx.error(format!("config reload failed: {err}"));
        }
    }
}

/// Installs the OS signal subscriptions: SIGUSR1 requests reopen-logs,
/// SIGUSR2 requests reload-config. Must run on a tokio runtime.
#[cfg(unix)]
pub fn bind_os_signals(handle: &ReloadHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    let reopen = handle.clone();
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            reopen.trigger_reopen();
        }
    });

    let reload = handle.clone();
    tokio::spawn(async move {
        while usr2.recv().await.is_some() {
            reload.trigger_reload();
        }
    });

    Ok(())
}

/// Wires the controller to the OS signals and spawns its loop for the
/// lifetime of the process. Must run on a tokio runtime.
///
/// The returned handle drives the same passes manually, signal-free.
pub fn init_signal(hook: Option<Arc<dyn SignalReload>>) -> ReloadHandle {
    let (controller, handle) = ReloadController::new(hook);
    #[cfg(unix)]
    if let Err(err) = bind_os_signals(&handle) {
        tracekit_logging::log_warning(format!("signal subscription failed: {err}"));
    }
    tokio::spawn(controller.run());
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
    }

    impl SignalReload for CountingHook {
        fn reload(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reload_trigger_invokes_the_hook_once() {
        let hook = Arc::new(CountingHook::default());
        let as_hook: Arc<dyn SignalReload> = hook.clone();
        let (controller, handle) = ReloadController::new(Some(as_hook));

        let loop_task = tokio::spawn(controller.run());
        handle.trigger_reload();
        drop(handle);
        loop_task.await.unwrap();

        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reopen_trigger_skips_the_hook() {
        let hook = Arc::new(CountingHook::default());
        let as_hook: Arc<dyn SignalReload> = hook.clone();
        let (controller, handle) = ReloadController::new(Some(as_hook));

        let loop_task = tokio::spawn(controller.run());
        handle.trigger_reopen();
        drop(handle);
        loop_task.await.unwrap();

        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pending_triggers_of_one_kind_coalesce() {
        let hook = Arc::new(CountingHook::default());
        let as_hook: Arc<dyn SignalReload> = hook.clone();
        let (controller, handle) = ReloadController::new(Some(as_hook));

        // nothing is draining yet: the channel holds one pending trigger
        // and drops the rest
        handle.trigger_reload();
        handle.trigger_reload();
        handle.trigger_reload();
        drop(handle);

        controller.run().await;

        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }
}

use tokio::sync::oneshot;

/// Create a connected start trigger and signal.
///
/// The trigger may fire before anyone waits on the signal; the firing is kept
/// until the signal is awaited and is observed exactly once.
pub fn start_trigger() -> (StartTrigger, StartSignal) {
    let (tx, rx) = oneshot::channel();
    (StartTrigger { tx }, StartSignal { rx: Some(rx) })
}

/// Sending half, held by whatever decides the user is ready.
#[derive(Debug)]
pub struct StartTrigger {
    tx: oneshot::Sender<()>,
}

impl StartTrigger {
    /// Returns `false` when the session has already gone away.
    pub fn fire(self) -> bool {
        self.tx.send(()).is_ok()
    }
}

#[derive(Debug)]
pub struct StartSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl StartSignal {
    /// Wait for the trigger.
    ///
    /// Resolves `true` once when fired and `false` if the trigger was dropped
    /// unfired. Later calls resolve `false` immediately.
    ///
    /// Cancel safe: dropping the future before it resolves loses nothing.
    pub async fn fired(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        let fired = rx.await.is_ok();
        self.rx = None;
        fired
    }
}

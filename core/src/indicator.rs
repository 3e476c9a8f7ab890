//! The live indicator.
//!
//! An indicator is created by [`IndicatorBuilder`](crate::IndicatorBuilder)
//! and then lives on the area's owner thread. Handles can be used from any
//! thread: setters queue a diff-and-rebuild task, and `close` queues teardown
//! and waits for it.

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::area::AreaShared;
use crate::error::{Error, Result};
use crate::menu::{MenuNode, MenuSnapshot};
use crate::native::{self, LoopStatus, NativeTray, TrayStruct};
use crate::owner::{Access, OwnerCell};
use crate::queue::{StepOutcome, panic_message};
use crate::resolver::IconRef;

/// Callback for a click on the indicator itself.
pub type IndicatorAction = Arc<dyn Fn(&IndicatorHandle) + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    Initializing,
    Running,
    Closing,
    Closed,
}

/// What the indicator currently shows. The icon is always a resolved local
/// path by the time it gets here.
#[derive(Clone)]
pub struct IndicatorConfig {
    pub icon: PathBuf,
    pub tooltip: String,
    pub menu: MenuSnapshot,
    pub on_primary_action: Option<IndicatorAction>,
}

impl fmt::Debug for IndicatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorConfig")
            .field("icon", &self.icon)
            .field("tooltip", &self.tooltip)
            .field("menu", &self.menu)
            .field("on_primary_action", &self.on_primary_action.is_some())
            .finish()
    }
}

/// Owner-thread state. `native` and `tray` are present from a successful
/// init until teardown.
struct Live {
    config: IndicatorConfig,
    native: Option<Box<dyn NativeTray>>,
    tray: Option<TrayStruct>,
}

pub(crate) struct IndicatorInner {
    id: u64,
    state: Mutex<IndicatorState>,
    state_changed: Condvar,
    failure: Mutex<Option<String>>,
    live: OwnerCell<Live>,
    pub(crate) shared: Arc<AreaShared>,
}

/// Marks the indicator closed when dropped, including during unwinding.
struct MarkClosed<'a>(&'a IndicatorInner);

impl Drop for MarkClosed<'_> {
    fn drop(&mut self) {
        self.0.set_state(IndicatorState::Closed);
    }
}

impl IndicatorInner {
    pub(crate) fn new(shared: Arc<AreaShared>, config: IndicatorConfig) -> Self {
        let owner = shared.queue.owner();
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(IndicatorState::Initializing),
            state_changed: Condvar::new(),
            failure: Mutex::new(None),
            live: OwnerCell::new(
                owner,
                Live {
                    config,
                    native: None,
                    tray: None,
                },
            ),
            shared,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> IndicatorState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: IndicatorState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            debug!("Indicator {}: {:?} -> {:?}", self.id, *state, next);
            *state = next;
            self.state_changed.notify_all();
        }
    }

    /// Move to `Closing`. Only the caller that performed the transition gets
    /// `true` and is responsible for running teardown.
    fn begin_close(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            IndicatorState::Initializing | IndicatorState::Running => {
                debug!("Indicator {}: {:?} -> Closing", self.id, *state);
                *state = IndicatorState::Closing;
                self.state_changed.notify_all();
                true
            }
            IndicatorState::Closing | IndicatorState::Closed => false,
        }
    }

    /// Block until `Closed`. There is no deadline; a warning is logged every
    /// `warn_interval` while teardown is still queued behind other work.
    fn wait_closed(&self, warn_interval: Duration) {
        let mut state = self.state.lock().unwrap();
        loop {
            let (next, wait) = self
                .state_changed
                .wait_timeout_while(state, warn_interval, |s| *s != IndicatorState::Closed)
                .unwrap();
            state = next;
            if !wait.timed_out() {
                return;
            }
            warn!(
                "Indicator {} still {:?} after {:?}; waiting for teardown",
                self.id, *state, warn_interval
            );
        }
    }

    pub(crate) fn record_failure(&self, reason: String) {
        *self.failure.lock().unwrap() = Some(reason);
    }

    /// Open the native tray and start polling it. Runs on the owner thread.
    pub(crate) fn complete_init(self: &Arc<Self>) -> Result<()> {
        let weak = Arc::downgrade(self);
        let backend = self.shared.backend.clone();

        let opened = self
            .live
            .try_with(|live| -> Result<()> {
                let tray = native::marshal(&live.config, weak)?;
                let mut native = backend.open().map_err(Error::NativeInit)?;
                native.init(&tray).map_err(Error::NativeInit)?;
                live.native = Some(native);
                live.tray = Some(tray);
                Ok(())
            })
            .map_err(Error::Unavailable)
            .and_then(|opened| opened);

        if let Err(e) = opened {
            error!("Indicator {} failed to initialise: {}", self.id, e);
            self.shared.registry.unregister(self.id);
            let _ = self.live.take();
            self.set_state(IndicatorState::Closed);
            return Err(e);
        }

        {
            // A close may already have been requested through the registry.
            let mut state = self.state.lock().unwrap();
            if *state != IndicatorState::Initializing {
                return Ok(());
            }
            *state = IndicatorState::Running;
            self.state_changed.notify_all();
        }
        info!("Indicator {} running", self.id);

        let weak = Arc::downgrade(self);
        self.shared.queue.set_step(move || match weak.upgrade() {
            Some(inner) => inner.poll(),
            None => StepOutcome::Stop,
        });
        Ok(())
    }

    /// One native loop iteration. Stops once the indicator leaves `Running`.
    fn poll(self: &Arc<Self>) -> StepOutcome {
        if self.state() != IndicatorState::Running {
            return StepOutcome::Stop;
        }

        let status = self.live.try_with(|live| match (live.native.as_mut(), live.tray.as_mut()) {
            (Some(native), Some(tray)) => {
                panic::catch_unwind(AssertUnwindSafe(|| native.loop_step(tray, false)))
                    .unwrap_or_else(|payload| {
                        // The native side cannot be trusted after unwinding through it.
                        let reason = format!("native loop panicked: {}", panic_message(&payload));
                        error!("Indicator {}: {}", self.id, reason);
                        self.record_failure(reason);
                        LoopStatus::Exit
                    })
            }
            _ => LoopStatus::Exit,
        });

        match status {
            Ok(LoopStatus::Continue) => StepOutcome::Continue,
            Ok(LoopStatus::Exit) => {
                info!("Native loop for indicator {} exited", self.id);
                if self.begin_close() {
                    self.teardown_or_defer();
                }
                StepOutcome::Stop
            }
            Err(Access::Busy) => StepOutcome::Continue,
            Err(access) => {
                warn!("Indicator {} cannot be polled: {:?}", self.id, access);
                StepOutcome::Stop
            }
        }
    }

    /// Apply `change` to the config and rebuild if anything differs. Runs on
    /// the owner thread.
    fn apply(self: &Arc<Self>, change: impl FnOnce(&mut IndicatorConfig) -> bool) {
        let state = self.state();
        if state != IndicatorState::Running {
            debug!("Indicator {} is {:?}; ignoring change", self.id, state);
            return;
        }

        let weak = Arc::downgrade(self);
        let outcome = self
            .live
            .try_with(|live| -> Result<bool> {
                let previous = live.config.clone();
                if !change(&mut live.config) {
                    return Ok(false);
                }
                let tray = match native::marshal(&live.config, weak) {
                    Ok(tray) => tray,
                    Err(e) => {
                        live.config = previous;
                        return Err(e);
                    }
                };
                if let Some(native) = live.native.as_mut() {
                    native.update(&tray).map_err(Error::NativeUpdate)?;
                }
                live.tray = Some(tray);
                Ok(true)
            })
            .map_err(Error::Unavailable)
            .and_then(|outcome| outcome);

        match outcome {
            Ok(true) => debug!("Indicator {} rebuilt", self.id),
            Ok(false) => debug!("Indicator {} unchanged", self.id),
            Err(e @ Error::NativeUpdate(_)) => {
                // The native side may be half updated; it cannot be trusted again.
                error!("Indicator {} update failed, closing: {}", self.id, e);
                self.record_failure(e.to_string());
                if self.begin_close() {
                    self.teardown_or_defer();
                }
            }
            Err(e) => {
                error!("Indicator {} change rejected: {}", self.id, e);
                self.record_failure(e.to_string());
            }
        }
    }

    /// Run teardown now, or queue it if the owner is inside a native callback
    /// that still borrows the live state.
    fn teardown_or_defer(self: &Arc<Self>) {
        if let Err(Access::Busy) = self.teardown() {
            debug!("Indicator {} busy; deferring teardown", self.id);
            let inner = self.clone();
            self.shared.queue.submit(move || {
                if let Err(access) = inner.teardown() {
                    error!("Indicator {} teardown failed: {:?}", inner.id, access);
                }
            });
        }
    }

    /// Unregister, release the native tray and mark `Closed`. Runs on the
    /// owner thread; `Closed` is set even if releasing panics.
    fn teardown(&self) -> std::result::Result<(), Access> {
        let live = match self.live.take() {
            Ok(live) => live,
            Err(Access::Busy) => return Err(Access::Busy),
            Err(access) => {
                error!("Indicator {} released off the owner thread: {:?}", self.id, access);
                None
            }
        };
        let _closed = MarkClosed(self);

        self.shared.registry.unregister(self.id);
        if let Some(mut live) = live
            && let Some(mut native) = live.native.take()
        {
            native.exit();
            drop(native);
            info!("Indicator {} released", self.id);
        }
        Ok(())
    }
}

/// Cloneable handle to a live indicator. Dropping it does not close the
/// indicator; see [`Indicator`] for that.
#[derive(Clone)]
pub struct IndicatorHandle {
    inner: Arc<IndicatorInner>,
}

impl IndicatorHandle {
    pub(crate) fn from_inner(inner: Arc<IndicatorInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> IndicatorState {
        self.inner.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == IndicatorState::Closed
    }

    /// The last failure seen while applying changes, if any.
    pub fn failure(&self) -> Option<String> {
        self.inner.failure.lock().unwrap().clone()
    }

    /// Change the icon. Resolution happens on the calling thread so transfer
    /// errors are returned here; the change itself is queued.
    pub fn set_icon(&self, icon: impl Into<IconRef>) -> Result<()> {
        let path = self.inner.shared.resolver.resolve(&icon.into())?;
        self.update(move |config| replace(&mut config.icon, path));
        Ok(())
    }

    pub fn set_tooltip(&self, tooltip: impl Into<String>) {
        let tooltip = tooltip.into();
        self.update(move |config| replace(&mut config.tooltip, tooltip));
    }

    pub fn set_menu(&self, menu: impl IntoIterator<Item = MenuNode>) {
        let menu = MenuSnapshot::new(menu);
        self.update(move |config| replace(&mut config.menu, menu));
    }

    /// Close the indicator and release the native tray.
    ///
    /// From any thread but the owner this blocks until teardown has finished,
    /// however long the tasks queued ahead of it take. On the owner thread teardown
    /// runs inline, unless called from inside a native callback, in which case
    /// it runs as soon as the callback returns. Safe to call repeatedly.
    pub fn close(&self) {
        let inner = &self.inner;
        let queue = &inner.shared.queue;

        if queue.is_owner_thread() {
            if inner.begin_close() {
                inner.teardown_or_defer();
            }
            return;
        }

        if inner.begin_close() {
            let teardown = inner.clone();
            if !queue.submit(move || teardown.teardown_or_defer()) {
                // Nothing can release the tray once its thread is gone.
                error!("Indicator {}: owner thread stopped before teardown", inner.id);
                inner.shared.registry.unregister(inner.id);
                inner.set_state(IndicatorState::Closed);
                return;
            }
        }

        inner.wait_closed(inner.shared.config.close_warn_interval());
    }

    fn update(&self, change: impl FnOnce(&mut IndicatorConfig) -> bool + Send + 'static) {
        let inner = self.inner.clone();
        self.inner.shared.queue.submit(move || inner.apply(change));
    }
}

impl PartialEq for IndicatorHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for IndicatorHandle {}

impl fmt::Debug for IndicatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Owning guard returned by `build()`. Closes the indicator when dropped.
#[derive(Debug)]
pub struct Indicator {
    handle: IndicatorHandle,
}

impl Indicator {
    pub(crate) fn new(handle: IndicatorHandle) -> Self {
        Self { handle }
    }

    /// A handle that outlives this guard without keeping the indicator open.
    pub fn handle(&self) -> IndicatorHandle {
        self.handle.clone()
    }
}

impl Deref for Indicator {
    type Target = IndicatorHandle;

    fn deref(&self) -> &IndicatorHandle {
        &self.handle
    }
}

impl Drop for Indicator {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Store `value` if it differs from the current one.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

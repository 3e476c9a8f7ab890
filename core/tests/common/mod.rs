//! Recording stand-in for a native tray.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use dobbin_core::{
    AreaConfig, IndicatorArea, LoopStatus, NativeBackend, NativeError, NativeTray, TrayStruct,
};

/// A click the stub delivers on its next loop step.
#[derive(Debug, Clone, Copy)]
pub enum Click {
    Primary,
    Item { index: usize, checked: bool },
}

/// What the native side saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `init` or `update` with this tooltip.
    Pushed(String),
    /// A loop step over a tray carrying this tooltip.
    Polled(String),
}

#[derive(Default)]
pub struct Recorder {
    pub inits: AtomicUsize,
    pub updates: AtomicUsize,
    pub exits: AtomicUsize,
    pub fail_init: AtomicBool,
    pub fail_update: AtomicBool,
    /// Makes the next loop step report that the native side went away.
    pub quit: AtomicBool,
    tooltip: Mutex<Option<String>>,
    icon: Mutex<Option<String>>,
    menu: Mutex<Vec<String>>,
    clicks: Mutex<VecDeque<Click>>,
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    pub fn tooltip(&self) -> Option<String> {
        self.tooltip.lock().unwrap().clone()
    }

    pub fn icon(&self) -> Option<String> {
        self.icon.lock().unwrap().clone()
    }

    pub fn menu(&self) -> Vec<String> {
        self.menu.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Every tooltip pushed to the native side, in order.
    pub fn pushed_tooltips(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Pushed(tooltip) => Some(tooltip),
                Event::Polled(_) => None,
            })
            .collect()
    }

    pub fn click(&self, click: Click) {
        self.clicks.lock().unwrap().push_back(click);
    }

    fn record(&self, tray: &TrayStruct) {
        let tooltip = tray.tooltip.to_string_lossy().into_owned();
        self.events.lock().unwrap().push(Event::Pushed(tooltip.clone()));
        *self.tooltip.lock().unwrap() = Some(tooltip);
        *self.icon.lock().unwrap() = Some(tray.icon_filepath.to_string_lossy().into_owned());
        *self.menu.lock().unwrap() = tray
            .menu
            .iter()
            .map(|item| item.text.to_string_lossy().into_owned())
            .collect();
    }
}

pub struct StubBackend(pub Arc<Recorder>);

impl NativeBackend for StubBackend {
    fn open(&self) -> Result<Box<dyn NativeTray>, NativeError> {
        Ok(Box::new(StubTray(self.0.clone())))
    }
}

struct StubTray(Arc<Recorder>);

impl NativeTray for StubTray {
    fn init(&mut self, tray: &TrayStruct) -> Result<(), NativeError> {
        if self.0.fail_init.load(Ordering::SeqCst) {
            return Err(NativeError::new("no tray host"));
        }
        self.0.inits.fetch_add(1, Ordering::SeqCst);
        self.0.record(tray);
        Ok(())
    }

    fn update(&mut self, tray: &TrayStruct) -> Result<(), NativeError> {
        if self.0.fail_update.load(Ordering::SeqCst) {
            return Err(NativeError::new("tray host went away"));
        }
        self.0.updates.fetch_add(1, Ordering::SeqCst);
        self.0.record(tray);
        Ok(())
    }

    fn exit(&mut self) {
        self.0.exits.fetch_add(1, Ordering::SeqCst);
    }

    fn loop_step(&mut self, tray: &mut TrayStruct, _blocking: bool) -> LoopStatus {
        if self.0.quit.load(Ordering::SeqCst) {
            return LoopStatus::Exit;
        }
        self.0
            .events
            .lock()
            .unwrap()
            .push(Event::Polled(tray.tooltip.to_string_lossy().into_owned()));
        let pending: Vec<Click> = self.0.clicks.lock().unwrap().drain(..).collect();
        for click in pending {
            match click {
                Click::Primary => tray.fire_primary(),
                Click::Item { index, checked } => {
                    if let Some(item) = tray.menu.get_mut(index) {
                        if item.checkbox {
                            item.checked = checked;
                        }
                        item.fire();
                    }
                }
            }
        }
        LoopStatus::Continue
    }
}

pub fn area(recorder: &Arc<Recorder>) -> IndicatorArea {
    area_with(
        recorder,
        AreaConfig {
            poll_interval_ms: 1,
            ..AreaConfig::default()
        },
    )
}

pub fn area_with(recorder: &Arc<Recorder>, config: AreaConfig) -> IndicatorArea {
    let _ = env_logger::builder().is_test(true).try_init();
    IndicatorArea::new(StubBackend(recorder.clone()), config).unwrap()
}

/// Block until every task queued on the area so far has run.
pub fn flush(area: &IndicatorArea) {
    let (tx, rx) = mpsc::channel();
    area.task(move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

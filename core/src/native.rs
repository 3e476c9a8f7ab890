//! The native tray surface and the structure marshaled into it.
//!
//! Native implementations only ever run on the owner thread, so neither
//! trait requires `Send` of the tray itself; the backend that opens it is
//! shared with callers and must be `Send + Sync`.

use std::ffi::CString;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Weak;

use log::{error, warn};

use crate::error::{Error, NativeError, Result};
use crate::indicator::{IndicatorConfig, IndicatorHandle, IndicatorInner};
use crate::menu::{MenuKind, MenuNode};
use crate::queue::panic_message;

/// Text the native library recognises as a separator entry.
pub const SEPARATOR_TEXT: &str = "-";

/// Result of one native loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Continue,
    /// The native side stopped, either on request or because of an error.
    Exit,
}

/// A native tray instance. Created and used exclusively on the owner thread.
pub trait NativeTray {
    fn init(&mut self, tray: &TrayStruct) -> std::result::Result<(), NativeError>;
    fn update(&mut self, tray: &TrayStruct) -> std::result::Result<(), NativeError>;
    fn exit(&mut self);
    /// Process pending native events, firing callbacks stored in `tray`.
    fn loop_step(&mut self, tray: &mut TrayStruct, blocking: bool) -> LoopStatus;
}

/// Opens native tray instances. Called on the owner thread.
pub trait NativeBackend: Send + Sync {
    fn open(&self) -> std::result::Result<Box<dyn NativeTray>, NativeError>;
}

impl<F> NativeBackend for F
where
    F: Fn() -> std::result::Result<Box<dyn NativeTray>, NativeError> + Send + Sync,
{
    fn open(&self) -> std::result::Result<Box<dyn NativeTray>, NativeError> {
        self()
    }
}

type ItemCallback = Box<dyn Fn(&TrayMenuItem)>;
type TrayCallback = Box<dyn Fn()>;

/// One marshaled menu entry.
pub struct TrayMenuItem {
    pub text: CString,
    pub disabled: bool,
    pub checkbox: bool,
    /// Written by the native layer before [`TrayMenuItem::fire`] on a click.
    pub checked: bool,
    cb: Option<ItemCallback>,
}

impl TrayMenuItem {
    pub fn is_separator(&self) -> bool {
        !self.checkbox && self.text.as_bytes() == SEPARATOR_TEXT.as_bytes()
    }

    pub fn has_callback(&self) -> bool {
        self.cb.is_some()
    }

    /// Deliver a click to the entry.
    pub fn fire(&self) {
        if let Some(cb) = &self.cb {
            cb(self);
        }
    }
}

impl fmt::Debug for TrayMenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrayMenuItem")
            .field("text", &self.text)
            .field("disabled", &self.disabled)
            .field("checkbox", &self.checkbox)
            .field("checked", &self.checked)
            .finish()
    }
}

/// Icon path, tooltip and menu as handed to the native layer.
pub struct TrayStruct {
    pub icon_filepath: CString,
    pub tooltip: CString,
    pub menu: Vec<TrayMenuItem>,
    cb: Option<TrayCallback>,
}

impl TrayStruct {
    pub fn has_primary_action(&self) -> bool {
        self.cb.is_some()
    }

    /// Deliver a click on the indicator itself.
    pub fn fire_primary(&self) {
        if let Some(cb) = &self.cb {
            cb();
        }
    }
}

impl fmt::Debug for TrayStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrayStruct")
            .field("icon_filepath", &self.icon_filepath)
            .field("tooltip", &self.tooltip)
            .field("menu", &self.menu)
            .finish()
    }
}

/// Marshal `config` into a fresh native structure. `owner` is handed to the
/// primary action when the indicator is clicked.
pub(crate) fn marshal(config: &IndicatorConfig, owner: Weak<IndicatorInner>) -> Result<TrayStruct> {
    let icon_filepath = path_to_ascii(&config.icon)?;
    let tooltip = text_to_ascii(&config.tooltip);
    let menu = config
        .menu
        .iter()
        .map(|node| marshal_item(node, &owner))
        .collect();

    let cb = config.on_primary_action.clone().map(|action| {
        Box::new(move || {
            if let Some(inner) = owner.upgrade() {
                let handle = IndicatorHandle::from_inner(inner);
                guarded(&owner, "primary action", || action(&handle));
            }
        }) as TrayCallback
    });

    Ok(TrayStruct {
        icon_filepath,
        tooltip,
        menu,
        cb,
    })
}

fn marshal_item(node: &MenuNode, owner: &Weak<IndicatorInner>) -> TrayMenuItem {
    let mut item = TrayMenuItem {
        text: text_to_ascii(node.text()),
        disabled: node.disabled(),
        checkbox: false,
        checked: false,
        cb: None,
    };

    match node.kind() {
        MenuKind::Action => {
            if node.on_action().is_some() {
                let (node, owner) = (node.clone(), owner.clone());
                item.cb = Some(Box::new(move |_| {
                    guarded(&owner, node.text(), || node.activate());
                }));
            }
        }
        MenuKind::Checkbox => {
            item.checkbox = true;
            item.checked = node.checked();
            let (node, owner) = (node.clone(), owner.clone());
            item.cb = Some(Box::new(move |native| {
                node.set_checked(native.checked);
                guarded(&owner, node.text(), || node.activate());
            }));
        }
        MenuKind::Separator => {
            item.text = CString::from(c"-");
        }
        MenuKind::Label => {}
    }
    item
}

/// Run a user callback. A panic is logged and recorded as the indicator's
/// failure instead of unwinding through the native loop.
fn guarded(owner: &Weak<IndicatorInner>, name: &str, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let reason = format!("callback '{name}' panicked: {}", panic_message(&payload));
        error!("{reason}");
        if let Some(inner) = owner.upgrade() {
            inner.record_failure(reason);
        }
    }
}

/// Native text is single-byte ASCII; anything else, including NUL, becomes `?`.
pub(crate) fn text_to_ascii(text: &str) -> CString {
    let mut replaced = false;
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| {
            if c.is_ascii() && c != '\0' {
                c as u8
            } else {
                replaced = true;
                b'?'
            }
        })
        .collect();
    if replaced {
        warn!("Replaced non-ASCII characters in {text:?}");
    }
    // No NUL bytes remain.
    CString::new(bytes).unwrap_or_default()
}

/// Paths cannot be transliterated without pointing somewhere else.
fn path_to_ascii(path: &Path) -> Result<CString> {
    path.to_str()
        .filter(|s| s.is_ascii())
        .and_then(|s| CString::new(s).ok())
        .ok_or_else(|| Error::Encoding(path.to_path_buf()))
}

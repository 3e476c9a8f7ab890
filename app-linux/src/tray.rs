//! GTK status icon driven through tray-icon.
//! Everything here runs on the indicator area's owner thread, which is also
//! the thread GTK gets initialised on.

use std::path::Path;

use dobbin_core::{LoopStatus, NativeBackend, NativeError, NativeTray, TrayStruct};
use gtk::glib;
use log::{debug, info};
use muda::{CheckMenuItem, Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, MouseButton, MouseButtonState, TrayIcon, TrayIconBuilder, TrayIconEvent};

pub struct GtkBackend;

impl NativeBackend for GtkBackend {
    fn open(&self) -> Result<Box<dyn NativeTray>, NativeError> {
        // required for tray-icon on Linux
        gtk::init().map_err(|e| NativeError::new(format!("failed to init GTK: {e}")))?;
        Ok(Box::new(GtkTray::default()))
    }
}

/// Menu entry that can report clicks, mapped back to its index in the
/// marshaled menu.
struct Entry {
    id: MenuId,
    index: usize,
    check: Option<CheckMenuItem>,
}

#[derive(Default)]
struct GtkTray {
    icon: Option<TrayIcon>,
    entries: Vec<Entry>,
}

impl NativeTray for GtkTray {
    fn init(&mut self, tray: &TrayStruct) -> Result<(), NativeError> {
        let (menu, entries) = build_menu(tray)?;
        let icon = TrayIconBuilder::new()
            .with_menu(Box::new(menu))
            .with_icon(load_icon(tray)?)
            .with_tooltip(tray.tooltip.to_string_lossy())
            .build()
            .map_err(|e| NativeError::new(format!("failed to create tray icon: {e}")))?;

        self.icon = Some(icon);
        self.entries = entries;
        info!("tray icon ready");
        Ok(())
    }

    fn update(&mut self, tray: &TrayStruct) -> Result<(), NativeError> {
        let Some(icon) = self.icon.as_ref() else {
            return Err(NativeError::new("tray icon is not initialised"));
        };

        let (menu, entries) = build_menu(tray)?;
        icon.set_menu(Some(Box::new(menu)));
        icon.set_icon(Some(load_icon(tray)?))
            .map_err(|e| NativeError::new(format!("failed to update tray icon: {e}")))?;
        icon.set_tooltip(Some(tray.tooltip.to_string_lossy()))
            .map_err(|e| NativeError::new(format!("failed to update tooltip: {e}")))?;

        self.entries = entries;
        debug!("tray icon updated");
        Ok(())
    }

    fn exit(&mut self) {
        self.entries.clear();
        if self.icon.take().is_some() {
            pump_gtk();
            info!("tray icon removed");
        }
    }

    fn loop_step(&mut self, tray: &mut TrayStruct, _blocking: bool) -> LoopStatus {
        if self.icon.is_none() {
            return LoopStatus::Exit;
        }

        pump_gtk();

        while let Ok(event) = MenuEvent::receiver().try_recv() {
            let Some(entry) = self.entries.iter().find(|e| e.id == event.id) else {
                continue;
            };
            if let Some(item) = tray.menu.get_mut(entry.index) {
                if let Some(check) = &entry.check {
                    item.checked = check.is_checked();
                }
                item.fire();
            }
        }

        while let Ok(event) = TrayIconEvent::receiver().try_recv() {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                tray.fire_primary();
            }
        }

        LoopStatus::Continue
    }
}

fn pump_gtk() {
    glib::idle_add_local_once(|| {}); // allow GTK to process pending work
    while gtk::events_pending() {
        gtk::main_iteration_do(false);
    }
}

fn build_menu(tray: &TrayStruct) -> Result<(Menu, Vec<Entry>), NativeError> {
    let menu = Menu::new();
    let mut entries = Vec::new();
    let append_error = |e: muda::Error| NativeError::new(format!("failed to build menu: {e}"));

    for (index, item) in tray.menu.iter().enumerate() {
        let text = item.text.to_string_lossy();
        if item.is_separator() {
            menu.append(&PredefinedMenuItem::separator())
                .map_err(append_error)?;
        } else if item.checkbox {
            let check = CheckMenuItem::new(&text, !item.disabled, item.checked, None);
            menu.append(&check).map_err(append_error)?;
            entries.push(Entry {
                id: check.id().clone(),
                index,
                check: Some(check),
            });
        } else {
            let entry = MenuItem::new(&text, !item.disabled, None);
            menu.append(&entry).map_err(append_error)?;
            if item.has_callback() {
                entries.push(Entry {
                    id: entry.id().clone(),
                    index,
                    check: None,
                });
            }
        }
    }
    Ok((menu, entries))
}

fn load_icon(tray: &TrayStruct) -> Result<Icon, NativeError> {
    let path = Path::new(tray.icon_filepath.to_str().unwrap_or_default());
    let image = image::open(path)
        .map_err(|e| NativeError::new(format!("failed to load icon {path:?}: {e}")))?
        .into_rgba8();
    let (width, height) = image.dimensions();
    Icon::from_rgba(image.into_raw(), width, height)
        .map_err(|e| NativeError::new(format!("bad icon {path:?}: {e}")))
}

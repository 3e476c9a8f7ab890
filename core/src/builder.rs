//! Builder for the one indicator an area may show.

use std::sync::{Arc, mpsc};

use log::{debug, info};

use crate::area::IndicatorArea;
use crate::error::{Error, Result};
use crate::indicator::{Indicator, IndicatorConfig, IndicatorHandle, IndicatorInner};
use crate::menu::{MenuNode, MenuSnapshot};
use crate::resolver::IconRef;

/// Icon used when the builder is given none.
pub const DEFAULT_ICON: IconRef = IconRef::Embedded {
    name: "idle-48.png",
    bytes: include_bytes!("../resources/idle-48.png"),
};

/// Collects the initial configuration of an indicator.
pub struct IndicatorBuilder<'a> {
    area: &'a IndicatorArea,
    icon: Option<IconRef>,
    tooltip: Option<String>,
    menu: Vec<MenuNode>,
    on_action: Option<crate::indicator::IndicatorAction>,
}

impl<'a> IndicatorBuilder<'a> {
    pub(crate) fn new(area: &'a IndicatorArea) -> Self {
        Self {
            area,
            icon: None,
            tooltip: None,
            menu: Vec::new(),
            on_action: None,
        }
    }

    /// Icon from a local path or any other [`IconRef`].
    pub fn icon(mut self, icon: impl Into<IconRef>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Icon from a URL: `file`, `http` or `https`.
    pub fn icon_url(self, url: impl Into<String>) -> Self {
        self.icon(IconRef::Url(url.into()))
    }

    pub fn tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn tooltip_value(&self) -> Option<&str> {
        self.tooltip.as_deref()
    }

    /// Replace the initial menu.
    pub fn menu(mut self, items: impl IntoIterator<Item = MenuNode>) -> Self {
        self.menu = items.into_iter().collect();
        self
    }

    /// Append one entry to the initial menu.
    pub fn item(mut self, item: MenuNode) -> Self {
        self.menu.push(item);
        self
    }

    /// Callback for a click on the indicator itself, e.g. to open a window.
    pub fn on_action<F>(mut self, on_action: F) -> Self
    where
        F: Fn(&IndicatorHandle) + Send + Sync + 'static,
    {
        self.on_action = Some(Arc::new(on_action));
        self
    }

    /// Register and initialise the indicator.
    ///
    /// Fails with [`Error::AlreadyExists`] while another indicator is active,
    /// with a transfer error if the icon cannot be resolved, and with
    /// [`Error::NativeInit`] if the native tray refuses to start. Nothing
    /// stays registered after a failure. Blocks until the owner thread has
    /// finished initialisation, unless called on the owner thread, where it
    /// runs inline.
    pub fn build(self) -> Result<Indicator> {
        let shared = self.area.shared().clone();

        let icon = shared
            .resolver
            .resolve(self.icon.as_ref().unwrap_or(&DEFAULT_ICON))?;
        let config = IndicatorConfig {
            icon,
            tooltip: self
                .tooltip
                .unwrap_or_else(|| shared.config.default_tooltip.clone()),
            menu: MenuSnapshot::new(self.menu),
            on_primary_action: self.on_action,
        };
        debug!("Building indicator: {config:?}");

        let inner = Arc::new(IndicatorInner::new(shared.clone(), config));
        shared.registry.register(inner.id(), Arc::downgrade(&inner))?;

        let initialised = if shared.queue.is_owner_thread() {
            inner.complete_init()
        } else {
            let (done, wait) = mpsc::channel();
            let init = inner.clone();
            shared.queue.submit(move || {
                let _ = done.send(init.complete_init());
            });
            wait.recv().unwrap_or(Err(Error::QueueClosed))
        };

        if let Err(e) = initialised {
            shared.registry.unregister(inner.id());
            return Err(e);
        }

        info!("Indicator {} created", inner.id());
        Ok(Indicator::new(IndicatorHandle::from_inner(inner)))
    }
}

//! The indicator area: the context every indicator is built in.
//!
//! An area owns the owner thread, the single-slot registry and the icon
//! resolver. It replaces a process-wide default with an explicit value;
//! dropping it closes the active indicator, stops the owner thread and
//! removes temp files.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use crate::builder::IndicatorBuilder;
use crate::config::AreaConfig;
use crate::error::Result;
use crate::indicator::{IndicatorHandle, IndicatorInner};
use crate::native::NativeBackend;
use crate::queue::TaskQueue;
use crate::registry::IndicatorRegistry;
use crate::resolver::{IconRef, ResourceResolver};

pub(crate) struct AreaShared {
    pub(crate) config: AreaConfig,
    pub(crate) queue: TaskQueue,
    pub(crate) registry: IndicatorRegistry<IndicatorInner>,
    pub(crate) resolver: ResourceResolver,
    pub(crate) backend: Arc<dyn NativeBackend>,
}

pub struct IndicatorArea {
    shared: Arc<AreaShared>,
}

impl IndicatorArea {
    /// Start an area whose indicators are rendered by `backend`.
    pub fn new(backend: impl NativeBackend + 'static, config: AreaConfig) -> Result<Self> {
        let queue = TaskQueue::spawn(&config.thread_name, config.poll_interval())?;
        let resolver = ResourceResolver::new(config.temp_prefix.clone());
        info!("Indicator area started on thread '{}'", config.thread_name);

        Ok(Self {
            shared: Arc::new(AreaShared {
                config,
                queue,
                registry: IndicatorRegistry::new(),
                resolver,
                backend: Arc::new(backend),
            }),
        })
    }

    pub fn with_defaults(backend: impl NativeBackend + 'static) -> Result<Self> {
        Self::new(backend, AreaConfig::default())
    }

    pub fn builder(&self) -> IndicatorBuilder<'_> {
        IndicatorBuilder::new(self)
    }

    /// The indicator currently registered, if any.
    pub fn active(&self) -> Option<IndicatorHandle> {
        self.shared.registry.active().map(IndicatorHandle::from_inner)
    }

    /// Resolve an icon to a local path, copying it to a temp file if needed.
    pub fn resolve(&self, icon: &IconRef) -> Result<PathBuf> {
        self.shared.resolver.resolve(icon)
    }

    /// Run `task` on the owner thread after everything already queued.
    pub fn task(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.queue.submit(task);
    }

    pub fn is_task_thread(&self) -> bool {
        self.shared.queue.is_owner_thread()
    }

    pub fn config(&self) -> &AreaConfig {
        &self.shared.config
    }

    /// Close the active indicator, if any.
    pub fn close(&self) {
        if let Some(active) = self.active() {
            active.close();
        }
    }

    pub(crate) fn shared(&self) -> &Arc<AreaShared> {
        &self.shared
    }
}

impl Drop for IndicatorArea {
    fn drop(&mut self) {
        self.close();
        self.shared.queue.shutdown();
        self.shared.resolver.cleanup();
        info!("Indicator area closed");
    }
}

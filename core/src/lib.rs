//! Core of a single system-tray indicator: an owner thread that serialises
//! every native call, a one-slot registry, icon resolution and menus.
//!
//! Platform shells supply a [`NativeBackend`] and a path provider; nothing in
//! here depends on a particular tray toolkit.

pub mod area;
pub mod builder;
pub mod config;
pub mod error;
pub mod indicator;
pub mod menu;
pub mod native;
pub mod owner;
pub mod queue;
pub mod registry;
pub mod resolver;

pub use area::IndicatorArea;
pub use builder::{DEFAULT_ICON, IndicatorBuilder};
pub use config::{AreaConfig, Config, IndicatorSection, ItemKind, MenuItemConfig};
pub use error::{Error, NativeError, Result};
pub use indicator::{Indicator, IndicatorAction, IndicatorConfig, IndicatorHandle, IndicatorState};
pub use menu::{MenuAction, MenuKind, MenuNode, MenuNodeBuilder, MenuSnapshot};
pub use native::{LoopStatus, NativeBackend, NativeTray, SEPARATOR_TEXT, TrayMenuItem, TrayStruct};
pub use owner::Access;
pub use resolver::{IconRef, ResourceResolver};

/// Interfaces that platform shells implement to adapt the core library
/// without pulling in platform-specific dependencies.
pub mod platform {
    /// Trait for platform-correct config paths.
    pub trait AppPaths {
        fn config_path(&self) -> std::path::PathBuf;
    }
}

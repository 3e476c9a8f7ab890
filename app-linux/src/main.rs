//! Linux tray shell for dobbin.
//! Shows one status icon whose menu is read from the config file.

mod paths;
mod tray;

use std::process::{Child, Command, ExitStatus};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dobbin_core::platform::AppPaths;
use dobbin_core::{
    Config, IconRef, IndicatorArea, IndicatorHandle, ItemKind, MenuItemConfig, MenuNode,
};
use log::{debug, error, info, warn};

use crate::paths::LinuxPaths;
use crate::tray::GtkBackend;

fn main() {
    env_logger::init();
    info!("starting dobbin (linux tray)");

    let paths = LinuxPaths;
    let config = Config::load_with(&paths).unwrap_or_else(|e| {
        error!("failed to load config: {e}; using defaults");
        Config::example()
    });

    let running = Arc::new(AtomicBool::new(true));
    let slot: Arc<OnceLock<IndicatorHandle>> = Arc::new(OnceLock::new());

    let area = IndicatorArea::new(GtkBackend, config.area.clone())
        .expect("failed to start indicator area");

    let mut builder = area
        .builder()
        .menu(build_menu(&config, &running, &slot))
        .on_action(|_| open_config(&LinuxPaths));
    if let Some(tooltip) = &config.indicator.tooltip {
        builder = builder.tooltip(tooltip);
    }
    if let Some(icon) = &config.indicator.icon {
        builder = builder.icon(IconRef::parse(icon));
    }

    let indicator = match builder.build() {
        Ok(indicator) => indicator,
        Err(e) => {
            error!("failed to create indicator: {e}");
            std::process::exit(1);
        }
    };
    let _ = slot.set(indicator.handle());

    // Ctrl+C cleanup
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("received signal, exiting");
            running.store(false, Ordering::SeqCst);
        })
        .expect("Error setting Ctrl-C handler");
    }

    info!("indicator ready; waiting for quit");
    while running.load(Ordering::SeqCst) && !indicator.is_closed() {
        thread::sleep(Duration::from_millis(100));
    }

    if let Some(failure) = indicator.failure() {
        warn!("indicator stopped after failure: {failure}");
    }
    info!("exiting; cleaning up");
    drop(indicator);
    drop(area);
}

fn build_menu(
    config: &Config,
    running: &Arc<AtomicBool>,
    slot: &Arc<OnceLock<IndicatorHandle>>,
) -> Vec<MenuNode> {
    let base_tooltip = config
        .indicator
        .tooltip
        .clone()
        .unwrap_or_else(|| config.area.default_tooltip.clone());

    config
        .items
        .iter()
        .map(|(key, item)| build_item(key, item, &base_tooltip, running, slot))
        .collect()
}

fn build_item(
    key: &str,
    item: &MenuItemConfig,
    base_tooltip: &str,
    running: &Arc<AtomicBool>,
    slot: &Arc<OnceLock<IndicatorHandle>>,
) -> MenuNode {
    let builder = MenuNode::builder(item.kind.into())
        .text(&item.text)
        .disabled(item.disabled)
        .checked(item.checked);

    match item.kind {
        ItemKind::Action if item.quit => {
            let running = running.clone();
            builder
                .on_action(move |_| running.store(false, Ordering::SeqCst))
                .build()
        }
        ItemKind::Action => {
            let key = key.to_string();
            let command = item.command.clone();
            let args = item.args.clone();
            builder
                .on_action(move |_| match &command {
                    Some(program) => spawn_command(program, &args),
                    None => info!("menu entry '{key}' has no command"),
                })
                .build()
        }
        ItemKind::Checkbox => {
            let slot = slot.clone();
            let base = base_tooltip.to_string();
            builder
                .on_action(move |node| {
                    let Some(handle) = slot.get() else {
                        return;
                    };
                    if node.checked() {
                        handle.set_tooltip(format!("{base} - {}", node.text()));
                    } else {
                        handle.set_tooltip(base.clone());
                    }
                })
                .build()
        }
        ItemKind::Label | ItemKind::Separator => builder.build(),
    }
}

fn spawn_command(program: &str, args: &[String]) {
    info!("spawning {program} {args:?}");
    match Command::new(program).args(args).spawn() {
        Ok(child) => {
            reap(child, program.to_string());
        }
        Err(e) => warn!("failed to spawn {program}: {e}"),
    }
}

/// Wait for `child` on a detached thread so it does not linger as a zombie.
fn reap(mut child: Child, program: String) -> JoinHandle<Option<ExitStatus>> {
    thread::spawn(move || match child.wait() {
        Ok(status) if status.success() => {
            debug!("{program} exited");
            Some(status)
        }
        Ok(status) => {
            warn!("{program} exited with {status}");
            Some(status)
        }
        Err(e) => {
            warn!("failed to wait for {program}: {e}");
            None
        }
    })
}

fn open_config(paths: &dyn AppPaths) {
    let config_path = paths.config_path();
    let parent = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or(config_path);

    info!("opening config folder at {:?}", parent);
    match Command::new("xdg-open").arg(&parent).spawn() {
        Ok(child) => {
            reap(child, "xdg-open".to_string());
        }
        Err(e) => warn!("xdg-open failed: {e}"),
    }
}

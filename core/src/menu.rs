//! Menu entries and menu snapshots.
//!
//! A [`MenuNode`] is fixed once built, apart from the checked flag of a
//! checkbox, which only the owner thread writes when the native layer reports
//! a click. Nodes are cheap to clone and compare by value.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::area::IndicatorArea;
use crate::error::Result;
use crate::resolver::IconRef;

/// Text given to entries built without any.
pub const DEFAULT_TEXT: &str = "Dobbin";

/// Callback invoked with the menu entry that was activated.
pub type MenuAction = Arc<dyn Fn(&MenuNode) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuKind {
    Label,
    Action,
    Checkbox,
    Separator,
}

struct NodeData {
    kind: MenuKind,
    text: String,
    icon: Option<IconRef>,
    disabled: bool,
    checked: AtomicBool,
    on_action: Option<MenuAction>,
}

/// One entry of an indicator menu.
#[derive(Clone)]
pub struct MenuNode {
    data: Arc<NodeData>,
}

impl MenuNode {
    pub fn builder(kind: MenuKind) -> MenuNodeBuilder {
        MenuNodeBuilder::new(kind)
    }

    pub fn label(text: impl Into<String>) -> Self {
        Self::builder(MenuKind::Label).text(text).build()
    }

    pub fn label_with_icon(text: impl Into<String>, icon: impl Into<IconRef>) -> Self {
        Self::builder(MenuKind::Label).text(text).icon(icon).build()
    }

    pub fn separator() -> Self {
        Self::builder(MenuKind::Separator).build()
    }

    pub fn action<F>(text: impl Into<String>, on_action: F) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        Self::builder(MenuKind::Action)
            .text(text)
            .on_action(on_action)
            .build()
    }

    pub fn action_with_icon<F>(text: impl Into<String>, icon: impl Into<IconRef>, on_action: F) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        Self::builder(MenuKind::Action)
            .text(text)
            .icon(icon)
            .on_action(on_action)
            .build()
    }

    /// Action whose icon is fetched from `url` when the menu is shown.
    pub fn action_with_icon_url<F>(text: impl Into<String>, url: impl Into<String>, on_action: F) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        Self::action_with_icon(text, IconRef::url(url), on_action)
    }

    pub fn action_disabled<F>(text: impl Into<String>, disabled: bool, on_action: F) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        Self::builder(MenuKind::Action)
            .text(text)
            .disabled(disabled)
            .on_action(on_action)
            .build()
    }

    pub fn checkbox<F>(text: impl Into<String>, on_action: F) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        Self::checkbox_checked(text, false, on_action)
    }

    pub fn checkbox_checked<F>(text: impl Into<String>, checked: bool, on_action: F) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        Self::checkbox_disabled(text, checked, false, on_action)
    }

    pub fn checkbox_disabled<F>(
        text: impl Into<String>,
        checked: bool,
        disabled: bool,
        on_action: F,
    ) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        Self::builder(MenuKind::Checkbox)
            .text(text)
            .checked(checked)
            .disabled(disabled)
            .on_action(on_action)
            .build()
    }

    pub fn kind(&self) -> MenuKind {
        self.data.kind
    }

    /// Entry text; empty for separators.
    pub fn text(&self) -> &str {
        &self.data.text
    }

    pub fn icon(&self) -> Option<&IconRef> {
        self.data.icon.as_ref()
    }

    pub fn disabled(&self) -> bool {
        self.data.disabled
    }

    /// Checked state; always `false` for anything but a checkbox.
    pub fn checked(&self) -> bool {
        self.data.checked.load(Ordering::SeqCst)
    }

    /// Resolve the entry icon through the area's resolver.
    pub fn resolve_icon(&self, area: &IndicatorArea) -> Result<Option<PathBuf>> {
        self.data
            .icon
            .as_ref()
            .map(|icon| area.resolve(icon))
            .transpose()
    }

    pub(crate) fn set_checked(&self, checked: bool) {
        if self.data.kind == MenuKind::Checkbox {
            self.data.checked.store(checked, Ordering::SeqCst);
        }
    }

    pub(crate) fn on_action(&self) -> Option<&MenuAction> {
        self.data.on_action.as_ref()
    }

    /// Run the user callback, if any, with this entry.
    pub(crate) fn activate(&self) {
        if let Some(action) = &self.data.on_action {
            action(self);
        }
    }
}

impl PartialEq for MenuNode {
    /// Callbacks cannot be compared by value, so two entries only match if
    /// they share the same callback instance.
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.data, &other.data) {
            return true;
        }
        let same_action = match (&self.data.on_action, &other.data.on_action) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.data.kind == other.data.kind
            && self.data.text == other.data.text
            && self.data.icon == other.data.icon
            && self.data.disabled == other.data.disabled
            && self.checked() == other.checked()
            && same_action
    }
}

impl fmt::Debug for MenuNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuNode")
            .field("kind", &self.data.kind)
            .field("text", &self.data.text)
            .field("icon", &self.data.icon)
            .field("disabled", &self.data.disabled)
            .field("checked", &self.checked())
            .field("on_action", &self.data.on_action.is_some())
            .finish()
    }
}

/// Builder for a [`MenuNode`].
pub struct MenuNodeBuilder {
    kind: MenuKind,
    text: Option<String>,
    icon: Option<IconRef>,
    disabled: bool,
    checked: bool,
    on_action: Option<MenuAction>,
}

impl MenuNodeBuilder {
    pub fn new(kind: MenuKind) -> Self {
        Self {
            kind,
            text: None,
            icon: None,
            disabled: false,
            checked: false,
            on_action: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn icon(mut self, icon: impl Into<IconRef>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn enabled(self, enabled: bool) -> Self {
        self.disabled(!enabled)
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    pub fn selected(self) -> Self {
        self.checked(true)
    }

    pub fn deselected(self) -> Self {
        self.checked(false)
    }

    pub fn on_action<F>(mut self, on_action: F) -> Self
    where
        F: Fn(&MenuNode) + Send + Sync + 'static,
    {
        self.on_action = Some(Arc::new(on_action));
        self
    }

    /// Share an existing callback between several entries.
    pub fn on_action_shared(mut self, on_action: MenuAction) -> Self {
        self.on_action = Some(on_action);
        self
    }

    /// Build the entry, dropping whatever does not apply to its kind.
    pub fn build(self) -> MenuNode {
        let kind = self.kind;
        let text = match kind {
            MenuKind::Separator => String::new(),
            _ => self.text.unwrap_or_else(|| DEFAULT_TEXT.to_string()),
        };
        let on_action = match kind {
            MenuKind::Action | MenuKind::Checkbox => self.on_action,
            MenuKind::Label | MenuKind::Separator => None,
        };

        MenuNode {
            data: Arc::new(NodeData {
                kind,
                text,
                icon: self.icon,
                disabled: self.disabled,
                checked: AtomicBool::new(kind == MenuKind::Checkbox && self.checked),
                on_action,
            }),
        }
    }
}

/// Ordered, flat list of menu entries pushed to the native layer as a whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MenuSnapshot {
    nodes: Arc<[MenuNode]>,
}

impl MenuSnapshot {
    pub fn new(nodes: impl IntoIterator<Item = MenuNode>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MenuNode> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MenuNode> {
        self.nodes.iter()
    }
}

impl From<Vec<MenuNode>> for MenuSnapshot {
    fn from(nodes: Vec<MenuNode>) -> Self {
        Self::new(nodes)
    }
}

impl FromIterator<MenuNode> for MenuSnapshot {
    fn from_iter<I: IntoIterator<Item = MenuNode>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a MenuSnapshot {
    type Item = &'a MenuNode;
    type IntoIter = std::slice::Iter<'a, MenuNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

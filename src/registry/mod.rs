//! Process-wide registries for user supplied reproducibility facts.
//!
//! [`MetadataRegistry`] is a stack of overlays. Each `register` call pushes one
//! overlay; lookups scan from the newest overlay to the oldest, and
//! [`MetadataRegistry::snapshot`] merges the overlays leaf by leaf so an inner
//! registration only shadows the exact paths it sets.

mod files;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Result, TrackerError};

pub use files::{clear_file_register, register_file, FileRegistration, FileRegistry};

/// A registered value: either a leaf string or a nested mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Leaf(String),
    Nested(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn nested<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        MetadataValue::Nested(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            MetadataValue::Leaf(s) => Some(s),
            MetadataValue::Nested(_) => None,
        }
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            MetadataValue::Leaf(s) => serde_yaml::Value::String(s.clone()),
            MetadataValue::Nested(map) => map_to_yaml(map),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Leaf(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Leaf(value)
    }
}

impl From<BTreeMap<String, MetadataValue>> for MetadataValue {
    fn from(value: BTreeMap<String, MetadataValue>) -> Self {
        MetadataValue::Nested(value)
    }
}

/// Convert a plain nested mapping into a YAML mapping.
pub fn map_to_yaml(map: &BTreeMap<String, MetadataValue>) -> serde_yaml::Value {
    let mut out = serde_yaml::Mapping::new();
    for (key, value) in map {
        out.insert(serde_yaml::Value::String(key.clone()), value.to_yaml());
    }
    serde_yaml::Value::Mapping(out)
}

/// Location of a value: one key, or a sequence of keys naming a nested location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataPath(Vec<String>);

impl MetadataPath {
    /// Split `a.b.c` into three keys.
    pub fn dotted(raw: &str) -> Self {
        MetadataPath(raw.split('.').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn validate(&self) -> Result<()> {
        if self.0.is_empty() || self.0.iter().any(|s| s.is_empty()) {
            return Err(TrackerError::InvalidArgument(format!(
                "malformed metadata path '{}'",
                self
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for MetadataPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for MetadataPath {
    fn from(value: &str) -> Self {
        MetadataPath(vec![value.to_string()])
    }
}

impl From<String> for MetadataPath {
    fn from(value: String) -> Self {
        MetadataPath(vec![value])
    }
}

impl<const N: usize> From<[&str; N]> for MetadataPath {
    fn from(value: [&str; N]) -> Self {
        MetadataPath(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[&str]> for MetadataPath {
    fn from(value: &[&str]) -> Self {
        MetadataPath(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<String>> for MetadataPath {
    fn from(value: Vec<String>) -> Self {
        MetadataPath(value)
    }
}

/// Insert `value` at `path`, creating nested containers. A leaf sitting where a
/// container is needed gets replaced.
fn insert_at(map: &mut BTreeMap<String, MetadataValue>, path: &[String], value: MetadataValue) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        match (map.get_mut(head), value) {
            (Some(MetadataValue::Nested(existing)), MetadataValue::Nested(incoming)) => {
                merge_maps(existing, incoming);
            }
            (_, value) => {
                map.insert(head.clone(), value);
            }
        }
        return;
    }
    let slot = map
        .entry(head.clone())
        .or_insert_with(|| MetadataValue::Nested(BTreeMap::new()));
    if !matches!(slot, MetadataValue::Nested(_)) {
        *slot = MetadataValue::Nested(BTreeMap::new());
    }
    if let MetadataValue::Nested(child) = slot {
        insert_at(child, rest, value);
    }
}

fn lookup<'a>(map: &'a BTreeMap<String, MetadataValue>, path: &[String]) -> Option<&'a MetadataValue> {
    let (head, rest) = path.split_first()?;
    let value = map.get(head)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        MetadataValue::Nested(child) => lookup(child, rest),
        MetadataValue::Leaf(_) => None,
    }
}

fn lookup_mut<'a>(
    map: &'a mut BTreeMap<String, MetadataValue>,
    path: &[String],
) -> Option<&'a mut MetadataValue> {
    let (head, rest) = path.split_first()?;
    let value = map.get_mut(head)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        MetadataValue::Nested(child) => lookup_mut(child, rest),
        MetadataValue::Leaf(_) => None,
    }
}

/// Remove the value at `path` and prune containers left empty on the way back up.
fn remove_at(map: &mut BTreeMap<String, MetadataValue>, path: &[String]) -> Option<MetadataValue> {
    let (head, rest) = path.split_first()?;
    if rest.is_empty() {
        return map.remove(head);
    }
    let removed = match map.get_mut(head) {
        Some(MetadataValue::Nested(child)) => remove_at(child, rest),
        _ => None,
    };
    if matches!(map.get(head), Some(MetadataValue::Nested(child)) if child.is_empty()) {
        map.remove(head);
    }
    removed
}

/// Recursive merge: nested mappings merge, anything else is replaced by `overlay`.
fn merge_maps(base: &mut BTreeMap<String, MetadataValue>, overlay: BTreeMap<String, MetadataValue>) {
    for (key, incoming) in overlay {
        match (base.get_mut(&key), incoming) {
            (Some(MetadataValue::Nested(existing)), MetadataValue::Nested(incoming)) => {
                merge_maps(existing, incoming);
            }
            (_, incoming) => {
                base.insert(key, incoming);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Overlay {
    id: u64,
    entries: BTreeMap<String, MetadataValue>,
}

#[derive(Debug, Clone, Default)]
struct OverlayStack {
    overlays: Vec<Overlay>,
    next_id: u64,
}

impl OverlayStack {
    fn push(&mut self, entries: BTreeMap<String, MetadataValue>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.overlays.push(Overlay { id, entries });
        id
    }

    /// Index of the newest overlay containing `path`.
    fn find(&self, path: &MetadataPath) -> Option<usize> {
        self.overlays
            .iter()
            .rposition(|o| lookup(&o.entries, path.segments()).is_some())
    }
}

/// Shared handle to an overlay stack. Clones refer to the same stack.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    inner: Arc<Mutex<OverlayStack>>,
}

impl MetadataRegistry {
    /// A fresh, isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, empty until something registers into it.
    pub fn global() -> &'static MetadataRegistry {
        static GLOBAL: OnceLock<MetadataRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MetadataRegistry::new)
    }

    /// Push one overlay holding `entries`. Returns the overlay id.
    pub fn register<I, P, V>(&self, entries: I) -> Result<u64>
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<MetadataPath>,
        V: Into<MetadataValue>,
    {
        let mut overlay = BTreeMap::new();
        for (path, value) in entries {
            let path = path.into();
            path.validate()?;
            insert_at(&mut overlay, path.segments(), value.into());
        }
        let id = self.inner.lock().push(overlay);
        tracing::debug!(overlay = id, "Registered metadata overlay");
        Ok(id)
    }

    /// Remove the newest occurrence of every path. Nothing is removed unless
    /// every path has a visible registration.
    pub fn deregister<I, P>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<MetadataPath>,
    {
        let paths: Vec<MetadataPath> = paths.into_iter().map(Into::into).collect();
        let mut stack = self.inner.lock();
        // Removals go to a copy; an earlier removal can hide a later path.
        let mut staged = stack.clone();
        for path in &paths {
            path.validate()?;
            // A path listed twice removes two occurrences.
            let Some(idx) = staged.find(path) else {
                return Err(TrackerError::KeyNotFound(path.to_string()));
            };
            remove_at(&mut staged.overlays[idx].entries, path.segments());
            if staged.overlays[idx].entries.is_empty() {
                let overlay = staged.overlays.remove(idx);
                tracing::debug!(overlay = overlay.id, "Dropped empty metadata overlay");
            }
        }
        *stack = staged;
        Ok(())
    }

    /// Register `entries` until the returned guard is closed or dropped.
    pub fn scoped_register<I, P, V>(&self, entries: I) -> Result<ScopedMetadata>
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<MetadataPath>,
        V: Into<MetadataValue>,
    {
        let id = self.register(entries)?;
        Ok(ScopedMetadata {
            registry: self.clone(),
            overlay: id,
            closed: false,
        })
    }

    /// First hit scanning from the newest overlay to the oldest.
    pub fn get(&self, path: impl Into<MetadataPath>) -> Option<MetadataValue> {
        let path = path.into();
        let stack = self.inner.lock();
        stack
            .overlays
            .iter()
            .rev()
            .find_map(|o| lookup(&o.entries, path.segments()).cloned())
    }

    /// Update the newest overlay already holding `path`; a new path goes into
    /// the newest overlay (pushing one if the stack is empty).
    pub fn set(&self, path: impl Into<MetadataPath>, value: impl Into<MetadataValue>) -> Result<()> {
        let path = path.into();
        path.validate()?;
        let value = value.into();
        let mut stack = self.inner.lock();
        if let Some(idx) = stack.find(&path) {
            if let Some(slot) = lookup_mut(&mut stack.overlays[idx].entries, path.segments()) {
                *slot = value;
                return Ok(());
            }
        }
        match stack.overlays.last_mut() {
            Some(top) => insert_at(&mut top.entries, path.segments(), value),
            None => {
                let mut overlay = BTreeMap::new();
                insert_at(&mut overlay, path.segments(), value);
                stack.push(overlay);
            }
        }
        Ok(())
    }

    /// Merge all overlays, oldest first, into one nested mapping.
    pub fn snapshot(&self) -> BTreeMap<String, MetadataValue> {
        let stack = self.inner.lock();
        let mut merged = BTreeMap::new();
        for overlay in &stack.overlays {
            merge_maps(&mut merged, overlay.entries.clone());
        }
        merged
    }

    pub fn clear(&self) {
        let mut stack = self.inner.lock();
        stack.overlays.clear();
    }

    /// Number of overlays on the stack
    pub fn depth(&self) -> usize {
        self.inner.lock().overlays.len()
    }

    fn pop_scope(&self, id: u64) -> Result<()> {
        let mut stack = self.inner.lock();
        match stack.overlays.iter().rposition(|o| o.id == id) {
            // Already emptied by an explicit deregister.
            None => Ok(()),
            Some(idx) if idx + 1 == stack.overlays.len() => {
                stack.overlays.pop();
                Ok(())
            }
            Some(_) => Err(TrackerError::ScopeOrder(id)),
        }
    }

    fn remove_scope(&self, id: u64) {
        let mut stack = self.inner.lock();
        stack.overlays.retain(|o| o.id != id);
    }
}

/// Guard returned by [`MetadataRegistry::scoped_register`].
///
/// Scopes must close innermost first. Closing an outer scope while an inner one
/// is open fails with [`TrackerError::ScopeOrder`]; dropping it removes only its
/// own overlay and logs the violation.
#[must_use = "the registration is removed when the guard is dropped"]
#[derive(Debug)]
pub struct ScopedMetadata {
    registry: MetadataRegistry,
    overlay: u64,
    closed: bool,
}

impl ScopedMetadata {
    pub fn overlay_id(&self) -> u64 {
        self.overlay
    }

    pub fn close(mut self) -> Result<()> {
        let result = self.registry.pop_scope(self.overlay);
        if result.is_ok() {
            self.closed = true;
        }
        result
    }
}

impl Drop for ScopedMetadata {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.registry.pop_scope(self.overlay) {
            tracing::error!(error = %e, "Metadata scope dropped out of order");
            self.registry.remove_scope(self.overlay);
        }
    }
}

pub fn register_metadata<I, P, V>(entries: I) -> Result<u64>
where
    I: IntoIterator<Item = (P, V)>,
    P: Into<MetadataPath>,
    V: Into<MetadataValue>,
{
    MetadataRegistry::global().register(entries)
}

pub fn deregister_metadata<I, P>(paths: I) -> Result<()>
where
    I: IntoIterator<Item = P>,
    P: Into<MetadataPath>,
{
    MetadataRegistry::global().deregister(paths)
}

pub fn scoped_metadata<I, P, V>(entries: I) -> Result<ScopedMetadata>
where
    I: IntoIterator<Item = (P, V)>,
    P: Into<MetadataPath>,
    V: Into<MetadataValue>,
{
    MetadataRegistry::global().scoped_register(entries)
}

pub fn clear_metadata_register() {
    MetadataRegistry::global().clear();
}

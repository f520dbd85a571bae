//! Attribute tree abstraction.
//!
//! The module publishes its endpoints through an [`AttributeTree`], the
//! platform facility that owns node registration, per-attribute dispatch
//! and change notification. [`MemoryTree`] is an in-memory tree that also
//! plays the user-space side: it dispatches reads and writes with mode
//! checks and lets callers block until an attribute is announced as changed.

use rq_common::config::PAGE_SIZE;
use rq_common::error::{RqError, RqResult};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use rq_common::sync::{lock_or_recover, recover};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Owner read permission bit.
pub const S_IRUSR: u16 = 0o400;

/// Owner write permission bit.
pub const S_IWUSR: u16 = 0o200;

/// Path of a node in the attribute tree, e.g. `devices/system/cpu/cpu0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(String);

impl NodePath {
    /// Wrap a slash-separated path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of the child node `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0, name))
    }

    /// Path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read and write callbacks behind one attribute.
pub trait AttributeHandler: Send + Sync {
    /// Append the attribute's value to `page`; returns the bytes appended.
    ///
    /// `page` arrives empty and must not grow beyond [`PAGE_SIZE`].
    fn show(&self, page: &mut Vec<u8>) -> RqResult<usize>;

    /// Consume `input`; returns the number of bytes accepted.
    fn store(&self, input: &[u8]) -> RqResult<usize>;
}

/// A named, permissioned endpoint.
#[derive(Clone)]
pub struct Attribute {
    /// File name under the node.
    pub name: &'static str,
    /// Permission bits.
    pub mode: u16,
    /// Callbacks.
    pub handler: Arc<dyn AttributeHandler>,
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("mode", &format_args!("{:#o}", self.mode))
            .finish_non_exhaustive()
    }
}

/// Attributes registered together on one node.
#[derive(Debug, Clone, Default)]
pub struct AttributeGroup {
    /// Group members, in registration order.
    pub attrs: Vec<Attribute>,
}

impl AttributeGroup {
    /// Attribute names in this group.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.attrs.iter().map(|a| a.name)
    }
}

/// Device event kinds emitted for nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeventAction {
    /// Node became available.
    Add,
    /// Node was released.
    Remove,
}

/// A recorded device event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    /// Event kind.
    pub action: UeventAction,
    /// Node the event refers to.
    pub path: NodePath,
}

/// Registration and notification facility of the platform.
pub trait AttributeTree: Send + Sync + fmt::Debug {
    /// Device node of `cpu`, if that CPU exists.
    fn cpu_device(&self, cpu: u32) -> Option<NodePath>;

    /// Create an empty child node `name` under `parent`.
    fn create_node(&self, parent: &NodePath, name: &str) -> RqResult<NodePath>;

    /// Register every attribute of `group` on `node`, all or nothing.
    fn create_group(&self, node: &NodePath, group: &AttributeGroup) -> RqResult<()>;

    /// Drop `node` together with its attributes.
    fn release_node(&self, node: &NodePath);

    /// Tell device-event listeners that `node` was added.
    fn announce_add(&self, node: &NodePath);

    /// Wake everyone waiting for a change of `attr` on `node`.
    fn notify(&self, node: &NodePath, attr: &str);
}

struct AttrEntry {
    mode: u16,
    handler: Arc<dyn AttributeHandler>,
    generation: u64,
}

#[derive(Default)]
struct NodeEntry {
    attrs: BTreeMap<String, AttrEntry>,
    add_announced: bool,
    /// Platform-owned nodes cannot be released.
    fixed: bool,
}

#[derive(Default)]
struct TreeInner {
    nodes: HashMap<NodePath, NodeEntry>,
    uevents: Vec<Uevent>,
    fail_node_creation: bool,
    fail_group_creation: bool,
}

/// In-memory attribute tree.
///
/// Pre-populates `devices/system/cpu/cpuN` for the configured number of CPUs.
pub struct MemoryTree {
    inner: Mutex<TreeInner>,
    changed: Condvar,
}

impl fmt::Debug for MemoryTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        let mut paths: Vec<_> = inner.nodes.keys().map(NodePath::as_str).collect();
        paths.sort_unstable();
        f.debug_struct("MemoryTree").field("nodes", &paths).finish()
    }
}

impl MemoryTree {
    /// Create a tree with device nodes for `cpus` CPUs.
    #[must_use]
    pub fn new(cpus: u32) -> Self {
        let mut inner = TreeInner::default();
        for cpu in 0..cpus {
            inner.nodes.insert(
                cpu_path(cpu),
                NodeEntry {
                    fixed: true,
                    ..NodeEntry::default()
                },
            );
        }
        Self {
            inner: Mutex::new(inner),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TreeInner> {
        lock_or_recover(&self.inner, "attribute tree")
    }

    /// Make the next node creations fail (simulates allocation failure).
    pub fn fail_node_creation(&self, fail: bool) {
        self.lock().fail_node_creation = fail;
    }

    /// Make the next group registrations fail.
    pub fn fail_group_creation(&self, fail: bool) {
        self.lock().fail_group_creation = fail;
    }

    /// Whether a node exists at `path`.
    #[must_use]
    pub fn node_exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(&NodePath::new(path))
    }

    /// Attribute names registered on the node at `path`.
    pub fn list(&self, path: &str) -> RqResult<Vec<String>> {
        let inner = self.lock();
        let node = inner
            .nodes
            .get(&NodePath::new(path))
            .ok_or_else(|| RqError::NotFound(path.to_string()))?;
        Ok(node.attrs.keys().cloned().collect())
    }

    /// Device events emitted so far.
    #[must_use]
    pub fn uevents(&self) -> Vec<Uevent> {
        self.lock().uevents.clone()
    }

    fn resolve(&self, attr_path: &str) -> RqResult<(u16, Arc<dyn AttributeHandler>)> {
        let (node, name) = split_attr_path(attr_path)?;
        let inner = self.lock();
        let entry = inner
            .nodes
            .get(&node)
            .and_then(|n| n.attrs.get(name))
            .ok_or_else(|| RqError::NotFound(attr_path.to_string()))?;
        Ok((entry.mode, Arc::clone(&entry.handler)))
    }

    /// Read an attribute, e.g. `devices/system/cpu/cpu0/rq-stats/def_timer_ms`.
    ///
    /// # Errors
    ///
    /// [`RqError::NotFound`] if nothing is registered at `attr_path`,
    /// [`RqError::PermissionDenied`] if the mode lacks owner read, or the
    /// handler's own error.
    pub fn read(&self, attr_path: &str) -> RqResult<Vec<u8>> {
        let (mode, handler) = self.resolve(attr_path)?;
        if mode & S_IRUSR == 0 {
            return Err(RqError::PermissionDenied(format!("{attr_path} is not readable")));
        }

        // Handlers run without the tree lock so they may call back into notify().
        let mut page = Vec::with_capacity(PAGE_SIZE);
        let len = handler.show(&mut page)?;
        page.truncate(len.min(PAGE_SIZE));
        debug!(path = attr_path, len = page.len(), "attribute read");
        Ok(page)
    }

    /// Read an attribute as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryTree::read`]; invalid UTF-8 is replaced lossily.
    pub fn read_to_string(&self, attr_path: &str) -> RqResult<String> {
        let page = self.read(attr_path)?;
        Ok(String::from_utf8_lossy(&page).into_owned())
    }

    /// Write an attribute. Input beyond one page minus the terminator is cut.
    ///
    /// # Errors
    ///
    /// [`RqError::NotFound`], [`RqError::PermissionDenied`] if the mode lacks
    /// owner write, or the handler's own error.
    pub fn write(&self, attr_path: &str, input: &[u8]) -> RqResult<usize> {
        let (mode, handler) = self.resolve(attr_path)?;
        if mode & S_IWUSR == 0 {
            return Err(RqError::PermissionDenied(format!("{attr_path} is not writable")));
        }

        let input = &input[..input.len().min(PAGE_SIZE - 1)];
        let consumed = handler.store(input)?;
        debug!(path = attr_path, consumed, "attribute write");
        Ok(consumed)
    }

    /// Current change generation of an attribute, to pass to
    /// [`MemoryTree::wait_for_change`].
    ///
    /// # Errors
    ///
    /// [`RqError::NotFound`] if nothing is registered at `attr_path`.
    pub fn generation(&self, attr_path: &str) -> RqResult<u64> {
        let (node, name) = split_attr_path(attr_path)?;
        let inner = self.lock();
        inner
            .nodes
            .get(&node)
            .and_then(|n| n.attrs.get(name))
            .map(|a| a.generation)
            .ok_or_else(|| RqError::NotFound(attr_path.to_string()))
    }

    /// Block until the attribute's generation moves past `seen`.
    ///
    /// Returns the new generation, or `None` on timeout.
    ///
    /// # Errors
    ///
    /// [`RqError::NotFound`] if the attribute is missing or removed while waiting.
    pub fn wait_for_change(
        &self,
        attr_path: &str,
        seen: u64,
        timeout: Duration,
    ) -> RqResult<Option<u64>> {
        let (node, name) = split_attr_path(attr_path)?;
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();

        loop {
            let generation = inner
                .nodes
                .get(&node)
                .and_then(|n| n.attrs.get(name))
                .map(|a| a.generation)
                .ok_or_else(|| RqError::NotFound(attr_path.to_string()))?;
            if generation != seen {
                return Ok(Some(generation));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            inner = recover(
                self.changed.wait_timeout(inner, deadline - now),
                "attribute tree",
            )
            .0;
        }
    }
}

impl AttributeTree for MemoryTree {
    fn cpu_device(&self, cpu: u32) -> Option<NodePath> {
        let path = cpu_path(cpu);
        self.lock().nodes.contains_key(&path).then_some(path)
    }

    fn create_node(&self, parent: &NodePath, name: &str) -> RqResult<NodePath> {
        let mut inner = self.lock();
        if inner.fail_node_creation {
            return Err(RqError::OutOfMemory(format!("cannot allocate node {name}")));
        }
        if !inner.nodes.contains_key(parent) {
            return Err(RqError::NotFound(parent.to_string()));
        }

        let path = parent.child(name);
        if inner.nodes.contains_key(&path) {
            return Err(RqError::InvalidArgument(format!("{path} already exists")));
        }
        inner.nodes.insert(path.clone(), NodeEntry::default());
        debug!(%path, "node created");
        Ok(path)
    }

    fn create_group(&self, node: &NodePath, group: &AttributeGroup) -> RqResult<()> {
        let mut inner = self.lock();
        if inner.fail_group_creation {
            return Err(RqError::OutOfMemory(format!(
                "cannot create attribute group on {node}"
            )));
        }

        let entry = inner
            .nodes
            .get_mut(node)
            .ok_or_else(|| RqError::NotFound(node.to_string()))?;
        if let Some(dup) = group.names().find(|n| entry.attrs.contains_key(*n)) {
            return Err(RqError::InvalidArgument(format!("{node}/{dup} already exists")));
        }

        for attr in &group.attrs {
            entry.attrs.insert(
                attr.name.to_string(),
                AttrEntry {
                    mode: attr.mode,
                    handler: Arc::clone(&attr.handler),
                    generation: 0,
                },
            );
        }
        debug!(%node, count = group.attrs.len(), "attribute group created");
        Ok(())
    }

    fn release_node(&self, node: &NodePath) {
        let mut inner = self.lock();
        if inner.nodes.get(node).is_some_and(|n| n.fixed) {
            return;
        }
        if let Some(entry) = inner.nodes.remove(node) {
            if entry.add_announced {
                inner.uevents.push(Uevent {
                    action: UeventAction::Remove,
                    path: node.clone(),
                });
            }
            info!(%node, "node released");
        }
        drop(inner);
        // Waiters on removed attributes observe NotFound.
        self.changed.notify_all();
    }

    fn announce_add(&self, node: &NodePath) {
        let mut inner = self.lock();
        let Some(entry) = inner.nodes.get_mut(node) else {
            return;
        };
        entry.add_announced = true;
        inner.uevents.push(Uevent {
            action: UeventAction::Add,
            path: node.clone(),
        });
    }

    fn notify(&self, node: &NodePath, attr: &str) {
        let mut inner = self.lock();
        let Some(entry) = inner.nodes.get_mut(node).and_then(|n| n.attrs.get_mut(attr)) else {
            return;
        };
        entry.generation = entry.generation.wrapping_add(1);
        debug!(%node, attr, generation = entry.generation, "attribute change announced");
        drop(inner);
        self.changed.notify_all();
    }
}

fn cpu_path(cpu: u32) -> NodePath {
    NodePath::new(format!("devices/system/cpu/cpu{cpu}"))
}

fn split_attr_path(attr_path: &str) -> RqResult<(NodePath, &str)> {
    attr_path
        .rsplit_once('/')
        .map(|(node, name)| (NodePath::new(node), name))
        .ok_or_else(|| RqError::NotFound(attr_path.to_string()))
}

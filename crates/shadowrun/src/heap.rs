//! # Shadow Heap
//!
//! Remote-side representatives of in-process objects.
//!
//! ## Philosophy
//!
//! - **Index, Not Pointer**: shadow objects live in a slot table and are named by a
//!   `Handle { index, generation }`. A slot's generation is bumped when its object is
//!   removed, so stale handles stop resolving instead of aliasing the next occupant.
//! - **Canonical Identity**: lookups are keyed on the object id inside a net
//!   reference, never on the token bits, so renewed tokens reach the same object.
//! - **Free Is Terminal**: once an object id has been freed it is tombstoned. A later
//!   reference produces a detached object outside the table that will never be
//!   freed again. Only the most recent `max_tombstones` frees are remembered; an
//!   older id referenced again is shadowed afresh.
//!
//! ## Invariants
//! - At most one live `ShadowObject` per object id; `resolve` on the same id returns
//!   pointer-equal `Arc`s until the object is removed.
//! - `last_seen` values come from a single heap-wide counter and only increase.
//! - The tombstone set never holds more than `max_tombstones` ids.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use shadowpack::NetReference;
use shadowpack::ObjectId;
use shadowwire::ClassInfo;
use shadowwire::ThreadInfo;
use tracing::trace;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The slot table cannot grow past `u32::MAX` entries.
    Exhausted,
}

impl std::fmt::Display for HeapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "shadow heap slot table exhausted"),
        }
    }
}

impl std::error::Error for HeapError {}

pub type Result<T> = std::result::Result<T, HeapError>;

/// Freed ids remembered per heap unless configured otherwise.
pub const DEFAULT_MAX_TOMBSTONES: usize = 65536;

/// Stable name of a shadow object within one heap.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct Handle {
    pub index: u32,
    pub generation: u32,
}

impl Handle {
    /// Carried by detached objects, which own no slot.
    pub const DETACHED: Handle = Handle { index: u32::MAX, generation: u32::MAX };
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Companion data transmitted for an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowData {
    String(String),
    Class(ClassInfo),
    Thread(ThreadInfo),
}

/// The remote representative of one in-process object.
///
/// Holds metadata only. Field contents exist here only if an event transmitted them.
#[derive(Debug)]
pub struct ShadowObject {
    handle: Handle,
    object_id: ObjectId,
    token: AtomicU64,
    last_seen: AtomicU64,
    data: Mutex<Option<ShadowData>>,
}

impl ShadowObject {
    fn new(handle: Handle, token: NetReference, seen: u64) -> Self {
        Self {
            handle,
            object_id: token.object_id(),
            token: AtomicU64::new(token.raw()),
            last_seen: AtomicU64::new(seen),
            data: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// The most recent token seen for this object.
    pub fn net_reference(&self) -> NetReference {
        NetReference::from_raw(self.token.load(Ordering::Relaxed))
    }

    pub fn class_id(&self) -> u32 {
        self.net_reference().class_id()
    }

    pub fn is_class(&self) -> bool {
        self.net_reference().is_class()
    }

    /// Heap generation at which this object was last referenced.
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    /// True for objects referenced after their free was reported.
    pub fn is_detached(&self) -> bool {
        self.handle == Handle::DETACHED
    }

    pub fn data(&self) -> Option<ShadowData> {
        self.data.lock().clone()
    }

    /// The string value, if this object is a string whose contents were sent.
    pub fn string_value(&self) -> Option<String> {
        match &*self.data.lock() {
            Some(ShadowData::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn touch(&self, token: NetReference, seen: u64) {
        self.token.store(token.raw(), Ordering::Relaxed);
        self.last_seen.fetch_max(seen, Ordering::Relaxed);
    }

    fn set_data(&self, data: ShadowData) {
        *self.data.lock() = Some(data);
    }
}

impl std::fmt::Display for ShadowObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_detached() {
            write!(f, "{} (detached)", self.object_id)
        } else {
            write!(f, "{} {}", self.object_id, self.handle)
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<Arc<ShadowObject>>,
}

#[derive(Debug, Default)]
struct Table {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    by_id: HashMap<ObjectId, u32>,
    // A freed id maps to the detached object handed out for it, once one was needed.
    tombstones: HashMap<ObjectId, Option<Arc<ShadowObject>>>,
    // Tombstoned ids, oldest first.
    buried: VecDeque<ObjectId>,
    max_tombstones: usize,
    clock: u64,
}

impl Table {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn live(&self, index: u32) -> Option<&Arc<ShadowObject>> {
        self.slots.get(index as usize).and_then(|s| s.object.as_ref())
    }

    fn insert(&mut self, token: NetReference, seen: u64) -> Result<Arc<ShadowObject>> {
        let index = match self.vacant.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| HeapError::Exhausted)?;
                if index == Handle::DETACHED.index {
                    return Err(HeapError::Exhausted);
                }
                self.slots.push(Slot::default());
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        let handle = Handle { index, generation: slot.generation };
        let object = Arc::new(ShadowObject::new(handle, token, seen));
        slot.object = Some(object.clone());
        self.by_id.insert(token.object_id(), index);
        Ok(object)
    }

    fn bury(&mut self, id: ObjectId) {
        if self.max_tombstones == 0 {
            return;
        }
        if let Entry::Vacant(e) = self.tombstones.entry(id) {
            e.insert(None);
            self.buried.push_back(id);
        }
        while self.buried.len() > self.max_tombstones {
            if let Some(oldest) = self.buried.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }
}

/// The table of shadow objects for one session.
///
/// One mutex guards the whole table. The event path and the free path both go
/// through it, which serialises every access to a given entry.
#[derive(Debug)]
pub struct ShadowHeap {
    table: Mutex<Table>,
}

impl Default for ShadowHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowHeap {
    pub fn new() -> Self {
        Self::with_max_tombstones(DEFAULT_MAX_TOMBSTONES)
    }

    /// A heap that remembers at most `max_tombstones` freed ids. Zero disables
    /// tombstoning, so every reference after a free shadows a fresh object.
    pub fn with_max_tombstones(max_tombstones: usize) -> Self {
        Self { table: Mutex::new(Table { max_tombstones, ..Table::default() }) }
    }

    /// Returns the shadow object for `token`, creating it on first sight.
    ///
    /// The null reference resolves to `None`. A token for an already freed object
    /// resolves to a detached object.
    pub fn resolve(&self, token: NetReference) -> Result<Option<Arc<ShadowObject>>> {
        if token.is_null() {
            return Ok(None);
        }
        let id = token.object_id();
        let mut table = self.table.lock();
        let seen = table.tick();

        if let Some(index) = table.by_id.get(&id).copied() {
            if let Some(object) = table.live(index) {
                object.touch(token, seen);
                return Ok(Some(object.clone()));
            }
        }

        if let Some(entry) = table.tombstones.get_mut(&id) {
            if let Some(object) = entry.as_ref() {
                object.touch(token, seen);
                return Ok(Some(object.clone()));
            }
            warn!(object = %id, "reference to an object whose free was already reported");
            let object = Arc::new(ShadowObject::new(Handle::DETACHED, token, seen));
            *entry = Some(object.clone());
            return Ok(Some(object));
        }

        let object = table.insert(token, seen)?;
        trace!(object = %id, handle = %object.handle(), "shadow object created");
        Ok(Some(object))
    }

    /// Looks up a live object by handle. Stale handles return `None`.
    pub fn get(&self, handle: Handle) -> Option<Arc<ShadowObject>> {
        let table = self.table.lock();
        let slot = table.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.clone()
    }

    /// Looks up a live object by token without creating one.
    pub fn lookup(&self, token: NetReference) -> Option<Arc<ShadowObject>> {
        let table = self.table.lock();
        let index = *table.by_id.get(&token.object_id())?;
        table.live(index).cloned()
    }

    /// Stores companion data on the object named by `token`, creating it if needed.
    pub fn attach(&self, token: NetReference, data: ShadowData) -> Result<Option<Arc<ShadowObject>>> {
        let object = self.resolve(token)?;
        if let Some(object) = &object {
            object.set_data(data);
        }
        Ok(object)
    }

    /// Removes the live object for `token` and tombstones its id.
    ///
    /// Returns the removed object, or `None` if there was no live object, in which
    /// case the id is still tombstoned so a late first reference stays detached.
    /// Once the tombstone set is full the oldest id is forgotten.
    pub fn remove(&self, token: NetReference) -> Option<Arc<ShadowObject>> {
        if token.is_null() {
            return None;
        }
        let id = token.object_id();
        let mut table = self.table.lock();

        let removed = match table.by_id.remove(&id) {
            Some(index) => {
                let slot = &mut table.slots[index as usize];
                let object = slot.object.take();
                slot.generation = slot.generation.wrapping_add(1);
                table.vacant.push(index);
                object
            }
            None => None,
        };

        table.bury(id);
        removed
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.table.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a free was reported for this object id and is still remembered.
    pub fn is_freed(&self, id: ObjectId) -> bool {
        self.table.lock().tombstones.contains_key(&id)
    }

    /// Number of freed ids currently remembered.
    pub fn tombstones(&self) -> usize {
        self.table.lock().tombstones.len()
    }
}

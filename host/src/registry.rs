//! Object identity and cross-thread hand-off
//!
//! The [`Registry`] maps live [`ObjectId`]s to scene handles and owns the
//! queues that carry locally-originated changes from whichever thread
//! produced them to the outbound pump on the tick thread.
//!
//! Locking rules:
//! - the id table has its own mutex, separate from every queue
//! - no lock is held while calling into the scene adapter
//! - queues are unbounded channels; the receiving half sits behind a mutex so
//!   any thread may drain, and each item is handed out at most once

use crate::error::RegistryError;
use crate::scene::{Body, ObjectKind, SceneAdapter, SceneEvent};
use log::{debug, error};
use rand::Rng;
use shared::ObjectId;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// A registered replicated object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedObject<H> {
    pub id: ObjectId,
    pub handle: H,
    pub kind: ObjectKind,
}

/// Locally spawned object waiting for an id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnRequest<H> {
    pub handle: H,
    pub kind: ObjectKind,
}

/// FIFO hand-off between threads, safe for many producers and consumers
pub struct HandoffQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn enqueue(&self, item: T) {
        // The receiver lives as long as the queue, so this only fails if a
        // drainer panicked and dropped it
        if self.tx.send(item).is_err() {
            error!("Hand-off queue receiver is gone, item dropped");
        }
    }

    /// Removes and returns the head of the queue
    pub fn try_dequeue(&self) -> Option<T> {
        lock(&self.rx).try_recv().ok()
    }

    pub fn len(&self) -> usize {
        lock(&self.rx).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicked holder leaves the data structurally valid for our use
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ObjectTable<H> {
    by_id: HashMap<ObjectId, ManagedObject<H>>,
    by_handle: HashMap<H, ObjectId>,
}

impl<H: Copy + Eq + Hash> ObjectTable<H> {
    fn insert(&mut self, object: ManagedObject<H>) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&object.id) {
            return Err(RegistryError::IdInUse(object.id));
        }
        if let Some(existing) = self.by_handle.get(&object.handle) {
            return Err(RegistryError::HandleInUse(*existing));
        }
        self.by_handle.insert(object.handle, object.id);
        self.by_id.insert(object.id, object);
        Ok(())
    }

    fn remove(&mut self, id: ObjectId) -> Result<ManagedObject<H>, RegistryError> {
        let object = self.by_id.remove(&id).ok_or(RegistryError::NotFound(id))?;
        self.by_handle.remove(&object.handle);
        Ok(object)
    }
}

pub struct Registry<H> {
    objects: Mutex<ObjectTable<H>>,
    spawns: HandoffQueue<SpawnRequest<H>>,
    moves: HandoffQueue<H>,
    deletes: HandoffQueue<ObjectId>,
    new_bodies: HandoffQueue<Body<H>>,
    moved_bodies: HandoffQueue<Body<H>>,
}

impl<H: Copy + Eq + Hash + std::fmt::Debug> Registry<H> {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(ObjectTable {
                by_id: HashMap::new(),
                by_handle: HashMap::new(),
            }),
            spawns: HandoffQueue::new(),
            moves: HandoffQueue::new(),
            deletes: HandoffQueue::new(),
            new_bodies: HandoffQueue::new(),
            moved_bodies: HandoffQueue::new(),
        }
    }

    /// Registers `handle` under a fresh random id
    ///
    /// Candidates are drawn from `1..=i32::MAX` and redrawn while a live
    /// object holds them. Candidate choice and insertion happen under one
    /// lock, so concurrent callers never receive the same live id.
    pub fn allocate_and_register(
        &self,
        handle: H,
        kind: ObjectKind,
    ) -> Result<ObjectId, RegistryError> {
        let mut rng = rand::thread_rng();
        let mut objects = lock(&self.objects);

        if let Some(existing) = objects.by_handle.get(&handle) {
            return Err(RegistryError::HandleInUse(*existing));
        }

        let mut id = rng.gen_range(1..=i32::MAX);
        while objects.by_id.contains_key(&id) {
            id = rng.gen_range(1..=i32::MAX);
        }

        objects.insert(ManagedObject { id, handle, kind })?;
        debug!("Allocated object {} for {:?}", id, handle);
        Ok(id)
    }

    /// Registers `handle` under an id chosen by the sending peer
    ///
    /// A collision with a live id is rejected and the existing entry is
    /// left untouched.
    pub fn register_with_id(
        &self,
        id: ObjectId,
        handle: H,
        kind: ObjectKind,
    ) -> Result<(), RegistryError> {
        lock(&self.objects).insert(ManagedObject { id, handle, kind })
    }

    pub fn lookup(&self, id: ObjectId) -> Result<H, RegistryError> {
        lock(&self.objects)
            .by_id
            .get(&id)
            .map(|object| object.handle)
            .ok_or(RegistryError::NotFound(id))
    }

    pub fn get(&self, id: ObjectId) -> Option<ManagedObject<H>> {
        lock(&self.objects).by_id.get(&id).copied()
    }

    pub fn id_of(&self, handle: H) -> Option<ObjectId> {
        lock(&self.objects).by_handle.get(&handle).copied()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        lock(&self.objects).by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live ids, sorted
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = lock(&self.objects).by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes the entry without touching the scene
    pub fn detach(&self, id: ObjectId) -> Result<ManagedObject<H>, RegistryError> {
        lock(&self.objects).remove(id)
    }

    /// Removes the entry and destroys its scene object
    ///
    /// The table lock is released before the scene is called. A second
    /// removal of the same id is `NotFound` and destroys nothing.
    pub fn remove<S>(&self, id: ObjectId, scene: &mut S) -> Result<(), RegistryError>
    where
        S: SceneAdapter<Handle = H>,
    {
        let object = self.detach(id)?;
        scene.destroy(object.handle);
        debug!("Removed object {}", id);
        Ok(())
    }

    pub fn enqueue_spawn(&self, request: SpawnRequest<H>) {
        self.spawns.enqueue(request);
    }

    pub fn try_dequeue_spawn(&self) -> Option<SpawnRequest<H>> {
        self.spawns.try_dequeue()
    }

    pub fn enqueue_move(&self, handle: H) {
        self.moves.enqueue(handle);
    }

    pub fn try_dequeue_move(&self) -> Option<H> {
        self.moves.try_dequeue()
    }

    pub fn enqueue_delete(&self, id: ObjectId) {
        self.deletes.enqueue(id);
    }

    pub fn try_dequeue_delete(&self) -> Option<ObjectId> {
        self.deletes.try_dequeue()
    }

    pub fn enqueue_body_create(&self, body: Body<H>) {
        self.new_bodies.enqueue(body);
    }

    pub fn try_dequeue_body_create(&self) -> Option<Body<H>> {
        self.new_bodies.try_dequeue()
    }

    pub fn enqueue_body_move(&self, body: Body<H>) {
        self.moved_bodies.enqueue(body);
    }

    pub fn try_dequeue_body_move(&self) -> Option<Body<H>> {
        self.moved_bodies.try_dequeue()
    }

    /// Items waiting across all hand-off queues
    pub fn queued(&self) -> usize {
        self.spawns.len()
            + self.moves.len()
            + self.deletes.len()
            + self.new_bodies.len()
            + self.moved_bodies.len()
    }

    /// Routes a locally-originated scene change into the hand-off queues
    pub fn submit(&self, event: SceneEvent<H>) -> Result<(), RegistryError> {
        match event {
            SceneEvent::Spawned { handle, kind } => {
                self.enqueue_spawn(SpawnRequest { handle, kind });
            }
            SceneEvent::Moved { handle } => {
                self.enqueue_move(handle);
            }
            SceneEvent::Deleted { handle } => {
                let id = self.id_of(handle).ok_or(RegistryError::UnknownHandle)?;
                self.detach(id)?;
                self.enqueue_delete(id);
            }
            SceneEvent::BodyTracked(body) => {
                self.register_with_id(body.object_id(), body.handle, ObjectKind::Body)?;
                self.enqueue_body_create(body);
            }
            SceneEvent::BodyMoved(body) => {
                self.enqueue_body_move(body);
            }
            SceneEvent::BodyLost(body) => {
                let id = body.object_id();
                self.detach(id)?;
                self.enqueue_delete(id);
            }
        }
        Ok(())
    }
}

impl<H: Copy + Eq + Hash + std::fmt::Debug> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

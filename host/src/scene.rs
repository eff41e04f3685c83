//! Boundary to the rendering side of the host
//!
//! The replication core never touches render resources directly. It talks to
//! a [`SceneAdapter`], which instantiates, poses and destroys objects and
//! reports locally-originated changes through a pull source.
//! [`HeadlessScene`] is an in-memory adapter used by the `host` binary and
//! by tests.

use log::{debug, info};
use shared::{ObjectId, ObjectType, Pose, Vector3};
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

/// What the scene is asked to instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Prop(ObjectType),
    HoloHead,
    ViveHeadset,
    ViveController,
    Avatar,
    Body,
}

impl ObjectKind {
    /// Only props travel as OBJECT_CREATE
    pub fn is_spawnable(self) -> bool {
        matches!(self, ObjectKind::Prop(_))
    }

    pub fn object_type(self) -> Option<ObjectType> {
        match self {
            ObjectKind::Prop(object_type) => Some(object_type),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Camera {
    /// The view aligned with the sensor
    Primary,
    /// Overhead view, always pitched straight down
    TopDown,
}

/// Tracked skeleton snapshot
///
/// Only the body object itself is registered; `root_joint` is the joint whose
/// world pose is sent on body moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Body<H> {
    pub tracking_id: u64,
    pub handle: H,
    pub root_joint: H,
}

impl<H> Body<H> {
    pub fn object_id(&self) -> ObjectId {
        body_object_id(self.tracking_id)
    }
}

/// Network id of a tracked body: the last five decimal digits of its tracking id
pub fn body_object_id(tracking_id: u64) -> ObjectId {
    (tracking_id % 100_000) as ObjectId
}

/// Locally-originated change that must be replicated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent<H> {
    Spawned { handle: H, kind: ObjectKind },
    Moved { handle: H },
    /// The scene has already destroyed the object
    Deleted { handle: H },
    BodyTracked(Body<H>),
    BodyMoved(Body<H>),
    BodyLost(Body<H>),
}

pub trait SceneAdapter {
    type Handle: Copy + Eq + Hash + Debug + Send + 'static;

    fn instantiate(&mut self, kind: ObjectKind) -> Self::Handle;

    fn set_pose(&mut self, handle: Self::Handle, pose: Pose);

    fn destroy(&mut self, handle: Self::Handle);

    /// `None` once the handle has been destroyed
    fn current_pose(&self, handle: Self::Handle) -> Option<Pose>;

    fn poll_event(&mut self) -> Option<SceneEvent<Self::Handle>>;

    /// Materializes a received mesh as a render surface
    fn materialize_surface(&mut self, label: &str, mesh: &crate::mesh::Mesh);

    fn set_camera_pose(&mut self, camera: Camera, pose: Pose);

    fn set_camera_rotation(&mut self, camera: Camera, rotation: Vector3);

    /// A peer announced a new avatar. Returning a handle registers it under `id`.
    fn avatar_created(&mut self, id: ObjectId, pose: Pose) -> Option<Self::Handle>;

    fn message_received(&mut self, _message: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneHandle(pub u64);

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub kind: ObjectKind,
    pub pose: Pose,
}

/// In-memory scene without rendering
#[derive(Debug, Default)]
pub struct HeadlessScene {
    next_handle: u64,
    objects: HashMap<SceneHandle, SceneObject>,
    bodies: HashMap<u64, Body<SceneHandle>>,
    events: VecDeque<SceneEvent<SceneHandle>>,
    cameras: HashMap<Camera, Pose>,
    surfaces: Vec<String>,
    messages: Vec<String>,
    avatars: Vec<ObjectId>,
    destroyed: usize,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&mut self, kind: ObjectKind, pose: Pose) -> SceneHandle {
        self.next_handle += 1;
        let handle = SceneHandle(self.next_handle);
        self.objects.insert(handle, SceneObject { kind, pose });
        handle
    }

    /// Creates a prop locally and queues it for replication
    pub fn spawn(&mut self, object_type: ObjectType, pose: Pose) -> SceneHandle {
        let kind = ObjectKind::Prop(object_type);
        let handle = self.create(kind, pose);
        self.events.push_back(SceneEvent::Spawned { handle, kind });
        handle
    }

    pub fn move_object(&mut self, handle: SceneHandle, pose: Pose) {
        if let Some(object) = self.objects.get_mut(&handle) {
            object.pose = pose;
            self.events.push_back(SceneEvent::Moved { handle });
        }
    }

    pub fn delete(&mut self, handle: SceneHandle) {
        if self.objects.remove(&handle).is_some() {
            self.destroyed += 1;
            self.events.push_back(SceneEvent::Deleted { handle });
        }
    }

    /// Starts tracking a body, or returns the existing one
    pub fn track_body(&mut self, tracking_id: u64, pose: Pose) -> Body<SceneHandle> {
        if let Some(body) = self.bodies.get(&tracking_id) {
            return *body;
        }

        let handle = self.create(ObjectKind::Body, pose);
        let root_joint = self.create(ObjectKind::Body, pose);
        let body = Body {
            tracking_id,
            handle,
            root_joint,
        };
        self.bodies.insert(tracking_id, body);
        self.events.push_back(SceneEvent::BodyTracked(body));
        body
    }

    pub fn move_body(&mut self, tracking_id: u64, root_pose: Pose) {
        let Some(body) = self.bodies.get(&tracking_id).copied() else {
            return;
        };
        if let Some(joint) = self.objects.get_mut(&body.root_joint) {
            joint.pose = root_pose;
        }
        self.events.push_back(SceneEvent::BodyMoved(body));
    }

    pub fn lose_body(&mut self, tracking_id: u64) {
        if let Some(body) = self.bodies.remove(&tracking_id) {
            self.objects.remove(&body.handle);
            self.objects.remove(&body.root_joint);
            self.events.push_back(SceneEvent::BodyLost(body));
        }
    }

    pub fn object(&self, handle: SceneHandle) -> Option<&SceneObject> {
        self.objects.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn camera(&self, camera: Camera) -> Option<Pose> {
        self.cameras.get(&camera).copied()
    }

    pub fn surfaces(&self) -> &[String] {
        &self.surfaces
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn avatars(&self) -> &[ObjectId] {
        &self.avatars
    }

    /// Number of objects destroyed so far, locally or on request
    pub fn destroyed(&self) -> usize {
        self.destroyed
    }
}

impl SceneAdapter for HeadlessScene {
    type Handle = SceneHandle;

    fn instantiate(&mut self, kind: ObjectKind) -> SceneHandle {
        let handle = self.create(kind, Pose::default());
        debug!("Instantiated {:?} as {:?}", kind, handle);
        handle
    }

    fn set_pose(&mut self, handle: SceneHandle, pose: Pose) {
        if let Some(object) = self.objects.get_mut(&handle) {
            object.pose = pose;
        }
    }

    fn destroy(&mut self, handle: SceneHandle) {
        if self.objects.remove(&handle).is_some() {
            self.destroyed += 1;
        }
    }

    fn current_pose(&self, handle: SceneHandle) -> Option<Pose> {
        self.objects.get(&handle).map(|object| object.pose)
    }

    fn poll_event(&mut self) -> Option<SceneEvent<SceneHandle>> {
        self.events.pop_front()
    }

    fn materialize_surface(&mut self, label: &str, mesh: &crate::mesh::Mesh) {
        debug!(
            "Surface {} with {} vertices",
            label,
            mesh.vertices.len()
        );
        self.surfaces.push(label.to_string());
    }

    fn set_camera_pose(&mut self, camera: Camera, pose: Pose) {
        self.cameras.insert(camera, pose);
    }

    fn set_camera_rotation(&mut self, camera: Camera, rotation: Vector3) {
        self.cameras.entry(camera).or_default().rotation = rotation;
    }

    fn avatar_created(&mut self, id: ObjectId, pose: Pose) -> Option<SceneHandle> {
        info!("Avatar {} announced", id);
        self.avatars.push(id);
        Some(self.create(ObjectKind::Avatar, pose))
    }

    fn message_received(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawnable_kinds() {
        assert!(ObjectKind::Prop(ObjectType::Cube).is_spawnable());
        assert!(!ObjectKind::HoloHead.is_spawnable());
        assert!(!ObjectKind::Body.is_spawnable());
        assert_eq!(
            ObjectKind::Prop(ObjectType::Tree).object_type(),
            Some(ObjectType::Tree)
        );
        assert_eq!(ObjectKind::Avatar.object_type(), None);
    }

    #[test]
    fn test_body_object_id_uses_last_five_digits() {
        assert_eq!(body_object_id(72_057_594_037_927_936), 27_936);
        assert_eq!(body_object_id(42), 42);
        assert_eq!(body_object_id(100_000), 0);
    }

    #[test]
    fn test_local_changes_become_events() {
        let mut scene = HeadlessScene::new();
        let handle = scene.spawn(ObjectType::Cube, Pose::default());
        scene.move_object(handle, Pose::default());
        scene.delete(handle);

        assert_eq!(
            scene.poll_event(),
            Some(SceneEvent::Spawned {
                handle,
                kind: ObjectKind::Prop(ObjectType::Cube)
            })
        );
        assert_eq!(scene.poll_event(), Some(SceneEvent::Moved { handle }));
        assert_eq!(scene.poll_event(), Some(SceneEvent::Deleted { handle }));
        assert_eq!(scene.poll_event(), None);
        assert!(scene.current_pose(handle).is_none());
    }

    #[test]
    fn test_body_tracking_events() {
        let mut scene = HeadlessScene::new();
        let body = scene.track_body(123_456, Pose::default());
        assert_eq!(scene.track_body(123_456, Pose::default()), body);

        let root = Pose::new(Vector3::new(0.0, 1.0, 2.0), Vector3::ZERO);
        scene.move_body(123_456, root);
        assert_eq!(scene.current_pose(body.root_joint), Some(root));

        scene.lose_body(123_456);
        let events: Vec<_> = std::iter::from_fn(|| scene.poll_event()).collect();
        assert_eq!(
            events,
            vec![
                SceneEvent::BodyTracked(body),
                SceneEvent::BodyMoved(body),
                SceneEvent::BodyLost(body)
            ]
        );
        assert_eq!(body.object_id(), 23_456);
    }
}

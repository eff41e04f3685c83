//! Per-tick replication of local scene changes to the head-mounted client

use crate::error::RegistryError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionStatus};
use crate::registry::Registry;
use crate::scene::SceneAdapter;
use crate::transport::{Connector, PacketSink};
use log::{debug, trace, warn};
use shared::{Packet, SizeOrder};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scene_events: usize,
    pub sent: usize,
    pub connect_requested: bool,
}

pub struct OutboundPump<H> {
    registry: Arc<Registry<H>>,
    lifecycle: Arc<ConnectionLifecycle>,
    sink: Arc<dyn PacketSink>,
    connector: Arc<dyn Connector>,
    order: SizeOrder,
}

impl<H: Copy + Eq + Hash + Debug> OutboundPump<H> {
    pub fn new(
        registry: Arc<Registry<H>>,
        lifecycle: Arc<ConnectionLifecycle>,
        sink: Arc<dyn PacketSink>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            sink,
            connector,
            order: SizeOrder::Little,
        }
    }

    /// Runs one tick
    ///
    /// Scene events are always routed into the registry. Queues are drained
    /// only while the reverse channel is connected; in `Ready` the tick
    /// starts the connect attempt instead.
    pub fn tick<S>(&mut self, scene: &mut S) -> TickReport
    where
        S: SceneAdapter<Handle = H>,
    {
        let mut report = TickReport {
            scene_events: self.intake(scene),
            ..TickReport::default()
        };

        match self.lifecycle.status() {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Ready => {
                if self.lifecycle.begin_attempt() {
                    self.connector.connect(Arc::clone(&self.lifecycle));
                    report.connect_requested = true;
                }
                return report;
            }
            _ => return report,
        }

        report.sent += self.drain_spawns(scene);
        report.sent += self.drain_moves(scene);
        report.sent += self.drain_body_creates(scene);
        report.sent += self.drain_body_moves(scene);
        report.sent += self.drain_deletes();

        if report.sent > 0 {
            trace!("Tick sent {} packets", report.sent);
        }
        report
    }

    fn intake<S>(&self, scene: &mut S) -> usize
    where
        S: SceneAdapter<Handle = H>,
    {
        let mut count = 0;
        while let Some(event) = scene.poll_event() {
            count += 1;
            match self.registry.submit(event) {
                Ok(()) => {}
                // Deleted before it was ever replicated
                Err(RegistryError::UnknownHandle) => {
                    debug!("Scene deleted an unreplicated object");
                }
                Err(e) => warn!("Scene event not replicated: {}", e),
            }
        }
        count
    }

    fn send(&self, packet: Packet) -> bool {
        trace!("Sending {:?}", packet.flag());
        match packet.encode_with(self.order) {
            Ok(frame) => {
                self.sink.send(frame);
                true
            }
            Err(e) => {
                warn!("Dropping unencodable {:?}: {}", packet.flag(), e);
                false
            }
        }
    }

    fn drain_spawns<S>(&self, scene: &S) -> usize
    where
        S: SceneAdapter<Handle = H>,
    {
        let mut sent = 0;
        while let Some(request) = self.registry.try_dequeue_spawn() {
            let Some(object_type) = request.kind.object_type() else {
                warn!("{:?} is not spawnable, dropping spawn", request.kind);
                continue;
            };
            let Some(pose) = scene.current_pose(request.handle) else {
                debug!("{:?} destroyed before its spawn was sent", request.handle);
                continue;
            };

            let id = match self.registry.allocate_and_register(request.handle, request.kind) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Could not register spawned {:?}: {}", request.handle, e);
                    continue;
                }
            };

            if self.send(Packet::ObjectCreate {
                pose,
                object_type,
                id,
            }) {
                sent += 1;
            }
        }
        sent
    }

    fn drain_moves<S>(&self, scene: &S) -> usize
    where
        S: SceneAdapter<Handle = H>,
    {
        let mut sent = 0;
        while let Some(handle) = self.registry.try_dequeue_move() {
            let Some(id) = self.registry.id_of(handle) else {
                debug!("Move for unregistered {:?} skipped", handle);
                continue;
            };
            let Some(pose) = scene.current_pose(handle) else {
                continue;
            };

            if self.send(Packet::ObjectMove { pose, id }) {
                sent += 1;
            }
        }
        sent
    }

    fn drain_body_creates<S>(&self, scene: &S) -> usize
    where
        S: SceneAdapter<Handle = H>,
    {
        let mut sent = 0;
        while let Some(body) = self.registry.try_dequeue_body_create() {
            let Some(pose) = scene.current_pose(body.handle) else {
                continue;
            };

            if self.send(Packet::AvatarCreate {
                pose,
                id: body.object_id(),
            }) {
                sent += 1;
            }
        }
        sent
    }

    fn drain_body_moves<S>(&self, scene: &S) -> usize
    where
        S: SceneAdapter<Handle = H>,
    {
        let mut sent = 0;
        while let Some(body) = self.registry.try_dequeue_body_move() {
            let Some(pose) = scene.current_pose(body.root_joint) else {
                continue;
            };

            if self.send(Packet::ObjectMove {
                pose,
                id: body.object_id(),
            }) {
                sent += 1;
            }
        }
        sent
    }

    fn drain_deletes(&self) -> usize {
        let mut sent = 0;
        while let Some(id) = self.registry.try_dequeue_delete() {
            if self.send(Packet::Delete { id }) {
                sent += 1;
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SpawnRequest;
    use crate::scene::{body_object_id, HeadlessScene, ObjectKind, SceneHandle};
    use assert_approx_eq::assert_approx_eq;
    use shared::{ObjectType, Pose, Vector3, SIZE_PREFIX_LEN};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn packets(&self) -> Vec<Packet> {
            self.frames
                .lock()
                .unwrap()
                .drain(..)
                .map(|frame| Packet::decode(&frame[SIZE_PREFIX_LEN..]).unwrap())
                .collect()
        }
    }

    impl PacketSink for RecordingSink {
        fn send(&self, frame: Vec<u8>) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        calls: AtomicUsize,
    }

    impl Connector for CountingConnector {
        fn connect(&self, _lifecycle: Arc<ConnectionLifecycle>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        pump: OutboundPump<SceneHandle>,
        registry: Arc<Registry<SceneHandle>>,
        lifecycle: Arc<ConnectionLifecycle>,
        sink: Arc<RecordingSink>,
        connector: Arc<CountingConnector>,
        scene: HeadlessScene,
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:45000".parse().unwrap()
    }

    fn create_fixture() -> Fixture {
        let registry = Arc::new(Registry::new());
        let lifecycle = Arc::new(ConnectionLifecycle::new());
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(CountingConnector::default());
        let pump = OutboundPump::new(
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            sink.clone(),
            connector.clone(),
        );
        Fixture {
            pump,
            registry,
            lifecycle,
            sink,
            connector,
            scene: HeadlessScene::new(),
        }
    }

    fn connected_fixture() -> Fixture {
        let fixture = create_fixture();
        fixture.lifecycle.mark_peer_reachable(peer());
        fixture.lifecycle.begin_attempt();
        fixture.lifecycle.finish_attempt(Ok(peer()));
        fixture
    }

    fn pose(x: f32) -> Pose {
        Pose::new(Vector3::new(x, 0.0, -x), Vector3::new(0.0, 30.0, 0.0))
    }

    #[test]
    fn test_ready_triggers_one_connect_attempt() {
        let mut f = create_fixture();
        f.lifecycle.mark_peer_reachable(peer());
        f.scene.spawn(ObjectType::Cube, pose(1.0));

        let report = f.pump.tick(&mut f.scene);
        assert!(report.connect_requested);
        assert_eq!(report.sent, 0);
        assert_eq!(f.lifecycle.status(), ConnectionStatus::Attempting);

        let report = f.pump.tick(&mut f.scene);
        assert!(!report.connect_requested);
        assert_eq!(f.connector.calls.load(Ordering::SeqCst), 1);
        assert!(f.sink.packets().is_empty());
        assert_eq!(f.registry.queued(), 1);
    }

    #[test]
    fn test_queues_wait_until_connected() {
        let mut f = create_fixture();
        let handle = f.scene.spawn(ObjectType::Tree, pose(2.0));

        for _ in 0..3 {
            let report = f.pump.tick(&mut f.scene);
            assert_eq!(report.sent, 0);
        }
        assert_eq!(f.registry.queued(), 1);
        assert_eq!(f.connector.calls.load(Ordering::SeqCst), 0);

        f.lifecycle.mark_peer_reachable(peer());
        f.lifecycle.begin_attempt();
        f.lifecycle.finish_attempt(Ok(peer()));

        let report = f.pump.tick(&mut f.scene);
        assert_eq!(report.sent, 1);
        let id = f.registry.id_of(handle).unwrap();
        assert_eq!(
            f.sink.packets(),
            vec![Packet::ObjectCreate {
                pose: pose(2.0),
                object_type: ObjectType::Tree,
                id
            }]
        );
    }

    #[test]
    fn test_spawn_move_delete_across_ticks() {
        let mut f = connected_fixture();
        let handle = f.scene.spawn(ObjectType::Cube, pose(1.0));
        f.pump.tick(&mut f.scene);
        let id = f.registry.id_of(handle).unwrap();
        assert!(id >= 1);

        f.scene.move_object(handle, pose(4.5));
        f.pump.tick(&mut f.scene);

        f.scene.delete(handle);
        f.pump.tick(&mut f.scene);

        let packets = f.sink.packets();
        assert_eq!(packets.len(), 3);
        assert!(matches!(packets[0], Packet::ObjectCreate { id: sent, object_type: ObjectType::Cube, .. } if sent == id));
        match &packets[1] {
            Packet::ObjectMove { pose, id: moved } => {
                assert_eq!(*moved, id);
                assert_approx_eq!(pose.position.x, 4.5);
                assert_approx_eq!(pose.position.z, -4.5);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
        assert_eq!(packets[2], Packet::Delete { id });
        assert!(!f.registry.contains(id));
    }

    #[test]
    fn test_deleted_before_drain_sends_nothing() {
        let mut f = connected_fixture();
        let handle = f.scene.spawn(ObjectType::Sphere, pose(1.0));
        f.scene.move_object(handle, pose(2.0));
        f.scene.delete(handle);

        let report = f.pump.tick(&mut f.scene);
        assert_eq!(report.scene_events, 3);
        assert_eq!(report.sent, 0);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_non_spawnable_kinds_are_dropped() {
        let mut f = connected_fixture();
        let handle = f.scene.instantiate(ObjectKind::HoloHead);
        f.registry.enqueue_spawn(SpawnRequest {
            handle,
            kind: ObjectKind::HoloHead,
        });

        let report = f.pump.tick(&mut f.scene);
        assert_eq!(report.sent, 0);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_body_replication() {
        let mut f = connected_fixture();
        let tracking_id = 72_057_594_037_927_936;
        let id = body_object_id(tracking_id);

        f.scene.track_body(tracking_id, pose(1.0));
        f.pump.tick(&mut f.scene);
        assert!(f.registry.contains(id));

        f.scene.move_body(tracking_id, pose(3.0));
        f.pump.tick(&mut f.scene);

        f.scene.lose_body(tracking_id);
        f.pump.tick(&mut f.scene);

        assert_eq!(
            f.sink.packets(),
            vec![
                Packet::AvatarCreate { pose: pose(1.0), id },
                Packet::ObjectMove { pose: pose(3.0), id },
                Packet::Delete { id },
            ]
        );
        assert!(!f.registry.contains(id));
    }

    #[test]
    fn test_error_status_transmits_nothing() {
        let mut f = create_fixture();
        f.lifecycle.mark_peer_reachable(peer());
        f.lifecycle.begin_attempt();
        f.lifecycle.finish_attempt(Err(crate::error::TransportError::NoConnectTarget));

        f.registry.enqueue_delete(11);
        let report = f.pump.tick(&mut f.scene);
        assert_eq!(report.sent, 0);
        assert_eq!(f.registry.queued(), 1);
        assert!(!report.connect_requested);
    }
}

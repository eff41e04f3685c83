//! Applies inbound packets to the scene and registry

use crate::error::{DispatchError, RegistryError};
use crate::mesh::{Mesh, MeshFormat, MeshHistory, SimpleMeshFormat};
use crate::registry::Registry;
use crate::scene::{Camera, ObjectKind, SceneAdapter};
use crate::transport::{ConnectionId, Origin};
use log::{debug, info, trace, warn};
use shared::{ObjectId, Packet, Pose, Vector3};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Pitch of the overhead camera, in degrees
const TOP_DOWN_PITCH: f32 = 90.0;

/// Headset and controllers announced by one event-transport peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViveMachine {
    pub connection: ConnectionId,
    pub headset: ObjectId,
    pub left_controller: ObjectId,
    pub right_controller: ObjectId,
}

impl ViveMachine {
    pub fn ids(&self) -> [ObjectId; 3] {
        [self.headset, self.left_controller, self.right_controller]
    }
}

pub struct Dispatcher<H> {
    registry: Arc<Registry<H>>,
    machines: HashMap<ConnectionId, ViveMachine>,
    meshes: MeshHistory,
    format: Box<dyn MeshFormat>,
}

impl<H: Copy + Eq + Hash + Debug> Dispatcher<H> {
    pub fn new(registry: Arc<Registry<H>>, mesh_history_limit: Option<usize>) -> Self {
        Self::with_format(
            registry,
            MeshHistory::new(mesh_history_limit),
            Box::new(SimpleMeshFormat),
        )
    }

    pub fn with_format(
        registry: Arc<Registry<H>>,
        meshes: MeshHistory,
        format: Box<dyn MeshFormat>,
    ) -> Self {
        Self {
            registry,
            machines: HashMap::new(),
            meshes,
            format,
        }
    }

    pub fn mesh_history(&self) -> &MeshHistory {
        &self.meshes
    }

    pub fn machine(&self, connection: ConnectionId) -> Option<&ViveMachine> {
        self.machines.get(&connection)
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// Applies one frame body, containing any failure to this packet
    pub fn dispatch<S>(&mut self, origin: Origin, body: &[u8], scene: &mut S)
    where
        S: SceneAdapter<Handle = H>,
    {
        if let Err(e) = self.interpret_packet(origin, body, scene) {
            if e.is_malformed() {
                warn!("Dropping malformed packet from {:?}: {}", origin, e);
            } else {
                warn!("Packet from {:?} not applied: {}", origin, e);
            }
        }
    }

    /// Decodes a frame body (flag + payload) and applies its effect
    pub fn interpret_packet<S>(
        &mut self,
        origin: Origin,
        body: &[u8],
        scene: &mut S,
    ) -> Result<(), DispatchError>
    where
        S: SceneAdapter<Handle = H>,
    {
        let packet = Packet::decode(body)?;
        trace!("{:?} from {:?}", packet.flag(), origin);

        match packet {
            Packet::Mesh { data } => {
                let meshes = self.format.decode(&data)?;
                debug!("Received {} meshes", meshes.len());
                for mesh in meshes {
                    self.add_surface(mesh, scene);
                }
            }
            Packet::ObjectCreate {
                pose,
                object_type,
                id,
            } => {
                self.create_registered(id, ObjectKind::Prop(object_type), pose, scene)?;
                info!("{} created as object {}", object_type.name(), id);
            }
            Packet::Text { message } => {
                info!("Message: {}", message);
                scene.message_received(&message);
            }
            Packet::ObjectMove { pose, id } => {
                let handle = self.registry.lookup(id)?;
                scene.set_pose(handle, pose);
            }
            Packet::Camera { pose } => {
                scene.set_camera_pose(Camera::Primary, pose);
                let top_down = Vector3::new(TOP_DOWN_PITCH, pose.rotation.y, 0.0);
                scene.set_camera_rotation(Camera::TopDown, top_down);
            }
            Packet::HoloHeadCreate { pose, id } => {
                self.create_registered(id, ObjectKind::HoloHead, pose, scene)?;
                info!("Holo head created as object {}", id);
            }
            Packet::AvatarCreate { pose, id } => {
                if let Some(handle) = scene.avatar_created(id, pose) {
                    if let Err(e) = self.registry.register_with_id(id, handle, ObjectKind::Avatar) {
                        scene.destroy(handle);
                        return Err(e.into());
                    }
                }
            }
            Packet::Delete { id } => {
                self.registry.remove(id, scene)?;
            }
            Packet::ViveCreate {
                hmd_id,
                left_id,
                right_id,
            } => {
                self.create_vive(origin, [hmd_id, left_id, right_id], scene)?;
            }
            Packet::ViveMove { devices } => {
                // Every device is applied even if an earlier one is unknown
                let mut first_error = None;
                for device in devices {
                    match self.registry.lookup(device.id) {
                        Ok(handle) => scene.set_pose(handle, device.pose),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                if let Some(e) = first_error {
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Removes the objects of the machine announced on `connection`, if any
    pub fn handle_disconnect<S>(
        &mut self,
        connection: ConnectionId,
        scene: &mut S,
    ) -> Option<ViveMachine>
    where
        S: SceneAdapter<Handle = H>,
    {
        let machine = self.machines.remove(&connection)?;
        self.remove_all(&machine.ids(), scene);
        info!(
            "Removed vive machine {:?} of connection {}",
            machine.ids(),
            connection
        );
        Some(machine)
    }

    /// Replays previously saved meshes into the scene and history
    pub fn restore_meshes<S>(&mut self, meshes: Vec<Mesh>, scene: &mut S)
    where
        S: SceneAdapter<Handle = H>,
    {
        let count = meshes.len();
        for mesh in meshes {
            self.add_surface(mesh, scene);
        }
        info!("Restored {} meshes", count);
    }

    fn add_surface<S>(&mut self, mesh: Mesh, scene: &mut S)
    where
        S: SceneAdapter<Handle = H>,
    {
        let label = self.meshes.push(mesh.clone());
        scene.materialize_surface(&label, &mesh);
    }

    /// Instantiates `kind` at `pose` and registers it under `id`. A rejected
    /// id destroys the fresh handle again.
    fn create_registered<S>(
        &self,
        id: ObjectId,
        kind: ObjectKind,
        pose: Pose,
        scene: &mut S,
    ) -> Result<H, RegistryError>
    where
        S: SceneAdapter<Handle = H>,
    {
        let handle = scene.instantiate(kind);
        scene.set_pose(handle, pose);

        if let Err(e) = self.registry.register_with_id(id, handle, kind) {
            scene.destroy(handle);
            return Err(e);
        }
        Ok(handle)
    }

    fn create_vive<S>(
        &mut self,
        origin: Origin,
        ids: [ObjectId; 3],
        scene: &mut S,
    ) -> Result<(), RegistryError>
    where
        S: SceneAdapter<Handle = H>,
    {
        // All three or none
        for (i, id) in ids.iter().enumerate() {
            if self.registry.contains(*id) || ids[..i].contains(id) {
                return Err(RegistryError::IdInUse(*id));
            }
        }

        let kinds = [
            ObjectKind::ViveHeadset,
            ObjectKind::ViveController,
            ObjectKind::ViveController,
        ];
        for (i, (id, kind)) in ids.iter().zip(kinds).enumerate() {
            if let Err(e) = self.create_registered(*id, kind, Pose::default(), scene) {
                self.remove_all(&ids[..i], scene);
                return Err(e);
            }
        }

        let Origin::Event(connection) = origin else {
            debug!("Vive objects {:?} created without a peer connection", ids);
            return Ok(());
        };

        let machine = ViveMachine {
            connection,
            headset: ids[0],
            left_controller: ids[1],
            right_controller: ids[2],
        };
        if let Some(previous) = self.machines.insert(connection, machine) {
            warn!(
                "Connection {} replaced its vive machine {:?}",
                connection,
                previous.ids()
            );
            self.remove_all(&previous.ids(), scene);
        }
        info!("Vive machine {:?} created for connection {}", ids, connection);
        Ok(())
    }

    fn remove_all<S>(&self, ids: &[ObjectId], scene: &mut S)
    where
        S: SceneAdapter<Handle = H>,
    {
        for id in ids {
            if let Err(e) = self.registry.remove(*id, scene) {
                warn!("Could not remove object {}: {}", id, e);
            }
        }
    }
}

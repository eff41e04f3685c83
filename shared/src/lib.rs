//! Wire codec shared by the scene host and its peers
//!
//! Every packet on the wire is laid out as
//!
//! ```text
//! [u32 size][i32 flag][payload...]
//! ```
//!
//! where `size` counts the flag and payload bytes. All payload fields are
//! little-endian: positions and rotations are `f32` triples, ids and type
//! codes are `i32`, and text is raw ASCII whose length is implied by `size`.
//! The stream transport used by the head-mounted device sends the size prefix
//! with its bytes swapped, see [`SizeOrder`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod assembler;

pub use assembler::{FrameAssembler, FramingError};

/// Process-relative identifier of a replicated scene object
pub type ObjectId = i32;

/// Width of the size prefix in bytes
pub const SIZE_PREFIX_LEN: usize = 4;
/// Width of the flag in bytes
pub const FLAG_LEN: usize = 4;
/// Position plus euler rotation
pub const POSE_LEN: usize = 24;
/// One tracked device inside a VIVE_MOVE payload
pub const VIVE_STRIDE: usize = POSE_LEN + 4;
/// Largest frame a reader accepts unless configured otherwise
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet of {len} bytes is too short to carry a flag")]
    MissingFlag { len: usize },

    #[error("unknown packet flag {0}")]
    UnknownFlag(i32),

    #[error("unknown object type {0}")]
    UnknownObjectType(i32),

    #[error("read of {needed} bytes at offset {offset} exceeds payload of {available} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("declared frame size {size} exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// World position and euler rotation in degrees, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub rotation: Vector3,
}

impl Pose {
    pub fn new(position: Vector3, rotation: Vector3) -> Self {
        Self { position, rotation }
    }
}

/// A pose tagged with the object it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackedPose {
    pub pose: Pose,
    pub id: ObjectId,
}

/// Packet discriminant. The numeric codes are fixed on both sides of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Flag {
    Mesh = 1,
    ObjectCreate = 2,
    Text = 3,
    ObjectMove = 4,
    Camera = 5,
    HoloHeadCreate = 6,
    AvatarCreate = 7,
    Delete = 8,
    ViveCreate = 9,
    ViveMove = 10,
}

impl Flag {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Flag> {
        let flag = match code {
            1 => Flag::Mesh,
            2 => Flag::ObjectCreate,
            3 => Flag::Text,
            4 => Flag::ObjectMove,
            5 => Flag::Camera,
            6 => Flag::HoloHeadCreate,
            7 => Flag::AvatarCreate,
            8 => Flag::Delete,
            9 => Flag::ViveCreate,
            10 => Flag::ViveMove,
            _ => return None,
        };
        Some(flag)
    }

    /// Fixed payload length, or `None` for variable-length payloads
    pub fn payload_len(self) -> Option<usize> {
        match self {
            Flag::Mesh | Flag::Text => None,
            Flag::ObjectCreate => Some(POSE_LEN + 8),
            Flag::ObjectMove | Flag::HoloHeadCreate | Flag::AvatarCreate => Some(POSE_LEN + 4),
            Flag::Camera => Some(POSE_LEN),
            Flag::Delete => Some(4),
            Flag::ViveCreate => Some(12),
            Flag::ViveMove => Some(VIVE_STRIDE * 3),
        }
    }
}

/// Prop types that may be spawned across the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ObjectType {
    Cube = 1,
    Sphere = 2,
    Tree = 3,
}

impl ObjectType {
    pub const ALL: [ObjectType; 3] = [ObjectType::Cube, ObjectType::Sphere, ObjectType::Tree];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Result<ObjectType, CodecError> {
        match code {
            1 => Ok(ObjectType::Cube),
            2 => Ok(ObjectType::Sphere),
            3 => Ok(ObjectType::Tree),
            other => Err(CodecError::UnknownObjectType(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Cube => "Cube",
            ObjectType::Sphere => "Sphere",
            ObjectType::Tree => "Tree",
        }
    }
}

/// Byte order of the leading size prefix. Payload fields are always little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeOrder {
    #[default]
    Little,
    /// Bytes 0<->3 and 1<->2 exchanged before interpretation
    Swapped,
}

impl SizeOrder {
    pub fn read(self, bytes: [u8; 4]) -> u32 {
        match self {
            SizeOrder::Little => u32::from_le_bytes(bytes),
            SizeOrder::Swapped => u32::from_le_bytes([bytes[3], bytes[2], bytes[1], bytes[0]]),
        }
    }

    pub fn write(self, size: u32) -> [u8; 4] {
        let bytes = size.to_le_bytes();
        match self {
            SizeOrder::Little => bytes,
            SizeOrder::Swapped => [bytes[3], bytes[2], bytes[1], bytes[0]],
        }
    }
}

/// Bounds-checked view over a packet payload. Offsets are relative to the
/// first byte after the flag.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    bytes: &'a [u8],
}

impl<'a> FieldView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn word(&self, offset: usize) -> Result<[u8; 4], CodecError> {
        let truncated = CodecError::Truncated {
            offset,
            needed: 4,
            available: self.bytes.len(),
        };
        let end = offset.checked_add(4).ok_or_else(|| truncated.clone())?;
        let slice = self.bytes.get(offset..end).ok_or(truncated)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(slice);
        Ok(word)
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32, CodecError> {
        self.word(offset).map(i32::from_le_bytes)
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32, CodecError> {
        self.word(offset).map(f32::from_le_bytes)
    }

    pub fn read_vector3(&self, offset: usize) -> Result<Vector3, CodecError> {
        Ok(Vector3 {
            x: self.read_f32(offset)?,
            y: self.read_f32(offset + 4)?,
            z: self.read_f32(offset + 8)?,
        })
    }

    pub fn read_pose(&self, offset: usize) -> Result<Pose, CodecError> {
        Ok(Pose {
            position: self.read_vector3(offset)?,
            rotation: self.read_vector3(offset + 12)?,
        })
    }
}

/// Splits a frame body (flag + payload, size prefix already stripped) into
/// the raw flag code and a view over the payload.
pub fn split_body(body: &[u8]) -> Result<(i32, FieldView<'_>), CodecError> {
    if body.len() < FLAG_LEN {
        return Err(CodecError::MissingFlag { len: body.len() });
    }
    let (flag, payload) = body.split_at(FLAG_LEN);
    let code = i32::from_le_bytes([flag[0], flag[1], flag[2], flag[3]]);
    Ok((code, FieldView::new(payload)))
}

/// Decoded packet, one variant per [`Flag`]
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Opaque mesh payload, interpreted by the mesh format
    Mesh { data: Vec<u8> },
    ObjectCreate {
        pose: Pose,
        object_type: ObjectType,
        id: ObjectId,
    },
    Text { message: String },
    ObjectMove { pose: Pose, id: ObjectId },
    Camera { pose: Pose },
    HoloHeadCreate { pose: Pose, id: ObjectId },
    AvatarCreate { pose: Pose, id: ObjectId },
    Delete { id: ObjectId },
    ViveCreate {
        hmd_id: ObjectId,
        left_id: ObjectId,
        right_id: ObjectId,
    },
    /// Headset, left controller, right controller
    ViveMove { devices: [TrackedPose; 3] },
}

impl Packet {
    pub fn flag(&self) -> Flag {
        match self {
            Packet::Mesh { .. } => Flag::Mesh,
            Packet::ObjectCreate { .. } => Flag::ObjectCreate,
            Packet::Text { .. } => Flag::Text,
            Packet::ObjectMove { .. } => Flag::ObjectMove,
            Packet::Camera { .. } => Flag::Camera,
            Packet::HoloHeadCreate { .. } => Flag::HoloHeadCreate,
            Packet::AvatarCreate { .. } => Flag::AvatarCreate,
            Packet::Delete { .. } => Flag::Delete,
            Packet::ViveCreate { .. } => Flag::ViveCreate,
            Packet::ViveMove { .. } => Flag::ViveMove,
        }
    }

    /// Encodes flag and payload without the size prefix
    pub fn encode_body(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(self.flag());
        match self {
            Packet::Mesh { data } => writer.put_bytes(data),
            Packet::ObjectCreate {
                pose,
                object_type,
                id,
            } => {
                writer.put_pose(pose);
                writer.put_i32(object_type.code());
                writer.put_i32(*id);
            }
            Packet::Text { message } => writer.put_ascii(message),
            Packet::ObjectMove { pose, id }
            | Packet::HoloHeadCreate { pose, id }
            | Packet::AvatarCreate { pose, id } => {
                writer.put_pose(pose);
                writer.put_i32(*id);
            }
            Packet::Camera { pose } => writer.put_pose(pose),
            Packet::Delete { id } => writer.put_i32(*id),
            Packet::ViveCreate {
                hmd_id,
                left_id,
                right_id,
            } => {
                writer.put_i32(*hmd_id);
                writer.put_i32(*left_id);
                writer.put_i32(*right_id);
            }
            Packet::ViveMove { devices } => {
                for device in devices {
                    writer.put_pose(&device.pose);
                    writer.put_i32(device.id);
                }
            }
        }
        writer.into_body()
    }

    /// Encodes a complete frame with a little-endian size prefix
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.encode_with(SizeOrder::Little)
    }

    pub fn encode_with(&self, order: SizeOrder) -> Result<Vec<u8>, CodecError> {
        frame(order, &self.encode_body())
    }

    /// Decodes a frame body (flag + payload)
    pub fn decode(body: &[u8]) -> Result<Packet, CodecError> {
        let (code, fields) = split_body(body)?;
        let flag = Flag::from_code(code).ok_or(CodecError::UnknownFlag(code))?;

        let packet = match flag {
            Flag::Mesh => Packet::Mesh {
                data: fields.as_bytes().to_vec(),
            },
            Flag::ObjectCreate => Packet::ObjectCreate {
                pose: fields.read_pose(0)?,
                object_type: ObjectType::from_code(fields.read_i32(24)?)?,
                id: fields.read_i32(28)?,
            },
            Flag::Text => Packet::Text {
                message: ascii_to_string(fields.as_bytes()),
            },
            Flag::ObjectMove => Packet::ObjectMove {
                pose: fields.read_pose(0)?,
                id: fields.read_i32(24)?,
            },
            Flag::Camera => Packet::Camera {
                pose: fields.read_pose(0)?,
            },
            Flag::HoloHeadCreate => Packet::HoloHeadCreate {
                pose: fields.read_pose(0)?,
                id: fields.read_i32(24)?,
            },
            Flag::AvatarCreate => Packet::AvatarCreate {
                pose: fields.read_pose(0)?,
                id: fields.read_i32(24)?,
            },
            Flag::Delete => Packet::Delete {
                id: fields.read_i32(0)?,
            },
            Flag::ViveCreate => Packet::ViveCreate {
                hmd_id: fields.read_i32(0)?,
                left_id: fields.read_i32(4)?,
                right_id: fields.read_i32(8)?,
            },
            Flag::ViveMove => {
                let mut devices = [TrackedPose::default(); 3];
                for (slot, device) in devices.iter_mut().enumerate() {
                    let base = slot * VIVE_STRIDE;
                    device.pose = fields.read_pose(base)?;
                    device.id = fields.read_i32(base + POSE_LEN)?;
                }
                Packet::ViveMove { devices }
            }
        };

        Ok(packet)
    }
}

/// Size prefix for a body of `len` bytes
///
/// Bodies that do not fit the 32-bit prefix are rejected rather than
/// truncated.
pub fn frame_size(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::FrameTooLarge {
        size: len,
        limit: u32::MAX as usize,
    })
}

/// Prefixes a frame body with its size
pub fn frame(order: SizeOrder, body: &[u8]) -> Result<Vec<u8>, CodecError> {
    let size = frame_size(body.len())?;
    let mut out = Vec::with_capacity(SIZE_PREFIX_LEN + body.len());
    out.extend_from_slice(&order.write(size));
    out.extend_from_slice(body);
    Ok(out)
}

// Non-ASCII bytes and chars become '?'
fn ascii_to_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    fn new(flag: Flag) -> Self {
        let mut buf = Vec::with_capacity(FLAG_LEN + flag.payload_len().unwrap_or(64));
        buf.extend_from_slice(&flag.code().to_le_bytes());
        Self { buf }
    }

    fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_vector3(&mut self, v: &Vector3) {
        self.put_f32(v.x);
        self.put_f32(v.y);
        self.put_f32(v.z);
    }

    fn put_pose(&mut self, pose: &Pose) {
        self.put_vector3(&pose.position);
        self.put_vector3(&pose.rotation);
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_ascii(&mut self, text: &str) {
        self.buf
            .extend(text.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }));
    }

    fn into_body(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn pose(seed: f32) -> Pose {
        Pose::new(
            Vector3::new(seed, -seed * 2.0, seed * 0.5),
            Vector3::new(-90.0, 359.5, -0.25),
        )
    }

    fn roundtrip(packet: Packet) {
        let framed = packet.encode().unwrap();
        let size = SizeOrder::Little.read([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(size, framed.len() - SIZE_PREFIX_LEN);

        let decoded = Packet::decode(&framed[SIZE_PREFIX_LEN..]).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_every_flag_roundtrips() {
        let packets = vec![
            Packet::Mesh {
                data: vec![1, 2, 3, 4, 5],
            },
            Packet::ObjectCreate {
                pose: pose(1.5),
                object_type: ObjectType::Tree,
                id: 0,
            },
            Packet::Text {
                message: "GREETINGS FROM THE SENSOR".to_string(),
            },
            Packet::ObjectMove {
                pose: pose(-3.0),
                id: i32::MAX,
            },
            Packet::Camera { pose: pose(7.0) },
            Packet::HoloHeadCreate {
                pose: pose(0.0),
                id: 17,
            },
            Packet::AvatarCreate {
                pose: pose(-0.001),
                id: 99_999,
            },
            Packet::Delete { id: i32::MIN },
            Packet::ViveCreate {
                hmd_id: 100,
                left_id: 101,
                right_id: 102,
            },
            Packet::ViveMove {
                devices: [
                    TrackedPose { pose: pose(1.0), id: 100 },
                    TrackedPose { pose: pose(2.0), id: 101 },
                    TrackedPose { pose: pose(3.0), id: 102 },
                ],
            },
        ];

        for packet in packets {
            roundtrip(packet);
        }
    }

    #[test]
    fn test_empty_payloads_roundtrip() {
        roundtrip(Packet::Text {
            message: String::new(),
        });
        roundtrip(Packet::Mesh { data: Vec::new() });
    }

    #[test]
    fn test_fixed_payload_sizes_match_layout() {
        let packets = [
            Packet::ObjectCreate {
                pose: Pose::default(),
                object_type: ObjectType::Cube,
                id: 1,
            },
            Packet::ObjectMove {
                pose: Pose::default(),
                id: 1,
            },
            Packet::Camera {
                pose: Pose::default(),
            },
            Packet::Delete { id: 1 },
            Packet::ViveCreate {
                hmd_id: 1,
                left_id: 2,
                right_id: 3,
            },
            Packet::ViveMove {
                devices: [TrackedPose::default(); 3],
            },
        ];

        for packet in packets {
            let body = packet.encode_body();
            let expected = packet.flag().payload_len().unwrap();
            assert_eq!(body.len() - FLAG_LEN, expected, "{:?}", packet.flag());
        }

        assert_eq!(Flag::ObjectCreate.payload_len(), Some(32));
        assert_eq!(Flag::ViveMove.payload_len(), Some(84));
    }

    #[test]
    fn test_object_create_byte_layout() {
        let packet = Packet::ObjectCreate {
            pose: Pose::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0)),
            object_type: ObjectType::Sphere,
            id: 0x0102_0304,
        };
        let framed = packet.encode().unwrap();

        assert_eq!(&framed[0..4], &36u32.to_le_bytes());
        assert_eq!(&framed[4..8], &2i32.to_le_bytes());
        assert_eq!(&framed[8..12], &1.0f32.to_le_bytes());
        assert_eq!(&framed[28..32], &6.0f32.to_le_bytes());
        assert_eq!(&framed[32..36], &2i32.to_le_bytes());
        assert_eq!(&framed[36..40], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_swapped_size_prefix() {
        let bytes = SizeOrder::Swapped.write(36);
        assert_eq!(bytes, [0, 0, 0, 36]);
        assert_eq!(SizeOrder::Swapped.read(bytes), 36);
        assert_eq!(SizeOrder::Little.read([0x24, 0, 0, 0]), 36);

        // Only the prefix is swapped, the payload stays little-endian
        let packet = Packet::Delete { id: 5 };
        let swapped = packet.encode_with(SizeOrder::Swapped).unwrap();
        let little = packet.encode().unwrap();
        assert_eq!(&swapped[4..], &little[4..]);
        assert_ne!(&swapped[..4], &little[..4]);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_frame_size_fits_prefix() {
        assert_eq!(frame_size(36), Ok(36));
        assert_eq!(frame_size(u32::MAX as usize), Ok(u32::MAX));

        let oversized = u32::MAX as usize + 1;
        assert_eq!(
            frame_size(oversized),
            Err(CodecError::FrameTooLarge {
                size: oversized,
                limit: u32::MAX as usize
            })
        );
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let mut body = 9999i32.to_le_bytes().to_vec();
        body.extend_from_slice(&[0u8; 8]);

        assert_eq!(Packet::decode(&body), Err(CodecError::UnknownFlag(9999)));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let mut body = Packet::ObjectMove {
            pose: Pose::default(),
            id: 3,
        }
        .encode_body();
        body.truncate(body.len() - 2);

        match Packet::decode(&body) {
            Err(CodecError::Truncated {
                offset, available, ..
            }) => {
                assert_eq!(offset, 24);
                assert_eq!(available, 26);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_flag_is_rejected() {
        assert_eq!(
            Packet::decode(&[1, 0]),
            Err(CodecError::MissingFlag { len: 2 })
        );
    }

    #[test]
    fn test_unknown_object_type_is_rejected() {
        let mut body = Flag::ObjectCreate.code().to_le_bytes().to_vec();
        body.extend_from_slice(&[0u8; 24]);
        body.extend_from_slice(&42i32.to_le_bytes());
        body.extend_from_slice(&7i32.to_le_bytes());

        assert_eq!(
            Packet::decode(&body),
            Err(CodecError::UnknownObjectType(42))
        );
    }

    #[test]
    fn test_field_view_reads() {
        let body = Packet::Camera {
            pose: Pose::new(Vector3::new(-1.25, 0.0, 8.5), Vector3::new(10.0, 20.0, 30.0)),
        }
        .encode_body();
        let (code, fields) = split_body(&body).unwrap();

        assert_eq!(code, Flag::Camera.code());
        assert_eq!(fields.len(), 24);
        assert_approx_eq!(fields.read_f32(0).unwrap(), -1.25);
        assert_approx_eq!(fields.read_vector3(12).unwrap().z, 30.0);
        assert!(fields.read_f32(21).is_err());
        assert!(fields.read_i32(usize::MAX).is_err());
    }

    #[test]
    fn test_non_ascii_text_is_replaced() {
        let body = Packet::Text {
            message: "héllo".to_string(),
        }
        .encode_body();
        assert_eq!(&body[FLAG_LEN..], b"h?llo");

        let mut raw = Flag::Text.code().to_le_bytes().to_vec();
        raw.extend_from_slice(&[b'o', 0xC3, b'k']);
        assert_eq!(
            Packet::decode(&raw).unwrap(),
            Packet::Text {
                message: "o?k".to_string()
            }
        );
    }

    #[test]
    fn test_flag_codes() {
        for code in 1..=10 {
            let flag = Flag::from_code(code).unwrap();
            assert_eq!(flag.code(), code);
        }
        assert!(Flag::from_code(0).is_none());
        assert!(Flag::from_code(11).is_none());

        for object_type in ObjectType::ALL {
            assert_eq!(ObjectType::from_code(object_type.code()), Ok(object_type));
        }
    }
}

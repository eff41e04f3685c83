//! Spatial meshes received from the head-mounted device
//!
//! MESH payloads are handed to a [`MeshFormat`]. The default
//! [`SimpleMeshFormat`] reads back-to-back records of
//!
//! ```text
//! [i32 vertex_count][i32 index_count][vertex_count x (f32, f32, f32)][index_count x i32]
//! ```
//!
//! until the payload is exhausted.

use crate::error::MeshError;
use log::info;
use serde::{Deserialize, Serialize};
use shared::{CodecError, FieldView, Vector3};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Vector3>,
    pub triangles: Vec<i32>,
}

pub trait MeshFormat: Send {
    fn decode(&self, payload: &[u8]) -> Result<Vec<Mesh>, MeshError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleMeshFormat;

impl SimpleMeshFormat {
    pub fn encode(meshes: &[Mesh]) -> Vec<u8> {
        let mut out = Vec::new();
        for mesh in meshes {
            out.extend_from_slice(&(mesh.vertices.len() as i32).to_le_bytes());
            out.extend_from_slice(&(mesh.triangles.len() as i32).to_le_bytes());
            for vertex in &mesh.vertices {
                out.extend_from_slice(&vertex.x.to_le_bytes());
                out.extend_from_slice(&vertex.y.to_le_bytes());
                out.extend_from_slice(&vertex.z.to_le_bytes());
            }
            for index in &mesh.triangles {
                out.extend_from_slice(&index.to_le_bytes());
            }
        }
        out
    }
}

impl MeshFormat for SimpleMeshFormat {
    fn decode(&self, payload: &[u8]) -> Result<Vec<Mesh>, MeshError> {
        let fields = FieldView::new(payload);
        let mut meshes = Vec::new();
        let mut offset = 0;

        while offset < fields.len() {
            let vertex_count = count(fields.read_i32(offset)?, offset)?;
            let index_count = count(fields.read_i32(offset + 4)?, offset + 4)?;
            offset += 8;

            // Bound the allocation by what the payload can actually hold
            let needed = vertex_count
                .saturating_mul(12)
                .saturating_add(index_count.saturating_mul(4));
            if needed > fields.len() - offset {
                return Err(CodecError::Truncated {
                    offset,
                    needed,
                    available: fields.len(),
                }
                .into());
            }

            let mut vertices = Vec::with_capacity(vertex_count);
            for _ in 0..vertex_count {
                vertices.push(fields.read_vector3(offset)?);
                offset += 12;
            }

            let mut triangles = Vec::with_capacity(index_count);
            for _ in 0..index_count {
                triangles.push(fields.read_i32(offset)?);
                offset += 4;
            }

            meshes.push(Mesh {
                vertices,
                triangles,
            });
        }

        Ok(meshes)
    }
}

fn count(raw: i32, offset: usize) -> Result<usize, MeshError> {
    usize::try_from(raw).map_err(|_| {
        MeshError::Malformed(CodecError::Truncated {
            offset,
            needed: 4,
            available: 0,
        })
    })
}

/// Meshes received during the session, oldest first
#[derive(Debug, Default)]
pub struct MeshHistory {
    meshes: VecDeque<Mesh>,
    limit: Option<usize>,
    total_received: usize,
}

impl MeshHistory {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            meshes: VecDeque::new(),
            limit,
            total_received: 0,
        }
    }

    /// Appends a mesh and returns its surface label
    pub fn push(&mut self, mesh: Mesh) -> String {
        let label = format!("Beamed-{}", self.total_received);
        self.total_received += 1;
        self.meshes.push_back(mesh);

        if let Some(limit) = self.limit {
            while self.meshes.len() > limit {
                self.meshes.pop_front();
            }
        }
        label
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mesh> {
        self.meshes.iter()
    }

    pub fn save(&self, path: &Path) -> Result<(), MeshError> {
        let meshes: Vec<&Mesh> = self.meshes.iter().collect();
        let data = bincode::serialize(&meshes)?;
        fs::write(path, data)?;
        info!("Saved {} meshes to {}", meshes.len(), path.display());
        Ok(())
    }

    /// Reads a saved history. The caller decides how to replay it.
    pub fn load(path: &Path) -> Result<Vec<Mesh>, MeshError> {
        let data = fs::read(path)?;
        let meshes: Vec<Mesh> = bincode::deserialize(&data)?;
        info!("Loaded {} meshes from {}", meshes.len(), path.display());
        Ok(meshes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(offset: f32) -> Mesh {
        Mesh {
            vertices: vec![
                Vector3::new(offset, 0.0, 0.0),
                Vector3::new(offset, 1.0, 0.0),
                Vector3::new(offset, 0.0, 1.0),
            ],
            triangles: vec![0, 1, 2],
        }
    }

    #[test]
    fn test_decode_several_meshes() {
        let meshes = vec![triangle(0.0), Mesh::default(), triangle(-2.5)];
        let payload = SimpleMeshFormat::encode(&meshes);

        let decoded = SimpleMeshFormat.decode(&payload).unwrap();
        assert_eq!(decoded, meshes);
        assert!(SimpleMeshFormat.decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_truncated_mesh() {
        let mut payload = SimpleMeshFormat::encode(&[triangle(1.0)]);
        payload.truncate(payload.len() - 1);

        assert!(matches!(
            SimpleMeshFormat.decode(&payload),
            Err(MeshError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_huge_counts() {
        let mut payload = i32::MAX.to_le_bytes().to_vec();
        payload.extend_from_slice(&0i32.to_le_bytes());
        assert!(SimpleMeshFormat.decode(&payload).is_err());

        let mut negative = (-1i32).to_le_bytes().to_vec();
        negative.extend_from_slice(&0i32.to_le_bytes());
        assert!(SimpleMeshFormat.decode(&negative).is_err());
    }

    #[test]
    fn test_history_labels_and_limit() {
        let mut history = MeshHistory::new(Some(2));
        assert_eq!(history.push(triangle(0.0)), "Beamed-0");
        assert_eq!(history.push(triangle(1.0)), "Beamed-1");
        assert_eq!(history.push(triangle(2.0)), "Beamed-2");

        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().next(), Some(&triangle(1.0)));
    }

    #[test]
    fn test_history_unbounded_by_default() {
        let mut history = MeshHistory::new(None);
        for i in 0..50 {
            history.push(triangle(i as f32));
        }
        assert_eq!(history.len(), 50);
    }

    #[test]
    fn test_history_save_and_load() {
        let path = std::env::temp_dir().join(format!("mesh-history-{}.bin", std::process::id()));
        let mut history = MeshHistory::new(None);
        history.push(triangle(0.5));
        history.push(triangle(3.0));

        history.save(&path).unwrap();
        let loaded = MeshHistory::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, vec![triangle(0.5), triangle(3.0)]);
    }
}

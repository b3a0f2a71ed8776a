//! Nearest-neighbour vector index.
//!
//! [`FlatL2Index`] is an exact, brute-force index over squared Euclidean
//! distances. Vectors are kept in one contiguous buffer; the application
//! rebuilds it from stored vectors at query time.

use serde::Serialize;

use crate::error::KbError;
use crate::models::{ChunkId, SemanticHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    /// `None` until the index has been built.
    pub dimension: Option<usize>,
}

pub trait VectorIndex {
    /// Replace the index contents.
    fn build(&mut self, vectors: &[Vec<f32>], ids: &[ChunkId], dim: usize)
        -> Result<(), KbError>;

    /// Append to a built index. The dimension must match.
    fn add(&mut self, vectors: &[Vec<f32>], ids: &[ChunkId]) -> Result<(), KbError>;

    /// Up to `k` hits, nearest first. An unbuilt or empty index yields none.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SemanticHit>, KbError>;

    fn stats(&self) -> IndexStats;
}

#[derive(Debug, Default, Clone)]
pub struct FlatL2Index {
    dim: Option<usize>,
    ids: Vec<ChunkId>,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push_all(&mut self, vectors: &[Vec<f32>], ids: &[ChunkId], dim: usize) -> Result<(), KbError> {
        if vectors.len() != ids.len() {
            return Err(KbError::Index(format!(
                "{} vectors but {} chunk ids",
                vectors.len(),
                ids.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(KbError::Index(format!(
                "dimension mismatch: index has {}, vector has {}",
                dim,
                bad.len()
            )));
        }
        self.data.reserve(vectors.len() * dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        self.ids.extend_from_slice(ids);
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl VectorIndex for FlatL2Index {
    fn build(
        &mut self,
        vectors: &[Vec<f32>],
        ids: &[ChunkId],
        dim: usize,
    ) -> Result<(), KbError> {
        if dim == 0 {
            return Err(KbError::Index("dimension must be positive".into()));
        }
        let mut fresh = FlatL2Index {
            dim: Some(dim),
            ids: Vec::new(),
            data: Vec::new(),
        };
        fresh.push_all(vectors, ids, dim)?;
        *self = fresh;
        Ok(())
    }

    fn add(&mut self, vectors: &[Vec<f32>], ids: &[ChunkId]) -> Result<(), KbError> {
        let dim = self
            .dim
            .ok_or_else(|| KbError::Index("index has not been built".into()))?;
        self.push_all(vectors, ids, dim)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SemanticHit>, KbError> {
        let dim = match self.dim {
            Some(d) if !self.ids.is_empty() => d,
            _ => return Ok(Vec::new()),
        };
        if query.len() != dim {
            return Err(KbError::Index(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dim
            )));
        }

        let mut hits: Vec<SemanticHit> = self
            .data
            .chunks_exact(dim)
            .zip(&self.ids)
            .map(|(v, &chunk_id)| SemanticHit {
                chunk_id,
                distance: squared_l2(query, v),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            total_vectors: self.ids.len(),
            dimension: self.dim,
        }
    }
}

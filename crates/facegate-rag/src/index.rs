//! Exact nearest-neighbour search over a flat matrix of embeddings.

use crate::embedder::{TextEmbedError, TextEmbedder};
use ndarray::{Array2, ArrayView1};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector {index} has dimension {actual}, expected {expected}")]
    RaggedInput { index: usize, expected: usize, actual: usize },
    #[error("query has dimension {actual}, index has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedder returned {actual} vectors for {expected} documents")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding: {0}")]
    Embed(#[from] TextEmbedError),
    #[error("shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    /// Position of the document in build order.
    pub index: usize,
    /// Squared Euclidean distance.
    pub distance: f32,
}

/// Brute-force L2 index. Built once; no incremental updates.
pub struct FlatL2Index {
    vectors: Array2<f32>,
}

impl FlatL2Index {
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let rows = vectors.len();
        let dim = vectors.first().map_or(0, Vec::len);
        if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(IndexError::RaggedInput { index, expected: dim, actual: v.len() });
        }

        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        let vectors = Array2::from_shape_vec((rows, dim), flat)?;
        Ok(Self { vectors })
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    /// The `k` nearest vectors, closest first. Ties go to the lower index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim() {
            return Err(IndexError::DimensionMismatch { expected: self.dim(), actual: query.len() });
        }

        let q = ArrayView1::from(query);
        let mut hits: Vec<Neighbor> = self
            .vectors
            .rows()
            .into_iter()
            .enumerate()
            .map(|(index, row)| Neighbor {
                index,
                distance: (&row - &q).mapv(|x| x * x).sum(),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));
        hits.truncate(k);
        Ok(hits)
    }
}

/// Documents plus their flat index.
pub struct RetrievalIndex {
    documents: Vec<String>,
    index: FlatL2Index,
}

impl RetrievalIndex {
    /// Encode every document and index the vectors. An empty document set
    /// builds an empty index without touching the embedder.
    pub fn build(
        documents: Vec<String>,
        embedder: &mut dyn TextEmbedder,
    ) -> Result<Self, IndexError> {
        let vectors = if documents.is_empty() {
            Vec::new()
        } else {
            embedder.embed(&documents)?
        };
        if vectors.len() != documents.len() {
            return Err(IndexError::CountMismatch {
                expected: documents.len(),
                actual: vectors.len(),
            });
        }

        let index = FlatL2Index::build(vectors)?;
        tracing::info!(documents = documents.len(), dim = index.dim(), "retrieval index built");
        Ok(Self { documents, index })
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.index.search(query_embedding, k)
    }

    /// The `k` documents closest to `query`, closest first.
    pub fn retrieve(
        &self,
        embedder: &mut dyn TextEmbedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<&str>, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = embedder
            .embed(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or(IndexError::CountMismatch { expected: 1, actual: 0 })?;

        let hits = self.search(&query_embedding, k)?;
        Ok(hits.iter().map(|n| self.documents[n.index].as_str()).collect())
    }
}

//! Binary format of the vector matrix and memory-mapped loading.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic `VDXV`, format version, dimension, row count,
//!   each a little-endian u32
//! - Rows: owning document id (u32) followed by `dimension` f32 values, all
//!   little-endian, in row order
//!
//! An index that has never received a vector is written with dimension 0
//! and row count 0.

use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::types::DocumentId;
use crate::vector::types::{VectorDimension, VectorError};

/// Current storage format version.
pub const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Magic bytes to identify vector storage files.
const MAGIC_BYTES: &[u8; 4] = b"VDXV";

const BYTES_PER_F32: usize = 4;

const BYTES_PER_LABEL: usize = 4;

/// Parsed header of a vector matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixHeader {
    pub version: u32,
    /// `None` for an index without vectors
    pub dimension: Option<VectorDimension>,
    pub rows: usize,
}

/// Encodes labelled rows into the storage format.
///
/// Every row must have `dimension` values; callers guarantee it.
pub fn encode_matrix<'a>(
    dimension: Option<VectorDimension>,
    rows: impl ExactSizeIterator<Item = (DocumentId, &'a [f32])>,
) -> Vec<u8> {
    let dim = dimension.map_or(0, |d| d.get());
    let row_count = rows.len();
    let mut bytes = Vec::with_capacity(HEADER_SIZE + row_count * row_size(dim));

    bytes.extend_from_slice(MAGIC_BYTES);
    bytes.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dim as u32).to_le_bytes());
    bytes.extend_from_slice(&(row_count as u32).to_le_bytes());

    for (label, vector) in rows {
        debug_assert_eq!(vector.len(), dim);
        bytes.extend_from_slice(&label.to_u32().to_le_bytes());
        for &value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    bytes
}

/// Reads and validates the header, including that the body length matches
/// the declared row count.
pub fn read_header(bytes: &[u8]) -> Result<MatrixHeader, VectorError> {
    if bytes.len() < HEADER_SIZE {
        return Err(VectorError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }

    if &bytes[0..4] != MAGIC_BYTES {
        return Err(VectorError::InvalidFormat("Invalid magic bytes".to_string()));
    }

    let version = read_u32(bytes, 4);
    if version != STORAGE_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: STORAGE_VERSION,
            actual: version,
        });
    }

    let dim = read_u32(bytes, 8) as usize;
    let rows = read_u32(bytes, 12) as usize;

    let dimension = match (dim, rows) {
        (0, 0) => None,
        (0, _) => {
            return Err(VectorError::InvalidFormat(format!(
                "{rows} rows declared with dimension 0"
            )));
        }
        (d, _) => Some(VectorDimension::new(d)?),
    };

    let expected_len = rows
        .checked_mul(row_size(dim))
        .and_then(|body| body.checked_add(HEADER_SIZE))
        .ok_or_else(|| VectorError::InvalidFormat("Row count overflows".to_string()))?;
    if bytes.len() != expected_len {
        return Err(VectorError::InvalidFormat(format!(
            "Expected {expected_len} bytes for {rows} rows of dimension {dim}, found {}",
            bytes.len()
        )));
    }

    Ok(MatrixHeader {
        version,
        dimension,
        rows,
    })
}

/// Iterates the rows of a validated matrix as `(label, values)`.
pub fn decode_rows<'a>(
    bytes: &'a [u8],
    header: &MatrixHeader,
) -> impl Iterator<Item = (DocumentId, Vec<f32>)> + 'a {
    let dim = header.dimension.map_or(0, |d| d.get());
    let body = &bytes[HEADER_SIZE..];
    let size = row_size(dim);

    body.chunks_exact(size.max(1))
        .take(header.rows)
        .map(move |row| {
            let label = DocumentId::new(read_u32(row, 0));
            let values = row[BYTES_PER_LABEL..]
                .chunks_exact(BYTES_PER_F32)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            (label, values)
        })
}

fn row_size(dim: usize) -> usize {
    BYTES_PER_LABEL + dim * BYTES_PER_F32
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// A vector matrix file mapped read-only into memory.
///
/// The header is validated on open, so the mapped bytes can be handed
/// straight to `VectorIndex::from_bytes`.
#[derive(Debug)]
pub struct MappedMatrix {
    mmap: Mmap,
    header: MatrixHeader,
}

impl MappedMatrix {
    /// Maps `path` and validates its header.
    pub fn open(path: &Path) -> Result<Self, VectorError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(VectorError::Storage(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Vector storage file is empty: {}", path.display()),
            )));
        }

        // SAFETY: the file is only replaced through rename, never truncated
        // in place, so the mapping stays valid for its lifetime.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let header = read_header(&mmap)?;

        Ok(Self { mmap, header })
    }

    #[must_use]
    pub fn header(&self) -> &MatrixHeader {
        &self.header
    }
}

impl Deref for MappedMatrix {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.mmap
    }
}

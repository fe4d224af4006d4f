//! Sparse modification persistence
//!
//! The base world is a pure function of `(seed, config)`, so only edits are
//! worth saving. Each modified chunk contributes a sparse map of lattice
//! index to the edited sample value; re-applying the map after base density
//! generation reproduces the lattice bitwise.
//!
//! On-disk layout, little-endian: `"PMOD"` magic, u32 version, u32 chunk
//! count, then per chunk: coord as 3 x i32, u32 entry count, and
//! `(u32 index, f32 value)` pairs.

use glam::IVec3;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::EngineError;

const MAGIC: &[u8; 4] = b"PMOD";
const VERSION: u32 = 1;

/// Aggregate statistics over the log
#[derive(Debug, Clone, Copy, Default)]
pub struct ModificationStats {
    pub chunk_count: usize,
    pub entry_count: usize,
}

/// Edit overlays for every modified chunk, keyed by chunk coordinate
#[derive(Debug, Clone, Default)]
pub struct ModificationLog {
    chunks: HashMap<IVec3, HashMap<u32, f32>>,
}

impl ModificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Replace the stored overlay for one chunk.
    pub fn set(&mut self, coord: IVec3, edits: HashMap<u32, f32>) {
        if edits.is_empty() {
            self.chunks.remove(&coord);
        } else {
            self.chunks.insert(coord, edits);
        }
    }

    /// Merge an overlay into the stored one, newer values winning.
    pub fn merge(&mut self, coord: IVec3, edits: &HashMap<u32, f32>) {
        if edits.is_empty() {
            return;
        }
        self.chunks
            .entry(coord)
            .or_default()
            .extend(edits.iter().map(|(&k, &v)| (k, v)));
    }

    pub fn get(&self, coord: IVec3) -> Option<&HashMap<u32, f32>> {
        self.chunks.get(&coord)
    }

    pub fn remove(&mut self, coord: IVec3) -> Option<HashMap<u32, f32>> {
        self.chunks.remove(&coord)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn stats(&self) -> ModificationStats {
        ModificationStats {
            chunk_count: self.chunks.len(),
            entry_count: self.chunks.values().map(|m| m.len()).sum(),
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), EngineError> {
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(self.chunks.len() as u32).to_le_bytes())?;

        for (coord, edits) in &self.chunks {
            writer.write_all(&coord.x.to_le_bytes())?;
            writer.write_all(&coord.y.to_le_bytes())?;
            writer.write_all(&coord.z.to_le_bytes())?;
            writer.write_all(&(edits.len() as u32).to_le_bytes())?;
            for (&index, &value) in edits {
                writer.write_all(&index.to_le_bytes())?;
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, EngineError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(EngineError::ModificationFormat("bad magic".to_string()));
        }

        let version = read_u32(reader)?;
        if version != VERSION {
            return Err(EngineError::ModificationFormat(format!(
                "unsupported version {version}"
            )));
        }

        let chunk_count = read_u32(reader)?;
        let mut chunks = HashMap::with_capacity(chunk_count as usize);
        for _ in 0..chunk_count {
            let coord = IVec3::new(read_i32(reader)?, read_i32(reader)?, read_i32(reader)?);
            let entry_count = read_u32(reader)?;
            let mut edits = HashMap::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let index = read_u32(reader)?;
                let value = f32::from_le_bytes(read_bytes(reader)?);
                edits.insert(index, value);
            }
            chunks.insert(coord, edits);
        }

        Ok(Self { chunks })
    }
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<[u8; 4], EngineError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, EngineError> {
    Ok(u32::from_le_bytes(read_bytes(reader)?))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, EngineError> {
    Ok(i32::from_le_bytes(read_bytes(reader)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> ModificationLog {
        let mut log = ModificationLog::new();
        let mut edits = HashMap::new();
        edits.insert(42u32, -3.25f32);
        edits.insert(7u32, 11.5f32);
        log.set(IVec3::new(1, -2, 3), edits);

        let mut other = HashMap::new();
        other.insert(0u32, f32::MIN_POSITIVE);
        log.set(IVec3::new(-4, 0, 9), other);
        log
    }

    #[test]
    fn round_trip_is_bitwise_exact() {
        let log = sample_log();
        let mut buffer = Vec::new();
        log.write_to(&mut buffer).unwrap();
        let back = ModificationLog::read_from(&mut buffer.as_slice()).unwrap();

        assert_eq!(back.stats().chunk_count, 2);
        for coord in [IVec3::new(1, -2, 3), IVec3::new(-4, 0, 9)] {
            let a = log.get(coord).unwrap();
            let b = back.get(coord).unwrap();
            assert_eq!(a.len(), b.len());
            for (k, v) in a {
                assert_eq!(v.to_bits(), b[k].to_bits());
            }
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buffer = Vec::new();
        sample_log().write_to(&mut buffer).unwrap();
        buffer[0] = b'X';
        assert!(matches!(
            ModificationLog::read_from(&mut buffer.as_slice()),
            Err(EngineError::ModificationFormat(_))
        ));
    }

    #[test]
    fn truncated_file_is_an_io_error() {
        let mut buffer = Vec::new();
        sample_log().write_to(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 3);
        assert!(ModificationLog::read_from(&mut buffer.as_slice()).is_err());
    }

    #[test]
    fn merge_keeps_newest_values() {
        let mut log = ModificationLog::new();
        let coord = IVec3::ZERO;
        let mut first = HashMap::new();
        first.insert(1u32, 1.0f32);
        first.insert(2u32, 2.0f32);
        log.merge(coord, &first);

        let mut second = HashMap::new();
        second.insert(2u32, -9.0f32);
        log.merge(coord, &second);

        let stored = log.get(coord).unwrap();
        assert_eq!(stored[&1], 1.0);
        assert_eq!(stored[&2], -9.0);
    }

    #[test]
    fn empty_overlay_removes_entry() {
        let mut log = sample_log();
        log.set(IVec3::new(1, -2, 3), HashMap::new());
        assert_eq!(log.stats().chunk_count, 1);
    }
}

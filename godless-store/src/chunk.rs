//! Splitting a namespace into bounded-size chunks.
//!
//! A chunk record is one part of a namespace plus forward links to further
//! chunks. The split is row-granular and deterministic: rows are taken in
//! canonical stream order and packed greedily until the encoded size would
//! pass the limit. Identical input and limit always yield identical chunks,
//! so unchanged data keeps its content addresses across writes.

use bytes::Bytes;
use cid::Cid;
use godless_crdt::codec::{self, CodecError, Reader, Writer, TAG_CHUNK};
use godless_crdt::{Namespace, Table};

/// Chunks stay below 1 MiB encoded by default.
pub const DEFAULT_CHUNK_SIZE_LIMIT: usize = 1024 * 1024;

/// One piece of a persisted namespace plus forward links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub part: Namespace,
    pub children: Vec<Cid>,
}

impl ChunkRecord {
    pub fn leaf(part: Namespace) -> Self {
        ChunkRecord {
            part,
            children: Vec::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut w = Writer::record(TAG_CHUNK);
        codec::write_namespace_body(&mut w, &self.part);
        w.put_u32(self.children.len() as u32);
        for child in &self.children {
            w.put_bytes(&child.to_bytes());
        }
        w.finish()
    }

    /// Decode a record, returning it along with the count of trailing bytes
    /// the caller should warn about.
    pub fn decode(input: &[u8]) -> Result<(Self, usize), CodecError> {
        let mut r = Reader::record(input, TAG_CHUNK)?;
        let part = codec::read_namespace_body(&mut r, false)?;
        let child_count = r.take_len()?;
        let mut children = Vec::with_capacity(child_count.min(1024));
        for _ in 0..child_count {
            children.push(Cid::try_from(r.take_bytes()?)?);
        }
        Ok((ChunkRecord { part, children }, r.remaining()))
    }
}

/// Split a namespace into parts whose encoded size stays below `limit`.
///
/// A single row larger than the limit still becomes its own part; the bound
/// is best-effort for pathological rows and exact otherwise. Rejoining every
/// part reproduces the input namespace.
pub fn split(ns: &Namespace, limit: usize) -> Vec<Namespace> {
    let mut parts = Vec::new();
    let mut current = Namespace::empty();
    let mut current_size = 0usize;

    for (table_name, table) in ns.tables() {
        // Empty tables carry no rows but must survive the roundtrip.
        if table.is_empty() {
            current = current.join_table(table_name.clone(), Table::empty());
            continue;
        }
        for (row_name, row) in table.rows() {
            let fragment = Namespace::make([(
                table_name.clone(),
                Table::make([(row_name.clone(), row.clone())]),
            )]);
            let cost = codec::encode_namespace(&fragment).len();

            if current_size > 0 && current_size + cost > limit {
                parts.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current = current.join(&fragment);
            current_size += cost;
        }
    }

    if !current.is_empty() || parts.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use godless_crdt::{Entry, Row};

    fn wide_namespace(rows: usize) -> Namespace {
        Namespace::make((0..rows).map(|i| {
            (
                "table".into(),
                Table::make([(
                    format!("row{i:04}").into(),
                    Row::make([("entry".into(), Entry::make([format!("point{i}")]))]),
                )]),
            )
        }))
    }

    #[test]
    fn rejoining_parts_reproduces_the_namespace() {
        let ns = wide_namespace(64);
        let parts = split(&ns, 256);
        assert!(parts.len() > 1);

        let rejoined = parts
            .iter()
            .fold(Namespace::empty(), |acc, part| acc.join(part));
        assert_eq!(rejoined, ns);
    }

    #[test]
    fn split_is_deterministic() {
        let ns = wide_namespace(32);
        assert_eq!(split(&ns, 200), split(&ns, 200));
        assert_ne!(split(&ns, 200).len(), split(&ns, 1 << 20).len());
    }

    #[test]
    fn parts_respect_the_limit() {
        let ns = wide_namespace(64);
        let limit = 300;
        for part in split(&ns, limit) {
            assert!(codec::encode_namespace(&part).len() <= limit);
        }
    }

    #[test]
    fn oversized_row_still_splits() {
        let big = Namespace::make([(
            "t".into(),
            Table::make([(
                "r".into(),
                Row::make([("e".into(), Entry::make(["x".repeat(4096)]))]),
            )]),
        )]);
        let parts = split(&big, 64);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], big);
    }

    #[test]
    fn empty_namespace_splits_to_one_empty_part() {
        let parts = split(&Namespace::empty(), 1024);
        assert_eq!(parts, vec![Namespace::empty()]);
    }

    #[test]
    fn record_roundtrip_reports_trailing_bytes() {
        let record = ChunkRecord::leaf(wide_namespace(3));
        let mut bytes = record.encode().to_vec();
        let (decoded, trailing) = ChunkRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(trailing, 0);

        bytes.extend_from_slice(b"junk");
        let (decoded, trailing) = ChunkRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(trailing, 4);
    }
}

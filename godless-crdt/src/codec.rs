//! Canonical byte encoding of CRDT values.
//!
//! Content addresses are derived from these bytes, so the encoding must be
//! stable: semantically equal values encode identically regardless of how
//! they were built. Maps serialize as length-prefixed `(key, value)` pairs in
//! lexicographic key order; sets as length-prefixed sorted, deduplicated
//! elements; integers fixed-width big-endian; strings length-prefixed UTF-8.
//! The schema is closed: each record starts with a tag byte and is written
//! field by field, never through reflection.
//!
//! Policy: **strict encode, lenient decode**. The encoder always emits
//! canonical bytes. The reference decoder accepts unsorted or duplicated
//! input and renormalizes it, so `decode(encode(v)) == strip(v)` and
//! `encode(decode(b)) == b` for canonical `b`. A strict decoder which rejects
//! non-canonical namespace records is available for consumers that must not
//! renormalize silently.

use std::collections::BTreeSet;

use bytes::{BufMut, Bytes, BytesMut};
use cid::Cid;

use crate::index::Index;
use crate::link::{Link, SignatureBytes};
use crate::namespace::{Entry, EntryName, Namespace, Row, RowName, Table, TableName};

/// Record tag for a full namespace.
pub const TAG_NAMESPACE: u8 = 0x01;
/// Record tag for an index manifest.
pub const TAG_INDEX: u8 = 0x02;
/// Record tag for a persistence chunk (namespace part plus child links).
pub const TAG_CHUNK: u8 = 0x03;

/// Upper bound on any single length prefix; rejects absurd allocations from
/// corrupt input before they happen.
pub const MAX_FIELD_LEN: u32 = 1 << 30;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("input truncated")]
    TruncatedInput,

    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("unknown record tag {0:#04x}")]
    UnknownTag(u8),

    #[error("field length {len} exceeds limit {limit}")]
    Oversize { len: u32, limit: u32 },

    #[error("key {0:?} out of canonical order")]
    UnsortedKeys(String),

    #[error("invalid content id: {0}")]
    InvalidCid(#[from] cid::Error),
}

/// Canonical record writer. Field order is the caller's responsibility; the
/// per-type `encode_*` functions below are the closed schema.
#[derive(Debug)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn record(tag: u8) -> Self {
        let mut buf = BytesMut::new();
        buf.put_u8(tag);
        Writer { buf }
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn put_bytes(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    /// Fixed-width field, no length prefix.
    pub fn put_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Canonical record reader over a byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Open a record, checking its tag byte.
    pub fn record(input: &'a [u8], tag: u8) -> Result<Self, CodecError> {
        let mut reader = Reader { input };
        let found = reader.take_u8()?;
        if found != tag {
            return Err(CodecError::UnknownTag(found));
        }
        Ok(reader)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.input.len() < n {
            return Err(CodecError::TruncatedInput);
        }
        let (head, rest) = self.input.split_at(n);
        self.input = rest;
        Ok(head)
    }

    pub fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4 bytes")))
    }

    /// A length prefix, bounds-checked against [`MAX_FIELD_LEN`].
    pub fn take_len(&mut self) -> Result<usize, CodecError> {
        let len = self.take_u32()?;
        if len > MAX_FIELD_LEN {
            return Err(CodecError::Oversize {
                len,
                limit: MAX_FIELD_LEN,
            });
        }
        Ok(len as usize)
    }

    pub fn take_str(&mut self) -> Result<&'a str, CodecError> {
        let len = self.take_len()?;
        Ok(std::str::from_utf8(self.take(len)?)?)
    }

    pub fn take_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.take_len()?;
        self.take(len)
    }

    /// Fixed-width field, no length prefix.
    pub fn take_raw(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// Bytes left after the record body; callers surface these as a warning.
    pub fn remaining(&self) -> usize {
        self.input.len()
    }
}

// ---- namespace ----

pub fn encode_namespace(ns: &Namespace) -> Bytes {
    let mut w = Writer::record(TAG_NAMESPACE);
    write_namespace_body(&mut w, ns);
    w.finish()
}

pub fn decode_namespace(input: &[u8]) -> Result<Namespace, CodecError> {
    let mut r = Reader::record(input, TAG_NAMESPACE)?;
    read_namespace_body(&mut r, false)
}

/// Reject records whose keys are not strictly ascending at any level.
pub fn decode_namespace_strict(input: &[u8]) -> Result<Namespace, CodecError> {
    let mut r = Reader::record(input, TAG_NAMESPACE)?;
    read_namespace_body(&mut r, true)
}

pub fn write_namespace_body(w: &mut Writer, ns: &Namespace) {
    w.put_u32(ns.len() as u32);
    for (name, table) in ns.tables() {
        w.put_str(name.as_str());
        write_table_body(w, table);
    }
}

fn write_table_body(w: &mut Writer, table: &Table) {
    w.put_u32(table.len() as u32);
    for (name, row) in table.rows() {
        w.put_str(name.as_str());
        write_row_body(w, row);
    }
}

fn write_row_body(w: &mut Writer, row: &Row) {
    w.put_u32(row.len() as u32);
    for (name, entry) in row.entries() {
        w.put_str(name.as_str());
        write_entry_body(w, entry);
    }
}

fn write_entry_body(w: &mut Writer, entry: &Entry) {
    w.put_u32(entry.len() as u32);
    for point in entry.points() {
        w.put_str(point.as_str());
    }
}

pub fn read_namespace_body(r: &mut Reader<'_>, strict: bool) -> Result<Namespace, CodecError> {
    let count = r.take_len()?;
    let mut order = KeyOrder::new(strict);
    let mut tables = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = r.take_str()?;
        order.check(name)?;
        let table = read_table_body(r, strict)?;
        tables.push((TableName::from(name), table));
    }
    Ok(Namespace::make(tables))
}

fn read_table_body(r: &mut Reader<'_>, strict: bool) -> Result<Table, CodecError> {
    let count = r.take_len()?;
    let mut order = KeyOrder::new(strict);
    let mut rows = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = r.take_str()?;
        order.check(name)?;
        let row = read_row_body(r, strict)?;
        rows.push((RowName::from(name), row));
    }
    Ok(Table::make(rows))
}

fn read_row_body(r: &mut Reader<'_>, strict: bool) -> Result<Row, CodecError> {
    let count = r.take_len()?;
    let mut order = KeyOrder::new(strict);
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = r.take_str()?;
        order.check(name)?;
        let entry = read_entry_body(r, strict)?;
        entries.push((EntryName::from(name), entry));
    }
    Ok(Row::make(entries))
}

fn read_entry_body(r: &mut Reader<'_>, strict: bool) -> Result<Entry, CodecError> {
    let count = r.take_len()?;
    let mut order = KeyOrder::new(strict);
    let mut points = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let point = r.take_str()?;
        order.check(point)?;
        points.push(point.to_string());
    }
    Ok(Entry::make(points))
}

/// Strictly-ascending key check, active only in strict mode.
struct KeyOrder {
    strict: bool,
    last: Option<String>,
}

impl KeyOrder {
    fn new(strict: bool) -> Self {
        KeyOrder { strict, last: None }
    }

    fn check(&mut self, key: &str) -> Result<(), CodecError> {
        if !self.strict {
            return Ok(());
        }
        if let Some(last) = &self.last {
            if last.as_str() >= key {
                return Err(CodecError::UnsortedKeys(key.to_string()));
            }
        }
        self.last = Some(key.to_string());
        Ok(())
    }
}

// ---- links ----

pub fn write_link(w: &mut Writer, link: &Link) {
    w.put_bytes(&link.target().to_bytes());
    w.put_u32(link.signature_count() as u32);
    for sig in link.signatures() {
        w.put_raw(sig.as_bytes());
    }
}

pub fn read_link(r: &mut Reader<'_>) -> Result<Link, CodecError> {
    let cid = Cid::try_from(r.take_bytes()?)?;
    let count = r.take_len()?;
    let mut signatures = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let raw: [u8; 64] = r
            .take_raw(64)?
            .try_into()
            .expect("take_raw returned 64 bytes");
        signatures.push(SignatureBytes::from(raw));
    }
    Ok(Link::new(cid, signatures))
}

// ---- index ----

pub fn encode_index(index: &Index) -> Bytes {
    let mut w = Writer::record(TAG_INDEX);
    w.put_u32(index.len() as u32);
    for (table, links) in index.tables() {
        w.put_str(table.as_str());
        w.put_u32(links.len() as u32);
        for link in links {
            write_link(&mut w, link);
        }
    }
    w.finish()
}

pub fn decode_index(input: &[u8]) -> Result<Index, CodecError> {
    let mut r = Reader::record(input, TAG_INDEX)?;
    let table_count = r.take_len()?;
    let mut tables = Vec::with_capacity(table_count.min(1024));
    for _ in 0..table_count {
        let name = TableName::from(r.take_str()?);
        let link_count = r.take_len()?;
        let mut links = BTreeSet::new();
        for _ in 0..link_count {
            links.insert(read_link(&mut r)?);
        }
        tables.push((name, links));
    }
    Ok(Index::make(tables))
}

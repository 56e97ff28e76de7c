//! Snapshot persistence.
//!
//! A snapshot is one header page followed by a little-endian payload:
//!
//! ```text
//! Section        Contents
//! -------        --------
//! schema         entities, each with (name, kind tag, is_collection) properties
//! next_key       u64
//! objects        count, then (key, entity, properties) per object
//! indexes        count, then per index: entity, property, metric tag, m,
//!                efConstruction, dimension, entry point, max layer, node
//!                count, node records
//! ```
//!
//! Decoding failures and integrity-check failures both surface as
//! [`Error::Corrupted`].

pub(crate) mod codec;
mod file;
mod header;

pub use file::SnapshotFile;
pub use header::{HEADER_SIZE, Header, MAGIC, VERSION};

use anyhow::{Context, bail};

use crate::error::{Error, Result};
use crate::index::IndexManager;
use crate::store::{EntitySchema, MemoryStore, Object, ObjectKey, PropertyKind, PropertySchema, Schema, Value};
use codec::{ByteReader, ByteWriter};

/// Nesting limit for list values.
const MAX_VALUE_DEPTH: usize = 32;

/// Serialize the store and every index into a header and payload.
pub(crate) fn encode(store: &MemoryStore, indexes: &IndexManager) -> (Header, Vec<u8>) {
    let mut w = ByteWriter::new();

    encode_schema(store.schema(), &mut w);
    w.put_u64(store.next_key());
    w.put_len(store.len());
    for object in store.objects() {
        encode_object(object, &mut w);
    }
    indexes.encode(&mut w);

    let header = Header::new(
        w.len() as u64,
        store.len() as u64,
        u32::try_from(indexes.len()).unwrap_or(u32::MAX),
    );
    (header, w.into_bytes())
}

/// Rebuild the store and indexes from a snapshot, checking it against
/// `schema` and verifying every graph.
pub(crate) fn decode(
    header: &Header,
    payload: &[u8],
    schema: Schema,
    layer_seed: Option<u64>,
) -> Result<(MemoryStore, IndexManager)> {
    let (store, indexes) = decode_payload(header, payload, layer_seed)
        .map_err(|e| Error::corrupted(format!("{e:#}")))?;

    if *store.schema() != schema {
        return Err(Error::corrupted("stored schema differs from the supplied schema"));
    }

    indexes.verify(&store)?;
    Ok((store, indexes))
}

/// Sort a snapshot-file failure: I/O problems stay [`Error::Storage`],
/// anything wrong with the bytes themselves is [`Error::Corrupted`].
pub(crate) fn classify(err: anyhow::Error) -> Error {
    if err.downcast_ref::<std::io::Error>().is_some() {
        Error::Storage(err)
    } else {
        Error::corrupted(format!("{err:#}"))
    }
}

fn decode_payload(
    header: &Header,
    payload: &[u8],
    layer_seed: Option<u64>,
) -> anyhow::Result<(MemoryStore, IndexManager)> {
    let mut r = ByteReader::new(payload);

    let schema = decode_schema(&mut r).context("schema section")?;
    let next_key = r.get_u64()?;

    let count = r.get_len(8)?;
    if count as u64 != header.object_count {
        bail!("header claims {} objects, payload has {count}", header.object_count);
    }
    let mut objects = Vec::with_capacity(count);
    let mut last: Option<ObjectKey> = None;
    for _ in 0..count {
        let object = decode_object(&mut r, &schema).context("object section")?;
        if last.is_some_and(|k| k >= object.key) || object.key.as_u64() >= next_key {
            bail!("object key {} out of order", object.key);
        }
        last = Some(object.key);
        objects.push(object);
    }

    let indexes = IndexManager::decode(&mut r, layer_seed).context("index section")?;
    if indexes.len() as u64 != u64::from(header.index_count) {
        bail!("header claims {} indexes, payload has {}", header.index_count, indexes.len());
    }
    r.finish()?;

    Ok((MemoryStore::from_parts(schema, next_key, objects), indexes))
}

fn encode_schema(schema: &Schema, w: &mut ByteWriter) {
    let entities: Vec<&EntitySchema> = schema.entities().collect();
    w.put_len(entities.len());
    for entity in entities {
        w.put_str(entity.name());
        let properties: Vec<(&str, PropertySchema)> = entity.properties().collect();
        w.put_len(properties.len());
        for (name, property) in properties {
            w.put_str(name);
            w.put_u8(property.kind.tag());
            w.put_u8(u8::from(property.is_collection));
        }
    }
}

fn decode_schema(r: &mut ByteReader<'_>) -> anyhow::Result<Schema> {
    let mut schema = Schema::new();
    for _ in 0..r.get_len(8)? {
        let mut entity = EntitySchema::new(r.get_str()?);
        for _ in 0..r.get_len(10)? {
            let name = r.get_str()?;
            let tag = r.get_u8()?;
            let kind = PropertyKind::from_tag(tag).with_context(|| format!("unknown property kind {tag}"))?;
            let is_collection = match r.get_u8()? {
                0 => false,
                1 => true,
                flag => bail!("invalid collection flag {flag}"),
            };
            entity = entity.property(name, PropertySchema { kind, is_collection });
        }
        schema = schema.entity(entity);
    }
    Ok(schema)
}

fn encode_object(object: &Object, w: &mut ByteWriter) {
    w.put_u64(object.key().as_u64());
    w.put_str(object.entity());
    w.put_len(object.properties().len());
    for (name, value) in object.properties() {
        w.put_str(name);
        encode_value(value, w);
    }
}

fn decode_object(r: &mut ByteReader<'_>, schema: &Schema) -> anyhow::Result<Object> {
    let key = ObjectKey(r.get_u64()?);
    let entity = r.get_str()?;
    let declared = schema.get(&entity).with_context(|| format!("object {key}: unknown entity {entity}"))?;

    let mut properties = crate::store::Properties::new();
    for _ in 0..r.get_len(9)? {
        let name = r.get_str()?;
        let value = decode_value(r, 0)?;
        let accepted = declared.get(&name).is_some_and(|p| p.accepts(&value));
        if !accepted || value.is_null() {
            bail!("object {key}: invalid value for {entity}.{name}");
        }
        properties.insert(name, value);
    }
    Ok(Object { key, entity, properties })
}

fn encode_value(value: &Value, w: &mut ByteWriter) {
    match value {
        Value::Null => w.put_u8(0),
        Value::Bool(b) => {
            w.put_u8(1);
            w.put_u8(u8::from(*b));
        }
        Value::Int(i) => {
            w.put_u8(2);
            w.put_i64(*i);
        }
        Value::Float(f) => {
            w.put_u8(3);
            w.put_f64(*f);
        }
        Value::String(s) => {
            w.put_u8(4);
            w.put_str(s);
        }
        Value::FloatList(v) => {
            w.put_u8(5);
            w.put_f32_slice(v);
        }
        Value::List(items) => {
            w.put_u8(6);
            w.put_len(items.len());
            for item in items {
                encode_value(item, w);
            }
        }
    }
}

fn decode_value(r: &mut ByteReader<'_>, depth: usize) -> anyhow::Result<Value> {
    if depth > MAX_VALUE_DEPTH {
        bail!("value nesting exceeds {MAX_VALUE_DEPTH}");
    }
    Ok(match r.get_u8()? {
        0 => Value::Null,
        1 => Value::Bool(r.get_u8()? != 0),
        2 => Value::Int(r.get_i64()?),
        3 => Value::Float(r.get_f64()?),
        4 => Value::String(r.get_str()?),
        5 => Value::FloatList(r.get_f32_vec()?),
        6 => {
            let len = r.get_len(1)?;
            let items = (0..len).map(|_| decode_value(r, depth + 1)).collect::<anyhow::Result<_>>()?;
            Value::List(items)
        }
        tag => bail!("unknown value tag {tag}"),
    })
}

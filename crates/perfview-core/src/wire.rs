//! Binary storage encoding for column values.
//!
//! Each column family stores one compact, self-contained value per column:
//! aggregates store a presence bitmap over the 26-slot ladder followed by
//! ZigZag varints of the present scaled slots; points store both
//! delta streams; directory entries store metric names with a deduplicated
//! units dictionary. All integers are varints so the small deltas produced
//! by the codec stay small at rest.
//!
//! Layouts (all lengths are unsigned varints):
//!
//! ```text
//! Aggregation:  type-tag u8 (0xFF = unset) | presence bitmap u32 LE |
//!               zigzag varint per present slot, ladder order
//! Points:       type-tag u8 (0xFF = unset) |
//!               ts-delta count | zigzag varints... |
//!               value-delta count | zigzag varints...
//! SourceInfo:   name count   | (len, utf8 bytes)... |
//!               index count  | varints... |
//!               dict count   | (len, utf8 bytes)... |
//!               flag count   | u8 (0|1)...
//! ```
//!
//! Stored bytes are untrusted input: truncation or garbage decodes to
//! `Error::Storage`, never a panic.

use crate::codec::{Aggregation, DataType, Points, ScaledStats, STAT_NAMES};
use crate::error::{Error, Result};
use crate::record::SourceInfo;
use crate::varint::{decode_varint, decode_varint_u64, encode_varint, encode_varint_u64};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

const TYPE_UNSET: u8 = 0xFF;

fn put_type_tag(buf: &mut BytesMut, data_type: Option<DataType>) {
    buf.put_u8(data_type.map(DataType::tag).unwrap_or(TYPE_UNSET));
}

fn get_type_tag(buf: &mut &[u8]) -> Result<Option<DataType>> {
    if !buf.has_remaining() {
        return Err(Error::Storage("missing data-type tag".to_string()));
    }
    match buf.get_u8() {
        TYPE_UNSET => Ok(None),
        tag => DataType::from_tag(tag)
            .map(Some)
            .ok_or_else(|| Error::Storage(format!("unknown data-type tag: {tag}"))),
    }
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    let len = decode_varint_u64(buf)? as usize;
    if len > buf.remaining() {
        return Err(Error::Storage("truncated string".to_string()));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Storage("invalid utf-8".to_string()))
}

fn put_string(buf: &mut BytesMut, s: &str) {
    encode_varint_u64(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

/// Serializes the scaled view of an aggregation. An aggregation still in
/// its double view encodes as all-absent.
pub fn encode_aggregation(aggregation: &Aggregation) -> Bytes {
    let mut buf = BytesMut::new();
    put_type_tag(&mut buf, aggregation.data_type);

    let slots = aggregation
        .scaled
        .as_ref()
        .map(ScaledStats::slots)
        .unwrap_or_default();

    let mut bitmap: u32 = 0;
    for (i, slot) in slots.iter().enumerate() {
        if slot.is_some() {
            bitmap |= 1 << i;
        }
    }
    buf.put_u32_le(bitmap);
    for slot in slots.iter().flatten() {
        encode_varint(&mut buf, *slot);
    }

    buf.freeze()
}

pub fn decode_aggregation(mut value: &[u8]) -> Result<Aggregation> {
    let data_type = get_type_tag(&mut value)?;

    if value.remaining() < 4 {
        return Err(Error::Storage("truncated aggregation bitmap".to_string()));
    }
    let bitmap = value.get_u32_le();

    let mut slots = [None; STAT_NAMES.len()];
    for (i, slot) in slots.iter_mut().enumerate() {
        if bitmap & (1 << i) != 0 {
            *slot = Some(decode_varint(&mut value)?);
        }
    }

    Ok(Aggregation {
        data_type,
        scaled: Some(ScaledStats::from_slots(&slots)),
        double: None,
    })
}

/// Serializes the delta streams of a points value. A points value still in
/// its double view encodes as empty.
pub fn encode_points(points: &Points) -> Bytes {
    let mut buf = BytesMut::new();
    put_type_tag(&mut buf, points.data_type);

    encode_varint_u64(&mut buf, points.delta_timestamps.len() as u64);
    for &delta in &points.delta_timestamps {
        encode_varint(&mut buf, delta);
    }
    encode_varint_u64(&mut buf, points.delta_values_scaled.len() as u64);
    for &delta in &points.delta_values_scaled {
        encode_varint(&mut buf, delta);
    }

    buf.freeze()
}

pub fn decode_points(mut value: &[u8]) -> Result<Points> {
    let data_type = get_type_tag(&mut value)?;

    let ts_count = decode_varint_u64(&mut value)? as usize;
    if ts_count > value.remaining() {
        return Err(Error::Storage("truncated points timestamps".to_string()));
    }
    let mut delta_timestamps = Vec::with_capacity(ts_count);
    for _ in 0..ts_count {
        delta_timestamps.push(decode_varint(&mut value)?);
    }

    let value_count = decode_varint_u64(&mut value)? as usize;
    if value_count > value.remaining() {
        return Err(Error::Storage("truncated points values".to_string()));
    }
    let mut delta_values_scaled = Vec::with_capacity(value_count);
    for _ in 0..value_count {
        delta_values_scaled.push(decode_varint(&mut value)?);
    }

    Ok(Points {
        data_type,
        delta_timestamps,
        delta_values_scaled,
        values_double: Vec::new(),
    })
}

/// Directory-entry storage form: metric names plus indices into a
/// deduplicated units dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSourceInfo {
    pub metric_names: Vec<String>,
    pub units_indices: Vec<u32>,
    pub units_map: Vec<String>,
    pub select_for_defaults: Vec<bool>,
}

/// Serializes a directory entry, deduplicating units by first occurrence
/// into the dictionary and storing indices parallel to the metric names.
pub fn encode_source_info(info: &SourceInfo) -> Bytes {
    let mut dict: HashMap<&str, u32> = HashMap::new();
    let mut units_map: Vec<String> = Vec::new();
    let mut units_indices: Vec<u32> = Vec::with_capacity(info.units.len());
    for unit in &info.units {
        let index = *dict.entry(unit.as_str()).or_insert_with(|| {
            units_map.push(unit.clone());
            (units_map.len() - 1) as u32
        });
        units_indices.push(index);
    }

    let mut buf = BytesMut::new();
    encode_varint_u64(&mut buf, info.names.len() as u64);
    for name in &info.names {
        put_string(&mut buf, name);
    }
    encode_varint_u64(&mut buf, units_indices.len() as u64);
    for &index in &units_indices {
        encode_varint_u64(&mut buf, index as u64);
    }
    encode_varint_u64(&mut buf, units_map.len() as u64);
    for unit in &units_map {
        put_string(&mut buf, unit);
    }
    encode_varint_u64(&mut buf, info.select_for_defaults.len() as u64);
    for &flag in &info.select_for_defaults {
        buf.put_u8(flag as u8);
    }

    buf.freeze()
}

pub fn decode_source_info(mut value: &[u8]) -> Result<StoredSourceInfo> {
    let name_count = decode_varint_u64(&mut value)? as usize;
    if name_count > value.remaining() {
        return Err(Error::Storage("truncated source-info names".to_string()));
    }
    let mut metric_names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        metric_names.push(get_string(&mut value)?);
    }

    let index_count = decode_varint_u64(&mut value)? as usize;
    if index_count > value.remaining() {
        return Err(Error::Storage("truncated source-info indices".to_string()));
    }
    let mut units_indices = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        units_indices.push(decode_varint_u64(&mut value)? as u32);
    }

    let dict_count = decode_varint_u64(&mut value)? as usize;
    if dict_count > value.remaining() {
        return Err(Error::Storage("truncated source-info dictionary".to_string()));
    }
    let mut units_map = Vec::with_capacity(dict_count);
    for _ in 0..dict_count {
        units_map.push(get_string(&mut value)?);
    }

    let flag_count = decode_varint_u64(&mut value)? as usize;
    if flag_count > value.remaining() {
        return Err(Error::Storage("truncated source-info flags".to_string()));
    }
    let mut select_for_defaults = Vec::with_capacity(flag_count);
    for _ in 0..flag_count {
        select_for_defaults.push(value.get_u8() != 0);
    }

    Ok(StoredSourceInfo {
        metric_names,
        units_indices,
        units_map,
        select_for_defaults,
    })
}

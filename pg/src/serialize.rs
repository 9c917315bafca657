// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Stream-set serialization: an opaque, version-prefixed byte stream.
//!
//! The format is private to the generator; the only stability promise is
//! that a byte stream produced by this version deserializes in it.

use crate::edit::{Edit, EditKind, PgError};
use crate::stream::{PgMain, SizeKind, Stream};
use bytes::{Buf, BufMut};

const VERSION: u8 = 1;

/// The serializable description of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    /// Stream name.
    pub name: String,
    /// Enabled at serialization time.
    pub enabled: bool,
    /// Smallest packet size.
    pub min_packet_bytes: u32,
    /// Largest packet size.
    pub max_packet_bytes: u32,
    /// Size variation.
    pub size_kind: SizeKind,
    /// Packets per second.
    pub rate_packets_per_second: f64,
    /// Auto-disable threshold.
    pub n_packets_limit: u64,
    /// (rx, tx) stamped on generated buffers.
    pub sw_if_index: [u32; 2],
    /// Segment size for generated buffers.
    pub buffer_bytes: u32,
    /// Compiled template.
    pub fixed_packet_data: Vec<u8>,
    /// Fixed-edit coverage mask.
    pub fixed_packet_data_mask: Vec<u8>,
    /// Non-fixed edits, absolute bit offsets.
    pub non_fixed_edits: Vec<Edit>,
    /// Replay templates.
    pub replay_packet_templates: Vec<Vec<u8>>,
}

impl From<&Stream> for StreamDescriptor {
    fn from(s: &Stream) -> Self {
        StreamDescriptor {
            name: s.name.clone(),
            enabled: s.enabled,
            min_packet_bytes: s.min_packet_bytes,
            max_packet_bytes: s.max_packet_bytes,
            size_kind: s.size_kind,
            rate_packets_per_second: s.rate_packets_per_second,
            n_packets_limit: s.n_packets_limit,
            sw_if_index: s.sw_if_index,
            buffer_bytes: s.buffer_bytes(),
            fixed_packet_data: s.fixed_packet_data.clone(),
            fixed_packet_data_mask: s.fixed_packet_data_mask.clone(),
            non_fixed_edits: s.non_fixed_edits.clone(),
            replay_packet_templates: s.replay_packet_templates.clone(),
        }
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.put_u32(bytes.len() as u32);
    out.put_slice(bytes);
}

/// Serialize the whole stream set.
#[must_use]
pub fn serialize_streams(pg: &PgMain) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u8(VERSION);
    let streams: Vec<StreamDescriptor> = pg.streams().map(StreamDescriptor::from).collect();
    out.put_u32(streams.len() as u32);
    for s in &streams {
        put_bytes(&mut out, s.name.as_bytes());
        out.put_u8(u8::from(s.enabled));
        out.put_u32(s.min_packet_bytes);
        out.put_u32(s.max_packet_bytes);
        out.put_u8(match s.size_kind {
            SizeKind::Fixed => 0,
            SizeKind::Increment => 1,
            SizeKind::Random => 2,
        });
        out.put_f64(s.rate_packets_per_second);
        out.put_u64(s.n_packets_limit);
        out.put_u32(s.sw_if_index[0]);
        out.put_u32(s.sw_if_index[1]);
        out.put_u32(s.buffer_bytes);
        put_bytes(&mut out, &s.fixed_packet_data);
        put_bytes(&mut out, &s.fixed_packet_data_mask);
        out.put_u32(s.non_fixed_edits.len() as u32);
        for e in &s.non_fixed_edits {
            out.put_u8(match e.kind {
                EditKind::Fixed => 0,
                EditKind::Increment => 1,
                EditKind::Random => 2,
                EditKind::Unspecified => 3,
            });
            out.put_u32(e.bit_offset);
            out.put_u32(e.n_bits);
            out.put_u64(e.lo);
            out.put_u64(e.hi);
        }
        out.put_u32(s.replay_packet_templates.len() as u32);
        for t in &s.replay_packet_templates {
            put_bytes(&mut out, t);
        }
    }
    out
}

fn need(buf: &impl Buf, n: usize) -> Result<(), PgError> {
    if buf.remaining() < n {
        Err(PgError::BadSerialization("truncated"))
    } else {
        Ok(())
    }
}

fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>, PgError> {
    need(buf, 4)?;
    let n = buf.get_u32() as usize;
    need(buf, n)?;
    let mut out = vec![0u8; n];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Deserialize a stream set produced by [`serialize_streams`].
///
/// # Errors
///
/// Returns [`PgError::BadSerialization`] for truncation, bad tags, or an
/// unknown version.
pub fn deserialize_streams(mut data: &[u8]) -> Result<Vec<StreamDescriptor>, PgError> {
    let buf = &mut data;
    need(buf, 5)?;
    if buf.get_u8() != VERSION {
        return Err(PgError::BadSerialization("unknown version"));
    }
    let n_streams = buf.get_u32() as usize;
    let mut out = Vec::with_capacity(n_streams.min(1024));
    for _ in 0..n_streams {
        let name = String::from_utf8(get_bytes(buf)?)
            .map_err(|_| PgError::BadSerialization("name not utf-8"))?;
        need(buf, 1 + 4 + 4 + 1 + 8 + 8 + 4 + 4 + 4)?;
        let enabled = buf.get_u8() != 0;
        let min_packet_bytes = buf.get_u32();
        let max_packet_bytes = buf.get_u32();
        let size_kind = match buf.get_u8() {
            0 => SizeKind::Fixed,
            1 => SizeKind::Increment,
            2 => SizeKind::Random,
            _ => return Err(PgError::BadSerialization("bad size kind")),
        };
        let rate_packets_per_second = buf.get_f64();
        let n_packets_limit = buf.get_u64();
        let sw_if_index = [buf.get_u32(), buf.get_u32()];
        let buffer_bytes = buf.get_u32();
        let fixed_packet_data = get_bytes(buf)?;
        let fixed_packet_data_mask = get_bytes(buf)?;
        need(buf, 4)?;
        let n_edits = buf.get_u32() as usize;
        let mut non_fixed_edits = Vec::with_capacity(n_edits.min(1024));
        for _ in 0..n_edits {
            need(buf, 1 + 4 + 4 + 8 + 8)?;
            let kind = match buf.get_u8() {
                0 => EditKind::Fixed,
                1 => EditKind::Increment,
                2 => EditKind::Random,
                3 => EditKind::Unspecified,
                _ => return Err(PgError::BadSerialization("bad edit kind")),
            };
            let bit_offset = buf.get_u32();
            let n_bits = buf.get_u32();
            let lo = buf.get_u64();
            let hi = buf.get_u64();
            non_fixed_edits.push(Edit {
                kind,
                bit_offset,
                n_bits,
                lo,
                hi,
                last_value: lo,
            });
        }
        need(buf, 4)?;
        let n_replay = buf.get_u32() as usize;
        let mut replay_packet_templates = Vec::with_capacity(n_replay.min(1024));
        for _ in 0..n_replay {
            replay_packet_templates.push(get_bytes(buf)?);
        }
        out.push(StreamDescriptor {
            name,
            enabled,
            min_packet_bytes,
            max_packet_bytes,
            size_kind,
            rate_packets_per_second,
            n_packets_limit,
            sw_if_index,
            buffer_bytes,
            fixed_packet_data,
            fixed_packet_data_mask,
            non_fixed_edits,
            replay_packet_templates,
        });
    }
    Ok(out)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::{EditGroup, StreamConfig};
    use graph::NodeIndex;

    fn sample_pg() -> PgMain {
        let mut pg = PgMain::new();
        let mut c = StreamConfig::named("alpha", NodeIndex::new(3));
        c.edit_groups = vec![EditGroup::new(
            14,
            vec![
                Edit::increment(0, 48, 0, 4),
                Edit::fixed(96, 16, 0x0800),
            ],
        )];
        c.min_packet_bytes = 14;
        c.max_packet_bytes = 14;
        c.rate_packets_per_second = 100.0;
        c.n_packets_limit = 5;
        let si = pg.add_stream(c).unwrap();
        pg.enable_disable(si, true).unwrap();
        let mut r = StreamConfig::named("beta", NodeIndex::new(3));
        r.replay_packet_templates = vec![vec![9u8; 60], vec![8u8; 72]];
        pg.add_stream(r).unwrap();
        pg
    }

    #[test]
    fn round_trip_preserves_stream_set() {
        let pg = sample_pg();
        let bytes = serialize_streams(&pg);
        let restored = deserialize_streams(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        let alpha = &restored[0];
        assert_eq!(alpha.name, "alpha");
        assert!(alpha.enabled);
        assert_eq!(alpha.n_packets_limit, 5);
        assert_eq!(alpha.non_fixed_edits.len(), 1);
        assert_eq!(alpha.fixed_packet_data[12..14], [0x08, 0x00]);
        let beta = &restored[1];
        assert_eq!(beta.name, "beta");
        assert!(!beta.enabled);
        assert_eq!(beta.replay_packet_templates.len(), 2);
        assert_eq!(beta.replay_packet_templates[1].len(), 72);
    }

    #[test]
    fn version_and_truncation_are_rejected() {
        let pg = sample_pg();
        let mut bytes = serialize_streams(&pg);
        assert!(matches!(
            deserialize_streams(&bytes[..bytes.len() - 3]),
            Err(PgError::BadSerialization(_))
        ));
        bytes[0] = 99;
        assert!(matches!(
            deserialize_streams(&bytes),
            Err(PgError::BadSerialization(_))
        ));
        assert!(matches!(
            deserialize_streams(&[]),
            Err(PgError::BadSerialization(_))
        ));
    }
}

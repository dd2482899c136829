//! Canonical node encoding
//!
//! A node's storage key is the digest of these bytes, so the encoding must
//! be a pure function of the node's logical contents:
//!
//! ```text
//! data_map   : bitmap bytes (little-endian, trailing zero bytes stripped)
//! node_map   : bitmap bytes
//! contents   : value buckets in ascending bucket order, each a list of
//!              (key, value-or-absent) sorted by key; then child digests
//!              in the packed order used by the node (highest bucket first)
//! ```
//!
//! Framing is bincode with fixed-width integers and no trailing bytes, which
//! admits exactly one byte string per node.

use super::bits::Bitmap;
use super::node::{ChampNode, Mapping, Payload};
use crate::model::Hash;
use crate::{Error, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Upper bound on an encoded node; anything larger is treated as corrupt
pub const MAX_NODE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct WireNode {
    data_map: Vec<u8>,
    node_map: Vec<u8>,
    contents: Vec<WirePayload>,
}

#[derive(Serialize, Deserialize)]
enum WirePayload {
    Bucket(Vec<(Vec<u8>, Option<Vec<u8>>)>),
    Link(Hash),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(MAX_NODE_BYTES)
}

pub fn encode(node: &ChampNode) -> Result<Vec<u8>> {
    let (data_map, node_map, contents) = node.parts();
    let wire = WireNode {
        data_map: data_map.to_bytes(),
        node_map: node_map.to_bytes(),
        contents: contents
            .iter()
            .map(|payload| match payload {
                Payload::Bucket(mappings) => WirePayload::Bucket(
                    mappings
                        .iter()
                        .map(|m| (m.key.clone(), m.value.clone()))
                        .collect(),
                ),
                Payload::Link(hash) => WirePayload::Link(*hash),
            })
            .collect(),
    };
    Ok(options().serialize(&wire)?)
}

pub fn decode(bytes: &[u8]) -> Result<ChampNode> {
    let wire: WireNode = options()
        .deserialize(bytes)
        .map_err(|e| Error::MalformedNode(e.to_string()))?;

    let data_map = Bitmap::from_bytes(&wire.data_map)?;
    let node_map = Bitmap::from_bytes(&wire.node_map)?;
    let contents = wire
        .contents
        .into_iter()
        .map(|payload| match payload {
            WirePayload::Bucket(pairs) => Payload::Bucket(
                pairs
                    .into_iter()
                    .map(|(key, value)| Mapping { key, value })
                    .collect(),
            ),
            WirePayload::Link(hash) => Payload::Link(hash),
        })
        .collect();

    ChampNode::from_parts(data_map, node_map, contents)
}

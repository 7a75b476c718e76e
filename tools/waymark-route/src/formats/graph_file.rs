//! `graph.wgr`: node and edge tables of a road graph
//!
//! Layout (little-endian):
//! - header, 24 bytes: magic `u32`, version `u16`, reserved `u16`,
//!   node count `u64`, edge count `u64`
//! - nodes sorted by id, 24 bytes each: `id i64, lat f64, lon f64`
//! - edges sorted by `(from, to, distance)`, 48 bytes each:
//!   `from i64, to i64, distance_m f64, speed_limit_kmh f64, way_id i64,
//!   oneway u8, 7 bytes padding`
//! - footer: `body_crc64 u64, file_crc64 u64`

use std::io::{self, Write};
use std::path::Path;

use waymark_common::GraphLoadError;

use super::crc::ChecksumWriter;
use super::{read_verified, seal, write_atomic, ByteReader};
use crate::graph::{Edge, GraphStore, Node};

pub const MAGIC: u32 = 0x5747_5246; // "WGRF"
pub const VERSION: u16 = 1;
const HEADER_LEN: usize = 24;
const NODE_RECORD: usize = 24;
const EDGE_RECORD: usize = 48;

fn write_header<W: Write>(w: &mut W, n_nodes: u64, n_edges: u64) -> io::Result<()> {
    w.write_all(&MAGIC.to_le_bytes())?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&0u16.to_le_bytes())?;
    w.write_all(&n_nodes.to_le_bytes())?;
    w.write_all(&n_edges.to_le_bytes())
}

fn write_body<W: Write>(w: &mut W, nodes: &[Node], edges: &[Edge]) -> io::Result<()> {
    for node in nodes {
        w.write_all(&node.id.to_le_bytes())?;
        w.write_all(&node.lat.to_le_bytes())?;
        w.write_all(&node.lon.to_le_bytes())?;
    }
    for edge in edges {
        w.write_all(&edge.from_id.to_le_bytes())?;
        w.write_all(&edge.to_id.to_le_bytes())?;
        w.write_all(&edge.distance_m.to_le_bytes())?;
        w.write_all(&edge.speed_limit_kmh.to_le_bytes())?;
        w.write_all(&edge.way_id.to_le_bytes())?;
        w.write_all(&[u8::from(edge.oneway), 0, 0, 0, 0, 0, 0, 0])?;
    }
    Ok(())
}

/// CRC-64 of the body as it would be written. Expects canonical order.
pub(crate) fn body_checksum(nodes: &[Node], edges: &[Edge]) -> u64 {
    let mut w = ChecksumWriter::new(io::sink());
    // Writing into a sink cannot fail.
    let _ = write_body(&mut w, nodes, edges);
    w.finish().1
}

/// Serialises the graph to the on-disk byte layout.
pub fn encode(graph: &GraphStore) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    let mut body =
        Vec::with_capacity(graph.n_nodes() * NODE_RECORD + graph.edges().len() * EDGE_RECORD);
    // Vec writers are infallible.
    let _ = write_header(&mut header, graph.n_nodes() as u64, graph.edges().len() as u64);
    let _ = write_body(&mut body, graph.nodes(), graph.edges());
    seal(&header, &body)
}

pub fn write(path: &Path, graph: &GraphStore) -> io::Result<()> {
    write_atomic(path, &encode(graph))
}

pub fn read(path: &Path) -> Result<GraphStore, GraphLoadError> {
    let bytes = read_verified(path, HEADER_LEN, MAGIC, VERSION)?;
    let mut r = ByteReader::new(&bytes, path);
    r.skip(8)?;
    let n_nodes = r.u64()?;
    let n_edges = r.u64()?;

    let n_nodes = r.expect_records(n_nodes, NODE_RECORD, "nodes")?;
    let mut nodes = Vec::with_capacity(n_nodes);
    for _ in 0..n_nodes {
        nodes.push(Node {
            id: r.i64()?,
            lat: r.f64()?,
            lon: r.f64()?,
        });
    }

    let n_edges = r.expect_records(n_edges, EDGE_RECORD, "edges")?;
    let mut edges = Vec::with_capacity(n_edges);
    for _ in 0..n_edges {
        let from_id = r.i64()?;
        let to_id = r.i64()?;
        let distance_m = r.f64()?;
        let speed_limit_kmh = r.f64()?;
        let way_id = r.i64()?;
        let oneway = r.u8()? != 0;
        r.skip(7)?;
        edges.push(Edge {
            from_id,
            to_id,
            distance_m,
            speed_limit_kmh,
            oneway,
            way_id,
        });
    }

    if r.remaining() != 0 {
        return Err(GraphLoadError::Truncated {
            path: path.to_path_buf(),
            reason: format!("{} trailing bytes after edge table", r.remaining()),
        });
    }

    GraphStore::new(nodes, edges)
}

//! `index.wch`: node order and shortcut table of a contraction hierarchy
//!
//! Layout (little-endian):
//! - header, 32 bytes: magic `u32`, version `u16`, reserved `u16`,
//!   node count `u64`, shortcut count `u64`, graph fingerprint `u64`
//! - order table sorted by node id, 16 bytes each:
//!   `node_id i64, rank u32, 4 bytes padding`
//! - shortcut table sorted by `(from, to)`, 32 bytes each:
//!   `from i64, to i64, distance_mm u64, via i64`
//! - footer: `body_crc64 u64, file_crc64 u64`
//!
//! Base arcs are not stored; the loader rebuilds the overlay from the
//! graph the fingerprint names plus this table.

use std::io;
use std::path::Path;

use waymark_common::GraphLoadError;

use super::{read_verified, seal, write_atomic, ByteReader};
use crate::ch::ordering::check_bijection;
use crate::ch::{ChIndex, ShortcutEdge};
use crate::graph::{GraphStore, NodeIdx};

pub const MAGIC: u32 = 0x5743_4849; // "WCHI"
pub const VERSION: u16 = 1;
const HEADER_LEN: usize = 32;
const ORDER_RECORD: usize = 16;
const SHORTCUT_RECORD: usize = 32;

/// Serialises the index. Two builds over the same graph give equal bytes.
pub fn encode(index: &ChIndex, graph: &GraphStore) -> Vec<u8> {
    let shortcuts = index.shortcuts();

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(&MAGIC.to_le_bytes());
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&(index.n_nodes() as u64).to_le_bytes());
    header.extend_from_slice(&(shortcuts.len() as u64).to_le_bytes());
    header.extend_from_slice(&index.graph_fingerprint().to_le_bytes());

    let mut body =
        Vec::with_capacity(index.n_nodes() * ORDER_RECORD + shortcuts.len() * SHORTCUT_RECORD);
    // Dense indices follow id order, so this is already sorted by node id.
    for (idx, &rank) in index.ranks().iter().enumerate() {
        body.extend_from_slice(&graph.node_id(idx as NodeIdx).to_le_bytes());
        body.extend_from_slice(&rank.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
    }
    for s in &shortcuts {
        body.extend_from_slice(&graph.node_id(s.from).to_le_bytes());
        body.extend_from_slice(&graph.node_id(s.to).to_le_bytes());
        body.extend_from_slice(&s.weight.to_le_bytes());
        body.extend_from_slice(&graph.node_id(s.via).to_le_bytes());
    }

    seal(&header, &body)
}

pub fn write(path: &Path, index: &ChIndex, graph: &GraphStore) -> io::Result<()> {
    write_atomic(path, &encode(index, graph))
}

/// Loads an index and attaches it to `graph`.
///
/// Fails with [`GraphLoadError::IndexMismatch`] if the index was built for
/// a different graph or its tables reference nodes the graph lacks.
pub fn read(path: &Path, graph: &GraphStore) -> Result<ChIndex, GraphLoadError> {
    let bytes = read_verified(path, HEADER_LEN, MAGIC, VERSION)?;
    let mut r = ByteReader::new(&bytes, path);
    r.skip(8)?;
    let n_nodes = r.u64()?;
    let n_shortcuts = r.u64()?;
    let fingerprint = r.u64()?;

    if fingerprint != graph.fingerprint() {
        return Err(GraphLoadError::IndexMismatch {
            reason: format!(
                "index built for graph {fingerprint:016x}, loaded graph is {:016x}",
                graph.fingerprint()
            ),
        });
    }
    if n_nodes != graph.n_nodes() as u64 {
        return Err(GraphLoadError::IndexMismatch {
            reason: format!("index orders {n_nodes} nodes, graph has {}", graph.n_nodes()),
        });
    }

    let resolve = |id: i64| {
        graph.index_of(id).ok_or_else(|| GraphLoadError::IndexMismatch {
            reason: format!("index references unknown node {id}"),
        })
    };

    let n_nodes = r.expect_records(n_nodes, ORDER_RECORD, "order entries")?;
    let mut rank = vec![u32::MAX; n_nodes];
    for _ in 0..n_nodes {
        let node = resolve(r.i64()?)?;
        rank[node as usize] = r.u32()?;
        r.skip(4)?;
    }
    check_bijection(&rank).map_err(|e| GraphLoadError::IndexMismatch {
        reason: e.to_string(),
    })?;

    let n_shortcuts = r.expect_records(n_shortcuts, SHORTCUT_RECORD, "shortcuts")?;
    let mut shortcuts = Vec::with_capacity(n_shortcuts);
    for _ in 0..n_shortcuts {
        let from = resolve(r.i64()?)?;
        let to = resolve(r.i64()?)?;
        let weight = r.u64()?;
        let via = resolve(r.i64()?)?;
        shortcuts.push(ShortcutEdge {
            from,
            to,
            weight,
            via,
        });
    }

    if r.remaining() != 0 {
        return Err(GraphLoadError::Truncated {
            path: path.to_path_buf(),
            reason: format!("{} trailing bytes after shortcut table", r.remaining()),
        });
    }

    Ok(ChIndex::assemble(graph, rank, &shortcuts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ch::{BuilderConfig, HierarchyBuilder};
    use crate::graph::{Edge, Node};
    use tempfile::TempDir;

    fn chain(len: i64, metres: f64) -> GraphStore {
        let nodes = (0..len)
            .map(|id| Node { id: 100 + id, lat: 10.0, lon: 10.0 + id as f64 * 0.01 })
            .collect();
        let mut edges = Vec::new();
        for id in 0..len - 1 {
            for (a, b) in [(id, id + 1), (id + 1, id)] {
                edges.push(Edge {
                    from_id: 100 + a,
                    to_id: 100 + b,
                    distance_m: metres,
                    speed_limit_kmh: 50.0,
                    oneway: false,
                    way_id: 0,
                });
            }
        }
        GraphStore::new(nodes, edges).unwrap()
    }

    #[test]
    fn reload_reproduces_overlay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.wch");
        let graph = chain(6, 250.0);
        let (index, _) = HierarchyBuilder::build(&graph, BuilderConfig::default()).unwrap();
        write(&path, &index, &graph).unwrap();

        let loaded = read(&path, &graph).unwrap();
        assert_eq!(loaded.ranks(), index.ranks());
        assert_eq!(loaded.shortcuts(), index.shortcuts());
        assert_eq!(encode(&loaded, &graph), encode(&index, &graph));
    }

    #[test]
    fn index_for_other_graph_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.wch");
        let graph = chain(6, 250.0);
        let (index, _) = HierarchyBuilder::build(&graph, BuilderConfig::default()).unwrap();
        write(&path, &index, &graph).unwrap();

        let other = chain(6, 300.0);
        assert!(matches!(
            read(&path, &other),
            Err(GraphLoadError::IndexMismatch { .. })
        ));
    }
}

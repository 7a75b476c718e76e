//! Upward/downward adjacency of a contracted graph

use super::{Weight, NO_VIA};
use crate::graph::{GraphStore, NodeIdx};

/// A shortcut arc `from -> to` replacing `from -> via -> to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortcutEdge {
    pub from: NodeIdx,
    pub to: NodeIdx,
    pub weight: Weight,
    pub via: NodeIdx,
}

/// Arc as stored in the index.
///
/// In the upward list of `u`, `node` is the head. In the downward list of
/// `v`, `node` is the tail of an arc `node -> v` whose tail outranks `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChArc {
    pub node: NodeIdx,
    pub weight: Weight,
    pub via: u32,
}

impl ChArc {
    pub fn is_shortcut(&self) -> bool {
        self.via != NO_VIA
    }
}

#[derive(Debug)]
pub struct ChIndex {
    rank: Vec<u32>,
    up_offsets: Vec<u32>,
    up: Vec<ChArc>,
    down_offsets: Vec<u32>,
    down: Vec<ChArc>,
    n_shortcuts: usize,
    graph_fingerprint: u64,
}

impl ChIndex {
    /// Rebuilds the final overlay from base arcs plus the shortcut table.
    ///
    /// `rank` must already be a bijection and every shortcut endpoint a
    /// valid index; the builder and the file loader check both.
    pub fn assemble(graph: &GraphStore, rank: Vec<u32>, shortcuts: &[ShortcutEdge]) -> Self {
        let n = graph.n_nodes();
        let mut overlay: Vec<Vec<ChArc>> = vec![Vec::new(); n];
        for u in 0..n as NodeIdx {
            let list = &mut overlay[u as usize];
            for arc in graph.out_arcs(u) {
                if arc.head == u || list.last().is_some_and(|a| a.node == arc.head) {
                    continue;
                }
                list.push(ChArc {
                    node: arc.head,
                    weight: arc.length_mm,
                    via: NO_VIA,
                });
            }
        }
        for s in shortcuts {
            let list = &mut overlay[s.from as usize];
            let arc = ChArc {
                node: s.to,
                weight: s.weight,
                via: s.via,
            };
            match list.iter_mut().find(|a| a.node == s.to) {
                Some(existing) if s.weight < existing.weight => *existing = arc,
                Some(_) => {}
                None => list.push(arc),
            }
        }

        let mut up_lists: Vec<Vec<ChArc>> = vec![Vec::new(); n];
        let mut down_lists: Vec<Vec<ChArc>> = vec![Vec::new(); n];
        let mut n_shortcuts = 0;
        for (u, list) in overlay.into_iter().enumerate() {
            for arc in list {
                n_shortcuts += usize::from(arc.is_shortcut());
                if rank[arc.node as usize] > rank[u] {
                    up_lists[u].push(arc);
                } else {
                    down_lists[arc.node as usize].push(ChArc {
                        node: u as NodeIdx,
                        ..arc
                    });
                }
            }
        }

        let (up_offsets, up) = flatten(up_lists);
        let (down_offsets, down) = flatten(down_lists);

        Self {
            rank,
            up_offsets,
            up,
            down_offsets,
            down,
            n_shortcuts,
            graph_fingerprint: graph.fingerprint(),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.rank.len()
    }

    pub fn n_shortcuts(&self) -> usize {
        self.n_shortcuts
    }

    pub fn n_up_arcs(&self) -> usize {
        self.up.len()
    }

    pub fn n_down_arcs(&self) -> usize {
        self.down.len()
    }

    pub fn rank(&self, node: NodeIdx) -> u32 {
        self.rank[node as usize]
    }

    pub fn ranks(&self) -> &[u32] {
        &self.rank
    }

    pub fn graph_fingerprint(&self) -> u64 {
        self.graph_fingerprint
    }

    /// Arcs leaving `node` towards higher-ranked nodes, sorted by head.
    pub fn up_arcs(&self, node: NodeIdx) -> &[ChArc] {
        let i = node as usize;
        &self.up[self.up_offsets[i] as usize..self.up_offsets[i + 1] as usize]
    }

    /// Arcs entering `node` from higher-ranked nodes, sorted by tail.
    pub fn down_arcs(&self, node: NodeIdx) -> &[ChArc] {
        let i = node as usize;
        &self.down[self.down_offsets[i] as usize..self.down_offsets[i + 1] as usize]
    }

    /// The overlay arc `from -> to`, wherever it is stored.
    pub fn arc(&self, from: NodeIdx, to: NodeIdx) -> Option<ChArc> {
        let (list, key) = if self.rank(to) > self.rank(from) {
            (self.up_arcs(from), to)
        } else {
            (self.down_arcs(to), from)
        };
        list.binary_search_by_key(&key, |a| a.node)
            .ok()
            .map(|i| list[i])
    }

    /// Every shortcut in the overlay, sorted by `(from, to)`.
    pub fn shortcuts(&self) -> Vec<ShortcutEdge> {
        let mut out = Vec::with_capacity(self.n_shortcuts);
        for u in 0..self.n_nodes() as NodeIdx {
            for arc in self.up_arcs(u).iter().filter(|a| a.is_shortcut()) {
                out.push(ShortcutEdge {
                    from: u,
                    to: arc.node,
                    weight: arc.weight,
                    via: arc.via,
                });
            }
            for arc in self.down_arcs(u).iter().filter(|a| a.is_shortcut()) {
                out.push(ShortcutEdge {
                    from: arc.node,
                    to: u,
                    weight: arc.weight,
                    via: arc.via,
                });
            }
        }
        out.sort_by_key(|s| (s.from, s.to));
        out
    }
}

fn flatten(lists: Vec<Vec<ChArc>>) -> (Vec<u32>, Vec<ChArc>) {
    let mut offsets = Vec::with_capacity(lists.len() + 1);
    let mut flat = Vec::with_capacity(lists.iter().map(Vec::len).sum());
    offsets.push(0);
    for mut list in lists {
        list.sort_by_key(|a| a.node);
        flat.extend(list);
        offsets.push(flat.len() as u32);
    }
    (offsets, flat)
}

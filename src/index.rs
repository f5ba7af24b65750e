// ============================================================================
// SPATIAL INDEX — R-tree over annotation box geometry
// ============================================================================
//
// The index holds a denormalised copy of each box's bounds, keyed by the box
// id the owner uses. It is never the source of truth: every geometry change
// on the owning side must be mirrored with `update`, otherwise queries return
// stale results. Nothing here detects that.
//
// Stacking order is explicit. Each record carries a `z` key; a fresh insert
// lands on top, `update` keeps the box's place in the stack, and
// `bring_to_front` moves it up. Point lookups resolve overlaps by the
// largest `z`, independent of the order the tree happens to return matches.

use std::collections::HashMap;

use egui::Rect;
use rstar::{AABB, RTree, RTreeObject};

use crate::boxes::AnnotationBox;

/// Default corner-handle radius used by `hit_test` (image units).
pub const DEFAULT_HANDLE_SIZE: f32 = 20.0;
/// Default distance from a side that still counts as an edge hit.
pub const DEFAULT_EDGE_THRESHOLD: f32 = 10.0;

/// Query-side copy of one box.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxRecord {
    pub id: usize,
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub char_index: Option<usize>,
    pub character: String,
    /// Draw order: larger is drawn later (on top).
    pub z: u64,
}

impl BoxRecord {
    fn from_box(b: &AnnotationBox, id: usize, z: u64) -> Self {
        let finite = |v: f32| if v.is_finite() { v } else { 0.0 };
        let x = finite(b.x);
        let y = finite(b.y);
        Self {
            id,
            min_x: x,
            min_y: y,
            max_x: x + finite(b.width),
            max_y: y + finite(b.height),
            char_index: b.char_index,
            character: b.character.clone(),
            z,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::from_min_max(
            egui::pos2(self.min_x, self.min_y),
            egui::pos2(self.max_x, self.max_y),
        )
    }

    pub fn is_orphaned(&self) -> bool {
        self.char_index.is_none()
    }
}

impl RTreeObject for BoxRecord {
    type Envelope = AABB<[f32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_x, self.min_y], [self.max_x, self.max_y])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corner {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    North,
    South,
    West,
    East,
}

/// Where a pointer landed relative to a box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hit {
    Corner(Corner),
    Edge(Edge),
    Inside,
}

pub struct SpatialIndex {
    tree: RTree<BoxRecord>,
    /// id -> record currently in the tree, for O(1) removal lookups.
    records: HashMap<usize, BoxRecord>,
    next_z: u64,
    pub edge_threshold: f32,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            records: HashMap::new(),
            next_z: 0,
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
        }
    }

    /// Index `b` under `id`, on top of everything already present.
    /// An existing entry for `id` is dropped first.
    pub fn insert(&mut self, b: &AnnotationBox, id: usize) {
        let z = self.take_z();
        self.insert_with_z(b, id, z);
    }

    /// Replace the geometry for `id`, keeping its stacking position.
    /// Unknown ids are inserted on top.
    pub fn update(&mut self, b: &AnnotationBox, id: usize) {
        let z = match self.records.get(&id) {
            Some(rec) => rec.z,
            None => self.take_z(),
        };
        self.insert_with_z(b, id, z);
    }

    /// Remove `id`. Unknown ids are ignored.
    pub fn remove(&mut self, id: usize) {
        if let Some(rec) = self.records.remove(&id) {
            self.tree.remove(&rec);
        }
    }

    /// Move `id` to the top of the stack. Returns false for unknown ids.
    pub fn bring_to_front(&mut self, id: usize) -> bool {
        let Some(mut rec) = self.records.remove(&id) else {
            return false;
        };
        self.tree.remove(&rec);
        rec.z = self.take_z();
        self.tree.insert(rec.clone());
        self.records.insert(id, rec);
        true
    }

    /// All records whose bounds intersect `rect` (edges inclusive), in tree
    /// traversal order.
    pub fn search(&self, rect: Rect) -> Vec<&BoxRecord> {
        let envelope = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        self.tree.locate_in_envelope_intersecting(&envelope).collect()
    }

    /// Top-most record within a `tolerance` square around `(x, y)`.
    /// Orphaned boxes are skipped unless `include_orphaned` is set.
    pub fn find_box_at_point(
        &self,
        x: f32,
        y: f32,
        tolerance: f32,
        include_orphaned: bool,
    ) -> Option<&BoxRecord> {
        let envelope = AABB::from_corners([x - tolerance, y - tolerance], [x + tolerance, y + tolerance]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|rec| include_orphaned || !rec.is_orphaned())
            .max_by_key(|rec| rec.z)
    }

    /// Every record containing exactly `(x, y)`, bottom to top.
    pub fn find_boxes_at_point(&self, x: f32, y: f32, include_orphaned: bool) -> Vec<&BoxRecord> {
        let envelope = AABB::from_point([x, y]);
        let mut hits: Vec<&BoxRecord> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|rec| include_orphaned || !rec.is_orphaned())
            .collect();
        hits.sort_by_key(|rec| rec.z);
        hits
    }

    /// Classify `(x, y)` against `rec`. Corners win over edges, edges over
    /// the interior.
    pub fn hit_test(&self, rec: &BoxRecord, x: f32, y: f32, handle_size: f32) -> Option<Hit> {
        let corners = [
            (Corner::NorthWest, rec.min_x, rec.min_y),
            (Corner::NorthEast, rec.max_x, rec.min_y),
            (Corner::SouthWest, rec.min_x, rec.max_y),
            (Corner::SouthEast, rec.max_x, rec.max_y),
        ];
        for (corner, cx, cy) in corners {
            if (x - cx).abs() < handle_size && (y - cy).abs() < handle_size {
                return Some(Hit::Corner(corner));
            }
        }

        let threshold = self.edge_threshold;
        let in_x = x >= rec.min_x && x <= rec.max_x;
        let in_y = y >= rec.min_y && y <= rec.max_y;

        if in_x && (y - rec.min_y).abs() < threshold {
            return Some(Hit::Edge(Edge::North));
        }
        if in_x && (y - rec.max_y).abs() < threshold {
            return Some(Hit::Edge(Edge::South));
        }
        if in_y && (x - rec.min_x).abs() < threshold {
            return Some(Hit::Edge(Edge::West));
        }
        if in_y && (x - rec.max_x).abs() < threshold {
            return Some(Hit::Edge(Edge::East));
        }
        if in_x && in_y {
            return Some(Hit::Inside);
        }
        None
    }

    pub fn get(&self, id: usize) -> Option<&BoxRecord> {
        self.records.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &BoxRecord> {
        self.tree.iter()
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
        self.records.clear();
        self.next_z = 0;
    }

    /// Re-index `boxes` from scratch using their array position as id.
    /// Later boxes stack above earlier ones.
    pub fn rebuild(&mut self, boxes: &[AnnotationBox]) {
        self.clear();
        let records: Vec<BoxRecord> = boxes
            .iter()
            .enumerate()
            .map(|(id, b)| BoxRecord::from_box(b, id, id as u64))
            .collect();
        for rec in &records {
            self.records.insert(rec.id, rec.clone());
        }
        self.next_z = records.len() as u64;
        self.tree = RTree::bulk_load(records);
    }

    fn take_z(&mut self) -> u64 {
        let z = self.next_z;
        self.next_z += 1;
        z
    }

    fn insert_with_z(&mut self, b: &AnnotationBox, id: usize, z: u64) {
        self.remove(id);
        let rec = BoxRecord::from_box(b, id, z);
        self.tree.insert(rec.clone());
        self.records.insert(id, rec);
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

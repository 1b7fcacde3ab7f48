//! The dated-tree collaborator: node ages on an arena-stored rooted tree.
//!
//! The MCMC core only needs age queries, down-pass iteration, MRCA lookup
//! by taxon name, a calibration compatibility check, and the on-demand
//! export surfaces (dated Newick description, calibration-annotated BEAST
//! XML). Topology construction and moves live elsewhere.

use crate::calibration::Calibration;
use divtime_core::{DivtimeError, Result};
use std::fmt::Write as _;

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in a dated tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes.
    pub children: Vec<NodeId>,
    /// Age of this node (time before present; 0 for extant tips).
    pub age: f64,
    /// True when the age is pinned by a fixed-age calibration.
    pub fixed: bool,
    /// Taxon label for tips.
    pub name: Option<String>,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted dated tree stored as an arena of nodes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl TimeTree {
    /// Create a new tree with a single root node at the given age.
    pub fn new(root_age: f64) -> Self {
        let root = Node {
            id: 0,
            parent: None,
            children: Vec::new(),
            age: root_age,
            fixed: false,
            name: None,
        };
        Self {
            nodes: vec![root],
            root: 0,
        }
    }

    /// Add a child to `parent` and return its `NodeId`.
    ///
    /// The child's age must not exceed its parent's.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: Option<String>,
        age: f64,
    ) -> Result<NodeId> {
        let parent_age = match self.nodes.get(parent) {
            Some(p) => p.age,
            None => {
                return Err(DivtimeError::InvalidInput(format!(
                    "parent index {} out of range ({})",
                    parent,
                    self.nodes.len()
                )))
            }
        };
        if age > parent_age {
            return Err(DivtimeError::InvalidInput(format!(
                "child age {} exceeds parent age {}",
                age, parent_age
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            age,
            fixed: false,
            name,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Age of the root node.
    pub fn root_age(&self) -> f64 {
        self.nodes[self.root].age
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Age of a node.
    pub fn node_age(&self, id: NodeId) -> Result<f64> {
        self.nodes
            .get(id)
            .map(|n| n.age)
            .ok_or_else(|| DivtimeError::InvalidInput(format!("node id {} out of range", id)))
    }

    /// Set the age of a node, keeping parent/child age ordering. Nodes
    /// pinned by a fixed-age calibration refuse the change.
    pub fn set_node_age(&mut self, id: NodeId, age: f64) -> Result<()> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| DivtimeError::InvalidInput(format!("node id {} out of range", id)))?;
        if node.fixed {
            return Err(DivtimeError::InvalidInput(format!(
                "node {} has a fixed calibrated age",
                id
            )));
        }
        if let Some(p) = node.parent {
            if age > self.nodes[p].age {
                return Err(DivtimeError::InvalidInput(format!(
                    "age {} for node {} exceeds parent age {}",
                    age, id, self.nodes[p].age
                )));
            }
        }
        for &c in &node.children.clone() {
            if self.nodes[c].age > age {
                return Err(DivtimeError::InvalidInput(format!(
                    "age {} for node {} is below child age {}",
                    age, id, self.nodes[c].age
                )));
            }
        }
        self.nodes[id].age = age;
        Ok(())
    }

    /// Pin a node's age so later `set_node_age` calls refuse it.
    pub fn fix_node_age(&mut self, id: NodeId) -> Result<()> {
        self.nodes
            .get_mut(id)
            .map(|n| n.fixed = true)
            .ok_or_else(|| DivtimeError::InvalidInput(format!("node id {} out of range", id)))
    }

    /// Pin every node named by a fixed-age (`young == old`) calibration.
    pub fn apply_calibration_fixes(&mut self, cals: &[Calibration]) -> Result<()> {
        for cal in cals.iter().filter(|c| c.is_fixed()) {
            let node = self.calibrated_node(cal)?;
            self.nodes[node].fixed = true;
        }
        Ok(())
    }

    /// All leaf node ids.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Ages of all internal (non-leaf) nodes, root included.
    pub fn internal_node_ages(&self) -> Vec<f64> {
        self.nodes
            .iter()
            .filter(|n| !n.is_leaf())
            .map(|n| n.age)
            .collect()
    }

    /// Down-pass (children before parent) traversal yielding node ids.
    pub fn iter_down_pass(&self) -> impl Iterator<Item = NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in &self.nodes[id].children {
                stack.push(child);
            }
        }
        order.reverse();
        order.into_iter()
    }

    /// Up-pass (parent before children) traversal yielding node ids.
    pub fn iter_up_pass(&self) -> impl Iterator<Item = NodeId> {
        let mut order: Vec<NodeId> = self.iter_down_pass().collect();
        order.reverse();
        order.into_iter()
    }

    /// Look up a leaf by its taxon name.
    pub fn leaf_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.is_leaf() && n.name.as_deref() == Some(name))
            .map(|n| n.id)
    }

    /// Most recent common ancestor of two nodes.
    pub fn mrca(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        if a >= self.nodes.len() || b >= self.nodes.len() {
            return Err(DivtimeError::InvalidInput("node id out of range".into()));
        }
        let mut ancestors_a = Vec::new();
        let mut cur = a;
        loop {
            ancestors_a.push(cur);
            match self.nodes[cur].parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        cur = b;
        loop {
            if ancestors_a.contains(&cur) {
                return Ok(cur);
            }
            match self.nodes[cur].parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        Ok(self.root)
    }

    /// MRCA of a calibration's taxon pair; the root for root constraints.
    pub fn calibrated_node(&self, cal: &Calibration) -> Result<NodeId> {
        if cal.is_root() {
            return Ok(self.root);
        }
        let a = self.leaf_by_name(cal.taxon_a()).ok_or_else(|| {
            DivtimeError::InvalidInput(format!("taxon '{}' not found in tree", cal.taxon_a()))
        })?;
        if cal.taxon_a() == cal.taxon_b() {
            return Ok(a);
        }
        let b = self.leaf_by_name(cal.taxon_b()).ok_or_else(|| {
            DivtimeError::InvalidInput(format!("taxon '{}' not found in tree", cal.taxon_b()))
        })?;
        self.mrca(a, b)
    }

    /// Check that every calibration can be honored by this tree: every
    /// named taxon resolves, and fixed-age constraints match the current
    /// node age. Run before any age machinery so an unmatched name fails
    /// here rather than as a later lookup failure.
    pub fn check_calibration_compatibility(&self, cals: &[Calibration]) -> Result<()> {
        for cal in cals {
            let node = self.calibrated_node(cal)?;
            let age = self.nodes[node].age;
            if cal.is_fixed() && (age - cal.young()).abs() > 1e-9 {
                return Err(DivtimeError::InvalidInput(format!(
                    "node for [{}, {}] has age {} but is fixed at {}",
                    cal.taxon_a(),
                    cal.taxon_b(),
                    age,
                    cal.young()
                )));
            }
            if age < cal.young() - 1e-9 || age > cal.old() + 1e-9 {
                return Err(DivtimeError::InvalidInput(format!(
                    "node for [{}, {}] has age {} outside calibration bounds [{}, {}]",
                    cal.taxon_a(),
                    cal.taxon_b(),
                    age,
                    cal.young(),
                    cal.old()
                )));
            }
        }
        Ok(())
    }

    /// Dated-tree description: Newick with branch lengths derived from
    /// the node ages (`parent_age - node_age`).
    pub fn tree_description(&self) -> String {
        let mut out = String::new();
        self.write_newick(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_newick(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        if !node.children.is_empty() {
            out.push('(');
            for (i, &c) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(c, out);
            }
            out.push(')');
        }
        if let Some(name) = &node.name {
            out.push_str(name);
        }
        if let Some(p) = node.parent {
            let _ = write!(out, ":{}", self.nodes[p].age - node.age);
        }
    }

    /// BEAST-compatible XML summary of per-node calibration metadata.
    ///
    /// One `<calibration>` element per constraint that resolves on this
    /// tree, carrying the calibrated node and its bounds.
    pub fn calibration_xml(&self, cals: &[Calibration]) -> Result<String> {
        let mut out = String::from("<calibrations>\n");
        for cal in cals {
            let node = self.calibrated_node(cal)?;
            let _ = writeln!(
                out,
                "  <calibration node=\"{}\" taxonA=\"{}\" taxonB=\"{}\" young=\"{}\" old=\"{}\" age=\"{}\"/>",
                node,
                cal.taxon_a(),
                cal.taxon_b(),
                cal.young(),
                cal.old(),
                self.nodes[node].age
            );
        }
        out.push_str("</calibrations>\n");
        Ok(out)
    }
}

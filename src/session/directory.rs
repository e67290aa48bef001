//! Namespace queries and group management

use tracing::{debug, info};

use super::{logged, require_path, Session};
use crate::error::{Result, StoreError};
use crate::path::{is_root, join_path, leaf_name, normalize_path, parent_path, split_path, ROOT};
use crate::storage::catalog::GroupNode;
use crate::storage::Node;
use crate::types::ElementType;

/// What a path resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Missing,
    Group,
    Array,
    /// A node that is neither a group nor an array (committed named type)
    Other,
    /// The store could not be queried (container closed or catalog inconsistent)
    Error,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Missing => "missing",
            NodeType::Group => "group",
            NodeType::Array => "array",
            NodeType::Other => "other",
            NodeType::Error => "error",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Session {
    pub fn node_type(&self, path: &str) -> NodeType {
        let p = normalize_path(path);
        if p.is_empty() {
            return NodeType::Missing;
        }
        let c = match self.container() {
            Ok(c) => c,
            Err(_) => return NodeType::Error,
        };
        match c.catalog().node(&p) {
            None => NodeType::Missing,
            Some(Node::Group(_)) => NodeType::Group,
            Some(Node::Array(id)) if c.catalog().array(*id).is_some() => NodeType::Array,
            Some(Node::Array(_)) => NodeType::Error,
            Some(Node::NamedType(_)) => NodeType::Other,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        !matches!(self.node_type(path), NodeType::Missing | NodeType::Error)
    }

    pub fn is_group(&self, path: &str) -> bool {
        self.node_type(path) == NodeType::Group
    }

    pub fn is_array(&self, path: &str) -> bool {
        self.node_type(path) == NodeType::Array
    }

    /// Immediate child names of a group, in name order.
    pub fn list_children(&self, group: &str) -> Result<Vec<String>> {
        let gp = normalize_path(group);
        logged("list_children", &gp, self.children_of(&gp, |_| true))
    }

    /// Child groups only
    pub fn list_groups(&self, group: &str) -> Result<Vec<String>> {
        let gp = normalize_path(group);
        logged("list_groups", &gp, self.children_of(&gp, |n| matches!(n, Node::Group(_))))
    }

    /// Child arrays only
    pub fn list_arrays(&self, group: &str) -> Result<Vec<String>> {
        let gp = normalize_path(group);
        logged("list_arrays", &gp, self.children_of(&gp, |n| matches!(n, Node::Array(_))))
    }

    fn children_of(&self, gp: &str, keep: impl Fn(&Node) -> bool) -> Result<Vec<String>> {
        let c = self.container()?;
        if gp.is_empty() {
            return Err(StoreError::InvalidPath(gp.to_string()));
        }
        match c.catalog().group(gp) {
            Some(g) => Ok(g
                .children
                .iter()
                .filter(|(_, node)| keep(node))
                .map(|(name, _)| name.clone())
                .collect()),
            None => Err(StoreError::WrongKind {
                path: gp.to_string(),
                expected: "group",
                found: self.node_type(gp),
            }),
        }
    }

    /// Create every missing segment of `path` as a group.
    ///
    /// Idempotent. An existing non-group segment is a hard error and
    /// nothing is created in that case.
    pub fn ensure_group(&mut self, path: &str) -> Result<()> {
        let gp = normalize_path(path);
        let result = self.ensure_group_inner(&gp);
        logged("ensure_group", &gp, result)
    }

    /// Alias of [`ensure_group`](Self::ensure_group)
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.ensure_group(path)
    }

    fn ensure_group_inner(&mut self, gp: &str) -> Result<()> {
        if gp.is_empty() {
            return Err(StoreError::InvalidPath(gp.to_string()));
        }

        let segments: Vec<String> = split_path(gp).into_iter().map(str::to_string).collect();
        let c = self.container_mut()?;

        // Check the whole chain before creating anything.
        let mut cur = ROOT.to_string();
        let mut first_missing = None;
        for (i, seg) in segments.iter().enumerate() {
            let next = join_path(&cur, seg);
            match c.catalog().node(&next) {
                Some(Node::Group(_)) => {}
                Some(_) => return Err(StoreError::GroupConflict(next)),
                None => {
                    first_missing = Some(i);
                    break;
                }
            }
            cur = next;
        }

        let start = match first_missing {
            Some(i) => i,
            None => return Ok(()),
        };

        for seg in &segments[start..] {
            c.catalog_mut().insert_child(&cur, seg, Node::Group(GroupNode::default()))?;
            cur = join_path(&cur, seg);
        }

        let created = segments.len() - start;
        self.flush_after_mutation("ensure_group", gp);
        debug!("Created {} groups along {}", created, gp);
        Ok(())
    }

    /// True iff `path` is a group with no children.
    pub fn is_group_empty(&self, path: &str) -> bool {
        let gp = normalize_path(path);
        match self.container().ok().and_then(|c| c.catalog().group(&gp)) {
            Some(g) => g.children.is_empty(),
            None => false,
        }
    }

    /// Remove an array or an empty group. Never recursive.
    pub fn remove_link(&mut self, path: &str) -> Result<()> {
        let p = normalize_path(path);
        let result = self.remove_link_inner(&p);
        logged("remove_link", &p, result)
    }

    fn remove_link_inner(&mut self, p: &str) -> Result<()> {
        self.container()?;
        if p.is_empty() {
            return Err(StoreError::InvalidPath(p.to_string()));
        }
        if is_root(p) {
            return Err(StoreError::RemovalRefused("root group".into()));
        }

        match self.node_type(p) {
            NodeType::Missing => return Err(StoreError::PathNotFound(p.to_string())),
            NodeType::Group if !self.is_group_empty(p) => {
                return Err(StoreError::GroupNotEmpty(p.to_string()));
            }
            NodeType::Group | NodeType::Array => {}
            other => return Err(StoreError::RemovalRefused(format!("{} ({})", p, other))),
        }

        let parent = parent_path(p);
        let removed = self.container_mut()?.unlink(&parent, leaf_name(p));
        if removed.is_none() {
            return Err(StoreError::PathNotFound(p.to_string()));
        }

        self.flush_after_mutation("remove_link", p);
        info!("Removed {}", p);
        Ok(())
    }

    /// Store a named element type at `path` (a node that is neither group
    /// nor array). Parent groups are created as needed.
    pub fn commit_named_type(&mut self, path: &str, ty: ElementType) -> Result<()> {
        let p = normalize_path(path);
        let result = self.commit_named_type_inner(&p, ty);
        logged("commit_named_type", &p, result)
    }

    fn commit_named_type_inner(&mut self, path: &str, ty: ElementType) -> Result<()> {
        let p = require_path(path)?;
        self.container()?;
        if is_root(&p) || self.exists(&p) {
            return Err(StoreError::PathExists(p));
        }

        let parent = parent_path(&p);
        self.ensure_group(&parent)?;
        self.container_mut()?
            .catalog_mut()
            .insert_child(&parent, leaf_name(&p), Node::NamedType(ty.persisted()))?;

        self.flush_after_mutation("commit_named_type", &p);
        debug!("Committed type {} at {}", ty, p);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ArrayCreateParams;
    use crate::storage::Extent;

    fn session() -> Session {
        let mut s = Session::new();
        s.create_in_memory().unwrap();
        s
    }

    #[test]
    fn test_node_types() {
        let mut s = session();
        assert_eq!(s.node_type("/"), NodeType::Group);
        assert_eq!(s.node_type(""), NodeType::Missing);
        assert_eq!(s.node_type("/nope"), NodeType::Missing);

        s.ensure_group("/ch1").unwrap();
        s.create_array(&ArrayCreateParams::new("/ch1/a", ElementType::UInt8).dims(vec![4], vec![Extent::Fixed(4)]))
            .unwrap();
        s.commit_named_type("/types/sample", ElementType::Int16).unwrap();

        assert_eq!(s.node_type("ch1"), NodeType::Group);
        assert_eq!(s.node_type("/ch1/a/"), NodeType::Array);
        assert_eq!(s.node_type("/types/sample"), NodeType::Other);
        assert!(s.exists("/types/sample"));
        assert!(!s.is_group("/types/sample"));

        s.close().unwrap();
        assert_eq!(s.node_type("/"), NodeType::Error);
        assert!(!s.exists("/"));
    }

    #[test]
    fn test_list_children_sorted_and_filtered() {
        let mut s = session();
        s.ensure_group("/b").unwrap();
        s.ensure_group("/a").unwrap();
        s.create_array(
            &ArrayCreateParams::new("/c", ElementType::Float32)
                .dims(vec![0], vec![Extent::Unlimited])
                .chunks(vec![16]),
        )
        .unwrap();

        assert_eq!(s.list_children("/").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(s.list_groups("/").unwrap(), vec!["a", "b"]);
        assert_eq!(s.list_arrays("/").unwrap(), vec!["c"]);
        assert!(matches!(
            s.list_children("/c"),
            Err(StoreError::WrongKind { found: NodeType::Array, .. })
        ));
    }

    #[test]
    fn test_ensure_group_conflict_creates_nothing() {
        let mut s = session();
        s.create_array(&ArrayCreateParams::new("/x", ElementType::UInt8).dims(vec![1], vec![Extent::Fixed(1)]))
            .unwrap();

        let err = s.ensure_group("/x/y/z").unwrap_err();
        assert!(matches!(err, StoreError::GroupConflict(ref p) if p == "/x"));
        assert!(s.is_array("/x"));
        assert!(s.ensure_group("").is_err());
    }

    #[test]
    fn test_remove_link_rules() {
        let mut s = session();
        s.ensure_group("/g/inner").unwrap();
        s.commit_named_type("/t", ElementType::Float64).unwrap();

        assert!(matches!(s.remove_link("/"), Err(StoreError::RemovalRefused(_))));
        assert!(matches!(s.remove_link(""), Err(StoreError::InvalidPath(_))));
        assert!(matches!(s.remove_link("/missing"), Err(StoreError::PathNotFound(_))));
        assert!(matches!(s.remove_link("/g"), Err(StoreError::GroupNotEmpty(_))));
        assert!(matches!(s.remove_link("/t"), Err(StoreError::RemovalRefused(_))));

        s.remove_link("/g/inner").unwrap();
        assert!(s.is_group_empty("/g"));
        s.remove_link("/g").unwrap();
        assert!(!s.exists("/g"));
    }

    #[test]
    fn test_closed_session_rejects_mutation() {
        let mut s = Session::new();
        assert!(matches!(s.ensure_group("/a"), Err(StoreError::NotOpen)));
        assert!(matches!(s.list_children("/"), Err(StoreError::NotOpen)));
        assert!(!s.is_group_empty("/"));
    }
}

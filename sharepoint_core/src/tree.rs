//! Breadth-first folder tree expansion.
//!
//! Nodes are collected into a flat arena while the queue is drained, then folded
//! into the nested [`FolderNode`] shape bottom-up. Parents always precede their
//! children in the arena, so walking it backwards sees every child first.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::graph::types::{children_path, DocumentMetadata, DriveItem};
use crate::graph::{GraphClient, Location};

/// Page size requested from Graph for child listings.
const LISTING_PAGE_SIZE: &str = "200";

#[derive(Debug, Clone, Serialize)]
pub struct FolderNode {
    pub name: String,
    pub path: String,
    /// Number of direct children, when Graph reported it or the listing was complete.
    pub item_count: Option<u64>,
    pub depth: u32,
    /// False for folders at the depth ceiling, whose children were not listed.
    pub expanded: bool,
    /// Set when the listing stopped at the per-level child cap.
    pub truncated: bool,
    pub folders: Vec<FolderNode>,
    pub documents: Vec<DocumentMetadata>,
}

impl FolderNode {
    /// Deepest level present in this subtree.
    pub fn max_depth(&self) -> u32 {
        self.folders
            .iter()
            .map(FolderNode::max_depth)
            .max()
            .unwrap_or(self.depth)
    }

    /// Folders plus documents in this subtree, excluding the node itself.
    pub fn total_items(&self) -> usize {
        self.documents.len()
            + self.folders.len()
            + self.folders.iter().map(FolderNode::total_items).sum::<usize>()
    }
}

struct PendingNode {
    name: String,
    location: Location,
    item_id: String,
    item_count: Option<u64>,
    depth: u32,
    expanded: bool,
    truncated: bool,
    children: Vec<usize>,
    documents: Vec<DocumentMetadata>,
}

#[derive(Clone)]
pub struct FolderTreeBuilder {
    graph: GraphClient,
}

impl FolderTreeBuilder {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    /// Expands `root` down to `max_depth` levels below it.
    ///
    /// `max_depth == 0` returns the root alone. Any listing failure aborts the
    /// whole build; a partial tree is never returned.
    pub async fn build_tree(
        &self,
        root: &Location,
        max_depth: u32,
        max_children: Option<usize>,
    ) -> Result<FolderNode, ConnectorError> {
        let item: DriveItem = self
            .graph
            .get_json(&root.item_endpoint(), &[])
            .await
            .map_err(|err| match err {
                ConnectorError::NotFound(_) => ConnectorError::NotFound(format!(
                    "folder '{}' does not exist",
                    root.display_path()
                )),
                other => other,
            })?;
        if !item.is_folder() {
            return Err(ConnectorError::permanent(
                None,
                format!("'{}' is not a folder", root.display_path()),
            ));
        }

        let root_name = if root.is_root() {
            root.library.clone()
        } else {
            item.name.clone()
        };
        let mut arena = vec![PendingNode {
            name: root_name,
            location: root.clone(),
            item_id: item.id.clone(),
            item_count: item.child_count(),
            depth: 0,
            expanded: false,
            truncated: false,
            children: Vec::new(),
            documents: Vec::new(),
        }];
        let mut queue = VecDeque::from([0usize]);
        let mut listings = 0usize;

        while let Some(index) = queue.pop_front() {
            if arena[index].depth >= max_depth {
                continue;
            }
            let children = self.list_children(&arena[index], max_children).await?;
            listings += 1;

            let depth = arena[index].depth + 1;
            let parent_location = arena[index].location.clone();
            let drive_id = parent_location.drive_id.clone();
            let listed = children.items.len() as u64;

            let mut folder_indices = Vec::new();
            let mut documents = Vec::new();
            for child in children.items {
                let location = parent_location.child(&child.name);
                if child.is_folder() {
                    arena.push(PendingNode {
                        name: child.name.clone(),
                        location,
                        item_id: child.id.clone(),
                        item_count: child.child_count(),
                        depth,
                        expanded: false,
                        truncated: false,
                        children: Vec::new(),
                        documents: Vec::new(),
                    });
                    let child_index = arena.len() - 1;
                    folder_indices.push(child_index);
                    queue.push_back(child_index);
                } else {
                    documents.push(DocumentMetadata::from_item(
                        &child,
                        location.display_path(),
                        &drive_id,
                    ));
                }
            }

            let node = &mut arena[index];
            node.expanded = true;
            node.truncated = children.truncated;
            if node.item_count.is_none() && !children.truncated {
                node.item_count = Some(listed);
            }
            node.children = folder_indices;
            node.documents = documents;
        }

        let nodes = arena.len();
        let tree = assemble(arena)?;
        info!(
            root = %root.display_path(),
            max_depth,
            nodes,
            listings,
            "built folder tree"
        );
        Ok(tree)
    }

    async fn list_children(
        &self,
        node: &PendingNode,
        max_children: Option<usize>,
    ) -> Result<Listing, ConnectorError> {
        let mut pages = self.graph.paginate::<DriveItem>(
            &children_path(&node.location.drive_id, &node.item_id),
            &[("$top", LISTING_PAGE_SIZE)],
        );
        let mut items = Vec::new();
        let mut truncated = false;

        while let Some(batch) = pages.next_page().await? {
            items.extend(batch);
            if let Some(cap) = max_children {
                if items.len() > cap || (items.len() == cap && !pages.is_exhausted()) {
                    items.truncate(cap);
                    truncated = true;
                    break;
                }
            }
        }
        debug!(
            path = %node.location.display_path(),
            items = items.len(),
            pages = pages.pages_fetched(),
            truncated,
            "listed folder"
        );
        Ok(Listing { items, truncated })
    }
}

struct Listing {
    items: Vec<DriveItem>,
    truncated: bool,
}

fn assemble(arena: Vec<PendingNode>) -> Result<FolderNode, ConnectorError> {
    let mut built: Vec<Option<FolderNode>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);

    for (index, pending) in arena.into_iter().enumerate().rev() {
        let folders = pending
            .children
            .iter()
            .filter_map(|child| built[*child].take())
            .collect();
        built[index] = Some(FolderNode {
            name: pending.name,
            path: pending.location.display_path(),
            item_count: pending.item_count,
            depth: pending.depth,
            expanded: pending.expanded,
            truncated: pending.truncated,
            folders,
            documents: pending.documents,
        });
    }

    built
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| ConnectorError::InternalError("folder tree had no root".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(path: &str) -> Location {
        Location {
            drive_id: "d1".into(),
            library: "Shared Documents".into(),
            item_path: path.into(),
        }
    }

    fn pending(path: &str, depth: u32, children: Vec<usize>) -> PendingNode {
        PendingNode {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            location: location(path),
            item_id: format!("id-{}", path),
            item_count: Some(children.len() as u64),
            depth,
            expanded: !children.is_empty(),
            truncated: false,
            children,
            documents: Vec::new(),
        }
    }

    #[test]
    fn assembly_preserves_child_order() {
        let arena = vec![
            pending("", 0, vec![1, 2]),
            pending("b", 1, vec![3]),
            pending("a", 1, vec![]),
            pending("b/c", 2, vec![]),
        ];
        let tree = assemble(arena).unwrap();
        assert_eq!(tree.path, "/Shared Documents");
        let names: Vec<&str> = tree.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(tree.folders[0].folders[0].path, "/Shared Documents/b/c");
        assert_eq!(tree.max_depth(), 2);
        assert_eq!(tree.total_items(), 3);
    }
}

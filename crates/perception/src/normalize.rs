//! Breadth-first pruning of the raw accessibility tree.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::model::{
    is_decorative_role, AxExtraction, AxNode, AxRawNode, BoundingBox, IndexExtraction,
    InteractiveElement, InteractiveRole,
};

/// Budgets for one normalization pass.
#[derive(Clone, Copy, Debug)]
pub struct NormalizeBudget {
    pub char_budget: usize,
    pub time_budget_ms: u64,
}

impl Default for NormalizeBudget {
    fn default() -> Self {
        Self {
            char_budget: 30_000,
            time_budget_ms: 500,
        }
    }
}

/// Prune decorative roles and ignored nodes, walking breadth-first from
/// the root so truncation keeps the shallowest (most salient) nodes.
pub fn normalize_tree(
    raw: &[AxRawNode],
    budget: NormalizeBudget,
    boxes: &HashMap<i64, BoundingBox>,
) -> AxExtraction {
    let started = Instant::now();
    let by_id: HashMap<&str, &AxRawNode> = raw.iter().map(|n| (n.node_id.as_str(), n)).collect();

    let mut referenced: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for node in raw {
        for child in &node.child_ids {
            referenced.insert(child.as_str());
        }
    }
    let roots: Vec<&AxRawNode> = raw
        .iter()
        .filter(|n| !referenced.contains(n.node_id.as_str()))
        .collect();

    let mut extraction = AxExtraction {
        raw_count: raw.len(),
        ..Default::default()
    };

    let mut queue: VecDeque<(&AxRawNode, u32)> = roots.into_iter().map(|n| (n, 0)).collect();
    while let Some((node, depth)) = queue.pop_front() {
        if started.elapsed().as_millis() as u64 > budget.time_budget_ms {
            extraction.exceeded_time_budget = true;
            extraction.truncated = true;
            break;
        }

        for child in &node.child_ids {
            if let Some(child_node) = by_id.get(child.as_str()) {
                queue.push_back((child_node, depth + 1));
            }
        }

        let role = node.role.as_deref().unwrap_or("");
        if node.ignored || role.is_empty() || is_decorative_role(role) {
            continue;
        }

        let normalized = AxNode {
            node_id: node.node_id.clone(),
            role: role.to_ascii_lowercase(),
            name: node.name.clone().unwrap_or_default(),
            value: node.value.clone().filter(|v| !v.is_empty()),
            depth,
            backend_dom_node_id: node.backend_dom_node_id,
            bounding_box: node
                .backend_dom_node_id
                .and_then(|id| boxes.get(&id).copied()),
        };

        let chars = normalized.char_count();
        if extraction.normalized_char_count + chars > budget.char_budget {
            extraction.exceeded_char_budget = true;
            extraction.truncated = true;
            break;
        }

        extraction.normalized_char_count += chars;
        if InteractiveRole::parse(&normalized.role).is_some() {
            extraction.interactive_count += 1;
        }
        extraction.nodes.push(normalized);
    }

    extraction.normalized_count = extraction.nodes.len();
    extraction.duration_ms = started.elapsed().as_millis() as u64;
    extraction
}

/// Cut the interactive index out of a normalized tree. Elements without
/// a bounding box fall back to a zero box so ordering stays stable.
pub fn build_interactive_index(tree: AxExtraction) -> IndexExtraction {
    let mut index = Vec::new();
    for node in &tree.nodes {
        if let Some(role) = InteractiveRole::parse(&node.role) {
            index.push(InteractiveElement {
                node_id: node.node_id.clone(),
                role,
                name: node.name.clone(),
                value: node.value.clone(),
                bounding_box: node.bounding_box.unwrap_or_default(),
                backend_dom_node_id: node.backend_dom_node_id,
            });
        }
    }

    let index_char_count: usize = index.iter().map(InteractiveElement::char_count).sum();
    let size_ratio = if tree.normalized_char_count > 0 {
        index_char_count as f64 / tree.normalized_char_count as f64
    } else {
        0.0
    };

    IndexExtraction {
        index,
        index_char_count,
        size_ratio,
        tree,
    }
}

//! Columnar prompt encoding for the AX tier.
//!
//! The decision engine sees one line per node, pipe-separated, instead
//! of nested JSON; that roughly halves the prompt size for the same
//! information.

use crate::model::{AxExtraction, InteractiveElement};

/// Rough chars-per-token divisor for prompt budgeting.
const CHARS_PER_TOKEN: usize = 4;

/// Encode the interactive index as `idx|role|name|value|cx,cy` lines.
pub fn encode_columnar(index: &[InteractiveElement], tree: &AxExtraction) -> String {
    let mut out = String::with_capacity(tree.normalized_char_count + index.len() * 8);
    out.push_str("#i|role|name|value|center\n");
    for (i, element) in index.iter().enumerate() {
        let (cx, cy) = element.bounding_box.center();
        out.push_str(&format!(
            "{}|{}|{}|{}|{:.0},{:.0}\n",
            i,
            element.role.as_str(),
            sanitize(&element.name),
            sanitize(element.value.as_deref().unwrap_or("")),
            cx,
            cy
        ));
    }
    out.push_str("#context\n");
    for node in &tree.nodes {
        if node.bounding_box.is_none() && node.name.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "{}{}|{}\n",
            "  ".repeat(node.depth.min(6) as usize),
            node.role,
            sanitize(&node.name)
        ));
    }
    out
}

/// Estimate prompt tokens for a block of encoded text.
pub fn estimate_prompt_tokens(encoded_chars: usize) -> u64 {
    (encoded_chars / CHARS_PER_TOKEN) as u64
}

fn sanitize(text: &str) -> String {
    let mut cleaned: String = text
        .chars()
        .map(|c| if c == '|' || c == '\n' { ' ' } else { c })
        .collect();
    if cleaned.len() > 80 {
        cleaned.truncate(80);
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, InteractiveRole};

    #[test]
    fn columnar_lines_carry_centers() {
        let index = vec![InteractiveElement {
            node_id: "3".into(),
            role: InteractiveRole::Button,
            name: "Search | now".into(),
            value: None,
            bounding_box: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 50.0,
            },
            backend_dom_node_id: None,
        }];
        let encoded = encode_columnar(&index, &AxExtraction::default());
        assert!(encoded.contains("0|button|Search   now||50,25"));
    }

    #[test]
    fn token_estimate_divides_chars() {
        assert_eq!(estimate_prompt_tokens(400), 100);
    }
}

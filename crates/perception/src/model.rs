use serde::{Deserialize, Serialize};

/// Semantic roles kept in the interactive element index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractiveRole {
    Button,
    Link,
    Textbox,
    Searchbox,
    Combobox,
    Checkbox,
    Radio,
    Menuitem,
    Tab,
    Spinbutton,
    Slider,
    Switch,
}

impl InteractiveRole {
    pub const ALL: [InteractiveRole; 12] = [
        InteractiveRole::Button,
        InteractiveRole::Link,
        InteractiveRole::Textbox,
        InteractiveRole::Searchbox,
        InteractiveRole::Combobox,
        InteractiveRole::Checkbox,
        InteractiveRole::Radio,
        InteractiveRole::Menuitem,
        InteractiveRole::Tab,
        InteractiveRole::Spinbutton,
        InteractiveRole::Slider,
        InteractiveRole::Switch,
    ];

    pub fn parse(role: &str) -> Option<Self> {
        match role.to_ascii_lowercase().as_str() {
            "button" => Some(Self::Button),
            "link" => Some(Self::Link),
            "textbox" => Some(Self::Textbox),
            "searchbox" => Some(Self::Searchbox),
            "combobox" => Some(Self::Combobox),
            "checkbox" => Some(Self::Checkbox),
            "radio" => Some(Self::Radio),
            "menuitem" => Some(Self::Menuitem),
            "tab" => Some(Self::Tab),
            "spinbutton" => Some(Self::Spinbutton),
            "slider" => Some(Self::Slider),
            "switch" => Some(Self::Switch),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Link => "link",
            Self::Textbox => "textbox",
            Self::Searchbox => "searchbox",
            Self::Combobox => "combobox",
            Self::Checkbox => "checkbox",
            Self::Radio => "radio",
            Self::Menuitem => "menuitem",
            Self::Tab => "tab",
            Self::Spinbutton => "spinbutton",
            Self::Slider => "slider",
            Self::Switch => "switch",
        }
    }
}

/// Roles pruned from the normalized tree.
pub const DECORATIVE_ROLES: [&str; 4] = ["generic", "none", "presentation", "inlinetextbox"];

pub fn is_decorative_role(role: &str) -> bool {
    let lowered = role.to_ascii_lowercase();
    DECORATIVE_ROLES.iter().any(|d| *d == lowered)
}

/// Raw accessibility node as decoded from `Accessibility.getFullAXTree`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxRawNode {
    pub node_id: String,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default, deserialize_with = "de_value_field")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "de_value_field")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_value_field")]
    pub value: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default, rename = "backendDOMNodeId")]
    pub backend_dom_node_id: Option<i64>,
}

/// CDP wraps role/name/value as `{ "type": ..., "value": ... }`.
fn de_value_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Object(map) => map.get("value").and_then(|inner| match inner {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
        other => Some(other.to_string()),
    }))
}

/// Viewport-space box attached to interactive nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Normalized node retained after pruning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AxNode {
    pub node_id: String,
    pub role: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_dom_node_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl AxNode {
    pub fn char_count(&self) -> usize {
        self.role.len() + self.name.len() + self.value.as_deref().map_or(0, str::len)
    }
}

/// Entry in the interactive element index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub node_id: String,
    pub role: InteractiveRole,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub bounding_box: BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_dom_node_id: Option<i64>,
}

impl InteractiveElement {
    pub fn char_count(&self) -> usize {
        self.role.as_str().len() + self.name.len() + self.value.as_deref().map_or(0, str::len)
    }
}

/// Statistics and nodes from one normalization pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AxExtraction {
    pub nodes: Vec<AxNode>,
    pub raw_count: usize,
    pub normalized_count: usize,
    pub interactive_count: usize,
    pub normalized_char_count: usize,
    pub duration_ms: u64,
    pub exceeded_char_budget: bool,
    pub exceeded_time_budget: bool,
    pub truncated: bool,
}

/// Interactive index plus the tree it was cut from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexExtraction {
    pub index: Vec<InteractiveElement>,
    pub tree: AxExtraction,
    pub index_char_count: usize,
    /// index chars over normalized chars, in (0, 1).
    pub size_ratio: f64,
}

/// DOM-derived interactive candidate used when the AX tree is deficient.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomCandidate {
    pub tag: String,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub clickable: bool,
}

impl DomCandidate {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotMode {
    Viewport,
    FullPage,
}

/// Captured screenshot payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScreenshotData {
    pub base64: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub mode: ScreenshotMode,
    pub scroll_steps: u32,
    pub captured_segments: u32,
    pub truncated: bool,
}

/// A full page snapshot handed to the decision engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub current_url: String,
    pub index: Vec<InteractiveElement>,
    pub tree: AxExtraction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotData>,
    #[serde(default)]
    pub recent_actions: Vec<String>,
    #[serde(default)]
    pub recent_summaries: Vec<String>,
}

impl Observation {
    pub fn summary(&self) -> String {
        format!(
            "{} ({} interactive, {} nodes)",
            self.current_url,
            self.index.len(),
            self.tree.normalized_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_covers_index_roles() {
        for role in InteractiveRole::ALL {
            assert_eq!(InteractiveRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(InteractiveRole::parse("paragraph"), None);
    }

    #[test]
    fn decorative_match_is_case_insensitive() {
        assert!(is_decorative_role("InlineTextBox"));
        assert!(is_decorative_role("generic"));
        assert!(!is_decorative_role("button"));
    }

    #[test]
    fn raw_node_decodes_cdp_shape() {
        let raw: AxRawNode = serde_json::from_value(serde_json::json!({
            "nodeId": "7",
            "ignored": false,
            "role": { "type": "role", "value": "button" },
            "name": { "type": "computedString", "value": "Search" },
            "childIds": ["8", "9"],
            "backendDOMNodeId": 42
        }))
        .unwrap();
        assert_eq!(raw.role.as_deref(), Some("button"));
        assert_eq!(raw.name.as_deref(), Some("Search"));
        assert_eq!(raw.backend_dom_node_id, Some(42));
        assert_eq!(raw.child_ids.len(), 2);
    }
}

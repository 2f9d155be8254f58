use std::collections::HashMap;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
    pub(crate) value: String,
    /// Option selectedness.
    pub(crate) selected: bool,
    /// Set on a select after its selected index was assigned out of range.
    pub(crate) deselected: bool,
}

impl Element {
    fn new(tag_name: String, attrs: HashMap<String, String>) -> Self {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let selected = attrs.contains_key("selected");
        Self {
            tag_name,
            attrs,
            value,
            selected,
            deselected: false,
        }
    }

    fn is(&self, tag: &str) -> bool {
        self.tag_name.eq_ignore_ascii_case(tag)
    }
}

/// Arena-backed document tree. Node ids are never reused, so a removed node
/// keeps its id and its state while detached.
#[derive(Debug, Clone)]
pub(crate) struct Dom {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
}

impl Dom {
    pub(crate) fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub(crate) fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        self.create_node(Some(parent), NodeType::Element(Element::new(tag_name, attrs)))
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes.get(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    fn has_tag(&self, node_id: NodeId, tag: &str) -> bool {
        self.element(node_id).map(|e| e.is(tag)).unwrap_or(false)
    }

    pub(crate) fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(node_id.0).and_then(|node| node.parent)
    }

    pub(crate) fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|element| element.attrs.get(name).cloned())
    }

    pub(crate) fn is_connected(&self, node_id: NodeId) -> bool {
        let mut cursor = Some(node_id);
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub(crate) fn text_content(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node_id.0].children {
            if self.element(*child).is_some() {
                out.push(*child);
            }
            self.collect_elements_dfs(*child, out);
        }
    }

    pub(crate) fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements_dfs(self.root, &mut out);
        out
    }

    /// Connected elements named `tag`, in document order.
    pub(crate) fn elements_by_tag_name(&self, tag: &str) -> Vec<NodeId> {
        self.all_element_nodes()
            .into_iter()
            .filter(|node| self.has_tag(*node, tag))
            .collect()
    }

    pub(crate) fn value(&self, node_id: NodeId) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Observation("value target is not an element".into()))?;
        if element.is("select") {
            return self.select_value(node_id);
        }
        Ok(element.value.clone())
    }

    pub(crate) fn set_value(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self.has_tag(node_id, "select") {
            return self.set_select_value(node_id, value);
        }
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Harness("value target is not an element".into()))?;
        element.value = value.to_string();
        Ok(())
    }

    pub(crate) fn collect_select_options(&self, node: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node.0].children {
            if self.has_tag(*child, "option") {
                out.push(*child);
            }
            self.collect_select_options(*child, out);
        }
    }

    fn select_options(&self, select_node: NodeId) -> Result<Vec<NodeId>> {
        if !self.has_tag(select_node, "select") {
            return Err(Error::Observation("selection target is not a select".into()));
        }
        let mut options = Vec::new();
        self.collect_select_options(select_node, &mut options);
        Ok(options)
    }

    pub(crate) fn selected_index(&self, select_node: NodeId) -> Result<i64> {
        let options = self.select_options(select_node)?;
        let Some(select) = self.element(select_node) else {
            return Ok(-1);
        };
        let is_selected =
            |option: &NodeId| self.element(*option).map(|e| e.selected).unwrap_or(false);
        // A single-select keeps the last option marked selected.
        let selected = if select.attrs.contains_key("multiple") {
            options.iter().position(is_selected)
        } else {
            options.iter().rposition(is_selected)
        };
        if let Some(index) = selected {
            return Ok(index as i64);
        }

        if options.is_empty() || select.deselected || select.attrs.contains_key("multiple") {
            return Ok(-1);
        }
        Ok(0)
    }

    pub(crate) fn set_selected_index(&mut self, select_node: NodeId, index: i64) -> Result<()> {
        let options = self.select_options(select_node)?;
        let in_range = index >= 0 && (index as usize) < options.len();
        for (position, option) in options.iter().enumerate() {
            if let Some(element) = self.element_mut(*option) {
                element.selected = in_range && position as i64 == index;
            }
        }
        if let Some(select) = self.element_mut(select_node) {
            select.deselected = !in_range;
        }
        Ok(())
    }

    fn option_effective_value(&self, option_node: NodeId) -> Result<String> {
        let element = self
            .element(option_node)
            .ok_or_else(|| Error::Observation("option target is not an element".into()))?;
        if let Some(value) = element.attrs.get("value") {
            return Ok(value.clone());
        }
        Ok(self.text_content(option_node))
    }

    fn select_value(&self, select_node: NodeId) -> Result<String> {
        let index = self.selected_index(select_node)?;
        if index < 0 {
            return Ok(String::new());
        }
        let options = self.select_options(select_node)?;
        match options.get(index as usize) {
            Some(option) => self.option_effective_value(*option),
            None => Ok(String::new()),
        }
    }

    fn set_select_value(&mut self, select_node: NodeId, requested: &str) -> Result<()> {
        let options = self.select_options(select_node)?;
        let mut matched = -1;
        for (position, option) in options.iter().enumerate() {
            if self.option_effective_value(*option)? == requested {
                matched = position as i64;
                break;
            }
        }
        self.set_selected_index(select_node, matched)
    }

    /// Textarea values come from their markup text.
    pub(crate) fn initialize_form_control_values(&mut self) -> Result<()> {
        for node in self.all_element_nodes() {
            if self.has_tag(node, "textarea") {
                let text = self.text_content(node);
                let element = self.element_mut(node).ok_or_else(|| {
                    Error::Harness("textarea target is not an element".into())
                })?;
                element.value = text;
            }
        }
        Ok(())
    }

    pub(crate) fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::Harness("cannot remove document root".into()));
        }
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.nodes[parent.0].children.retain(|id| *id != node);
        self.nodes[node.0].parent = None;
        Ok(())
    }

    /// Copies every top-level node of `fragment` under `parent`, in order.
    pub(crate) fn append_fragment(&mut self, parent: NodeId, fragment: &Dom) -> Result<Vec<NodeId>> {
        if self.element(parent).is_none() && parent != self.root {
            return Err(Error::Harness("append target cannot have children".into()));
        }
        let mut appended = Vec::new();
        for child in fragment.nodes[fragment.root.0].children.clone() {
            appended.push(self.clone_subtree_from_dom(fragment, child, Some(parent))?);
        }
        Ok(appended)
    }

    fn clone_subtree_from_dom(
        &mut self,
        source: &Dom,
        source_node: NodeId,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let node_type = match &source.nodes[source_node.0].node_type {
            NodeType::Document => {
                return Err(Error::Harness("cannot clone a document node".into()));
            }
            NodeType::Element(element) => NodeType::Element(element.clone()),
            NodeType::Text(text) => NodeType::Text(text.clone()),
        };

        let node = self.create_node(parent, node_type);
        for child in &source.nodes[source_node.0].children {
            self.clone_subtree_from_dom(source, *child, Some(node))?;
        }
        Ok(node)
    }

    pub(crate) fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let step = parse_selector_step(selector)?;
        Ok(self
            .all_element_nodes()
            .into_iter()
            .find(|node| self.matches_step(*node, &step)))
    }

    fn matches_step(&self, node_id: NodeId, step: &SelectorStep) -> bool {
        let Some(element) = self.element(node_id) else {
            return false;
        };
        if let Some(tag) = &step.tag {
            if !element.is(tag) {
                return false;
            }
        }
        if let Some(id) = &step.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }
        if let Some(n) = step.nth_of_type {
            if self.position_of_type(node_id) != Some(n) {
                return false;
            }
        }
        step.attrs
            .iter()
            .all(|(name, value)| element.attrs.get(name) == Some(value))
    }

    /// 1-based position among siblings sharing the element's tag name.
    fn position_of_type(&self, node_id: NodeId) -> Option<usize> {
        let tag = self.tag_name(node_id)?;
        let parent = self.parent(node_id)?;
        self.nodes[parent.0]
            .children
            .iter()
            .filter(|child| self.has_tag(**child, tag))
            .position(|child| *child == node_id)
            .map(|index| index + 1)
    }

    pub(crate) fn dump_node(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
            NodeType::Element(element) => {
                let mut attrs = element.attrs.iter().collect::<Vec<_>>();
                attrs.sort();
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                for (k, v) in attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(v);
                    out.push('"');
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SelectorStep {
    tag: Option<String>,
    id: Option<String>,
    attrs: Vec<(String, String)>,
    nth_of_type: Option<usize>,
}

/// Compound selectors only: `tag`, `#id`, `[name=value]`, `:nth-of-type(n)`
/// and combinations.
fn parse_selector_step(selector: &str) -> Result<SelectorStep> {
    let part = selector.trim();
    let unsupported = || Error::UnsupportedSelector(selector.to_string());
    if part.is_empty() {
        return Err(unsupported());
    }

    let bytes = part.as_bytes();
    let mut i = 0usize;
    let mut step = SelectorStep::default();

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                let (id, next) = parse_selector_ident(part, i + 1).ok_or_else(unsupported)?;
                if step.id.replace(id).is_some() {
                    return Err(unsupported());
                }
                i = next;
            }
            b'[' => {
                let close = part[i..].find(']').map(|pos| i + pos).ok_or_else(unsupported)?;
                let body = &part[i + 1..close];
                let (name, value) = body.split_once('=').ok_or_else(unsupported)?;
                let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
                step.attrs
                    .push((name.trim().to_ascii_lowercase(), value.to_string()));
                i = close + 1;
            }
            b':' => {
                let rest = part[i..]
                    .strip_prefix(":nth-of-type(")
                    .ok_or_else(unsupported)?;
                let close = rest.find(')').ok_or_else(unsupported)?;
                let n = rest[..close]
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(unsupported)?;
                if step.nth_of_type.replace(n).is_some() {
                    return Err(unsupported());
                }
                i += ":nth-of-type(".len() + close + 1;
            }
            _ => {
                if step.tag.is_some()
                    || step.id.is_some()
                    || !step.attrs.is_empty()
                    || step.nth_of_type.is_some()
                {
                    return Err(unsupported());
                }
                let (tag, next) = parse_selector_ident(part, i).ok_or_else(unsupported)?;
                step.tag = Some(tag);
                i = next;
            }
        }
    }

    Ok(step)
}

fn parse_selector_ident(src: &str, start: usize) -> Option<(String, usize)> {
    let bytes = src.as_bytes();
    let mut end = start;
    while end < bytes.len() && is_selector_ident_char(bytes[end]) {
        end += 1;
    }
    if end == start {
        return None;
    }
    Some((src[start..end].to_string(), end))
}

fn is_selector_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}

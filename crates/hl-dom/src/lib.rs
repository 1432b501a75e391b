//! Arena-backed document tree with text mutation and geometry queries.
//!
//! Nodes are addressed by `NodeId` handles into the arena. A handle is only
//! meaningful against the document revision it was taken from: every mutation
//! bumps `revision()` and may split, merge or detach the nodes behind
//! previously returned handles, so callers must finish reading before they
//! start writing and must never retain handles across a mutation.

use hl_core::HlError;
use hl_core::HlResult;

/// ID used to address nodes in the document arena.
pub type NodeId = usize;

const CHAR_WIDTH: f32 = 8.0;
const LINE_HEIGHT: f32 = 16.0;

const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "br",
    "div",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "td",
    "tr",
    "ul",
];

/// Node payload: an element with attributes, or a run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Boundary range over `(node, char offset)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomRange {
    pub start_node: NodeId,
    pub start_offset: usize,
    pub end_node: NodeId,
    pub end_offset: usize,
}

impl DomRange {
    /// Range covering `len` chars of a single text node from `start`.
    pub fn in_text_node(node: NodeId, start: usize, len: usize) -> Self {
        Self {
            start_node: node,
            start_offset: start,
            end_node: node,
            end_offset: start.saturating_add(len),
        }
    }
}

/// Axis-aligned rectangle produced by geometry queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn center_distance(&self, other: &Rect) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        let dx = ax - bx;
        let dy = ay - by;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Live document tree addressed through `NodeId` handles.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    revision: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root_node = Node {
            kind: NodeKind::Element {
                tag: "html".to_owned(),
                attrs: Vec::new(),
            },
            parent: None,
            children: Vec::new(),
        };

        Self {
            nodes: vec![root_node],
            root: 0,
            revision: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Mutation counter; handles taken at an older revision are stale.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_owned()))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> HlResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| HlError::new("dom.node_missing", format!("no node with id {id}")))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(id).map(|node| &node.kind),
            Some(NodeKind::Text(_))
        )
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(id).map(|node| &node.kind),
            Some(NodeKind::Element { .. })
        )
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id).map(|node| &node.kind) {
            Some(NodeKind::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id).map(|node| &node.kind) {
            Some(NodeKind::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) -> HlResult<()> {
        match self.nodes.get_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Text(slot)) => {
                *slot = text.to_owned();
                self.revision += 1;
                Ok(())
            }
            _ => Err(HlError::new(
                "dom.not_text",
                format!("node {id} is not a text node"),
            )),
        }
    }

    /// Char length of a text node; 0 for elements and unknown ids.
    pub fn text_char_len(&self, id: NodeId) -> usize {
        self.text(id).map(char_count).unwrap_or(0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn parent_tag(&self, id: NodeId) -> Option<&str> {
        self.parent(id).and_then(|parent| self.tag(parent))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(id).map(|node| &node.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> HlResult<()> {
        match self.nodes.get_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Element { attrs, .. }) => {
                let name = name.to_ascii_lowercase();
                if let Some(slot) = attrs.iter_mut().find(|(key, _)| *key == name) {
                    slot.1 = value.to_owned();
                } else {
                    attrs.push((name, value.to_owned()));
                }
                self.revision += 1;
                Ok(())
            }
            _ => Err(HlError::new(
                "dom.not_element",
                format!("node {id} is not an element"),
            )),
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .map(|value| value.split_ascii_whitespace().any(|part| part == class))
            .unwrap_or(false)
    }

    pub fn has_ancestor_with_class(&self, id: NodeId, class: &str) -> bool {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if self.has_class(node, class) {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// True if `ancestor` is a proper ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.parent(candidate);
        }
        false
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> HlResult<()> {
        self.attach_checks(parent, child)?;
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        self.revision += 1;
        Ok(())
    }

    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, before: NodeId) -> HlResult<()> {
        self.attach_checks(parent, child)?;
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|candidate| *candidate == before)
            .ok_or_else(|| {
                HlError::new(
                    "dom.reference_not_child",
                    format!("node {before} is not a child of {parent}"),
                )
            })?;
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.insert(position, child);
        self.revision += 1;
        Ok(())
    }

    pub fn replace_child(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        old_child: NodeId,
    ) -> HlResult<()> {
        self.attach_checks(parent, new_child)?;
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|candidate| *candidate == old_child)
            .ok_or_else(|| {
                HlError::new(
                    "dom.reference_not_child",
                    format!("node {old_child} is not a child of {parent}"),
                )
            })?;
        self.nodes[old_child].parent = None;
        self.nodes[new_child].parent = Some(parent);
        self.nodes[parent].children[position] = new_child;
        self.revision += 1;
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> HlResult<()> {
        self.node(parent)?;
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|candidate| *candidate == child)
            .ok_or_else(|| {
                HlError::new(
                    "dom.reference_not_child",
                    format!("node {child} is not a child of {parent}"),
                )
            })?;
        self.nodes[parent].children.remove(position);
        self.nodes[child].parent = None;
        self.revision += 1;
        Ok(())
    }

    fn attach_checks(&self, parent: NodeId, child: NodeId) -> HlResult<()> {
        self.node(parent)?;
        self.node(child)?;
        if self.nodes[child].parent.is_some() {
            return Err(HlError::new(
                "dom.node_already_attached",
                format!("node {child} already has a parent"),
            ));
        }
        if child == parent || self.is_ancestor(child, parent) {
            return Err(HlError::new(
                "dom.attach_would_cycle",
                format!("attaching {child} under {parent} would create a cycle"),
            ));
        }
        if self.is_text(parent) {
            return Err(HlError::new(
                "dom.not_element",
                format!("node {parent} is not an element"),
            ));
        }
        Ok(())
    }

    /// Depth-first pre-order walk of the attached tree.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.nodes[id].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// All attached text nodes in document order.
    pub fn text_nodes(&self) -> Vec<NodeId> {
        self.walk()
            .into_iter()
            .filter(|id| self.is_text(*id))
            .collect()
    }

    /// Attached elements bearing the given class, in document order.
    pub fn elements_with_class(&self, class: &str) -> Vec<NodeId> {
        self.walk()
            .into_iter()
            .filter(|id| self.has_class(*id, class))
            .collect()
    }

    /// Concatenated text of the subtree rooted at `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.nodes.get(current).map(|node| &node.kind) {
                Some(NodeKind::Text(text)) => out.push_str(text),
                Some(NodeKind::Element { .. }) => {
                    for child in self.nodes[current].children.iter().rev() {
                        stack.push(*child);
                    }
                }
                None => {}
            }
        }
        out
    }

    /// Cumulative char offset of `node`'s text start within `container`'s
    /// concatenated text, or `None` when `node` is not in that subtree.
    pub fn offset_within(&self, container: NodeId, node: NodeId) -> Option<usize> {
        let mut acc = 0_usize;
        let mut stack = vec![container];
        while let Some(current) = stack.pop() {
            if current == node {
                return Some(acc);
            }
            match self.nodes.get(current).map(|entry| &entry.kind) {
                Some(NodeKind::Text(text)) => acc += char_count(text),
                Some(NodeKind::Element { .. }) => {
                    for child in self.nodes[current].children.iter().rev() {
                        stack.push(*child);
                    }
                }
                None => return None,
            }
        }
        None
    }

    /// Splits a text node at a char offset; returns the id of the new
    /// following node. The node must be attached.
    pub fn split_text(&mut self, id: NodeId, offset: usize) -> HlResult<NodeId> {
        let text = self
            .text(id)
            .ok_or_else(|| HlError::new("dom.not_text", format!("node {id} is not a text node")))?
            .to_owned();
        let total = char_count(&text);
        if offset > total {
            return Err(HlError::new(
                "dom.offset_out_of_bounds",
                format!("split offset {offset} exceeds text length {total}"),
            ));
        }
        let parent = self.nodes[id].parent.ok_or_else(|| {
            HlError::new("dom.node_detached", format!("node {id} has no parent"))
        })?;

        let head = char_slice(&text, 0, offset).unwrap_or_default().to_owned();
        let tail = char_slice(&text, offset, total - offset)
            .unwrap_or_default()
            .to_owned();

        let tail_id = self.push_node(NodeKind::Text(tail));
        if let NodeKind::Text(slot) = &mut self.nodes[id].kind {
            *slot = head;
        }

        let position = self.nodes[parent]
            .children
            .iter()
            .position(|candidate| *candidate == id)
            .ok_or_else(|| {
                HlError::new(
                    "dom.reference_not_child",
                    format!("node {id} is not a child of {parent}"),
                )
            })?;
        self.nodes[tail_id].parent = Some(parent);
        self.nodes[parent].children.insert(position + 1, tail_id);
        self.revision += 1;
        Ok(tail_id)
    }

    /// Wraps the exact span of a boundary range in a detached, childless
    /// element. Rejects ranges whose endpoints live in different nodes; on
    /// any rejection the tree is left untouched.
    pub fn surround_range(&mut self, range: &DomRange, element: NodeId) -> HlResult<()> {
        if range.start_node != range.end_node {
            return Err(HlError::new(
                "dom.range_crosses_nodes",
                "range endpoints live in different nodes",
            ));
        }
        if range.start_offset > range.end_offset {
            return Err(HlError::new(
                "dom.range_inverted",
                format!(
                    "range start {} is past range end {}",
                    range.start_offset, range.end_offset
                ),
            ));
        }

        let text = self
            .text(range.start_node)
            .ok_or_else(|| {
                HlError::new(
                    "dom.not_text",
                    format!("node {} is not a text node", range.start_node),
                )
            })?
            .to_owned();
        let total = char_count(&text);
        if range.end_offset > total {
            return Err(HlError::new(
                "dom.offset_out_of_bounds",
                format!(
                    "range end {} exceeds text length {total}",
                    range.end_offset
                ),
            ));
        }

        if !self.is_element(element) {
            return Err(HlError::new(
                "dom.not_element",
                format!("node {element} is not an element"),
            ));
        }
        if self.nodes[element].parent.is_some() || !self.nodes[element].children.is_empty() {
            return Err(HlError::new(
                "dom.wrapper_not_detached",
                "wrapper element must be detached and childless",
            ));
        }

        let parent = self.nodes[range.start_node].parent.ok_or_else(|| {
            HlError::new(
                "dom.node_detached",
                format!("node {} has no parent", range.start_node),
            )
        })?;
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|candidate| *candidate == range.start_node)
            .ok_or_else(|| {
                HlError::new(
                    "dom.reference_not_child",
                    format!("node {} is not a child of {parent}", range.start_node),
                )
            })?;

        let before = char_slice(&text, 0, range.start_offset)
            .unwrap_or_default()
            .to_owned();
        let mid = char_slice(
            &text,
            range.start_offset,
            range.end_offset - range.start_offset,
        )
        .unwrap_or_default()
        .to_owned();
        let after = char_slice(&text, range.end_offset, total - range.end_offset)
            .unwrap_or_default()
            .to_owned();

        let mid_id = self.push_node(NodeKind::Text(mid));
        self.nodes[mid_id].parent = Some(element);
        self.nodes[element].children.push(mid_id);

        let mut replacement: Vec<NodeId> = Vec::with_capacity(3);
        if !before.is_empty() {
            let before_id = self.push_node(NodeKind::Text(before));
            replacement.push(before_id);
        }
        replacement.push(element);
        if !after.is_empty() {
            let after_id = self.push_node(NodeKind::Text(after));
            replacement.push(after_id);
        }

        self.nodes[range.start_node].parent = None;
        for id in &replacement {
            self.nodes[*id].parent = Some(parent);
        }
        self.nodes[parent]
            .children
            .splice(position..position + 1, replacement);
        self.revision += 1;
        Ok(())
    }

    /// Merges adjacent text children and drops empty text nodes across the
    /// subtree rooted at `id`, undoing fragmentation introduced by wrapping.
    pub fn normalize(&mut self, id: NodeId) -> HlResult<()> {
        self.node(id)?;
        let mut changed = false;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.is_text(current) {
                continue;
            }
            let child_ids = self.nodes[current].children.clone();
            let mut kept: Vec<NodeId> = Vec::with_capacity(child_ids.len());
            for child in child_ids {
                let empty_text =
                    matches!(&self.nodes[child].kind, NodeKind::Text(text) if text.is_empty());
                if empty_text {
                    self.nodes[child].parent = None;
                    changed = true;
                    continue;
                }

                let merge_into = match kept.last() {
                    Some(&prev)
                        if self.is_text(prev) && self.is_text(child) =>
                    {
                        Some(prev)
                    }
                    _ => None,
                };
                if let Some(prev) = merge_into {
                    let tail = self.text(child).unwrap_or_default().to_owned();
                    if let NodeKind::Text(head) = &mut self.nodes[prev].kind {
                        head.push_str(&tail);
                    }
                    self.nodes[child].parent = None;
                    changed = true;
                } else {
                    stack.push(child);
                    kept.push(child);
                }
            }
            self.nodes[current].children = kept;
        }
        if changed {
            self.revision += 1;
        }
        Ok(())
    }

    /// Bounding rectangle of `len` chars of a text node starting at a char
    /// offset, under a simple metric flow layout (fixed glyph and line
    /// sizes, one line per block element).
    pub fn span_rect(&self, node: NodeId, start: usize, len: usize) -> Option<Rect> {
        let (x, y) = self.text_origin(node)?;
        Some(Rect {
            x: x + start as f32 * CHAR_WIDTH,
            y,
            width: len.max(1) as f32 * CHAR_WIDTH,
            height: LINE_HEIGHT,
        })
    }

    /// Bounding rectangle of a node: its own span for text, the union of
    /// descendant text spans for elements.
    pub fn node_rect(&self, id: NodeId) -> Option<Rect> {
        if self.is_text(id) {
            return self.span_rect(id, 0, self.text_char_len(id));
        }

        let mut acc: Option<Rect> = None;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.is_text(current) {
                if let Some(rect) = self.span_rect(current, 0, self.text_char_len(current)) {
                    acc = Some(match acc {
                        None => rect,
                        Some(prev) => union_rect(prev, rect),
                    });
                }
                continue;
            }
            for child in self.nodes.get(current)?.children.iter().rev() {
                stack.push(*child);
            }
        }
        acc
    }

    /// Layout cursor position at the start of a text node.
    fn text_origin(&self, node: NodeId) -> Option<(f32, f32)> {
        let mut x = 0_f32;
        let mut y = 0_f32;
        let mut seen_block = false;
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            match self.nodes.get(current).map(|entry| &entry.kind) {
                Some(NodeKind::Text(text)) => {
                    if current == node {
                        return Some((x, y));
                    }
                    x += char_count(text) as f32 * CHAR_WIDTH;
                }
                Some(NodeKind::Element { tag, .. }) => {
                    if BLOCK_TAGS.contains(&tag.as_str()) {
                        if seen_block {
                            y += LINE_HEIGHT;
                        }
                        seen_block = true;
                        x = 0.0;
                    }
                    for child in self.nodes[current].children.iter().rev() {
                        stack.push(*child);
                    }
                }
                None => return None,
            }
        }
        None
    }
}

fn union_rect(a: Rect, b: Rect) -> Rect {
    let x = a.x.min(b.x);
    let y = a.y.min(b.y);
    let right = (a.x + a.width).max(b.x + b.width);
    let bottom = (a.y + a.height).max(b.y + b.height);
    Rect {
        x,
        y,
        width: right - x,
        height: bottom - y,
    }
}

/// Char count of a string (offsets in this crate are char offsets).
pub fn char_count(text: &str) -> usize {
    text.chars().count()
}

/// Slice by char offset and char length; `None` when out of bounds.
pub fn char_slice(text: &str, start: usize, len: usize) -> Option<&str> {
    let begin = byte_index(text, start)?;
    let end = byte_index(text, start.checked_add(len)?)?;
    text.get(begin..end)
}

fn byte_index(text: &str, char_index: usize) -> Option<usize> {
    let mut count = 0_usize;
    for (byte, _) in text.char_indices() {
        if count == char_index {
            return Some(byte);
        }
        count += 1;
    }
    if count == char_index {
        Some(text.len())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::DomRange;
    use super::Document;
    use super::char_slice;

    fn paragraph(doc: &mut Document, text: &str) -> (usize, usize) {
        let p = doc.create_element("p");
        let t = doc.create_text(text);
        let root = doc.root();
        assert!(doc.append_child(root, p).is_ok());
        assert!(doc.append_child(p, t).is_ok());
        (p, t)
    }

    #[test]
    fn walk_is_depth_first_pre_order() {
        let mut doc = Document::new();
        let (p1, t1) = paragraph(&mut doc, "first");
        let (p2, t2) = paragraph(&mut doc, "second");

        let order = doc.walk();
        assert_eq!(order, vec![doc.root(), p1, t1, p2, t2]);
        assert_eq!(doc.text_nodes(), vec![t1, t2]);
    }

    #[test]
    fn split_text_preserves_content() {
        let mut doc = Document::new();
        let (p, t) = paragraph(&mut doc, "hello world");

        let tail = doc.split_text(t, 5);
        assert!(tail.is_ok());
        let tail = tail.unwrap_or_else(|_| unreachable!());
        assert_eq!(doc.text(t), Some("hello"));
        assert_eq!(doc.text(tail), Some(" world"));
        assert_eq!(doc.children(p), &[t, tail]);
        assert_eq!(doc.text_content(p), "hello world");
    }

    #[test]
    fn split_text_rejects_out_of_bounds_offset() {
        let mut doc = Document::new();
        let (_, t) = paragraph(&mut doc, "short");

        let before = doc.revision();
        let split = doc.split_text(t, 99);
        assert!(split.is_err());
        assert_eq!(doc.revision(), before);
    }

    #[test]
    fn surround_range_wraps_exact_span() {
        let mut doc = Document::new();
        let (p, t) = paragraph(&mut doc, "the cat sat");
        let wrapper = doc.create_element("span");

        let range = DomRange::in_text_node(t, 4, 3);
        assert!(doc.surround_range(&range, wrapper).is_ok());

        assert_eq!(doc.text_content(p), "the cat sat");
        assert_eq!(doc.text_content(wrapper), "cat");
        assert_eq!(doc.children(p).len(), 3);
        assert_eq!(doc.parent(wrapper), Some(p));
    }

    #[test]
    fn surround_range_rejects_cross_node_range() {
        let mut doc = Document::new();
        let (_, t1) = paragraph(&mut doc, "one");
        let (_, t2) = paragraph(&mut doc, "two");
        let wrapper = doc.create_element("span");

        let range = DomRange {
            start_node: t1,
            start_offset: 0,
            end_node: t2,
            end_offset: 1,
        };
        let before = doc.revision();
        let wrapped = doc.surround_range(&range, wrapper);
        assert!(wrapped.is_err());
        if let Err(error) = wrapped {
            assert_eq!(error.code, "dom.range_crosses_nodes");
        }
        assert_eq!(doc.revision(), before);
    }

    #[test]
    fn normalize_merges_adjacent_text_nodes() {
        let mut doc = Document::new();
        let (p, t) = paragraph(&mut doc, "hello ");
        let extra = doc.create_text("world");
        let empty = doc.create_text("");
        assert!(doc.append_child(p, extra).is_ok());
        assert!(doc.append_child(p, empty).is_ok());

        assert!(doc.normalize(p).is_ok());
        assert_eq!(doc.children(p), &[t]);
        assert_eq!(doc.text(t), Some("hello world"));
    }

    #[test]
    fn normalize_twice_is_idempotent() {
        let mut doc = Document::new();
        let (p, _) = paragraph(&mut doc, "a");
        let extra = doc.create_text("b");
        assert!(doc.append_child(p, extra).is_ok());

        assert!(doc.normalize(doc.root()).is_ok());
        let first = doc.text_content(doc.root());
        let revision = doc.revision();
        assert!(doc.normalize(doc.root()).is_ok());
        assert_eq!(doc.text_content(doc.root()), first);
        assert_eq!(doc.revision(), revision);
    }

    #[test]
    fn offset_within_accumulates_preceding_text() {
        let mut doc = Document::new();
        let p = doc.create_element("p");
        let t1 = doc.create_text("one ");
        let em = doc.create_element("em");
        let t2 = doc.create_text("two");
        let root = doc.root();
        assert!(doc.append_child(root, p).is_ok());
        assert!(doc.append_child(p, t1).is_ok());
        assert!(doc.append_child(p, em).is_ok());
        assert!(doc.append_child(em, t2).is_ok());

        assert_eq!(doc.offset_within(p, t1), Some(0));
        assert_eq!(doc.offset_within(p, t2), Some(4));
        assert_eq!(doc.offset_within(em, t1), None);
    }

    #[test]
    fn block_elements_stack_vertically_in_layout() {
        let mut doc = Document::new();
        let (_, t1) = paragraph(&mut doc, "first line");
        let (_, t2) = paragraph(&mut doc, "second line");

        let r1 = doc.span_rect(t1, 0, 5);
        let r2 = doc.span_rect(t2, 0, 5);
        assert!(r1.is_some() && r2.is_some());
        let (r1, r2) = (
            r1.unwrap_or_else(|| unreachable!()),
            r2.unwrap_or_else(|| unreachable!()),
        );
        assert_eq!(r1.x, r2.x);
        assert!(r2.y > r1.y);
    }

    #[test]
    fn char_slice_handles_multibyte_text() {
        assert_eq!(char_slice("héllo", 1, 3), Some("éll"));
        assert_eq!(char_slice("héllo", 4, 1), Some("o"));
        assert_eq!(char_slice("héllo", 4, 2), None);
    }
}

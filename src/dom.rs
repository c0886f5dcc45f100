use thiserror::Error;

pub const MARKER_CLASS: &str = "web-highlighter-mark";
pub const MARKER_TAG: &str = "span";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DomError {
    #[error("node {0} is not a text node")]
    NotText(NodeId),
    #[error("offset {offset} is outside node {node} of length {len}")]
    OffsetOutOfRange { node: NodeId, offset: usize, len: usize },
    #[error("node {0} has no parent")]
    Detached(NodeId),
}

/// Display state of one highlight wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    pub color: String,
    /// Forced foreground; `None` means inherited from the page.
    pub text_color: Option<String>,
    pub shadow: bool,
    pub saved_color: Option<String>,
    pub saved_text_color: Option<String>,
}

impl Marker {
    pub fn new(id: &str, color: &str) -> Self {
        Marker {
            id: id.to_string(),
            color: color.to_string(),
            text_color: Some(crate::highlight::palette::FORCED_TEXT_COLOR.to_string()),
            shadow: true,
            saved_color: None,
            saved_text_color: None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.color != crate::highlight::palette::TRANSPARENT
    }

    /// Inline style written on the wrapper element.
    pub fn style(&self) -> String {
        let mut style = format!("background-color: {};", self.color);
        if let Some(text_color) = &self.text_color {
            style.push_str(&format!(" color: {};", text_color));
        }
        style.push_str(" text-shadow: none; border-radius: 2px; padding: 0 1px;");
        if self.shadow {
            style.push_str(" box-shadow: 0 1px 1px rgba(0,0,0,0.1);");
        } else {
            style.push_str(" box-shadow: none;");
        }
        style
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub marker: Option<Marker>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Value of a single declaration in the inline `style` attribute.
    pub fn style_property(&self, property: &str) -> Option<&str> {
        self.attr("style")?.split(';').find_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            if name.trim().eq_ignore_ascii_case(property) {
                Some(value.trim())
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// Arena of element and text nodes. Nodes are never freed: a detached node
/// only loses its parent, so earlier ids stay valid for lookups. Text offsets
/// count chars, never bytes.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    title: Option<String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Document {
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
            title: None,
        };
        let root = doc.create_element("#document", Vec::new());
        doc.root = root;
        doc.body = root;
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Subtree that holds the visible text. Falls back to the root when the
    /// page has no `body` element.
    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn set_body(&mut self, body: NodeId) {
        self.body = body;
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    /// Looks up a node by the index exposed through [`NodeId::index`].
    pub fn node_at(&self, index: usize) -> Option<NodeId> {
        (index < self.nodes.len()).then_some(NodeId(index))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            kind,
        });
        id
    }

    pub fn create_element(&mut self, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.push(NodeKind::Element(Element {
            tag: tag.to_ascii_lowercase(),
            attrs,
            marker: None,
        }))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn create_marker(&mut self, marker: Marker) -> NodeId {
        self.push(NodeKind::Element(Element {
            tag: MARKER_TAG.to_string(),
            attrs: vec![("class".to_string(), MARKER_CLASS.to_string())],
            marker: Some(marker),
        }))
    }

    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.0].kind
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => Some(text),
            NodeKind::Element(_) => None,
        }
    }

    pub fn is_text(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0].kind, NodeKind::Text(_))
    }

    pub fn marker(&self, node: NodeId) -> Option<&Marker> {
        self.element(node).and_then(|el| el.marker.as_ref())
    }

    pub fn marker_mut(&mut self, node: NodeId) -> Option<&mut Marker> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Element(el) => el.marker.as_mut(),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_marker(&self, node: NodeId) -> bool {
        self.marker(node).is_some()
    }

    /// Length in characters; zero for elements.
    pub fn text_len(&self, node: NodeId) -> usize {
        self.text(node).map_or(0, |t| t.chars().count())
    }

    /// Length of a boundary container: characters for text, children for elements.
    pub fn node_len(&self, node: NodeId) -> usize {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => text.chars().count(),
            NodeKind::Element(_) => self.nodes[node.0].children.len(),
        }
    }

    pub fn child_index(&self, node: NodeId) -> Option<usize> {
        let parent = self.parent(node)?;
        self.children(parent).iter().position(|&c| c == node)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) -> Result<(), DomError> {
        let parent = self.parent(reference).ok_or(DomError::Detached(reference))?;
        self.detach(node);
        let index = self
            .child_index(reference)
            .ok_or(DomError::Detached(reference))?;
        self.nodes[node.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(index, node);
        Ok(())
    }

    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> Result<(), DomError> {
        let parent = self.parent(reference).ok_or(DomError::Detached(reference))?;
        self.detach(node);
        let index = self
            .child_index(reference)
            .ok_or(DomError::Detached(reference))?;
        self.nodes[node.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(index + 1, node);
        Ok(())
    }

    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != node);
        }
    }

    /// Appends to the content of a text node.
    pub fn append_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Text(existing) => {
                existing.push_str(text);
                Ok(())
            }
            NodeKind::Element(_) => Err(DomError::NotText(node)),
        }
    }

    /// Splits a text node at `offset`. The original node keeps `[0, offset)`,
    /// the returned sibling holds the rest and is inserted right after it.
    pub fn split_text(&mut self, node: NodeId, offset: usize) -> Result<NodeId, DomError> {
        let text = self.text(node).ok_or(DomError::NotText(node))?;
        let len = text.chars().count();
        if offset > len {
            return Err(DomError::OffsetOutOfRange { node, offset, len });
        }
        let at = byte_index(text, offset);
        let tail = text[at..].to_string();
        let head = text[..at].to_string();

        if self.parent(node).is_none() {
            return Err(DomError::Detached(node));
        }
        let sibling = self.create_text(tail);
        self.insert_after(node, sibling)?;
        self.nodes[node.0].kind = NodeKind::Text(head);
        Ok(sibling)
    }

    /// Moves `node` into a fresh marker wrapper placed where `node` was.
    pub fn wrap(&mut self, node: NodeId, marker: Marker) -> Result<NodeId, DomError> {
        if self.parent(node).is_none() {
            return Err(DomError::Detached(node));
        }
        let wrapper = self.create_marker(marker);
        self.insert_before(node, wrapper)?;
        self.append_child(wrapper, node);
        Ok(wrapper)
    }

    /// Wraps the characters `[from, to)` of a text node, splitting it so the
    /// wrapper holds exactly that slice. Returns the wrapper.
    pub fn wrap_text_slice(
        &mut self,
        node: NodeId,
        from: usize,
        to: usize,
        marker: Marker,
    ) -> Result<NodeId, DomError> {
        let len = self.text(node).ok_or(DomError::NotText(node))?.chars().count();
        if from > to || to > len {
            let offset = if to > len { to } else { from };
            return Err(DomError::OffsetOutOfRange { node, offset, len });
        }
        if self.parent(node).is_none() {
            return Err(DomError::Detached(node));
        }
        if to < len {
            self.split_text(node, to)?;
        }
        let target = if from > 0 {
            self.split_text(node, from)?
        } else {
            node
        };
        self.wrap(target, marker)
    }

    /// Replaces an element by its children, leaving no empty wrapper behind.
    pub fn unwrap(&mut self, wrapper: NodeId) -> Result<(), DomError> {
        if self.parent(wrapper).is_none() {
            return Err(DomError::Detached(wrapper));
        }
        let children = self.nodes[wrapper.0].children.clone();
        for child in children {
            self.insert_before(wrapper, child)?;
        }
        self.detach(wrapper);
        Ok(())
    }

    /// Replaces a node by a single text node carrying its text content.
    pub fn replace_with_text(&mut self, node: NodeId) -> Result<NodeId, DomError> {
        if self.parent(node).is_none() {
            return Err(DomError::Detached(node));
        }
        let text = self.text_content(node);
        let replacement = self.create_text(text);
        self.insert_before(node, replacement)?;
        self.detach(node);
        Ok(replacement)
    }

    /// Merges adjacent text nodes and drops empty ones across the subtree.
    pub fn normalize(&mut self, node: NodeId) {
        let children = self.nodes[node.0].children.clone();
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            let Some(text) = self.text(child).map(str::to_string) else {
                self.normalize(child);
                kept.push(child);
                continue;
            };
            if text.is_empty() {
                self.nodes[child.0].parent = None;
                continue;
            }
            match kept.last() {
                Some(&prev) if self.is_text(prev) => {
                    if let NodeKind::Text(prev_text) = &mut self.nodes[prev.0].kind {
                        prev_text.push_str(&text);
                    }
                    self.nodes[child.0].parent = None;
                }
                _ => kept.push(child),
            }
        }
        self.nodes[node.0].children = kept;
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        for text_node in self.text_nodes(node) {
            if let Some(text) = self.text(text_node) {
                out.push_str(text);
            }
        }
        out
    }

    /// Text nodes of the subtree rooted at `node`, in document order.
    pub fn text_nodes(&self, node: NodeId) -> Vec<NodeId> {
        self.descendants(node)
            .into_iter()
            .filter(|&n| self.is_text(n))
            .collect()
    }

    /// Inclusive pre-order traversal of the subtree.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// `node` followed by each of its ancestors up to the root.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |&n| self.parent(n))
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|n| n == ancestor)
    }

    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let chain: Vec<NodeId> = self.ancestors(a).collect();
        self.ancestors(b).find(|n| chain.contains(n))
    }

    /// Nearest inclusive ancestor that is a highlight wrapper.
    pub fn closest_marker(&self, node: NodeId) -> Option<NodeId> {
        self.ancestors(node).find(|&n| self.is_marker(n))
    }

    /// Whether whitespace-only text under `node` is significant. The nearest
    /// ancestor that declares `white-space` decides; `pre` and `textarea`
    /// elements preserve by default.
    pub fn preserves_whitespace(&self, node: NodeId) -> bool {
        for ancestor in self.ancestors(node) {
            let Some(el) = self.element(ancestor) else {
                continue;
            };
            if let Some(value) = el.style_property("white-space") {
                return value.to_ascii_lowercase().starts_with("pre")
                    || value.eq_ignore_ascii_case("break-spaces");
            }
            if matches!(el.tag.as_str(), "pre" | "textarea") {
                return true;
            }
        }
        false
    }
}

/// Byte position of the `chars`-th character, or the string length when
/// `chars` points one past the end.
pub fn byte_index(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use uuid::Uuid;

use crate::dom::{Document, Element, MARKER_CLASS, MARKER_TAG, Marker, NodeId, NodeKind};
use crate::error::MarkupError;
use crate::highlight::palette::TRANSPARENT;

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub fn parse(markup: &str) -> Result<Document, MarkupError> {
    let mut doc = Document::new();
    let mut reader = Reader::from_reader(markup.as_bytes());
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<(String, NodeId)> = vec![("#document".to_string(), doc.root())];
    let mut body: Option<NodeId> = None;
    let mut title: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        let current = stack.last().map_or(doc.root(), |(_, node)| *node);
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let node = element_from_start(&mut doc, &reader, &e)?;
                doc.append_child(current, node);
                let tag = tag_of(&doc, node);
                if tag == "body" && body.is_none() {
                    body = Some(node);
                }
                if !is_void(&tag) {
                    stack.push((tag, node));
                }
            }
            Ok(Event::Empty(e)) => {
                let node = element_from_start(&mut doc, &reader, &e)?;
                doc.append_child(current, node);
                if tag_of(&doc, node) == "body" && body.is_none() {
                    body = Some(node);
                }
            }
            Ok(Event::End(e)) => {
                let tag = decode(&reader, e.name().as_ref())?.to_ascii_lowercase();
                match stack.iter().rposition(|(open, _)| *open == tag) {
                    Some(0) | None if is_void(&tag) => {}
                    Some(0) | None => return Err(MarkupError::Unbalanced(tag)),
                    Some(depth) => stack.truncate(depth),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.decode().map_err(|err| malformed(&reader, err))?;
                push_text(&mut doc, current, &stack, &mut title, &text);
            }
            Ok(Event::CData(e)) => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| malformed(&reader, err))?;
                push_text(&mut doc, current, &stack, &mut title, &text);
            }
            Ok(Event::GeneralRef(e)) => {
                let name = e.decode().map_err(|err| malformed(&reader, err))?;
                let entity = format!("&{};", name);
                let resolved = match quick_xml::escape::unescape(&entity) {
                    Ok(resolved) => resolved.into_owned(),
                    Err(_) => entity,
                };
                push_text(&mut doc, current, &stack, &mut title, &resolved);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(malformed(&reader, err)),
        }
        buf.clear();
    }

    if let Some(body) = body {
        doc.set_body(body);
    }
    if let Some(title) = title {
        doc.set_title(title.trim());
    }
    Ok(doc)
}

fn malformed<E: std::fmt::Display>(reader: &Reader<&[u8]>, err: E) -> MarkupError {
    MarkupError::Malformed {
        position: reader.buffer_position(),
        message: err.to_string(),
    }
}

fn decode(reader: &Reader<&[u8]>, bytes: &[u8]) -> Result<String, MarkupError> {
    reader
        .decoder()
        .decode(bytes)
        .map(|s| s.into_owned())
        .map_err(|err| malformed(reader, err))
}

fn tag_of(doc: &Document, node: NodeId) -> String {
    doc.element(node).map(|el| el.tag.clone()).unwrap_or_default()
}

fn push_text(
    doc: &mut Document,
    parent: NodeId,
    stack: &[(String, NodeId)],
    title: &mut Option<String>,
    text: &str,
) {
    if text.is_empty() {
        return;
    }
    if stack.last().is_some_and(|(tag, _)| tag == "title") {
        title.get_or_insert_with(String::new).push_str(text);
    }
    // Entities arrive as separate events; keep one text node per run.
    if let Some(&last) = doc.children(parent).last() {
        if doc.append_text(last, text).is_ok() {
            return;
        }
    }
    let node = doc.create_text(text);
    doc.append_child(parent, node);
}

fn element_from_start(
    doc: &mut Document,
    reader: &Reader<&[u8]>,
    e: &BytesStart<'_>,
) -> Result<NodeId, MarkupError> {
    let tag = decode(reader, e.name().as_ref())?.to_ascii_lowercase();
    let mut attrs = Vec::new();
    for attr in e.attributes().flatten() {
        let key = decode(reader, attr.key.as_ref())?.to_ascii_lowercase();
        let raw = decode(reader, &attr.value)?;
        let value = match quick_xml::escape::unescape(&raw) {
            Ok(v) => v.into_owned(),
            Err(_) => raw,
        };
        attrs.push((key, value));
    }

    let el = Element {
        tag,
        attrs,
        marker: None,
    };
    let is_marker = el.tag == MARKER_TAG
        && el
            .attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == MARKER_CLASS));
    if !is_marker {
        return Ok(doc.create_element(&el.tag, el.attrs));
    }

    let id = match el.attr("data-highlight-id") {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("hl-{}", &Uuid::new_v4().simple().to_string()[..9]),
    };
    let marker = Marker {
        id,
        color: el
            .style_property("background-color")
            .unwrap_or(TRANSPARENT)
            .to_string(),
        text_color: el.style_property("color").map(str::to_string),
        shadow: el
            .style_property("box-shadow")
            .is_some_and(|v| !v.eq_ignore_ascii_case("none")),
        saved_color: el.attr("data-saved-color").map(str::to_string),
        saved_text_color: el.attr("data-saved-text-color").map(str::to_string),
    };
    Ok(doc.create_marker(marker))
}

/// Renders the whole document.
pub fn render(doc: &Document) -> String {
    let mut out = String::new();
    for &child in doc.children(doc.root()) {
        write_node(doc, child, &mut out);
    }
    out
}

fn write_node(doc: &Document, node: NodeId, out: &mut String) {
    let el = match doc.kind(node) {
        NodeKind::Text(text) => {
            out.push_str(&quick_xml::escape::partial_escape(text));
            return;
        }
        NodeKind::Element(el) => el,
    };

    out.push('<');
    out.push_str(&el.tag);
    match &el.marker {
        Some(marker) => {
            write_attr(out, "class", MARKER_CLASS);
            write_attr(out, "data-highlight-id", &marker.id);
            write_attr(out, "style", &marker.style());
            if let Some(saved) = &marker.saved_color {
                write_attr(out, "data-saved-color", saved);
            }
            if let Some(saved) = &marker.saved_text_color {
                write_attr(out, "data-saved-text-color", saved);
            }
        }
        None => {
            for (key, value) in &el.attrs {
                write_attr(out, key, value);
            }
        }
    }

    let children = doc.children(node);
    if children.is_empty() && is_void(&el.tag) {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for &child in children {
        write_node(doc, child, out);
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

fn write_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&quick_xml::escape::escape(value));
    out.push('"');
}

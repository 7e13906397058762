//! Deterministic HTML optimizer (§4.5): a DOM-tree transform that strips
//! non-SEO nodes and attributes while preserving structured data, meta
//! tags, and the minimal icon/manifest set. Fails open: any error in the
//! transform returns the original HTML unchanged.

use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use html5ever::driver::parse_document;
use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};

use crate::config::OptimizerOptions;

const VOID_OR_META_KEEP: &[&str] = &[
    "script", "style", "meta", "link", "img", "br", "hr", "input", "source", "track", "area",
    "col", "embed", "param", "wbr",
];

const DROP_LINK_RELS: &[&str] = &[
    "preload",
    "prefetch",
    "dns-prefetch",
    "modulepreload",
    "preconnect",
    "stylesheet",
    "mask-icon",
];

/// Pure function: `optimize(html, options) -> html`.
#[must_use]
pub fn optimize(html: &str, options: &OptimizerOptions) -> String {
    let owned = html.to_string();
    panic::catch_unwind(AssertUnwindSafe(|| transform(&owned, options)))
        .unwrap_or(owned)
}

fn transform(html: &str, options: &OptimizerOptions) -> String {
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .unwrap_or_else(|_| RcDom::default());

    let body = find_first(&dom.document, "body");

    strip_scripts(&dom.document);
    filter_links(&dom.document);
    if options.remove_inline_styles {
        remove_tag(&dom.document, "style");
    }
    dedup_link(&dom.document, "manifest", None);
    dedup_link(&dom.document, "icon", Some(false));
    dedup_apple_touch_icon(&dom.document);
    remove_meta_prefixed(&dom.document, "msapplication-");
    remove_meta_named(&dom.document, "next-head-count");
    strip_attr_everywhere(&dom.document, "data-testid");
    remove_comments(&dom.document);
    remove_tag(&dom.document, "noscript");
    remove_hidden(&dom.document);

    strip_attrs_with_prefix(&dom.document, "data-", options.remove_data_attributes, &["meta"]);
    strip_attrs_with_prefix(&dom.document, "aria-", options.remove_aria_attributes, &[]);
    strip_event_handler_attrs(&dom.document);
    if options.remove_style_attributes {
        strip_attr_everywhere(&dom.document, "style");
    }

    if let Some(body) = body {
        prune_empty_bottom_up(&body);
    }

    collapse_text_nodes(&dom.document);

    let mut buf = Vec::new();
    let serializable: SerializableHandle = dom.document.clone().into();
    let _ = serialize(&mut buf, &serializable, SerializeOpts::default());
    let rendered = String::from_utf8_lossy(&buf).into_owned();
    final_whitespace_pass(&rendered)
}

fn element_name(handle: &Handle) -> Option<String> {
    match &handle.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

fn attr_value(handle: &Handle, attr: &str) -> Option<String> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| a.name.local.as_ref() == attr)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

fn has_attr(handle: &Handle, attr: &str) -> bool {
    attr_value(handle, attr).is_some()
}

fn remove_attr(handle: &Handle, attr: &str) {
    if let NodeData::Element { attrs, .. } = &handle.data {
        attrs.borrow_mut().retain(|a| a.name.local.as_ref() != attr);
    }
}

fn children(handle: &Handle) -> Vec<Handle> {
    handle.children.borrow().clone()
}

fn detach(parent: &Handle, child: &Handle) {
    parent
        .children
        .borrow_mut()
        .retain(|c| !Rc::ptr_eq(c, child));
}

fn walk_remove(node: &Handle, predicate: &dyn Fn(&Handle) -> bool) {
    let kids = children(node);
    for child in &kids {
        if predicate(child) {
            detach(node, child);
        } else {
            walk_remove(child, predicate);
        }
    }
}

fn find_first(node: &Handle, tag: &str) -> Option<Handle> {
    if element_name(node).as_deref() == Some(tag) {
        return Some(node.clone());
    }
    for child in children(node) {
        if let Some(found) = find_first(&child, tag) {
            return Some(found);
        }
    }
    None
}

fn strip_scripts(root: &Handle) {
    walk_remove(root, &|n| {
        element_name(n).as_deref() == Some("script")
            && attr_value(n, "type").as_deref() != Some("application/ld+json")
    });
}

fn filter_links(root: &Handle) {
    walk_remove(root, &|n| {
        element_name(n).as_deref() == Some("link")
            && attr_value(n, "rel")
                .is_some_and(|rel| DROP_LINK_RELS.iter().any(|d| rel.eq_ignore_ascii_case(d)))
    });
}

fn remove_tag(root: &Handle, tag: &str) {
    walk_remove(root, &|n| element_name(n).as_deref() == Some(tag));
}

fn remove_comments(root: &Handle) {
    walk_remove(root, &|n| matches!(n.data, NodeData::Comment { .. }));
}

fn dedup_link(root: &Handle, rel: &str, exclude_apple_touch: Option<bool>) {
    let mut seen = false;
    let mut to_drop = Vec::new();
    collect_links(root, rel, exclude_apple_touch, &mut seen, &mut to_drop);
    for (parent, handle) in to_drop {
        detach(&parent, &handle);
    }
}

fn collect_links(
    node: &Handle,
    rel: &str,
    exclude_apple_touch: Option<bool>,
    seen: &mut bool,
    to_drop: &mut Vec<(Handle, Handle)>,
) {
    for child in children(node) {
        if element_name(&child).as_deref() == Some("link")
            && attr_value(&child, "rel").as_deref() == Some(rel)
        {
            let is_apple = attr_value(&child, "rel").as_deref() == Some("apple-touch-icon");
            let excluded = exclude_apple_touch == Some(false) && is_apple;
            if !excluded {
                if *seen {
                    to_drop.push((node.clone(), child.clone()));
                } else {
                    *seen = true;
                }
            }
        }
        collect_links(&child, rel, exclude_apple_touch, seen, to_drop);
    }
}

fn dedup_apple_touch_icon(root: &Handle) {
    let mut all = Vec::new();
    collect_apple_touch_icons(root, &mut all);
    if all.is_empty() {
        return;
    }
    let preferred = all
        .iter()
        .find(|(h, _)| attr_value(h, "sizes").is_some_and(|s| s.contains("180x180")))
        .or_else(|| all.first());
    let Some((keep_handle, _)) = preferred else {
        return;
    };
    let keep_handle = keep_handle.clone();
    for (handle, parent) in &all {
        if !Rc::ptr_eq(handle, &keep_handle) {
            detach(parent, handle);
        }
    }
}

fn collect_apple_touch_icons(node: &Handle, out: &mut Vec<(Handle, Handle)>) {
    for child in children(node) {
        if element_name(&child).as_deref() == Some("link")
            && attr_value(&child, "rel").as_deref() == Some("apple-touch-icon")
        {
            out.push((child.clone(), node.clone()));
        }
        collect_apple_touch_icons(&child, out);
    }
}

fn remove_meta_prefixed(root: &Handle, prefix: &str) {
    walk_remove(root, &|n| {
        element_name(n).as_deref() == Some("meta")
            && attr_value(n, "name").is_some_and(|name| name.starts_with(prefix))
    });
}

fn remove_meta_named(root: &Handle, name: &str) {
    walk_remove(root, &|n| {
        element_name(n).as_deref() == Some("meta") && attr_value(n, "name").as_deref() == Some(name)
    });
}

fn remove_hidden(root: &Handle) {
    walk_remove(root, &|n| {
        if has_attr(n, "hidden") {
            return true;
        }
        attr_value(n, "style").is_some_and(|style| {
            let s = style.to_ascii_lowercase().replace(' ', "");
            s.contains("display:none") || s.contains("visibility:hidden")
        })
    });
}

fn strip_attr_everywhere(root: &Handle, attr: &str) {
    remove_attr(root, attr);
    for child in children(root) {
        strip_attr_everywhere(&child, attr);
    }
}

fn strip_attrs_with_prefix(root: &Handle, prefix: &str, enabled: bool, skip_tags: &[&str]) {
    if !enabled {
        return;
    }
    if !skip_tags.contains(&element_name(root).as_deref().unwrap_or("")) {
        if let NodeData::Element { attrs, .. } = &root.data {
            attrs.borrow_mut().retain(|a| !a.name.local.as_ref().starts_with(prefix));
        }
    }
    for child in children(root) {
        strip_attrs_with_prefix(&child, prefix, enabled, skip_tags);
    }
}

fn strip_event_handler_attrs(root: &Handle) {
    if let NodeData::Element { attrs, .. } = &root.data {
        attrs.borrow_mut().retain(|a| !a.name.local.as_ref().starts_with("on"));
    }
    for child in children(root) {
        strip_event_handler_attrs(&child);
    }
}

/// Bottom-up empty-element pruning: remove elements with no text, no
/// children, and no remaining attributes, except the void/meta keep set.
fn prune_empty_bottom_up(node: &Handle) -> bool {
    let kids = children(node);
    let mut remaining = 0;
    for child in &kids {
        let keep = match &child.data {
            NodeData::Element { .. } => {
                let name = element_name(child).unwrap_or_default();
                if VOID_OR_META_KEEP.contains(&name.as_str()) {
                    true
                } else {
                    let child_kept = prune_empty_bottom_up(child);
                    let has_attrs = matches!(&child.data, NodeData::Element { attrs, .. } if !attrs.borrow().is_empty());
                    child_kept || has_attrs
                }
            }
            NodeData::Text { contents } => !contents.borrow().trim().is_empty(),
            _ => true,
        };
        if keep {
            remaining += 1;
        } else {
            detach(node, child);
        }
    }
    remaining > 0
}

fn collapse_text_nodes(root: &Handle) {
    if let NodeData::Text { contents } = &root.data {
        let mut c = contents.borrow_mut();
        let trimmed = c.trim();
        let collapsed = collapse_whitespace(trimmed);
        *c = collapsed.into();
    }
    for child in children(root) {
        collapse_text_nodes(&child);
    }
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

fn final_whitespace_pass(html: &str) -> String {
    let collapsed_tags = html.replace("> <", "><");
    collapsed_tags
        .lines()
        .map(|line| collapse_whitespace(line.trim()))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> OptimizerOptions {
        OptimizerOptions {
            remove_data_attributes: true,
            remove_aria_attributes: true,
            remove_style_attributes: true,
            remove_inline_styles: true,
        }
    }

    #[test]
    fn strips_scripts_but_keeps_ld_json() {
        let html = r#"<html><head><script>alert(1)</script><script type="application/ld+json">{}</script></head><body></body></html>"#;
        let out = optimize(html, &opts());
        assert!(!out.contains("alert(1)"));
        assert!(out.contains("application/ld+json"));
    }

    #[test]
    fn drops_preload_links() {
        let html = r#"<html><head><link rel="preload" href="x.js"></head><body></body></html>"#;
        let out = optimize(html, &opts());
        assert!(!out.contains("preload"));
    }

    #[test]
    fn keeps_only_first_manifest_link() {
        let html = r#"<html><head><link rel="manifest" href="a.json"><link rel="manifest" href="b.json"></head><body></body></html>"#;
        let out = optimize(html, &opts());
        assert!(out.contains("a.json"));
        assert!(!out.contains("b.json"));
    }

    #[test]
    fn fails_open_on_malformed_input() {
        let html = "<<<not really html";
        let out = optimize(html, &opts());
        assert!(!out.is_empty());
    }

    #[test]
    fn strips_data_and_aria_attributes() {
        let html = r#"<html><body><div data-testid="x" aria-hidden="true" style="color:red">hi</div></body></html>"#;
        let out = optimize(html, &opts());
        assert!(!out.contains("data-testid"));
        assert!(!out.contains("aria-hidden"));
        assert!(!out.contains("style="));
    }

    #[test]
    fn optimize_is_idempotent() {
        let html = r#"<html><head><script>x()</script></head><body><p>Hello</p></body></html>"#;
        let once = optimize(html, &opts());
        let twice = optimize(&once, &opts());
        assert_eq!(once, twice);
    }
}

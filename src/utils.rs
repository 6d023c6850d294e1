use kuchikiki::{Attribute, ExpandedName, NodeRef};
use markup5ever::{namespace_url, ns, LocalName, QualName};
use md5::{Digest, Md5};

/// An empty element in the HTML namespace, such as the `<head>` created
/// when a document lacks one.
pub fn create_element(name: &str) -> NodeRef {
    NodeRef::new_element(
        QualName::new(None, ns!(html), LocalName::from(name)),
        std::iter::empty::<(ExpandedName, Attribute)>(),
    )
}

/// A `<style>` element tagged with a generated-stylesheet marker attribute
/// (`amp-custom` or `amp-keyframes`).
pub fn create_style_element(marker: &str) -> NodeRef {
    let style = create_element("style");
    if let Some(element) = style.as_element() {
        element
            .attributes
            .borrow_mut()
            .insert(marker, String::new());
    }
    style
}

/// Strip a vendor prefix (`-moz-`, `-webkit-`, ...) from a property name.
pub fn strip_vendor_prefix(name: &str) -> &str {
    if let Some(rest) = name.strip_prefix('-') {
        if let Some(idx) = rest.find('-') {
            return &rest[idx + 1..];
        }
    }
    name
}

/// Lowercase hex md5 digest of a string.
pub fn md5_hex(data: &str) -> String {
    Md5::digest(data.as_bytes())
        .iter()
        .fold(String::with_capacity(32), |mut out, byte| {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
            out
        })
}

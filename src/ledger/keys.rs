//! Composite state keys
//!
//! Keys are `\u{0}<object type>\u{0}<attribute>\u{0}...`, so all anchors share
//! the `\u{0}ANCHOR\u{0}` prefix and sort by batch id.

const SEPARATOR: char = '\u{0}';

pub const ANCHOR_OBJECT: &str = "ANCHOR";
pub const LATEST_ATTRIBUTE: &str = "LATEST";

pub fn composite_key(object_type: &str, attributes: &[&str]) -> String {
    let mut key = String::new();
    key.push(SEPARATOR);
    key.push_str(object_type);
    key.push(SEPARATOR);
    for attribute in attributes {
        key.push_str(attribute);
        key.push(SEPARATOR);
    }
    key
}

/// `("ANCHOR", batch_id)`
pub fn anchor_key(batch_id: &str) -> String {
    composite_key(ANCHOR_OBJECT, &[batch_id])
}

/// `("ANCHOR", "LATEST")` -> batch id of the most recent anchor
pub fn latest_key() -> String {
    composite_key(ANCHOR_OBJECT, &[LATEST_ATTRIBUTE])
}

/// Prefix shared by every key in the anchor family
pub fn anchor_prefix() -> String {
    composite_key(ANCHOR_OBJECT, &[])
}

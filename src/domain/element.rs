//! ZAPI element tree
//!
//! Requests to and results from the legacy management gateway are trees of
//! named elements carrying either text content or child elements.

use serde::{Deserialize, Serialize};

/// One node of a ZAPI request or result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapiElement {
    name: String,
    content: Option<String>,
    children: Vec<ZapiElement>,
}

impl ZapiElement {
    /// Create an empty element
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: None,
            children: Vec::new(),
        }
    }

    /// Create an element holding text content
    pub fn with_content(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Some(content.into()),
            children: Vec::new(),
        }
    }

    /// Builder form of [`ZapiElement::add_child_value`]
    pub fn child_value(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.add_child_value(name, value);
        self
    }

    /// Builder form of [`ZapiElement::add_child`]
    pub fn child_element(mut self, child: ZapiElement) -> Self {
        self.add_child(child);
        self
    }

    pub fn add_child(&mut self, child: ZapiElement) {
        self.children.push(child);
    }

    /// Append `<name>value</name>`
    pub fn add_child_value(&mut self, name: impl Into<String>, value: impl ToString) {
        self.children
            .push(ZapiElement::with_content(name, value.to_string()));
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = Some(content.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn children(&self) -> &[ZapiElement] {
        &self.children
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<&ZapiElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text content of the first direct child with the given name
    pub fn child_content(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(ZapiElement::content)
    }

    /// Child content parsed as a ZAPI boolean (`true`/`false`)
    pub fn child_bool(&self, name: &str) -> Option<bool> {
        match self.child_content(name)? {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Child content parsed as an unsigned integer
    pub fn child_u64(&self, name: &str) -> Option<u64> {
        self.child_content(name)?.trim().parse().ok()
    }
}

/// ZAPI encoding of a boolean
pub fn zapi_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_lookup() {
        let query = ZapiElement::new("lun-info")
            .child_value("vserver", "vs1")
            .child_value("volume", "vol1");
        let request = ZapiElement::new("lun-get-iter")
            .child_element(ZapiElement::new("query").child_element(query))
            .child_value("max-records", 100);

        assert_eq!(request.name(), "lun-get-iter");
        assert_eq!(request.child_u64("max-records"), Some(100));
        let info = request.child("query").and_then(|q| q.child("lun-info")).unwrap();
        assert_eq!(info.child_content("volume"), Some("vol1"));
        assert_eq!(info.child_content("missing"), None);
    }

    #[test]
    fn test_child_bool() {
        let lun = ZapiElement::new("lun-info")
            .child_value("mapped", zapi_bool(true))
            .child_value("is-space-alloc-enabled", "false")
            .child_value("odd", "yes");
        assert_eq!(lun.child_bool("mapped"), Some(true));
        assert_eq!(lun.child_bool("is-space-alloc-enabled"), Some(false));
        assert_eq!(lun.child_bool("odd"), None);
    }
}

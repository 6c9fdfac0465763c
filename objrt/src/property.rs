use std::sync::Arc;

/// One `name`/`value` pair of a property declaration, e.g. `T` with
/// value `@"NSString"`, or the flag `N` with an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAttribute {
    pub name: String,
    pub value: String,
}

impl PropertyAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }
}

/// A declared property: a name plus an ordered attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: Arc<str>,
    attributes: Vec<PropertyAttribute>,
}

impl Property {
    pub fn new(name: &str, attributes: &[PropertyAttribute]) -> Self {
        Self {
            name: Arc::from(name),
            attributes: attributes.to_vec(),
        }
    }

    /// Build from the serialized form, e.g. `T@"NSString",&,N,V_name`.
    pub fn from_attribute_string(name: &str, attributes: &str) -> Self {
        Self {
            name: Arc::from(name),
            attributes: parse_attributes(attributes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute_list(&self) -> &[PropertyAttribute] {
        &self.attributes
    }

    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Serialized attribute string: each name immediately followed by its
    /// value, comma separated.
    pub fn attributes(&self) -> String {
        let mut out = String::new();
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&attr.name);
            out.push_str(&attr.value);
        }
        out
    }

    pub(crate) fn set_attributes(&mut self, attributes: &[PropertyAttribute]) {
        self.attributes = attributes.to_vec();
    }
}

/// Split an attribute string on top-level commas. Commas inside quotes or
/// inside `{}`/`()`/`[]` of a type encoding belong to the value. The first
/// character of each item is the attribute name.
pub fn parse_attributes(text: &str) -> Vec<PropertyAttribute> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '{' | '(' | '[' if !quoted => depth += 1,
            '}' | ')' | ']' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                items.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&text[start..]);

    items
        .into_iter()
        .filter(|item| !item.is_empty())
        .map(|item| {
            let split = item.chars().next().map_or(0, char::len_utf8);
            PropertyAttribute::new(&item[..split], &item[split..])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_string_round_trip() {
        let text = "T@\"NSString\",&,N,V_name";
        let prop = Property::from_attribute_string("name", text);
        assert_eq!(prop.attribute_list().len(), 4);
        assert_eq!(prop.attribute_value("T"), Some("@\"NSString\""));
        assert_eq!(prop.attribute_value("N"), Some(""));
        assert_eq!(prop.attribute_value("V"), Some("_name"));
        assert_eq!(prop.attribute_value("R"), None);
        assert_eq!(prop.attributes(), text);
    }

    #[test]
    fn commas_inside_types_are_kept() {
        let attrs = parse_attributes("T{P=\"a,b\"i(u=c,d)},R");
        assert_eq!(
            attrs,
            vec![
                PropertyAttribute::new("T", "{P=\"a,b\"i(u=c,d)}"),
                PropertyAttribute::flag("R"),
            ]
        );
    }

    #[test]
    fn empty_items_are_skipped() {
        assert!(parse_attributes("").is_empty());
        assert_eq!(parse_attributes("N,,C").len(), 2);
    }
}

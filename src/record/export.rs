use crate::core::FieldValue;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Entry name carrying the entity (or relationship) name of a plain map.
pub const ENTITY_KEY: &str = "_entity";

const INDENT: &str = "    ";

/// Nested, null-free view of a record and its dependents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlainValue {
    Scalar(FieldValue),
    One(PlainMap),
    Many(Vec<PlainMap>),
}

pub type PlainMap = BTreeMap<String, PlainValue>;

/// Renders `plain` as an XML element named `element` and returns the number
/// of elements written.
///
/// Scalars become attributes. Multi-line values, values longer than
/// `attribute_max_len` and binary values (base64) become CDATA child
/// elements. Nested maps become child elements named by their entry key.
pub fn write_xml(
    out: &mut String,
    prefix: &str,
    element: &str,
    plain: &PlainMap,
    attribute_max_len: usize,
) -> usize {
    write_element(out, prefix, element, plain, attribute_max_len, 1)
}

fn write_element(
    out: &mut String,
    prefix: &str,
    element: &str,
    plain: &PlainMap,
    attribute_max_len: usize,
    level: usize,
) -> usize {
    let name = element.replace('#', "-");
    let mut cdata: Vec<(&str, String)> = Vec::new();
    let mut nested: Vec<(&str, &PlainValue)> = Vec::new();

    out.push_str(&INDENT.repeat(level));
    let _ = write!(out, "<{}{}", prefix, name);

    for (field, value) in plain {
        if field == ENTITY_KEY {
            continue;
        }
        let scalar = match value {
            PlainValue::Scalar(scalar) => scalar,
            _ => {
                nested.push((field, value));
                continue;
            }
        };
        if let FieldValue::Binary(bytes) = scalar {
            cdata.push((field, BASE64.encode(bytes)));
            continue;
        }
        let Some(text) = scalar.to_plain_string().filter(|text| !text.is_empty()) else {
            continue;
        };
        if text.contains('\n') || text.contains('\r') || text.chars().count() > attribute_max_len {
            cdata.push((field, text));
            continue;
        }
        let _ = write!(out, " {}=\"{}\"", field, escape_attribute(&text));
    }

    if cdata.is_empty() && nested.is_empty() {
        out.push_str("/>\n");
        return 1;
    }

    out.push_str(">\n");
    for (field, text) in &cdata {
        out.push_str(&INDENT.repeat(level + 1));
        let text = text.replace("]]>", "]]]]><![CDATA[>");
        let _ = writeln!(out, "<{0}><![CDATA[{1}]]></{0}>", field, text);
    }

    let mut count = 1;
    for (field, value) in nested {
        match value {
            PlainValue::One(child) => {
                count += write_element(out, prefix, field, child, attribute_max_len, level + 1);
            }
            PlainValue::Many(children) => {
                for child in children {
                    count += write_element(out, prefix, field, child, attribute_max_len, level + 1);
                }
            }
            PlainValue::Scalar(_) => {}
        }
    }

    out.push_str(&INDENT.repeat(level));
    let _ = writeln!(out, "</{}{}>", prefix, name);
    count
}

fn escape_attribute(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(value: impl Into<FieldValue>) -> PlainValue {
        PlainValue::Scalar(value.into())
    }

    #[test]
    fn test_scalars_become_attributes() {
        let mut plain = PlainMap::new();
        plain.insert(ENTITY_KEY.into(), scalar("Party"));
        plain.insert("partyId".into(), scalar("P1"));
        plain.insert("name".into(), scalar("A & B"));

        let mut out = String::new();
        let count = write_xml(&mut out, "", "Party", &plain, 255);
        assert_eq!(count, 1);
        assert_eq!(out, "    <Party name=\"A &amp; B\" partyId=\"P1\"/>\n");
    }

    #[test]
    fn test_long_binary_and_nested_values() {
        let mut child = PlainMap::new();
        child.insert("roleTypeId".into(), scalar("CUSTOMER"));

        let mut plain = PlainMap::new();
        plain.insert("partyId".into(), scalar("P1"));
        plain.insert("notes".into(), scalar("line one\nline two"));
        plain.insert("photo".into(), scalar(vec![1u8, 2, 3]));
        plain.insert("roles".into(), PlainValue::Many(vec![child.clone(), child]));

        let mut out = String::new();
        let count = write_xml(&mut out, "", "Party", &plain, 255);
        assert_eq!(count, 3);
        assert!(out.contains("<notes><![CDATA[line one\nline two]]></notes>"));
        assert!(out.contains("<photo><![CDATA[AQID]]></photo>"));
        assert_eq!(out.matches("<roles roleTypeId=\"CUSTOMER\"/>").count(), 2);
        assert!(out.ends_with("    </Party>\n"));
    }

    #[test]
    fn test_cdata_terminator_is_split() {
        let mut plain = PlainMap::new();
        plain.insert("script".into(), scalar("a]]>b\n"));

        let mut out = String::new();
        write_xml(&mut out, "", "Note", &plain, 255);
        assert!(out.contains("<script><![CDATA[a]]]]><![CDATA[>b\n]]></script>"));
        assert_eq!(out.matches("]]>").count(), 2);
    }
}

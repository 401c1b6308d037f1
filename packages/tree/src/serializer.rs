use crate::tokenizer::escape;
use crate::tree::{MarkupFile, NodeId, NodeKind};

/// Serializer converts a markup tree back to source text
///
/// Structure is preserved but whitespace is normalized: tags with child tags
/// are broken over indented lines, leaf tags keep their text inline.
pub struct Serializer {
    indent_level: usize,
    indent_string: String,
}

impl Serializer {
    pub fn new() -> Self {
        Self {
            indent_level: 0,
            indent_string: "  ".to_string(), // 2 spaces
        }
    }

    pub fn with_indent(indent: &str) -> Self {
        Self {
            indent_level: 0,
            indent_string: indent.to_string(),
        }
    }

    /// Serialize a file to source text
    pub fn serialize(&mut self, file: &MarkupFile) -> String {
        let mut output = String::new();
        if let Some(root) = file.root_tag() {
            self.serialize_tag(file, root, &mut output);
            output.push('\n');
        }
        output
    }

    fn serialize_tag(&mut self, file: &MarkupFile, tag: NodeId, output: &mut String) {
        let Some(NodeKind::Tag { name, attributes, children }) = file.kind(tag) else {
            return;
        };

        self.write_indent(output);
        output.push('<');
        output.push_str(name);
        for attribute in attributes {
            if let Some(NodeKind::Attribute { name, value }) = file.kind(*attribute) {
                output.push(' ');
                output.push_str(name);
                output.push_str("=\"");
                output.push_str(&escape(value, true));
                output.push('"');
            }
        }

        if children.is_empty() {
            output.push_str("/>");
            return;
        }
        output.push('>');

        let has_tags = children.iter().any(|c| file.is_tag(*c));
        if !has_tags {
            output.push_str(&escape(&file.text_value(tag).unwrap_or_default(), false));
        } else {
            self.indent_level += 1;
            for child in children {
                output.push('\n');
                match file.kind(*child) {
                    Some(NodeKind::Tag { .. }) => self.serialize_tag(file, *child, output),
                    Some(NodeKind::Text { value }) => {
                        self.write_indent(output);
                        output.push_str(&escape(value.trim(), false));
                    }
                    _ => {}
                }
            }
            self.indent_level -= 1;
            output.push('\n');
            self.write_indent(output);
        }

        output.push_str("</");
        output.push_str(name);
        output.push('>');
    }

    fn write_indent(&self, output: &mut String) {
        for _ in 0..self.indent_level {
            output.push_str(&self.indent_string);
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a file with the default indentation
pub fn serialize(file: &MarkupFile) -> String {
    Serializer::new().serialize(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_roundtrip_structure() {
        let source = r#"<project name="a &amp; b"><module>core</module><empty/></project>"#;
        let file = MarkupFile::parse("/s.xml", source).unwrap();

        let text = serialize(&file);
        assert_eq!(
            text,
            "<project name=\"a &amp; b\">\n  <module>core</module>\n  <empty/>\n</project>\n"
        );

        let reread = MarkupFile::parse("/s.xml", text).unwrap();
        let root = reread.root_tag().unwrap();
        assert_eq!(reread.attribute_value(root, "name"), Some("a & b"));
        assert_eq!(reread.sub_tags(root).len(), 2);
    }

    #[test]
    fn test_serialize_after_edit() {
        let mut file = MarkupFile::parse("/s.xml", "<a/>").unwrap();
        let root = file.root_tag().unwrap();
        let b = file.add_child(root, "b").unwrap();
        file.set_text_value(b, "x").unwrap();

        assert_eq!(Serializer::with_indent("\t").serialize(&file), "<a>\n\t<b>x</b>\n</a>\n");
    }

    #[test]
    fn test_serialize_empty_file() {
        assert_eq!(serialize(&MarkupFile::empty("/e.xml")), "");
    }
}

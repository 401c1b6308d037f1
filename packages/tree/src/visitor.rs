use crate::tree::{MarkupFile, NodeId, NodeKind};

/// Visitor pattern for traversing a markup tree immutably
///
/// This trait provides default implementations that walk the entire tree.
/// Override specific visit_* methods to perform custom actions on nodes.
pub trait Visitor: Sized {
    fn visit_file(&mut self, file: &MarkupFile) {
        walk_file(self, file);
    }

    fn visit_tag(&mut self, file: &MarkupFile, tag: NodeId) {
        walk_tag(self, file, tag);
    }

    fn visit_attribute(&mut self, _file: &MarkupFile, _attribute: NodeId) {
        // Leaf node, no children to walk
    }

    fn visit_text(&mut self, _file: &MarkupFile, _text: NodeId) {
        // Leaf node, no children to walk
    }
}

pub fn walk_file<V: Visitor>(visitor: &mut V, file: &MarkupFile) {
    if let Some(root) = file.root_tag() {
        visitor.visit_tag(file, root);
    }
}

pub fn walk_tag<V: Visitor>(visitor: &mut V, file: &MarkupFile, tag: NodeId) {
    for attribute in file.attributes(tag) {
        visitor.visit_attribute(file, *attribute);
    }
    for child in file.children(tag) {
        match file.kind(*child) {
            Some(NodeKind::Tag { .. }) => visitor.visit_tag(file, *child),
            Some(NodeKind::Text { .. }) => visitor.visit_text(file, *child),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        tags: usize,
        attributes: usize,
        texts: usize,
    }

    impl Visitor for Counter {
        fn visit_tag(&mut self, file: &MarkupFile, tag: NodeId) {
            self.tags += 1;
            walk_tag(self, file, tag);
        }

        fn visit_attribute(&mut self, _file: &MarkupFile, _attribute: NodeId) {
            self.attributes += 1;
        }

        fn visit_text(&mut self, _file: &MarkupFile, _text: NodeId) {
            self.texts += 1;
        }
    }

    #[test]
    fn test_visitor_counts_nodes() {
        let file = MarkupFile::parse("/v.xml", r#"<a x="1"><b y="2">hi</b><c/></a>"#).unwrap();
        let mut counter = Counter::default();
        counter.visit_file(&file);

        assert_eq!(counter.tags, 3);
        assert_eq!(counter.attributes, 2);
        assert_eq!(counter.texts, 1);
    }
}

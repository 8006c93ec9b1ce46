use crate::ast::NodeRef;

/// `(label child ...)`, where childless children print as bare labels.
pub fn s_expr(node: NodeRef) -> String {
    let mut out = format!("({}", node.label());
    for child in node.children() {
        out.push(' ');
        if child.children().is_empty() {
            out.push_str(&child.label());
        } else {
            out.push_str(&s_expr(child));
        }
    }
    out.push(')');
    out
}

/// Quoted labels, one per line, children indented four spaces under their
/// parent's `[`.
pub fn tree(node: NodeRef) -> String {
    let mut out = String::new();
    write_tree(node, 0, &mut out);
    out
}

fn write_tree(node: NodeRef, depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    let children = node.children();
    if children.is_empty() {
        out.push_str(&format!("{}\"{}\"\n", indent, node.label()));
        return;
    }
    out.push_str(&format!("{}\"{}\": [\n", indent, node.label()));
    for child in children {
        write_tree(child, depth + 1, out);
    }
    out.push_str(&format!("{}]\n", indent));
}

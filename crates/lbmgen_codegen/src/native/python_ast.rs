use std::fmt;

/// Statements spliced around the launcher call in the Python wrapper.
///
/// The wrapper body is indented by the template; statements render without
/// leading whitespace and the caller supplies the indentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PyStmt {
    Comment(String),
    /// `assert hasattr(object, 'attribute')`
    AssertHasAttr { object: String, attribute: String },
    /// `a, b = b, a`
    Swap { left: String, right: String },
}

impl PyStmt {
    pub fn assert_has_attr(object: impl Into<String>, attribute: impl Into<String>) -> Self {
        PyStmt::AssertHasAttr {
            object: object.into(),
            attribute: attribute.into(),
        }
    }

    pub fn swap(left: impl Into<String>, right: impl Into<String>) -> Self {
        PyStmt::Swap {
            left: left.into(),
            right: right.into(),
        }
    }
}

impl fmt::Display for PyStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyStmt::Comment(text) => write!(f, "# {}", text),
            PyStmt::AssertHasAttr { object, attribute } => {
                write!(f, "assert hasattr({}, '{}')", object, attribute)
            }
            PyStmt::Swap { left, right } => {
                write!(f, "{left}, {right} = {right}, {left}")
            }
        }
    }
}

pub fn render_py_block(stmts: &[PyStmt], indent: usize) -> String {
    let pad = "    ".repeat(indent);
    let mut out = String::new();
    for stmt in stmts {
        out.push_str(&pad);
        out.push_str(&stmt.to_string());
        out.push('\n');
    }
    out
}

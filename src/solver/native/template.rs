use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use lbmgen_codegen::compiler::write_file_if_changed;
use log::info;

use super::error::TemplateError;

/// A source file of the generated extension. Both the relative output path
/// and the content may contain `{{buffer}}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub path: &'static str,
    pub source: &'static str,
}

pub const TEMPLATES: [Template; 4] = [
    Template {
        path: "lettuce_native.cu",
        source: include_str!("templates/lettuce_native.cu"),
    },
    Template {
        path: "lettuce_native.cpp",
        source: include_str!("templates/lettuce_native.cpp"),
    },
    Template {
        path: "lettuce_native_{{name}}/__init__.py",
        source: include_str!("templates/__init__.py"),
    },
    Template {
        path: "setup.py",
        source: include_str!("templates/setup.py"),
    },
];

enum Piece<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn pieces(source: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = &after[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            out.push(Piece::Text(&rest[..start + 2]));
            rest = after;
            continue;
        }
        out.push(Piece::Text(&rest[..start]));
        out.push(Piece::Placeholder(name));
        rest = &after[end + 2..];
    }
    out.push(Piece::Text(rest));
    out
}

/// Placeholder names referenced by `source`, in first-use order.
pub fn placeholders(source: &str) -> Vec<&str> {
    let mut seen = Vec::new();
    for piece in pieces(source) {
        if let Piece::Placeholder(name) = piece {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    seen
}

/// Replaces every placeholder of `source` in a single pass. Substituted text
/// is never rescanned.
pub fn fill(
    template: &str,
    source: &str,
    buffers: &IndexMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(source.len());
    for piece in pieces(source) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Placeholder(name) => {
                let value = buffers
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingBuffer {
                        template: template.to_string(),
                        placeholder: name.to_string(),
                    })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Fills `templates` and returns `(relative path, content)` pairs.
pub fn fill_all(
    templates: &[Template],
    buffers: &IndexMap<String, String>,
) -> Result<Vec<(String, String)>, TemplateError> {
    let mut used = BTreeSet::new();
    for template in templates {
        used.extend(placeholders(template.path));
        used.extend(placeholders(template.source));
    }
    if let Some(unused) = buffers.keys().find(|name| !used.contains(name.as_str())) {
        return Err(TemplateError::UnusedBuffer(unused.clone()));
    }

    templates
        .iter()
        .map(|template| -> Result<(String, String), TemplateError> {
            let path = fill(template.path, template.path, buffers)?;
            let content = fill(template.path, template.source, buffers)?;
            Ok((path, content))
        })
        .collect()
}

/// Writes the filled templates into `dir`, which must already exist.
pub fn format(
    buffers: &IndexMap<String, String>,
    dir: &Path,
) -> Result<Vec<PathBuf>, TemplateError> {
    if !dir.is_dir() {
        return Err(TemplateError::NotADirectory(dir.to_path_buf()));
    }
    let files = fill_all(&TEMPLATES, buffers)?;
    let mut written = Vec::with_capacity(files.len());
    for (relative, content) in files {
        let path = dir.join(relative);
        let path = write_file_if_changed(&path, &content)
            .map_err(|source| TemplateError::Io { path, source })?;
        info!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fill_is_single_pass() {
        let out = fill(
            "t",
            "a {{x}} b {{y}}",
            &buffers(&[("x", "{{y}}"), ("y", "2")]),
        )
        .unwrap();
        assert_eq!(out, "a {{y}} b 2");
    }

    #[test]
    fn non_identifier_braces_are_kept() {
        let out = fill("t", "{{ not a placeholder }} {{x}}", &buffers(&[("x", "1")])).unwrap();
        assert_eq!(out, "{{ not a placeholder }} 1");
        assert_eq!(placeholders("{{a}}{{b}}{{a}}"), ["a", "b"]);
    }

    #[test]
    fn missing_buffer_names_the_template() {
        let err = fill("setup.py", "{{name}}", &IndexMap::new()).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::MissingBuffer { ref template, ref placeholder }
                if template == "setup.py" && placeholder == "name"
        ));
    }

    #[test]
    fn unused_buffer_is_rejected() {
        let templates = [Template {
            path: "out.txt",
            source: "{{a}}",
        }];
        let err = fill_all(&templates, &buffers(&[("a", "1"), ("b", "2")])).unwrap_err();
        assert!(matches!(err, TemplateError::UnusedBuffer(ref name) if name == "b"));
    }

    #[test]
    fn builtin_templates_reference_every_buffer() {
        let mut used = BTreeSet::new();
        for template in &TEMPLATES {
            used.extend(placeholders(template.path));
            used.extend(placeholders(template.source));
        }
        let expected: BTreeSet<&str> = crate::solver::native::buffers::BufferName::ALL
            .iter()
            .map(|b| b.as_str())
            .collect();
        assert_eq!(used, expected);
    }
}

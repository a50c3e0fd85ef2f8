//! Text-level tag engine.
//!
//! Tag grammar:
//! - `{a.b.c}` — scalar placeholder, dot paths descend nested objects;
//!   anything unresolved renders as the empty string.
//! - `{#name}…{/name}` — section. Arrays iterate with the row pushed onto
//!   the scope stack, truthy scalars and objects render the body once,
//!   falsy or missing values skip it.

use serde_json::Value;

use super::RenderError;

/// Tag delimiters. Decree templates carry literal braces in their prose,
/// so those use the angle form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub start: &'static str,
    pub end: &'static str,
}

impl Delimiters {
    pub fn brace() -> Self {
        Delimiters { start: "{", end: "}" }
    }

    pub fn angle() -> Self {
        Delimiters {
            start: "<<<",
            end: ">>>",
        }
    }
}

enum Node {
    Text(String),
    Placeholder(String),
    Section { name: String, body: Vec<Node> },
}

/// Stateless merge over a single text part.
pub struct MergeEngine {
    delimiters: Delimiters,
}

impl MergeEngine {
    pub fn new(delimiters: Delimiters) -> Self {
        Self { delimiters }
    }

    pub fn merge(&self, input: &str, context: &Value) -> Result<String, RenderError> {
        let nodes = self.parse(input)?;
        let mut out = String::with_capacity(input.len());
        let mut scopes = vec![context];
        render_nodes(&nodes, &mut scopes, &mut out);
        Ok(out)
    }

    /// Every placeholder path and section name in a part, deduplicated in
    /// order of first appearance.
    pub fn variables(&self, input: &str) -> Result<Vec<String>, RenderError> {
        let nodes = self.parse(input)?;
        let mut vars = Vec::new();
        collect_variables(&nodes, &mut vars);
        Ok(vars)
    }

    fn parse(&self, input: &str) -> Result<Vec<Node>, RenderError> {
        let (start, end) = (self.delimiters.start, self.delimiters.end);
        // Stack of (section name, children); the root level has no name.
        let mut stack: Vec<(Option<String>, Vec<Node>)> = vec![(None, Vec::new())];
        let mut rest = input;

        while let Some(open) = rest.find(start) {
            let (text, after) = rest.split_at(open);
            if !text.is_empty() {
                stack.last_mut().unwrap().1.push(Node::Text(text.to_string()));
            }
            let after = &after[start.len()..];
            let close = after.find(end).ok_or_else(|| {
                RenderError::UnterminatedTag(after.chars().take(24).collect())
            })?;
            let tag = after[..close].trim();
            rest = &after[close + end.len()..];

            if let Some(name) = tag.strip_prefix('#') {
                stack.push((Some(name.trim().to_string()), Vec::new()));
            } else if let Some(name) = tag.strip_prefix('/') {
                let name = name.trim();
                let (open_name, body) = stack.pop().unwrap();
                match open_name {
                    Some(n) if n == name => {
                        stack
                            .last_mut()
                            .unwrap()
                            .1
                            .push(Node::Section { name: n, body });
                    }
                    _ => return Err(RenderError::UnexpectedClose(name.to_string())),
                }
            } else {
                stack
                    .last_mut()
                    .unwrap()
                    .1
                    .push(Node::Placeholder(tag.to_string()));
            }
        }

        if !rest.is_empty() {
            stack.last_mut().unwrap().1.push(Node::Text(rest.to_string()));
        }

        match stack.pop() {
            Some((None, nodes)) if stack.is_empty() => Ok(nodes),
            Some((Some(name), _)) => Err(RenderError::UnclosedSection(name)),
            // More than one frame left: the innermost open section is lost
            // by the pops above, report the outermost remaining one.
            _ => {
                let name = stack
                    .iter()
                    .rev()
                    .find_map(|(n, _)| n.clone())
                    .unwrap_or_default();
                Err(RenderError::UnclosedSection(name))
            }
        }
    }
}

fn collect_variables(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Placeholder(path) => {
                if !out.iter().any(|v| v == path) {
                    out.push(path.clone());
                }
            }
            Node::Section { name, body } => {
                if !out.iter().any(|v| v == name) {
                    out.push(name.clone());
                }
                collect_variables(body, out);
            }
        }
    }
}

fn render_nodes(nodes: &[Node], scopes: &mut Vec<&Value>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Placeholder(path) => {
                if let Some(value) = resolve(scopes, path) {
                    out.push_str(&escape_xml(&scalar_to_string(value)));
                }
            }
            Node::Section { name, body } => match resolve(scopes, name) {
                Some(Value::Array(rows)) => {
                    for row in rows {
                        scopes.push(row);
                        render_nodes(body, scopes, out);
                        scopes.pop();
                    }
                }
                Some(value @ Value::Object(_)) => {
                    scopes.push(value);
                    render_nodes(body, scopes, out);
                    scopes.pop();
                }
                Some(value) if is_truthy(value) => render_nodes(body, scopes, out),
                _ => {}
            },
        }
    }
}

/// Resolve a dot path against the scope stack, innermost first. Missing
/// intermediate keys resolve to nothing rather than an error.
fn resolve<'a>(scopes: &[&'a Value], path: &str) -> Option<&'a Value> {
    'scope: for scope in scopes.iter().rev() {
        let mut current = *scope;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => continue 'scope,
            }
        }
        return Some(current);
    }
    None
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Null (and anything non-scalar) renders empty, never a literal token.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge(input: &str, ctx: Value) -> String {
        MergeEngine::new(Delimiters::brace()).merge(input, &ctx).unwrap()
    }

    #[test]
    fn test_dot_path_resolution() {
        let ctx = json!({ "a": { "b": "x" } });
        assert_eq!(merge("{a.b}", ctx.clone()), "x");
        assert_eq!(merge("{a.missing}", ctx.clone()), "");
        assert_eq!(merge("{missing.b}", ctx), "");
    }

    #[test]
    fn test_null_renders_empty() {
        assert_eq!(merge("[{x}]", json!({ "x": null })), "[]");
    }

    #[test]
    fn test_boolean_section() {
        let on = json!({ "show_page_break": true });
        let off = json!({ "show_page_break": false });
        let tpl = "{#show_page_break}BREAK{/show_page_break}";
        assert_eq!(merge(tpl, on), "BREAK");
        assert_eq!(merge(tpl, off), "");
    }

    #[test]
    fn test_nested_scope_falls_back_to_parent() {
        let ctx = json!({
            "kota": "Bandung",
            "rows": [ { "nama": "A" }, { "nama": "B" } ]
        });
        assert_eq!(merge("{#rows}{nama}-{kota};{/rows}", ctx), "A-Bandung;B-Bandung;");
    }

    #[test]
    fn test_object_section_scopes() {
        let ctx = json!({ "memutuskan": { "pembuka": "MEMUTUSKAN" } });
        assert_eq!(merge("{#memutuskan}{pembuka}{/memutuskan}", ctx), "MEMUTUSKAN");
    }

    #[test]
    fn test_mismatched_close_is_error() {
        let err = MergeEngine::new(Delimiters::brace())
            .merge("{#a}x{/b}", &json!({}))
            .unwrap_err();
        assert_eq!(err.tag(), Some("b"));
    }

    #[test]
    fn test_variables_lists_tags_once_in_order() {
        let vars = MergeEngine::new(Delimiters::brace())
            .variables("{nomor_surat} {#tamu}{no}. {nama}{/tamu} {nomor_surat}")
            .unwrap();
        assert_eq!(vars, ["nomor_surat", "tamu", "no", "nama"]);
    }

    #[test]
    fn test_unterminated_tag_is_error() {
        let err = MergeEngine::new(Delimiters::brace())
            .merge("halo {nama", &json!({}))
            .unwrap_err();
        assert!(matches!(err, RenderError::UnterminatedTag(_)));
    }
}

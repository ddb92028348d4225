use log;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

const INDENT: &str = "  ";

/// Directory structure keyed by path segment. A node without children is a
/// file; directories only exist as prefixes of inserted paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TreeNode {
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = Self::new();
        let mut count = 0usize;
        for path in paths {
            root.insert(path.as_ref());
            count += 1;
        }
        log::debug!("Built tree from {} paths", count);
        root
    }

    /// Inserts every segment of `path`; re-inserting an existing path is a no-op.
    pub fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &TreeNode)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Leaf paths, alphabetically.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, child) in &self.children {
            let path = join(prefix, name);
            if child.is_leaf() {
                out.push(path);
            } else {
                child.collect_paths(&path, out);
            }
        }
    }

    /// Sum of the token counts of every file below this node, and whether any
    /// of them had a count at all.
    fn aggregate(&self, prefix: &str, counts: &HashMap<String, usize>) -> (usize, bool) {
        if self.is_leaf() {
            return match counts.get(prefix) {
                Some(tokens) => (*tokens, true),
                None => (0, false),
            };
        }
        self.children
            .iter()
            .map(|(name, child)| child.aggregate(&join(prefix, name), counts))
            .fold((0, false), |(sum, any), (tokens, known)| (sum + tokens, any || known))
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn thousands(tokens: usize) -> String {
    format!("{:.2}k", tokens as f64 / 1000.0)
}

/// Alphabetical outline, two spaces per level, directories suffixed with `/`.
pub fn render_plain(tree: &TreeNode) -> String {
    let mut out = String::new();
    render_plain_level(tree, 0, &mut out);
    out
}

fn render_plain_level(node: &TreeNode, depth: usize, out: &mut String) {
    for (name, child) in &node.children {
        out.push_str(&INDENT.repeat(depth));
        out.push_str(name);
        if child.is_leaf() {
            out.push('\n');
        } else {
            out.push_str("/\n");
            render_plain_level(child, depth + 1, out);
        }
    }
}

/// Outline ordered by descending token count at every level, each line
/// suffixed with its count in thousands. `counts` is keyed by the same
/// relative paths the tree was built from.
pub fn render_annotated(tree: &TreeNode, counts: &HashMap<String, usize>) -> String {
    let mut out = String::new();
    render_annotated_level(tree, "", 0, counts, &mut out);
    out
}

fn render_annotated_level(
    node: &TreeNode,
    prefix: &str,
    depth: usize,
    counts: &HashMap<String, usize>,
    out: &mut String,
) {
    let mut ranked: Vec<(&String, &TreeNode, String, usize, bool)> = node
        .children
        .iter()
        .map(|(name, child)| {
            let path = join(prefix, name);
            let (tokens, known) = child.aggregate(&path, counts);
            (name, child, path, tokens, known)
        })
        .collect();
    // Stable: equal counts keep alphabetical order, unknown counts go last.
    ranked.sort_by_key(|(_, _, _, tokens, known)| (Reverse(*tokens), !*known));

    for (name, child, path, tokens, _) in ranked {
        out.push_str(&INDENT.repeat(depth));
        out.push_str(name);
        if child.is_leaf() {
            out.push_str(&format!(" ({})\n", thousands(tokens)));
        } else {
            out.push_str(&format!("/ ({})\n", thousands(tokens)));
            render_annotated_level(child, &path, depth + 1, counts, out);
        }
    }
}

use crate::loader::FileRecord;
use crate::recency::RecencyBuckets;
use log;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptSegment {
    pub label: &'static str,
    pub text: String,
    /// Marks the end of a prefix the provider may cache across calls.
    pub cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPayload {
    pub system: String,
    pub segments: Vec<PromptSegment>,
}

impl PromptPayload {
    pub fn cached_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.cache).count()
    }
}

/// How file contents are laid out in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum FileLayout {
    Combined(Vec<FileRecord>),
    /// Oldest bucket first so that the longest-lived content opens the prompt.
    ByRecency(RecencyBuckets),
}

#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub system: &'a str,
    pub rules: &'a [FileRecord],
    pub tree: &'a str,
    pub files: &'a FileLayout,
    pub request: &'a str,
}

fn wrap(tag: &str, attributes: &str, inner: &str) -> String {
    format!("<{tag}{attributes}>\n{inner}\n</{tag}>")
}

fn join_blocks(records: &[FileRecord]) -> String {
    records
        .iter()
        .map(|r| r.rendered_block.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn files_segment(label: &'static str, attributes: &str, records: &[FileRecord]) -> Option<PromptSegment> {
    if records.is_empty() {
        return None;
    }
    Some(PromptSegment {
        label,
        text: wrap("files", attributes, &join_blocks(records)),
        cache: true,
    })
}

/// Orders the context: rules, tree, file contents, then the request. Every
/// segment before the request is a cache boundary; empty segments are dropped.
pub fn assemble(inputs: &PromptInputs<'_>) -> PromptPayload {
    let mut segments = Vec::new();

    if !inputs.rules.is_empty() {
        segments.push(PromptSegment {
            label: "rules",
            text: wrap("rules", "", &join_blocks(inputs.rules)),
            cache: true,
        });
    }

    if !inputs.tree.trim().is_empty() {
        segments.push(PromptSegment {
            label: "tree",
            text: wrap("file_tree", "", inputs.tree.trim_end()),
            cache: true,
        });
    }

    match inputs.files {
        FileLayout::Combined(records) => {
            segments.extend(files_segment("files", "", records));
        }
        FileLayout::ByRecency(buckets) => {
            segments.extend(files_segment(
                "files:before",
                " modified=\"more than a week ago\"",
                &buckets.before,
            ));
            segments.extend(files_segment(
                "files:last_week",
                " modified=\"in the last 7 days\"",
                &buckets.last_week,
            ));
            segments.extend(files_segment(
                "files:today",
                " modified=\"today\"",
                &buckets.today,
            ));
        }
    }

    if !inputs.request.trim().is_empty() {
        segments.push(PromptSegment {
            label: "request",
            text: inputs.request.trim().to_string(),
            cache: false,
        });
    }

    log::debug!(
        "Assembled prompt: {:?}",
        segments.iter().map(|s| s.label).collect::<Vec<_>>()
    );
    PromptPayload {
        system: inputs.system.to_string(),
        segments,
    }
}

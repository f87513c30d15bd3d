//! Split converted text into sections by header markers.
//!
//! Two kinds of header are recognised:
//!
//! - Markdown headers `#` to `######`; the number of hashes is the depth.
//! - All-caps lines longer than `caps_header_min_len` that are at least half
//!   alphabetic; these are depth 1. The alphabetic share keeps code listings
//!   such as `29826 29827 G0289` out.
//!
//! A hierarchy stack is trimmed to `depth - 1` before each header is pushed.
//! Body text before the first header lands in a `Document Content` section.
//! Lines of the form `Page N` advance the page counter and are not body text.

use priorauth_core::config::SegmenterConfig;
use priorauth_core::section::{DEFAULT_SECTION, Section};
use regex::Regex;

use crate::error::ExtractError;

pub struct Segmenter {
    caps_header_min_len: usize,
    markdown_header: Regex,
    page_marker: Regex,
}

/// Body lines collected for the section being built.
struct Pending<'a> {
    lines: Vec<&'a str>,
    start_offset: usize,
    start_line: usize,
    page: u32,
}

impl Segmenter {
    pub fn new(config: &SegmenterConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            caps_header_min_len: config.caps_header_min_len,
            markdown_header: Regex::new(r"^(#{1,6})\s*(.+)$")?,
            page_marker: Regex::new(r"(?i)^page\s+(\d{1,6})(?:\s+of\s+\d+)?$")?,
        })
    }

    pub fn segment(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut pending: Option<Pending> = None;
        let mut page = 1u32;
        let mut offset = 0usize;

        for (line_no, raw) in text.split_inclusive('\n').enumerate() {
            let line_offset = offset;
            offset += raw.len();
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = self.page_marker.captures(line) {
                page = caps[1].parse().unwrap_or(page);
                continue;
            }

            if let Some((depth, title)) = self.header(line) {
                flush(&mut sections, &stack, pending.take());
                stack.truncate(depth - 1);
                stack.push(title);
                continue;
            }

            pending
                .get_or_insert_with(|| Pending {
                    lines: Vec::new(),
                    start_offset: line_offset,
                    start_line: line_no,
                    page,
                })
                .lines
                .push(line);
        }
        flush(&mut sections, &stack, pending);
        sections
    }

    /// Depth and title if `line` is a header.
    fn header(&self, line: &str) -> Option<(usize, String)> {
        if let Some(caps) = self.markdown_header.captures(line) {
            let title = caps[2].trim().trim_end_matches('#').trim();
            if !title.is_empty() {
                return Some((caps[1].len(), title.to_string()));
            }
        }
        self.is_caps_header(line).then(|| (1, line.to_string()))
    }

    fn is_caps_header(&self, line: &str) -> bool {
        if line.chars().count() <= self.caps_header_min_len {
            return false;
        }
        let visible = line.chars().filter(|c| !c.is_whitespace()).count();
        let alpha = line.chars().filter(|c| c.is_alphabetic()).count();
        alpha * 2 >= visible && !line.chars().any(char::is_lowercase)
    }
}

fn flush(sections: &mut Vec<Section>, stack: &[String], pending: Option<Pending>) {
    let Some(p) = pending else {
        return;
    };
    let hierarchy_path = if stack.is_empty() {
        vec![DEFAULT_SECTION.to_string()]
    } else {
        stack.to_vec()
    };
    sections.push(Section {
        hierarchy_path,
        text: p.lines.join("\n"),
        start_offset: p.start_offset,
        start_line: p.start_line,
        page: p.page,
    });
}

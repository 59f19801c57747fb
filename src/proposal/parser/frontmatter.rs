use std::collections::BTreeMap;

use crate::proposal::parser::{parse_date, ProposalParser};
use crate::proposal::{ParseError, ProposalData};

const MAX_FRONTMATTER_LINES: usize = 4000;

pub(super) fn parse_eip(
    parser: &ProposalParser,
    file_path: &str,
    text: &str,
) -> Result<ProposalData, ParseError> {
    let mut meta = extract_frontmatter(text);

    let number = match meta.get("eip") {
        Some(value) => value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ParseError::InvalidNumber {
                kind: parser.kind(),
                path: file_path.to_string(),
                value: value.clone(),
            })?,
        None => parser.proposal_number(file_path)?,
    };

    let title = meta.remove("title").unwrap_or_default();
    let status = meta.remove("status").unwrap_or_default();
    if title.is_empty() || status.is_empty() {
        return Err(parser.missing_fields(file_path));
    }

    let mut extra = BTreeMap::new();
    if let Some(category) = meta.remove("category").filter(|c| !c.is_empty()) {
        extra.insert("category".to_string(), category);
    }

    Ok(ProposalData {
        number,
        title,
        status,
        proposal_type: meta.remove("type"),
        author: meta.remove("author"),
        created_date: meta.get("created").and_then(|raw| parse_date(raw)),
        file_path: file_path.to_string(),
        full_text: text.to_string(),
        extra,
    })
}

/// Read the YAML-like header between the first two `---` lines.
///
/// Only flat `key: value` pairs and indented `- item` lists are understood;
/// list items are joined with `, `. Keys are lower-cased. A file without a
/// closed header yields an empty map.
pub(super) fn extract_frontmatter(text: &str) -> BTreeMap<String, String> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.first().map(|l| l.trim()) != Some("---") {
        return BTreeMap::new();
    }
    let scan_end = lines.len().min(MAX_FRONTMATTER_LINES);
    let Some(end) = (1..scan_end).find(|&i| lines[i].trim() == "---") else {
        return BTreeMap::new();
    };

    let mut data = BTreeMap::new();
    let mut list_key: Option<String> = None;
    let mut list_items: Vec<String> = Vec::new();

    for line in &lines[1..end] {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if list_key.is_some() {
            if let Some(item) = list_item(line) {
                list_items.push(item.to_string());
                continue;
            }
        }

        let Some((key, value)) = key_value(line) else {
            continue;
        };

        if let Some(previous) = list_key.take() {
            if !list_items.is_empty() {
                data.insert(previous, list_items.join(", "));
            }
            list_items.clear();
        }

        let key = key.to_ascii_lowercase();
        if value.is_empty() {
            list_key = Some(key);
            continue;
        }
        data.insert(key, value.trim_matches(|c| c == '"' || c == '\'').to_string());
    }

    if let Some(key) = list_key {
        if !list_items.is_empty() {
            data.insert(key, list_items.join(", "));
        }
    }

    data
}

fn list_item(line: &str) -> Option<&str> {
    let indented = line.trim_start();
    if indented.len() == line.len() {
        return None;
    }
    let rest = indented.strip_prefix('-')?;
    let item = rest.trim_start();
    if item.len() == rest.len() {
        return None;
    }
    Some(item.trim())
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let key = line[..colon].trim_end();
    let valid_key = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid_key {
        return None;
    }
    Some((key, line[colon + 1..].trim()))
}

//! Markup parsers: pure transforms from raw portal markup into record types.
//!
//! The portal serves server-rendered HTML with a stable but uncontrolled
//! structure, so extraction is done with a handful of narrow scanning
//! helpers rather than a full HTML parser. Optional structure (wait blocks,
//! form fields) degrades to `None`; the fixed column layout of a listing
//! row is assumed and indexing past it panics if the portal changes it.

use chrono::NaiveDateTime;
use regex::Regex;

use crate::types::{Initiator, Task, TaskWait, TasksList};

/// One scanned element: raw attribute string plus inner markup.
struct Element<'a> {
    attrs: &'a str,
    inner: &'a str,
}

/// Parse the task-listing page into an ordered task collection.
///
/// The first two table rows are headers and are skipped. Within each data
/// row the seven cells are read by fixed position.
pub fn parse_tasks_list(html: &str) -> TasksList {
    let html = unescape(html);
    let mut tasks = TasksList::new();
    for row in find_all(&html, "tr").into_iter().skip(2) {
        let cells = find_all(row.inner, "td");
        let links = find_all(cells[0].inner, "a");

        let id = find_by_class(cells[1].inner, "div", "task-description-code")
            .map(|e| text_joined(e.inner, ""))
            .unwrap_or_default();
        let mut task = Task::new(id);
        task.run = has_class(row.attrs, "current-task-row");
        task.request_id = Some(text_joined(links[0].inner, ""));
        let initiator_href = attr(links[1].attrs, "href").unwrap_or_default();
        task.initiator = Some(Initiator {
            id: digits(&initiator_href),
            name: text_joined(links[1].inner, ""),
        });
        task.text = find_by_class(cells[1].inner, "div", "task-description")
            .map(|e| text_joined(e.inner, "\n"));
        task.date = Some(text_joined(cells[2].inner, ""));
        // Type label is the second text segment of a composite cell.
        task.kind = text_runs(cells[3].inner).into_iter().nth(1);
        task.time = Some(text_joined(cells[4].inner, ""));
        task.plan = Some(text_joined(cells[5].inner, ""));
        task.wait = parse_wait(cells[6].inner);
        task.user_id = find_all(cells[6].inner, "button")
            .first()
            .and_then(|b| attr(b.attrs, "data-employee-code"));
        tasks.push(task);
    }
    tasks
}

/// Value of the first form field named `_csrf`, if present.
pub fn parse_csrf(html: &str) -> Option<String> {
    let html = unescape(html);
    open_tags(&html, "input")
        .into_iter()
        .find(|attrs| attr(attrs, "name").as_deref() == Some("_csrf"))
        .and_then(|attrs| attr(attrs, "value"))
}

/// Selected IT-platform id from the insert-task form, if present.
pub fn parse_platform(html: &str) -> Option<String> {
    let html = unescape(html);
    let select = find_all(&html, "select")
        .into_iter()
        .find(|e| attr(e.attrs, "id").as_deref() == Some("insert-task-platform-it"))?;
    open_tags(select.inner, "option")
        .into_iter()
        .find(|attrs| has_flag(attrs, "selected"))
        .and_then(|attrs| attr(attrs, "value"))
}

/// Wait descriptor at its fixed nested position inside the final row cell:
/// the second top-level `div`, its first `div` child, and within that the
/// first child carries `kind:description` text and the third an optional
/// trailing `DD.MM.YYYY HH:MM` stamp.
fn parse_wait(cell: &str) -> Option<TaskWait> {
    let wrapper = child_elements(cell, "div").into_iter().nth(1)?;
    let block = child_elements(wrapper.inner, "div").into_iter().next()?;
    let leaves = child_elements(block.inner, "div");
    let header = text_joined(leaves.first()?.inner, " ");
    let (kind, description) = match header.split_once(':') {
        Some((kind, description)) => (kind.trim().to_string(), description.trim().to_string()),
        None => (header.trim().to_string(), String::new()),
    };
    let datetime = leaves
        .get(2)
        .and_then(|e| parse_wait_datetime(&text_joined(e.inner, " ")));
    Some(TaskWait {
        kind,
        description,
        datetime,
    })
}

/// Trailing `DD.MM.YYYY HH:MM` stamp of a wait line, if any.
fn parse_wait_datetime(text: &str) -> Option<NaiveDateTime> {
    let re = Regex::new(r"(\d{2}\.\d{2}\.\d{4}\s\d{2}:\d{2})$").ok()?;
    let caps = re.captures(text.trim())?;
    NaiveDateTime::parse_from_str(&caps[1], "%d.%m.%Y %H:%M").ok()
}

/// Listing pages arrive embedded in JSON with escaped quotes.
fn unescape(html: &str) -> String {
    html.replace("\\\"", "\"")
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Every element with the given tag name, in document order, descendants
/// included. Inner markup is cut at the balancing close tag.
fn find_all<'a>(html: &'a str, tag: &str) -> Vec<Element<'a>> {
    scan(html, tag, false)
}

/// Only the top-level elements with the given tag name; nested occurrences
/// stay inside their parent's `inner`.
fn child_elements<'a>(html: &'a str, tag: &str) -> Vec<Element<'a>> {
    scan(html, tag, true)
}

/// First element of the given tag carrying the class token, if any.
fn find_by_class<'a>(html: &'a str, tag: &str, class: &str) -> Option<Element<'a>> {
    find_all(html, tag).into_iter().find(|e| has_class(e.attrs, class))
}

fn scan<'a>(html: &'a str, tag: &str, top_level_only: bool) -> Vec<Element<'a>> {
    let mut out = Vec::new();
    let open = format!("<{tag}");
    let close = format!("</{tag}");
    let mut pos = 0;
    while let Some(start) = next_open_tag(html, pos, &open) {
        let name_end = start + open.len();
        let Some(gt) = html[name_end..].find('>') else {
            break;
        };
        let attrs = html[name_end..name_end + gt].trim();
        if let Some(stripped) = attrs.strip_suffix('/') {
            out.push(Element {
                attrs: stripped.trim_end(),
                inner: "",
            });
            pos = name_end + gt + 1;
            continue;
        }
        let body_start = name_end + gt + 1;
        let mut depth = 1usize;
        let mut cursor = body_start;
        let mut inner_end = html.len();
        let mut resume = html.len();
        while depth > 0 {
            let next_open = next_open_tag(html, cursor, &open);
            let next_close = html[cursor..].find(close.as_str()).map(|i| cursor + i);
            match (next_open, next_close) {
                (Some(o), Some(c)) if o < c => {
                    depth += 1;
                    cursor = o + open.len();
                }
                (_, Some(c)) => {
                    depth -= 1;
                    if depth == 0 {
                        inner_end = c;
                        resume = c + close.len();
                    }
                    cursor = c + close.len();
                }
                // Unclosed element: take everything to the end.
                _ => {
                    depth = 0;
                }
            }
        }
        out.push(Element {
            attrs,
            inner: &html[body_start..inner_end],
        });
        pos = if top_level_only { resume } else { body_start };
    }
    out
}

/// Attribute strings of every open tag with the given name. Suits void
/// elements like `input` that have no closing tag.
fn open_tags<'a>(html: &'a str, tag: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let open = format!("<{tag}");
    let mut pos = 0;
    while let Some(start) = next_open_tag(html, pos, &open) {
        let name_end = start + open.len();
        let Some(gt) = html[name_end..].find('>') else {
            break;
        };
        out.push(html[name_end..name_end + gt].trim().trim_end_matches('/').trim_end());
        pos = name_end + gt + 1;
    }
    out
}

/// Next occurrence of the open tag that is a real tag boundary, not a
/// prefix of a longer tag name.
fn next_open_tag(html: &str, mut from: usize, open: &str) -> Option<usize> {
    while let Some(rel) = html.get(from..)?.find(open) {
        let at = from + rel;
        let boundary = html[at + open.len()..]
            .chars()
            .next()
            .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace());
        if boundary {
            return Some(at);
        }
        from = at + open.len();
    }
    None
}

/// Quoted attribute value from a raw attribute string.
fn attr(attrs: &str, name: &str) -> Option<String> {
    let mut pos = 0;
    while let Some(rel) = attrs[pos..].find(name) {
        let start = pos + rel;
        let clean_before = start == 0
            || !attrs[..start].ends_with(|c: char| c.is_alphanumeric() || c == '-' || c == '_');
        let rest = attrs[start + name.len()..].trim_start();
        if clean_before {
            if let Some(rest) = rest.strip_prefix('=') {
                let rest = rest.trim_start();
                let quote = rest.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let value = &rest[1..];
                    if let Some(end) = value.find(quote) {
                        return Some(decode_entities(&value[..end]));
                    }
                }
                return None;
            }
        }
        pos = start + name.len();
    }
    None
}

/// Valueless attribute flag such as `selected`.
fn has_flag(attrs: &str, name: &str) -> bool {
    attrs
        .split_whitespace()
        .any(|t| t == name || t.starts_with(&format!("{name}=")))
}

fn has_class(attrs: &str, class: &str) -> bool {
    attr(attrs, "class")
        .map(|c| c.split_whitespace().any(|t| t == class))
        .unwrap_or(false)
}

/// Tag-free text segments of a fragment, trimmed, empties dropped.
fn text_runs(html: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut buf = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                let t = buf.trim();
                if !t.is_empty() {
                    runs.push(decode_entities(t));
                }
                buf.clear();
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => buf.push(c),
            _ => {}
        }
    }
    let t = buf.trim();
    if !t.is_empty() {
        runs.push(decode_entities(t));
    }
    runs
}

fn text_joined(html: &str, sep: &str) -> String {
    text_runs(html).join(sep)
}

/// Basic HTML entity decoding.
fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

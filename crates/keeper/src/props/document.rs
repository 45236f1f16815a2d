//! Layout-preserving properties document.
//!
//! Keeps every physical line of the source text. Entries whose value is
//! untouched are written back exactly as read; only modified or new entries
//! are regenerated as `key=value`.

use std::collections::BTreeMap;

/// A parsed `key=value` entry and the lines that belong to it
#[derive(Debug, Clone)]
struct Entry {
    /// Comment and blank lines directly above the entry
    leading: Vec<String>,
    /// Physical lines of the entry as read, `None` once regenerated
    raw: Option<Vec<String>>,
    key: String,
    value: String,
}

impl Entry {
    fn render(&self, out: &mut String, newline: LineEnding) {
        for line in &self.leading {
            push_line(out, line);
        }
        match &self.raw {
            Some(lines) => {
                for line in lines {
                    push_line(out, line);
                }
            }
            None => {
                let mut line = escape(&self.key, true);
                line.push('=');
                line.push_str(&escape(&self.value, false));
                line.push_str(newline.as_str());
                push_line(out, &line);
            }
        }
    }
}

/// Line terminator used for regenerated lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Ending of the first terminated line, `Lf` if there is none
    fn detect(text: &str) -> Self {
        match text.find('\n') {
            Some(i) if text[..i].ends_with('\r') => Self::CrLf,
            _ => Self::Lf,
        }
    }
}

/// Append a physical line (terminator included), terminating the previous one if needed
fn push_line(out: &mut String, line: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
}

/// Line content without its `\n` or `\r\n` terminator
fn content(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => line,
    }
}

/// Properties text that can be edited without disturbing its layout
#[derive(Debug, Clone, Default)]
pub struct PropertiesDocument {
    entries: Vec<Entry>,
    /// Comment and blank lines after the last entry
    trailing: Vec<String>,
    newline: LineEnding,
    /// Source text did not end with a line terminator
    unterminated: bool,
}

impl PropertiesDocument {
    /// Parse properties text. Parsing never fails; unparsable lines become keys.
    ///
    /// Physical lines are kept with their terminators.
    pub fn parse(text: &str) -> Self {
        let mut doc = Self {
            newline: LineEnding::detect(text),
            unterminated: !text.is_empty() && !text.ends_with('\n'),
            ..Self::default()
        };
        let mut pending: Vec<String> = Vec::new();
        let mut lines = text.split_inclusive('\n');

        while let Some(line) = lines.next() {
            let stripped = content(line).trim_start();
            if stripped.is_empty() || stripped.starts_with('#') || stripped.starts_with('!') {
                pending.push(line.to_string());
                continue;
            }

            let mut raw = vec![line.to_string()];
            let mut logical = stripped.to_string();
            while ends_with_continuation(&logical) {
                logical.pop();
                match lines.next() {
                    Some(next) => {
                        raw.push(next.to_string());
                        logical.push_str(content(next).trim_start());
                    }
                    None => break,
                }
            }

            let (key, value) = split_entry(&logical);
            doc.entries.push(Entry {
                leading: std::mem::take(&mut pending),
                raw: Some(raw),
                key,
                value,
            });
        }

        doc.trailing = pending;
        doc
    }

    /// Value of `key`; the last occurrence wins
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Distinct keys in first-seen order
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.key.as_str()))
            .map(|e| e.key.as_str())
            .collect()
    }

    /// All entries as a map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    /// Set `key` to `value`. An unchanged value leaves the text untouched.
    pub fn set(&mut self, key: &str, value: &str) {
        let Some(last) = self.entries.iter().rposition(|e| e.key == key) else {
            self.entries.push(Entry {
                leading: std::mem::take(&mut self.trailing),
                raw: None,
                key: key.to_string(),
                value: value.to_string(),
            });
            return;
        };

        // Earlier duplicates are shadowed anyway; drop them so only one line remains.
        self.remove_matching(|i, e| e.key == key && i != last);
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.key == key);
        if let Some(entry) = entry {
            if entry.value != value {
                entry.value = value.to_string();
                entry.raw = None;
            }
        }
    }

    /// Remove every occurrence of `key`; returns true if anything was removed
    pub fn remove(&mut self, key: &str) -> bool {
        self.remove_matching(|_, e| e.key == key)
    }

    /// Make the document hold exactly `target`: update, add, and remove keys
    pub fn apply(&mut self, target: &BTreeMap<String, String>) {
        let stale: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|k| !target.contains_key(*k))
            .map(str::to_string)
            .collect();
        for key in stale {
            self.remove(&key);
        }
        for (key, value) in target {
            self.set(key, value);
        }
    }

    /// Remove entries matching `pred`, handing their leading lines to what follows
    fn remove_matching(&mut self, pred: impl Fn(usize, &Entry) -> bool) -> bool {
        let mut kept: Vec<Entry> = Vec::with_capacity(self.entries.len());
        let mut orphaned: Vec<String> = Vec::new();
        let mut removed = false;

        for (i, mut entry) in std::mem::take(&mut self.entries).into_iter().enumerate() {
            if pred(i, &entry) {
                orphaned.append(&mut entry.leading);
                removed = true;
            } else {
                if !orphaned.is_empty() {
                    orphaned.append(&mut entry.leading);
                    entry.leading = std::mem::take(&mut orphaned);
                }
                kept.push(entry);
            }
        }

        if !orphaned.is_empty() {
            orphaned.append(&mut self.trailing);
            self.trailing = orphaned;
        }
        self.entries = kept;
        removed
    }

    /// Serialize, reproducing untouched lines byte-for-byte
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            entry.render(&mut out, self.newline);
        }
        for line in &self.trailing {
            push_line(&mut out, line);
        }

        // Keep a missing final terminator missing.
        if self.unterminated {
            let trimmed = content(&out).len();
            out.truncate(trimmed);
        }
        out
    }
}

/// Parse a blob into a plain map
pub fn parse_map(text: &str) -> BTreeMap<String, String> {
    PropertiesDocument::parse(text).to_map()
}

/// True when the line ends in an odd number of backslashes
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Split a logical line into unescaped key and value
fn split_entry(logical: &str) -> (String, String) {
    let chars: Vec<char> = logical.chars().collect();
    let mut i = 0;
    let mut key_end = chars.len();
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '=' | ':' | ' ' | '\t' | '\u{c}' => {
                key_end = i;
                break;
            }
            _ => i += 1,
        }
    }
    let key_end = key_end.min(chars.len());

    let mut v = key_end;
    while v < chars.len() && matches!(chars[v], ' ' | '\t' | '\u{c}') {
        v += 1;
    }
    if v < chars.len() && matches!(chars[v], '=' | ':') {
        v += 1;
        while v < chars.len() && matches!(chars[v], ' ' | '\t' | '\u{c}') {
            v += 1;
        }
    }

    let key: String = chars[..key_end].iter().collect();
    let value: String = chars[v.min(chars.len())..].iter().collect();
    (unescape(&key), unescape(&value))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{c}' => out.push_str("\\f"),
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

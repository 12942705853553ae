//! Text-level helpers for Python migration sources.
//!
//! These helpers read just enough Python to carry functions and imports from
//! superseded migration files into a new one: top-level import statements,
//! the full text of a top-level function, and renaming a function definition.
//! They work line by line and do not build a syntax tree.

use std::sync::OnceLock;

use regex::Regex;

fn def_line_regex() -> &'static Regex {
    static DEF_LINE: OnceLock<Regex> = OnceLock::new();
    DEF_LINE.get_or_init(|| Regex::new(r"^(async\s+)?def\s+(\w+)\s*\(").unwrap())
}

fn import_name_regex() -> &'static Regex {
    static IMPORT_NAME: OnceLock<Regex> = OnceLock::new();
    IMPORT_NAME
        .get_or_init(|| Regex::new(r"^[\w.]+(\s+as\s+\w+)?$|^\*$").unwrap())
}

/// Tracks whether a line-by-line scan is inside a triple-quoted string.
#[derive(Default)]
struct StringTracker {
    open: Option<&'static str>,
}

impl StringTracker {
    const fn in_string(&self) -> bool {
        self.open.is_some()
    }

    /// Updates the state with one line of source.
    fn feed(&mut self, line: &str) {
        let mut rest = line;
        loop {
            match self.open {
                Some(delim) => match rest.find(delim) {
                    Some(pos) => {
                        rest = &rest[pos + delim.len()..];
                        self.open = None;
                    }
                    None => return,
                },
                None => {
                    let dq = rest.find("\"\"\"");
                    let sq = rest.find("'''");
                    let (pos, delim) = match (dq, sq) {
                        (Some(d), Some(s)) if s < d => (s, "'''"),
                        (Some(d), _) => (d, "\"\"\""),
                        (None, Some(s)) => (s, "'''"),
                        (None, None) => return,
                    };
                    // A comment hides any quotes that follow it.
                    if rest[..pos].contains('#') {
                        return;
                    }
                    rest = &rest[pos + delim.len()..];
                    self.open = Some(delim);
                }
            }
        }
    }
}

/// Removes a trailing `# comment` outside string literals.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn paren_depth(line: &str) -> i32 {
    strip_comment(line).chars().fold(0, |depth, c| match c {
        '(' | '[' | '{' => depth + 1,
        ')' | ']' | '}' => depth - 1,
        _ => depth,
    })
}

/// Returns the top-level import statements of `source`, one per line.
///
/// `import a, b as c` is split into `import a` and `import b as c`.
/// Parenthesized and backslash-continued `from` imports are joined onto a
/// single line. `from __future__` imports are dropped.
pub fn extract_imports(source: &str) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    let mut tracker = StringTracker::default();
    let mut imports = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if tracker.in_string() {
            tracker.feed(line);
            continue;
        }
        if !(line.starts_with("import ") || line.starts_with("from ")) {
            tracker.feed(line);
            continue;
        }

        let mut statement = strip_comment(line).trim_end().to_string();
        let mut depth = paren_depth(line);
        while (depth > 0 || statement.ends_with('\\')) && i < lines.len() {
            if let Some(stripped) = statement.strip_suffix('\\') {
                statement = stripped.to_string();
            }
            let next = lines[i];
            i += 1;
            depth += paren_depth(next);
            statement.push(' ');
            statement.push_str(strip_comment(next).trim());
        }
        imports.extend(normalize_import(&statement));
    }

    imports
}

/// Splits one logical import statement into normalized lines.
fn normalize_import(statement: &str) -> Vec<String> {
    let statement = statement.replace(['(', ')'], " ");
    let statement = statement.trim().trim_end_matches(';').trim();

    if let Some(rest) = statement.strip_prefix("import ") {
        return split_names(rest)
            .into_iter()
            .map(|name| format!("import {name}"))
            .collect();
    }

    if let Some(rest) = statement.strip_prefix("from ") {
        let Some((module, names)) = rest.split_once(" import ") else {
            return Vec::new();
        };
        let module = module.trim();
        if module == "__future__" {
            return Vec::new();
        }
        let names = split_names(names);
        if names.is_empty() {
            return Vec::new();
        }
        return vec![format!("from {module} import {}", names.join(", "))];
    }

    Vec::new()
}

fn split_names(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|name| import_name_regex().is_match(name))
        .collect()
}

/// Returns the index of the line defining top-level function `name`.
fn find_def(lines: &[&str], name: &str) -> Option<usize> {
    let mut tracker = StringTracker::default();
    for (i, line) in lines.iter().enumerate() {
        if !tracker.in_string() {
            if let Some(caps) = def_line_regex().captures(line) {
                if &caps[2] == name {
                    return Some(i);
                }
            }
        }
        tracker.feed(line);
    }
    None
}

/// Returns the full text of top-level function `name`, decorators included.
///
/// The result ends with a single newline. Returns `None` when `source` has
/// no such top-level function.
pub fn function_source(source: &str, name: &str) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let def = find_def(&lines, name)?;

    let mut start = def;
    while start > 0 && lines[start - 1].starts_with('@') {
        start -= 1;
    }

    // Signature lines, until the parameter list closes.
    let mut end = def;
    let mut depth = paren_depth(lines[def]);
    while depth > 0 && end + 1 < lines.len() {
        end += 1;
        depth += paren_depth(lines[end]);
    }

    // Body: every following line that is blank, indented or inside a string.
    let mut tracker = StringTracker::default();
    for line in &lines[def..=end] {
        tracker.feed(line);
    }
    let mut i = end + 1;
    while i < lines.len() {
        let line = lines[i];
        let top_level = !line.trim().is_empty() && !line.starts_with([' ', '\t']);
        if top_level && !tracker.in_string() {
            break;
        }
        tracker.feed(line);
        end = i;
        i += 1;
    }
    while end > def && lines[end].trim().is_empty() {
        end -= 1;
    }

    let mut text = lines[start..=end].join("\n");
    text.push('\n');
    Some(text)
}

/// Renames the definition of top-level function `old` to `new`.
///
/// Only the `def` line changes; references elsewhere are left alone.
pub fn rename_function(source: &str, old: &str, new: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let Some(def) = find_def(&lines, old) else {
        return source.to_string();
    };

    let mut out: Vec<String> = lines.iter().map(|l| (*l).to_string()).collect();
    let re = def_line_regex();
    if let Some(caps) = re.captures(lines[def]) {
        if let Some(m) = caps.get(2) {
            out[def] = format!("{}{new}{}", &lines[def][..m.start()], &lines[def][m.end()..]);
        }
    }

    let mut text = out.join("\n");
    if source.ends_with('\n') {
        text.push('\n');
    }
    text
}

use super::hunk::Hunk;
use super::language;
use serde::Serialize;
use std::fmt;

/// Path git uses for the missing side of an added or deleted file
const DEV_NULL: &str = "/dev/null";

/// All changes to a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub old_path: String,
    pub new_path: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_renamed: bool,
    pub is_binary: bool,
    /// Content-type tag for renderers, see [`language::detect`]
    pub language: &'static str,
    pub hunks: Vec<Hunk>,
}

impl FileChange {
    /// Open a file change from a `diff --git a/OLD b/NEW` header line.
    ///
    /// Either path may be in git's quoted form (`"a/caf\303\251.txt"`). For
    /// unquoted paths the split happens at the last ` b/` so that old paths
    /// containing that sequence still resolve. Returns `None` for anything else.
    pub fn from_header(line: &str) -> Option<Self> {
        let (old, new) = split_header_paths(line.strip_prefix("diff --git ")?)?;
        let old_path = old.strip_prefix("a/")?;
        let new_path = new.strip_prefix("b/")?;
        if old_path.is_empty() || new_path.is_empty() {
            return None;
        }

        Some(FileChange {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
            is_new: false,
            is_deleted: false,
            is_renamed: false,
            is_binary: false,
            language: language::detect(new_path),
            hunks: Vec::new(),
        })
    }

    /// Consume an extended header line (status flags, index lines, `---`/`+++`
    /// path markers). Returns `false` if the line is not recognized.
    pub(super) fn apply_meta(&mut self, line: &str) -> bool {
        if line.starts_with("new file mode") {
            self.is_new = true;
        } else if line.starts_with("deleted file mode") {
            self.is_deleted = true;
        } else if let Some(path) = line.strip_prefix("rename from ") {
            self.is_renamed = true;
            self.old_path = decode_path(path);
        } else if let Some(path) = line.strip_prefix("rename to ") {
            self.is_renamed = true;
            self.new_path = decode_path(path);
            self.language = language::detect(&self.new_path);
        } else if line.starts_with("Binary files") || line.starts_with("GIT binary patch") {
            self.is_binary = true;
        } else if let Some(path) = line.strip_prefix("--- ") {
            if let Some(path) = marker_path(path, "a/") {
                self.old_path = path;
            }
        } else if let Some(path) = line.strip_prefix("+++ ") {
            if let Some(path) = marker_path(path, "b/") {
                self.new_path = path;
            }
        } else {
            return [
                "index ",
                "similarity index",
                "dissimilarity index",
                "old mode",
                "new mode",
            ]
            .iter()
            .any(|prefix| line.starts_with(*prefix));
        }
        true
    }

    /// Path to show for this file: the old path for deletions, otherwise the new path
    pub fn display_path(&self) -> &str {
        let (preferred, other) = if self.is_deleted {
            (&self.old_path, &self.new_path)
        } else {
            (&self.new_path, &self.old_path)
        };
        if preferred.is_empty() { other } else { preferred }
    }
}

/// Path from a `---`/`+++` marker, or `None` for the `/dev/null` sentinel
fn marker_path(raw: &str, side_prefix: &str) -> Option<String> {
    let raw = decode_path(raw.split('\t').next().unwrap_or(raw));
    if raw == DEV_NULL || raw.is_empty() {
        return None;
    }
    Some(raw.strip_prefix(side_prefix).unwrap_or(&raw).to_string())
}

/// Old and new path tokens of a `diff --git` header, unquoted but still
/// carrying their `a/` and `b/` prefixes
fn split_header_paths(paths: &str) -> Option<(String, String)> {
    if paths.starts_with('"') {
        let (old, rest) = unquote(paths)?;
        let new = decode_path(rest.strip_prefix(' ')?);
        return Some((old, new));
    }

    let split = if paths.ends_with('"') {
        paths.rfind(" \"")?
    } else {
        paths.rfind(" b/")?
    };
    Some((paths[..split].to_string(), decode_path(&paths[split + 1..])))
}

/// Unquote a path if git quoted it, otherwise take it as is
fn decode_path(raw: &str) -> String {
    match unquote(raw) {
        Some((path, "")) => path,
        _ => raw.to_string(),
    }
}

/// Decode a leading C-style quoted string, returning it and the text after the
/// closing quote. Octal escapes are bytes of the UTF-8 encoding.
fn unquote(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut bytes = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        match c {
            '"' => {
                let path = String::from_utf8_lossy(&bytes).into_owned();
                return Some((path, &body[index + 1..]));
            }
            '\\' => {
                let (_, escaped) = chars.next()?;
                let byte = match escaped {
                    'a' => 0x07,
                    'b' => 0x08,
                    't' => b'\t',
                    'n' => b'\n',
                    'v' => 0x0b,
                    'f' => 0x0c,
                    'r' => b'\r',
                    '0'..='7' => {
                        let mut value = escaped.to_digit(8)?;
                        for _ in 0..2 {
                            match chars.peek().and_then(|&(_, d)| d.to_digit(8)) {
                                Some(digit) => {
                                    value = value * 8 + digit;
                                    chars.next();
                                }
                                None => break,
                            }
                        }
                        u8::try_from(value).ok()?
                    }
                    other => {
                        push_char(&mut bytes, other);
                        continue;
                    }
                };
                bytes.push(byte);
            }
            other => push_char(&mut bytes, other),
        }
    }

    None
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buffer = [0; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
}

/// `prefix` + `path`, quoted the way git does when the path has characters
/// that would not survive unquoted
fn quoted(prefix: &str, path: &str) -> String {
    if !path.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return format!("{prefix}{path}");
    }

    let mut result = String::from("\"");
    for c in prefix.chars().chain(path.chars()) {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            c if c.is_control() => {
                let mut buffer = [0; 4];
                for byte in c.encode_utf8(&mut buffer).bytes() {
                    result.push_str(&format!("\\{byte:03o}"));
                }
            }
            c => result.push(c),
        }
    }
    result.push('"');
    result
}

impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "diff --git {} {}",
            quoted("a/", &self.old_path),
            quoted("b/", &self.new_path)
        )?;
        if self.is_renamed {
            writeln!(f, "rename from {}", quoted("", &self.old_path))?;
            writeln!(f, "rename to {}", quoted("", &self.new_path))?;
        }
        if self.is_binary {
            writeln!(f, "Binary files differ")?;
            return Ok(());
        }
        if self.hunks.is_empty() {
            return Ok(());
        }

        if self.is_new {
            writeln!(f, "--- {}", DEV_NULL)?;
        } else {
            writeln!(f, "--- {}", quoted("a/", &self.old_path))?;
        }
        if self.is_deleted {
            writeln!(f, "+++ {}", DEV_NULL)?;
        } else {
            writeln!(f, "+++ {}", quoted("b/", &self.new_path))?;
        }

        for hunk in &self.hunks {
            write!(f, "{}", hunk)?;
        }

        Ok(())
    }
}

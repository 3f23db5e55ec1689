use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Tags that survive sanitization. Closed set; everything else is stripped.
const ALLOWED_TAGS: &[&str] = &[
    "h1", "h2", "h3", "p", "br", "b", "strong", "i", "em", "ul", "ol", "li", "a",
];

/// Schemes permitted on `a href`. Scheme-less (relative) URLs also pass.
const ALLOWED_HREF_SCHEMES: &[&str] = &["http", "https", "mailto", "tel"];

/// Elements whose text payload is code or styling, dropped together with
/// the element itself. Children of any other stripped element are kept.
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// Markup that has been through [`sanitize`]. Render paths accept only this
/// type, so raw strings cannot reach a display surface by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SafeHtml(String);

impl SafeHtml {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SafeHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Stored conversations re-enter through here, so hand-edited or corrupt
// files still come out allow-listed.
impl<'de> Deserialize<'de> for SafeHtml {
    fn deserialize<D>(deserializer: D) -> Result<SafeHtml, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(sanitize(&raw))
    }
}

/// Reduces arbitrary markup to the allow-listed subset.
///
/// Total: malformed input degrades to whatever parses, never an error.
/// Idempotent: sanitizing sanitized output is byte-identical.
pub fn sanitize(raw: &str) -> SafeHtml {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'<' {
                i += 1;
            }
            escape_text(&raw[start..i], &mut out);
            continue;
        }

        if let Some(end) = skip_markup_declaration(raw, i) {
            i = end;
            continue;
        }

        let Some(tag) = parse_tag(raw, i) else {
            // Not a parseable tag; show the bracket as text.
            out.push_str("&lt;");
            i += 1;
            continue;
        };
        i = tag.end;

        if !tag.terminated {
            // EOF inside a tag discards the tag, as a browser would.
            continue;
        }

        if ALLOWED_TAGS.contains(&tag.name.as_str()) {
            emit_allowed(&tag, &mut out);
        } else if !tag.closing && RAW_TEXT_TAGS.contains(&tag.name.as_str()) {
            i = skip_raw_text(raw, i, &tag.name);
        }
        // Any other disallowed tag: dropped, descendant content kept.
    }

    SafeHtml(out)
}

/// Whether a media descriptor URL may be fetched. Stricter than `href`:
/// absolute http(s) only, since media loads a resource unprompted.
pub fn is_safe_media_url(url: &str) -> bool {
    let trimmed = url.trim();
    let lowered = trimmed.to_ascii_lowercase();
    (lowered.starts_with("http://") && trimmed.len() > "http://".len())
        || (lowered.starts_with("https://") && trimmed.len() > "https://".len())
}

struct ParsedTag {
    name: String,
    closing: bool,
    attrs: Vec<(String, Option<String>)>,
    end: usize,
    terminated: bool,
}

fn parse_tag(raw: &str, start: usize) -> Option<ParsedTag> {
    let bytes = raw.as_bytes();
    let mut i = start + 1;

    let closing = matches!(bytes.get(i), Some(b'/'));
    if closing {
        i += 1;
    }

    let name_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
        i += 1;
    }
    if i == name_start || !bytes[name_start].is_ascii_alphabetic() {
        return None;
    }
    let name = raw[name_start..i].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut terminated = false;
    loop {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if bytes[i] == b'>' {
            i += 1;
            terminated = true;
            break;
        }

        let attr_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        if i == attr_start {
            // Stray byte (e.g. an unmatched quote); skip it.
            i += 1;
            continue;
        }
        let attr_name = raw[attr_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let value = if matches!(bytes.get(i), Some(b'=')) {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    i += 1;
                    let value_start = i;
                    while i < bytes.len() && bytes[i] != quote {
                        i += 1;
                    }
                    let value = raw[value_start..i].to_string();
                    if i < bytes.len() {
                        i += 1;
                    }
                    Some(value)
                }
                _ => {
                    let value_start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    Some(raw[value_start..i].to_string())
                }
            }
        } else {
            None
        };

        attrs.push((attr_name, value));
    }

    Some(ParsedTag {
        name,
        closing,
        attrs,
        end: i,
        terminated,
    })
}

fn emit_allowed(tag: &ParsedTag, out: &mut String) {
    if tag.closing {
        if tag.name != "br" {
            out.push_str("</");
            out.push_str(&tag.name);
            out.push('>');
        }
        return;
    }

    if tag.name == "a" {
        let href = tag
            .attrs
            .iter()
            .find(|(name, _)| name == "href")
            .and_then(|(_, value)| value.as_deref())
            .map(decode_entities);
        match href {
            Some(url) if is_safe_href(&url) => {
                out.push_str("<a href=\"");
                out.push_str(&escape_attr(&url));
                out.push_str("\" target=\"_blank\" rel=\"noreferrer noopener\">");
            }
            // Disallowed scheme drops the attribute, not the element.
            _ => out.push_str("<a>"),
        }
        return;
    }

    out.push('<');
    out.push_str(&tag.name);
    out.push('>');
}

/// Comments, doctypes and processing instructions are dropped whole.
fn skip_markup_declaration(raw: &str, start: usize) -> Option<usize> {
    let bytes = raw.as_bytes();
    match bytes.get(start + 1) {
        Some(b'!') => {
            if raw[start..].starts_with("<!--") {
                match raw[start + 4..].find("-->") {
                    Some(pos) => Some(start + 4 + pos + 3),
                    None => Some(bytes.len()),
                }
            } else {
                match raw[start..].find('>') {
                    Some(pos) => Some(start + pos + 1),
                    None => Some(bytes.len()),
                }
            }
        }
        Some(b'?') => match raw[start..].find('>') {
            Some(pos) => Some(start + pos + 1),
            None => Some(bytes.len()),
        },
        _ => None,
    }
}

fn skip_raw_text(raw: &str, from: usize, name: &str) -> usize {
    let close = format!("</{name}");
    let lowered = raw[from..].to_ascii_lowercase();
    match lowered.find(&close) {
        Some(pos) => {
            let after = from + pos + close.len();
            match raw[after..].find('>') {
                Some(end) => after + end + 1,
                None => raw.len(),
            }
        }
        None => raw.len(),
    }
}

/// Escapes a text run, leaving well-formed character references alone so
/// already-escaped output survives a second pass unchanged.
fn escape_text(text: &str, out: &mut String) {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'&' => match entity_len(&text[i..]) {
                Some(len) => {
                    out.push_str(&text[i..i + len]);
                    i += len;
                }
                None => {
                    out.push_str("&amp;");
                    i += 1;
                }
            },
            b'<' => {
                out.push_str("&lt;");
                i += 1;
            }
            b'>' => {
                out.push_str("&gt;");
                i += 1;
            }
            b'"' => {
                out.push_str("&quot;");
                i += 1;
            }
            _ => {
                let Some(ch) = text[i..].chars().next() else {
                    break;
                };
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
}

/// Attribute values are emitted from their decoded form, so here every
/// special character is escaped unconditionally.
fn escape_attr(value: &str) -> String {
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

/// Length of a well-formed character reference at the start of `s`, which
/// must begin with `&`.
fn entity_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.get(1) == Some(&b'#') {
        let (start, hex) = match bytes.get(2) {
            Some(b'x') | Some(b'X') => (3, true),
            _ => (2, false),
        };
        let mut i = start;
        while i < bytes.len() && is_entity_digit(bytes[i], hex) {
            i += 1;
        }
        if i > start && bytes.get(i) == Some(&b';') {
            return Some(i + 1);
        }
        return None;
    }

    let mut i = 1;
    while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
        i += 1;
    }
    if i > 1 && bytes.get(i) == Some(&b';') {
        Some(i + 1)
    } else {
        None
    }
}

fn is_entity_digit(byte: u8, hex: bool) -> bool {
    if hex {
        byte.is_ascii_hexdigit()
    } else {
        byte.is_ascii_digit()
    }
}

/// Decodes character references the way an attribute context would, so the
/// scheme check sees what a browser would see (`&#106;avascript:` and
/// friends cannot hide a scheme).
pub(crate) fn decode_entities(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' {
            if let Some((ch, len)) = decode_entity(&s[i..]) {
                out.push(ch);
                i += len;
                continue;
            }
            out.push('&');
            i += 1;
            continue;
        }
        let Some(ch) = s[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn decode_entity(s: &str) -> Option<(char, usize)> {
    let bytes = s.as_bytes();
    if bytes.get(1) == Some(&b'#') {
        let (start, hex) = match bytes.get(2) {
            Some(b'x') | Some(b'X') => (3, true),
            _ => (2, false),
        };
        let mut i = start;
        while i < bytes.len() && i - start < 8 && is_entity_digit(bytes[i], hex) {
            i += 1;
        }
        if i == start {
            return None;
        }
        let radix = if hex { 16 } else { 10 };
        let code = u32::from_str_radix(&s[start..i], radix).ok()?;
        let ch = char::from_u32(code)?;
        // Numeric references decode with or without the trailing
        // semicolon, matching legacy attribute parsing.
        let len = if bytes.get(i) == Some(&b';') { i + 1 } else { i };
        return Some((ch, len));
    }

    for (name, ch) in [
        ("amp", '&'),
        ("lt", '<'),
        ("gt", '>'),
        ("quot", '"'),
        ("apos", '\''),
    ] {
        if s.len() > name.len() + 1
            && s[1..].starts_with(name)
            && bytes[name.len() + 1] == b';'
        {
            return Some((ch, name.len() + 2));
        }
    }
    None
}

/// Scheme policy for `href`. Control and whitespace characters are ignored
/// while scanning (the classic `java\nscript:` evasion); an unresolved
/// reference before the scheme settles rejects the URL outright.
fn is_safe_href(url: &str) -> bool {
    let mut scheme = String::new();
    for ch in url.chars() {
        if ch.is_ascii_control() || ch.is_whitespace() {
            continue;
        }
        match ch {
            '/' | '?' | '#' => return true,
            ':' => {
                let scheme = scheme.to_ascii_lowercase();
                return ALLOWED_HREF_SCHEMES.contains(&scheme.as_str());
            }
            '&' => return false,
            _ => scheme.push(ch),
        }
    }
    true
}

//! Lightweight ES module lexer.
//!
//! Finds import specifier spans without building an AST. Comments, string
//! literals and template literals are skipped, so `"import x from 'y'"` inside
//! a string is not reported. Regex literals are not recognized.

/// One import specifier with its byte span in the source (quotes excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecifier {
    pub specifier: String,
    pub start: usize,
    pub end: usize,
    /// `import("...")` with a string literal argument.
    pub dynamic: bool,
}

/// Result of lexing one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleLexResult {
    /// Imports in source order, including `export ... from` re-exports.
    pub imports: Vec<ImportSpecifier>,
    /// Any static `import`/`export` statement or `import.meta` was seen.
    pub has_module_syntax: bool,
    /// `export default` or `export { x as default }` was seen.
    pub has_default_export: bool,
}

/// Lex `source` for import specifiers and module syntax markers.
#[must_use]
pub fn lex_module(source: &str) -> ModuleLexResult {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut result = ModuleLexResult::default();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') || bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i);
            }
            b'\'' | b'"' => i = skip_string(bytes, i),
            b'`' => i = skip_template(bytes, i),
            b'i' if matches_keyword(bytes, i, b"import") => {
                i = lex_import(source, i + 6, &mut result);
            }
            b'e' if matches_keyword(bytes, i, b"export") => {
                i = lex_export(source, i + 6, &mut result);
            }
            _ => i += 1,
        }
    }

    result
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Keyword at `pos` with word boundaries; a preceding `.` disqualifies it
/// (`foo.import`, `Array.from`).
fn matches_keyword(bytes: &[u8], pos: usize, keyword: &[u8]) -> bool {
    let end = pos + keyword.len();
    if end > bytes.len() || &bytes[pos..end] != keyword {
        return false;
    }
    if pos > 0 && (is_ident_byte(bytes[pos - 1]) || bytes[pos - 1] == b'.') {
        return false;
    }
    !(end < bytes.len() && is_ident_byte(bytes[end]))
}

fn skip_comment(bytes: &[u8], i: usize) -> usize {
    if bytes.get(i + 1) == Some(&b'/') {
        let mut j = i + 2;
        while j < bytes.len() && bytes[j] != b'\n' {
            j += 1;
        }
        j
    } else {
        let mut j = i + 2;
        while j + 1 < bytes.len() && !(bytes[j] == b'*' && bytes[j + 1] == b'/') {
            j += 1;
        }
        (j + 2).min(bytes.len())
    }
}

fn skip_string(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b if b == quote => return j + 1,
            b'\n' => return j,
            _ => j += 1,
        }
    }
    bytes.len()
}

fn skip_template(bytes: &[u8], i: usize) -> usize {
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'`' => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

fn skip_trivia(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
        } else if bytes[i] == b'/' && matches!(bytes.get(i + 1), Some(b'/' | b'*')) {
            i = skip_comment(bytes, i);
        } else {
            break;
        }
    }
    i
}

/// Read a `'...'`/`"..."` literal at `i`; returns (content span, index after).
fn read_literal(source: &str, i: usize) -> Option<(ImportSpecifier, usize)> {
    let bytes = source.as_bytes();
    let quote = *bytes.get(i)?;
    if quote != b'\'' && quote != b'"' {
        return None;
    }
    let end = skip_string(bytes, i);
    if end < i + 2 || bytes[end - 1] != quote {
        return None;
    }
    let (start, stop) = (i + 1, end - 1);
    Some((
        ImportSpecifier {
            specifier: source[start..stop].to_string(),
            start,
            end: stop,
            dynamic: false,
        },
        end,
    ))
}

/// Walk a clause (`X, { a as b }`, `* as ns`) up to `from '<spec>'`.
fn read_from_clause(source: &str, mut i: usize) -> Option<(ImportSpecifier, usize)> {
    let bytes = source.as_bytes();
    while i < bytes.len() {
        match bytes[i] {
            b';' => return None,
            b'\'' | b'"' | b'`' => return None,
            b'/' if matches!(bytes.get(i + 1), Some(b'/' | b'*')) => i = skip_comment(bytes, i),
            b'f' if matches_keyword(bytes, i, b"from") => {
                let at = skip_trivia(bytes, i + 4);
                return read_literal(source, at);
            }
            _ => i += 1,
        }
    }
    None
}

fn lex_import(source: &str, after_keyword: usize, result: &mut ModuleLexResult) -> usize {
    let bytes = source.as_bytes();
    let i = skip_trivia(bytes, after_keyword);
    match bytes.get(i) {
        Some(b'(') => {
            let at = skip_trivia(bytes, i + 1);
            if let Some((mut spec, next)) = read_literal(source, at) {
                let close = skip_trivia(bytes, next);
                if matches!(bytes.get(close), Some(b')' | b',')) {
                    spec.dynamic = true;
                    result.imports.push(spec);
                }
                return next;
            }
            i + 1
        }
        Some(b'.') => {
            result.has_module_syntax = true;
            i + 1
        }
        Some(b'\'' | b'"') => {
            result.has_module_syntax = true;
            match read_literal(source, i) {
                Some((spec, next)) => {
                    result.imports.push(spec);
                    next
                }
                None => i + 1,
            }
        }
        Some(_) => {
            result.has_module_syntax = true;
            match read_from_clause(source, i) {
                Some((spec, next)) => {
                    result.imports.push(spec);
                    next
                }
                None => i,
            }
        }
        None => i,
    }
}

fn lex_export(source: &str, after_keyword: usize, result: &mut ModuleLexResult) -> usize {
    let bytes = source.as_bytes();
    result.has_module_syntax = true;
    let i = skip_trivia(bytes, after_keyword);

    if matches_keyword(bytes, i, b"default") {
        result.has_default_export = true;
        return i + 7;
    }

    match bytes.get(i) {
        Some(b'{') => {
            let close = source[i..].find('}').map_or(bytes.len(), |rel| i + rel);
            let names = &source[i + 1..close.min(source.len())];
            if names
                .split(',')
                .any(|n| n.split_whitespace().last() == Some("default"))
            {
                result.has_default_export = true;
            }
            let after = skip_trivia(bytes, (close + 1).min(bytes.len()));
            if matches_keyword(bytes, after, b"from") {
                let at = skip_trivia(bytes, after + 4);
                if let Some((spec, next)) = read_literal(source, at) {
                    result.imports.push(spec);
                    return next;
                }
            }
            after
        }
        Some(b'*') => match read_from_clause(source, i + 1) {
            Some((spec, next)) => {
                result.imports.push(spec);
                next
            }
            None => i + 1,
        },
        _ => i,
    }
}

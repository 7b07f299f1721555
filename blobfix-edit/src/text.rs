//! Text and raw-byte substitutions.

use crate::error::{FixupErrorKind, OpResult};
use regex::Regex;

fn as_text(bytes: Vec<u8>) -> OpResult<String> {
    String::from_utf8(bytes).map_err(|_| FixupErrorKind::NotText)
}

pub fn regex_replace(bytes: Vec<u8>, pattern: &str, replacement: &str) -> OpResult<Vec<u8>> {
    let re = Regex::new(pattern).map_err(|source| FixupErrorKind::PatternCompile {
        pattern: pattern.to_string(),
        source,
    })?;
    let text = as_text(bytes)?;
    Ok(re.replace_all(&text, replacement).into_owned().into_bytes())
}

pub fn binary_regex_replace(bytes: Vec<u8>, pattern: &str, replacement: &str) -> OpResult<Vec<u8>> {
    let re = regex::bytes::Regex::new(pattern).map_err(|source| {
        FixupErrorKind::PatternCompile {
            pattern: pattern.to_string(),
            source,
        }
    })?;
    Ok(re.replace_all(&bytes, replacement.as_bytes()).into_owned())
}

pub fn add_line_if_missing(bytes: Vec<u8>, line: &str) -> OpResult<Vec<u8>> {
    let mut text = as_text(bytes)?;
    if text.lines().any(|l| l == line) {
        return Ok(text.into_bytes());
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(line);
    text.push('\n');
    Ok(text.into_bytes())
}

/// Move the first `<?xml ...?>` declaration to the top of the document.
pub fn fix_xml(bytes: Vec<u8>) -> OpResult<Vec<u8>> {
    let text = as_text(bytes)?;
    let mut lines: Vec<&str> = text.split_inclusive('\n').collect();

    let Some(pos) = lines
        .iter()
        .position(|l| l.trim_start().starts_with("<?xml"))
    else {
        return Ok(text.into_bytes());
    };
    if pos == 0 {
        return Ok(text.into_bytes());
    }

    let decl = lines.remove(pos);
    let mut out = String::with_capacity(text.len() + 1);
    out.push_str(decl.trim_start());
    if !out.ends_with('\n') {
        out.push('\n');
    }
    for l in lines {
        out.push_str(l);
    }
    Ok(out.into_bytes())
}

//! Named patch sets and the structured-container patchers that consume them.
//!
//! A patch set is a directory of unified diffs (`<root>/<id>/*.patch`), applied in file-name
//! order to the decoded tree of a container such as an APK.

use crate::error::{FixupErrorKind, OpResult};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use glob::{Pattern, glob};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// What a single file diff does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Modify,
    Create,
    Delete,
}

/// One file's worth of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Target path relative to the container root.
    pub path: String,
    pub kind: PatchKind,
    /// The diff text starting at its `---` header.
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSet {
    pub id: String,
    pub patches: Vec<FilePatch>,
}

/// Looks patch sets up by identifier.
pub trait PatchSetResolver: Send + Sync {
    /// `Ok(None)` when no set with this identifier exists.
    fn resolve(&self, id: &str) -> OpResult<Option<PatchSet>>;
}

/// Patch sets stored as `<root>/<id>/*.patch`. Earlier roots win.
#[derive(Debug, Clone, Default)]
pub struct DirPatchSets {
    roots: Vec<Utf8PathBuf>,
}

impl DirPatchSets {
    pub fn new(roots: Vec<Utf8PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    fn load_dir(&self, id: &str, dir: &Utf8Path) -> OpResult<PatchSet> {
        let pattern = Utf8PathBuf::from(Pattern::escape(dir.as_str())).join("*.patch");
        debug!(pattern = %pattern, "scanning patch set");

        let mut files = Vec::new();
        let entries = glob(pattern.as_str()).map_err(|e| FixupErrorKind::PatchRejected {
            path: pattern.to_string(),
            message: e.to_string(),
        })?;
        for entry in entries {
            let path = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            files.push(path);
        }
        files.sort();

        let mut patches = Vec::new();
        for file in files {
            let text = fs::read_to_string(&file)?;
            patches.extend(split_patch_file(&text));
        }

        Ok(PatchSet {
            id: id.to_string(),
            patches,
        })
    }
}

impl PatchSetResolver for DirPatchSets {
    fn resolve(&self, id: &str) -> OpResult<Option<PatchSet>> {
        if !is_safe_relative(id) {
            return Ok(None);
        }
        for root in &self.roots {
            let dir = root.join(id);
            if dir.is_dir() {
                return self.load_dir(id, &dir).map(Some);
            }
        }
        Ok(None)
    }
}

/// Patch sets held in memory, for tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPatchSets {
    sets: BTreeMap<String, PatchSet>,
}

impl InMemoryPatchSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, diff_text: &str) {
        let id = id.into();
        let set = PatchSet {
            id: id.clone(),
            patches: split_patch_file(diff_text),
        };
        self.sets.insert(id, set);
    }
}

impl PatchSetResolver for InMemoryPatchSets {
    fn resolve(&self, id: &str) -> OpResult<Option<PatchSet>> {
        Ok(self.sets.get(id).cloned())
    }
}

/// Split a (possibly multi-file, possibly git-formatted) unified diff into per-file patches.
///
/// Lines outside a `---`/`+++` delimited section (`diff --git`, `index`, mode lines, mail
/// headers) are dropped. Inside a hunk, lines are consumed by the `@@` header's counts, so
/// removed `-- ` or added `++ ` lines are never mistaken for file headers.
pub fn split_patch_file(text: &str) -> Vec<FilePatch> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut out = Vec::new();
    let mut current: Option<(String, PatchKind, String)> = None;
    // Old and new lines still owed by the open hunk.
    let mut hunk: Option<(u64, u64)> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let next = lines.get(i + 1).copied().unwrap_or("");

        if let Some((old, new)) = hunk.as_mut() {
            if let Some((_, _, body)) = current.as_mut() {
                body.push_str(line);
            }
            match line.as_bytes().first() {
                Some(b'-') => *old = old.saturating_sub(1),
                Some(b'+') => *new = new.saturating_sub(1),
                Some(b'\\') => {}
                _ => {
                    *old = old.saturating_sub(1);
                    *new = new.saturating_sub(1);
                }
            }
            let done = *old == 0 && *new == 0;
            if done {
                hunk = None;
            }
            i += 1;
            continue;
        }

        if line.starts_with("--- ") && next.starts_with("+++ ") {
            if let Some(done) = current.take() {
                out.push(finish(done));
            }
            let old = header_path(&line[4..]);
            let new = header_path(&next[4..]);
            let (path, kind) = match (old.as_deref(), new.as_deref()) {
                (None, Some(p)) => (p.to_string(), PatchKind::Create),
                (Some(p), None) => (p.to_string(), PatchKind::Delete),
                (_, Some(p)) => (p.to_string(), PatchKind::Modify),
                (None, None) => (String::new(), PatchKind::Modify),
            };
            let mut body = String::new();
            body.push_str(line);
            body.push_str(next);
            current = Some((path, kind, body));
            i += 2;
            continue;
        }

        if line.starts_with("diff ") {
            if let Some(done) = current.take() {
                out.push(finish(done));
            }
        } else if let Some((_, _, body)) = current.as_mut() {
            body.push_str(line);
            hunk = hunk_counts(line).filter(|(old, new)| old + new > 0);
        }
        i += 1;
    }
    if let Some(done) = current.take() {
        out.push(finish(done));
    }
    out
}

/// Old and new line counts from a `@@ -a,b +c,d @@` header. An omitted count means one line.
fn hunk_counts(line: &str) -> Option<(u64, u64)> {
    let ranges = line.strip_prefix("@@ -")?.split_once(" @@")?.0;
    let (old, new) = ranges.split_once(" +")?;
    Some((range_len(old)?, range_len(new)?))
}

fn range_len(range: &str) -> Option<u64> {
    match range.split_once(',') {
        Some((_, len)) => len.parse().ok(),
        None => range.parse::<u64>().ok().map(|_| 1),
    }
}

fn finish((path, kind, diff): (String, PatchKind, String)) -> FilePatch {
    FilePatch { path, kind, diff }
}

/// Path from a `---`/`+++` header, without the `a/`/`b/` prefix or a trailing timestamp.
/// `None` for `/dev/null`.
fn header_path(rest: &str) -> Option<String> {
    let name = rest.trim_end_matches(['\r', '\n']);
    let name = name.split('\t').next().unwrap_or(name).trim();
    if name == "/dev/null" {
        return None;
    }
    let name = name
        .strip_prefix("a/")
        .or_else(|| name.strip_prefix("b/"))
        .unwrap_or(name);
    Some(name.to_string())
}

fn is_safe_relative(path: &str) -> bool {
    let p = Path::new(path);
    !path.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Apply every file patch of `set` under `root`, in order.
pub fn apply_patch_set_to_tree(root: &Path, set: &PatchSet) -> OpResult<()> {
    for fp in &set.patches {
        let rejected = |message: String| FixupErrorKind::PatchRejected {
            path: fp.path.clone(),
            message,
        };
        if !is_safe_relative(&fp.path) {
            return Err(rejected("path escapes the container root".to_string()));
        }
        let target = root.join(&fp.path);
        let patch = diffy::Patch::from_str(&fp.diff).map_err(|e| rejected(e.to_string()))?;

        let base = match fp.kind {
            PatchKind::Create => String::new(),
            PatchKind::Modify | PatchKind::Delete => {
                if !target.is_file() {
                    return Err(rejected("target file does not exist".to_string()));
                }
                fs::read_to_string(&target)?
            }
        };
        let patched = diffy::apply(&base, &patch).map_err(|e| rejected(e.to_string()))?;

        debug!(patch_set = %set.id, path = %fp.path, kind = ?fp.kind, "applying file patch");
        match fp.kind {
            PatchKind::Delete => fs::remove_file(&target)?,
            PatchKind::Create | PatchKind::Modify => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, patched)?;
            }
        }
    }
    Ok(())
}

/// Decodes a container, applies a patch set to the decoded tree and re-encodes it.
pub trait StructuredPatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn patch(&self, bytes: Vec<u8>, set: &PatchSet) -> OpResult<Vec<u8>>;
}

/// APK round trip through `apktool d` / `apktool b`.
#[derive(Debug, Clone)]
pub struct ApktoolPatcher {
    program: PathBuf,
}

impl ApktoolPatcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn locate() -> Option<Self> {
        which::which("apktool").ok().map(Self::new)
    }

    fn run(&self, args: &[&OsStr]) -> OpResult<()> {
        debug!(program = %self.program.display(), ?args, "running apktool");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| FixupErrorKind::tool("apktool", e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(FixupErrorKind::tool(
                "apktool",
                format!(
                    "exit {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ))
        }
    }
}

impl StructuredPatcher for ApktoolPatcher {
    fn name(&self) -> &'static str {
        "apktool"
    }

    fn patch(&self, bytes: Vec<u8>, set: &PatchSet) -> OpResult<Vec<u8>> {
        let work = tempfile::tempdir()?;
        let input = work.path().join("in.apk");
        let tree = work.path().join("decoded");
        let output = work.path().join("out.apk");
        fs::write(&input, &bytes)?;

        self.run(&[
            OsStr::new("d"),
            OsStr::new("-f"),
            OsStr::new("-o"),
            tree.as_os_str(),
            input.as_os_str(),
        ])?;
        apply_patch_set_to_tree(&tree, set)?;
        self.run(&[
            OsStr::new("b"),
            OsStr::new("-o"),
            output.as_os_str(),
            tree.as_os_str(),
        ])?;

        Ok(fs::read(&output)?)
    }
}

/// Stands in when no container tool is installed. Every patch attempt fails with a tool error.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePatcher;

impl StructuredPatcher for UnavailablePatcher {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn patch(&self, _bytes: Vec<u8>, set: &PatchSet) -> OpResult<Vec<u8>> {
        Err(FixupErrorKind::tool(
            "apktool",
            format!("not found on PATH; cannot apply patch set {}", set.id),
        ))
    }
}

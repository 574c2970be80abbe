//! SF-016: Handler registry.
//!
//! An ordered list of roots, searched first-match-wins. Directory roots hold
//! executables under `assignments/` and `functions/`; the built-in root holds
//! handlers registered in code. Built once per run, read-only afterwards.

use super::script::ScriptHandler;
use super::{builtin, Handler};
use crate::core::types::HandlerKind;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A place handlers are looked up.
pub enum HandlerRoot {
    Directory(PathBuf),
    Builtin(BuiltinRoot),
}

impl HandlerRoot {
    fn lookup(&self, kind: HandlerKind, name: &str) -> Option<Arc<dyn Handler>> {
        match self {
            Self::Directory(dir) => find_executable(&dir.join(kind.dir_name()), name)
                .map(|path| Arc::new(ScriptHandler::new(path)) as Arc<dyn Handler>),
            Self::Builtin(root) => root.get(kind, name),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Directory(dir) => dir.display().to_string(),
            Self::Builtin(_) => "<builtin>".to_string(),
        }
    }
}

/// Handlers registered in code.
#[derive(Default)]
pub struct BuiltinRoot {
    handlers: IndexMap<(HandlerKind, String), Arc<dyn Handler>>,
}

impl BuiltinRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard library of report assignments and list functions.
    pub fn standard() -> Self {
        let mut root = Self::new();
        for (kind, name, handler) in builtin::all() {
            root.register(kind, name, handler);
        }
        root
    }

    pub fn register(&mut self, kind: HandlerKind, name: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert((kind, name.to_string()), handler);
    }

    fn get(&self, kind: HandlerKind, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&(kind, name.to_string())).cloned()
    }
}

/// Ordered handler roots.
#[derive(Default)]
pub struct Registry {
    roots: Vec<HandlerRoot>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, root: HandlerRoot) -> Self {
        self.roots.push(root);
        self
    }

    /// `exec_paths` in order, then `<cwd>/executors` if present, then the
    /// built-in root.
    pub fn standard(exec_paths: &[PathBuf], cwd: &Path) -> Self {
        let mut registry = Self::new();
        for dir in exec_paths {
            registry = registry.with_root(HandlerRoot::Directory(dir.clone()));
        }
        let local = cwd.join("executors");
        if local.is_dir() && !exec_paths.contains(&local) {
            registry = registry.with_root(HandlerRoot::Directory(local));
        }
        registry.with_root(HandlerRoot::Builtin(BuiltinRoot::standard()))
    }

    /// First root that can service `(kind, name)`.
    pub fn lookup(&self, kind: HandlerKind, name: &str) -> Option<Arc<dyn Handler>> {
        self.resolve(kind, name).map(|(_, handler)| handler)
    }

    /// Like `lookup`, also naming the root that served the handler.
    pub fn resolve(&self, kind: HandlerKind, name: &str) -> Option<(String, Arc<dyn Handler>)> {
        let found = self.roots.iter().find_map(|root| {
            root.lookup(kind, name)
                .map(|handler| (root.describe(), handler))
        });
        if let Some((root, _)) = &found {
            tracing::debug!(%kind, name, root = %root, "resolved handler");
        }
        found
    }

    /// Root descriptions in search order.
    pub fn roots(&self) -> Vec<String> {
        self.roots.iter().map(HandlerRoot::describe).collect()
    }
}

/// Split a `;`/`,` separated path list; relative entries resolve from `cwd`.
pub fn parse_exec_paths(raw: &str, cwd: &Path) -> Vec<PathBuf> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let path = Path::new(p);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            }
        })
        .collect()
}

/// `<dir>/<name>` or `<dir>/<name>.<ext>`, whichever is a usable executable.
/// An exact name wins; otherwise extensions are tried in sorted order.
/// Entries that exist but cannot be loaded are skipped.
fn find_executable(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if is_loadable(&exact) {
        return Some(exact);
    }
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.file_stem().is_some_and(|s| s == name) && p.extension().is_some())
        .collect();
    candidates.sort();
    candidates.into_iter().find(|p| is_loadable(p))
}

/// Leading bytes of files the OS will start directly: an interpreter line,
/// ELF, and Mach-O (thin and fat, either byte order).
#[cfg(unix)]
const PROGRAM_MAGIC: &[&[u8]] = &[
    b"#!",
    b"\x7fELF",
    &[0xfe, 0xed, 0xfa, 0xce],
    &[0xfe, 0xed, 0xfa, 0xcf],
    &[0xce, 0xfa, 0xed, 0xfe],
    &[0xcf, 0xfa, 0xed, 0xfe],
    &[0xca, 0xfe, 0xba, 0xbe],
];

#[cfg(unix)]
fn is_loadable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    let executable = std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false);
    executable && has_program_header(path)
}

#[cfg(not(unix))]
fn is_loadable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn has_program_header(path: &Path) -> bool {
    use std::io::Read;
    let mut head = [0u8; 4];
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut len = 0;
    while len < head.len() {
        match file.read(&mut head[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(_) => return false,
        }
    }
    PROGRAM_MAGIC.iter().any(|magic| head[..len].starts_with(magic))
}

//! Loading schema files into a [`Root`].
//!
//! A [`Loader`] fetches files through a [`Fetch`] implementation, feeds
//! JSON descriptors straight into the tree and hands `.proto` sources to a
//! pluggable [`ProtoParser`]. Imports are followed recursively and every
//! file is fetched at most once.

use crate::error::{Error, Result};
use crate::schema::{NodeId, ProtoSyntax, Root};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Source of schema file contents
pub trait Fetch {
    /// Returns the contents of the file called `name`
    fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

impl<F> Fetch for F
where
    F: Fn(&str) -> Result<Vec<u8>>,
{
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        self(name)
    }
}

/// Reads files from the local filesystem, trying each include path in turn
#[derive(Debug, Clone, Default)]
pub struct FsFetch {
    include_paths: Vec<PathBuf>,
}

impl FsFetch {
    /// Creates a fetcher that resolves names against `include_paths`
    pub fn new<I, P>(include_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            include_paths: include_paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds another include path
    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    /// The first existing file `name` resolves to
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() || self.include_paths.is_empty() {
            return direct.is_file().then(|| direct.to_path_buf());
        }
        self.include_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

impl Fetch for FsFetch {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name).ok_or_else(|| {
            Error::fetch(
                name,
                io::Error::new(io::ErrorKind::NotFound, "not found in any include path"),
            )
        })?;
        std::fs::read(&path).map_err(|e| Error::fetch(path, e))
    }
}

/// What a `.proto` parser hands back for one file
#[derive(Debug, Clone, Default)]
pub struct ParsedSchema {
    /// Declared package, if any
    pub package: Option<String>,
    /// Regular imports
    pub imports: Vec<String>,
    /// Weak imports; missing ones may be skipped
    pub weak_imports: Vec<String>,
    /// Declared syntax
    pub syntax: Option<ProtoSyntax>,
    /// The file's definitions as a JSON descriptor rooted at the tree root
    pub root: JsonValue,
}

/// A `.proto` source parser
pub trait ProtoParser {
    /// Parses the contents of one file
    fn parse(&self, source: &str, config: &LoaderConfig) -> Result<ParsedSchema>;
}

/// Loader settings
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Keep field names as written instead of converting them to camel case
    pub keep_case: bool,
    /// Maximum import nesting
    pub max_depth: usize,
    /// Skip weak imports that cannot be fetched
    pub tolerate_missing_weak: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            keep_case: false,
            max_depth: 64,
            tolerate_missing_weak: true,
        }
    }
}

impl LoaderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether field names keep their case
    pub fn keep_case(mut self, keep: bool) -> Self {
        self.keep_case = keep;
        self
    }

    /// Sets the maximum import nesting
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets whether missing weak imports are skipped
    pub fn tolerate_missing_weak(mut self, tolerate: bool) -> Self {
        self.tolerate_missing_weak = tolerate;
        self
    }
}

/// Loads schema files and their imports into a tree
pub struct Loader<F> {
    fetch: F,
    parser: Option<Box<dyn ProtoParser>>,
    config: LoaderConfig,
    loaded: HashSet<String>,
}

impl<F: Fetch> Loader<F> {
    /// Creates a loader without a `.proto` parser
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            parser: None,
            config: LoaderConfig::default(),
            loaded: HashSet::new(),
        }
    }

    /// Sets the parser used for non-JSON files
    pub fn with_parser(mut self, parser: impl ProtoParser + 'static) -> Self {
        self.parser = Some(Box::new(parser));
        self
    }

    /// Sets the loader config
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Names of every file loaded so far
    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(String::as_str)
    }

    /// Loads `names` and everything they import into `root`.
    ///
    /// Files ending in `.json` are read as JSON descriptors; anything else
    /// goes through the parser. The tree is left unresolved.
    pub fn load(&mut self, root: &mut Root, names: &[&str]) -> Result<()> {
        for name in names {
            self.load_file(root, name, 0, false)?;
        }
        Ok(())
    }

    fn load_file(&mut self, root: &mut Root, name: &str, depth: usize, weak: bool) -> Result<()> {
        if self.loaded.contains(name) {
            return Ok(());
        }
        if depth > self.config.max_depth {
            return Err(Error::invalid_descriptor(
                name,
                format!("import nesting deeper than {}", self.config.max_depth),
            ));
        }
        let contents = match self.fetch.fetch(name) {
            Ok(contents) => contents,
            Err(err) if weak && self.config.tolerate_missing_weak => {
                warn!(file = name, error = %err, "skipping missing weak import");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        self.loaded.insert(name.to_string());
        debug!(file = name, bytes = contents.len(), depth, "loading schema file");

        if name.ends_with(".json") {
            let json: JsonValue = serde_json::from_slice(&contents)?;
            return root.add_json(NodeId::ROOT, &json);
        }

        let source = String::from_utf8(contents)
            .map_err(|_| Error::invalid_descriptor(name, "source is not valid UTF-8"))?;
        let parser = self
            .parser
            .as_ref()
            .ok_or_else(|| Error::invalid_descriptor(name, "no parser configured for source files"))?;
        let parsed = parser.parse(&source, &self.config)?;
        root.add_json(NodeId::ROOT, &parsed.root)?;
        if let Some(syntax) = parsed.syntax {
            apply_syntax(root, &parsed, syntax)?;
        }

        for import in &parsed.imports {
            self.load_file(root, import, depth + 1, false)?;
        }
        for import in &parsed.weak_imports {
            self.load_file(root, import, depth + 1, true)?;
        }
        Ok(())
    }
}

/// Records a file's syntax on its package, or on each top-level object
/// when the file has no package
fn apply_syntax(root: &mut Root, parsed: &ParsedSchema, syntax: ProtoSyntax) -> Result<()> {
    if let Some(package) = parsed.package.as_deref().filter(|p| !p.is_empty()) {
        let id = root.define_namespace(package)?;
        return root.set_syntax(id, syntax);
    }
    let names: Vec<&String> = parsed
        .root
        .get("nested")
        .and_then(JsonValue::as_object)
        .map(|nested| nested.keys().collect())
        .unwrap_or_default();
    for name in names {
        if let Some(id) = root.child(NodeId::ROOT, name) {
            root.set_syntax(id, syntax)?;
        }
    }
    Ok(())
}

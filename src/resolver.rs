//! Symbol table construction and file-level dependency resolution.
//!
//! Analysis produces symbol-level dependencies; compilation needs
//! file-level ones. The symbol table maps every defined symbol to its
//! defining file, the resolver rewrites each file's symbol deps as file
//! deps, and sub-tree extraction prunes the graph to what is reachable
//! from the root symbol.

use crate::analysis::AnalysedFile;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

/// The full per-run dependency graph, and any sub-graph of it. Nodes are
/// indexed by path; edges live in each node's `file_deps`.
pub type DepGraph = BTreeMap<PathBuf, AnalysedFile>;

/// A symbol that was defined more than once. The first definer stays bound.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DuplicateSymbol {
    pub symbol: String,
    pub bound: PathBuf,
    pub ignored: PathBuf,
}

/// Maps every defined symbol to its defining file.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, PathBuf>,
    pub duplicates: Vec<DuplicateSymbol>,
}

impl SymbolTable {
    /// Folds the symbol definitions of all analysed files. Duplicate
    /// definitions are recorded and warned; the first seen wins.
    pub fn build<'a>(files: impl IntoIterator<Item = &'a AnalysedFile>) -> Self {
        let mut table = Self::default();
        for af in files {
            for symbol in &af.symbol_defs {
                match table.symbols.get(symbol) {
                    Some(bound) => table.duplicates.push(DuplicateSymbol {
                        symbol: symbol.clone(),
                        bound: bound.clone(),
                        ignored: af.path.clone(),
                    }),
                    None => {
                        table.symbols.insert(symbol.clone(), af.path.clone());
                    }
                }
            }
        }
        for dup in &table.duplicates {
            warn!(
                "duplicate symbol '{}' defined in {}, already found in {}",
                dup.symbol,
                dup.ignored.display(),
                dup.bound.display()
            );
        }
        table
    }

    /// Symbol lookup, case-insensitive.
    pub fn resolve(&self, name: &str) -> Option<&Path> {
        self.symbols.get(&name.to_lowercase()).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Rewrites every file's symbol dependencies as file dependencies and
/// attaches commented C file deps. Returns the symbols with no definer,
/// reported in aggregate.
pub fn resolve_file_deps(graph: &mut DepGraph, table: &SymbolTable) -> BTreeSet<String> {
    // commented deps are looked up by C file basename
    let mut c_by_basename: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for path in graph.keys() {
        if crate::sources::SourceKind::of(path) == crate::sources::SourceKind::C {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                c_by_basename.entry(name.to_lowercase()).or_default().push(path.clone());
            }
        }
    }

    let mut unresolved = BTreeSet::new();
    for af in graph.values_mut() {
        for dep in af.symbol_deps.clone() {
            match table.resolve(&dep) {
                // self-dependencies are silently dropped by add_file_dep
                Some(path) => af.add_file_dep(path.to_path_buf()),
                None => {
                    trace!("(might not matter) no definer for {dep} wanted by {}", af.path.display());
                    unresolved.insert(dep);
                }
            }
        }

        for basename in af.commented_file_deps.clone() {
            match c_by_basename.get(&basename).map(Vec::as_slice) {
                Some([path]) => af.add_file_dep(path.clone()),
                Some(candidates) => warn!(
                    "commented dependency '{basename}' of {} is ambiguous: {candidates:?}",
                    af.path.display()
                ),
                None => {
                    warn!(
                        "no C file found for commented dependency '{basename}' of {}",
                        af.path.display()
                    );
                }
            }
        }
    }

    if !unresolved.is_empty() {
        warn!("{} symbol dependencies not found", unresolved.len());
    }
    unresolved
}

/// The result of pruning the graph to one root.
#[derive(Clone, Debug, Default)]
pub struct SubTree {
    pub tree: DepGraph,
    /// File deps referenced from the tree but absent from the source tree.
    pub missing: BTreeSet<PathBuf>,
}

/// Extracts the sub-graph reachable from `root` by walking `file_deps`
/// depth-first. Revisiting a node short-circuits; missing dependencies are
/// collected, not fatal.
pub fn extract_sub_tree(graph: &DepGraph, root: &Path) -> SubTree {
    let mut result = SubTree::default();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        if result.tree.contains_key(&path) {
            continue;
        }
        let Some(node) = graph.get(&path) else {
            result.missing.insert(path);
            continue;
        };
        stack.extend(node.file_deps.iter().cloned());
        result.tree.insert(path, node.clone());
    }

    if !result.missing.is_empty() {
        warn!("{} has missing deps: {:?}", root.display(), result.missing);
    }
    result
}

/// Forces symbols that are reached only through constructs the analyser
/// cannot see (e.g. single-line conditional calls) into the build tree,
/// together with everything they need.
pub fn add_unreferenced_deps(
    unreferenced: &[String],
    table: &SymbolTable,
    graph: &DepGraph,
    build_tree: &mut SubTree,
) {
    if unreferenced.is_empty() {
        return;
    }
    info!("adding {} unreferenced dependencies", unreferenced.len());

    for symbol in unreferenced {
        let Some(path) = table.resolve(symbol) else {
            warn!("no file found for unreferenced dependency '{symbol}'");
            continue;
        };
        if build_tree.tree.contains_key(path) {
            debug!(
                "file {} for unreferenced dependency '{symbol}' is already in the build tree",
                path.display()
            );
            continue;
        }
        let sub = extract_sub_tree(graph, path);
        build_tree.tree.extend(sub.tree);
        build_tree.missing.extend(sub.missing);
    }
}

/// Reports every dependency of the tree that the tree cannot satisfy.
/// Unknown code means the build is expected to fail at compile or link.
pub fn validate_build_tree(tree: &DepGraph) -> BTreeSet<PathBuf> {
    let mut missing = BTreeSet::new();
    for af in tree.values() {
        missing.extend(af.file_deps.iter().filter(|dep| !tree.contains_key(*dep)).cloned());
    }
    if !missing.is_empty() {
        warn!(
            "unknown dependencies, expecting build to fail: {}",
            missing.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
        );
    }
    missing
}

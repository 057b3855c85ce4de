//! Directory-tree locality between catalogued files.

use std::path::{Component, Path, PathBuf};

use crate::affinity::PathContext;

/// Supplies the optional locality input for a pair of track paths.
pub trait PathDistance: Sync {
    fn context(&self, a: &str, b: &str) -> Option<PathContext>;
}

/// Distance measured in directory hops between two files' parent
/// directories, through their deepest common ancestor under `root`.
#[derive(Debug, Clone)]
pub struct PathTree {
    root: PathBuf,
    max_depth: usize,
}

impl PathTree {
    /// Build a tree rooted at `root`, sized by the deepest parent directory
    /// among `paths`. Paths outside `root` are ignored.
    pub fn new<'a>(root: impl Into<PathBuf>, paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tree = Self {
            root: root.into(),
            max_depth: 0,
        };
        let max_depth = paths
            .into_iter()
            .filter_map(|p| tree.dirs(p))
            .map(|d| d.len())
            .max()
            .unwrap_or(0);
        tree.max_depth = max_depth;
        tree
    }

    /// Largest possible hop count: down from the deepest directory to the
    /// root and back down again.
    pub fn tree_depth(&self) -> f64 {
        (2 * self.max_depth) as f64
    }

    /// Hops between the parent directories of `a` and `b`, or `None` if
    /// either lies outside the root.
    pub fn distance(&self, a: &str, b: &str) -> Option<usize> {
        let da = self.dirs(a)?;
        let db = self.dirs(b)?;
        let common = da.iter().zip(&db).take_while(|(x, y)| x == y).count();
        Some(da.len() - common + db.len() - common)
    }

    /// Directory components between the root and the file.
    fn dirs(&self, path: &str) -> Option<Vec<String>> {
        let parent = Path::new(path).parent()?;
        let rel = parent.strip_prefix(&self.root).ok()?;
        Some(
            rel.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect(),
        )
    }
}

impl PathDistance for PathTree {
    fn context(&self, a: &str, b: &str) -> Option<PathContext> {
        let tree_depth = self.tree_depth();
        if tree_depth <= 0.0 {
            return None;
        }
        let distance = self.distance(a, b)? as f64;
        Some(PathContext {
            distance,
            tree_depth,
        })
    }
}

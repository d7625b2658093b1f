//! Path helpers shared by the catalog and the storage engine
//!
//! Pure functions: canonical path form, directory-depth derivation, the
//! parent-before-child level ordering that backs the upload pipeline, and
//! recovery of in-bucket paths from the backend's content-addressed form.

/// Reserved marker filename that makes empty folders representable in the
/// backend. Hidden from directory listings.
pub const META_FILE_NAME: &str = ".keep";

/// Canonicalize a user-supplied path to the backend's expected form
///
/// Leading `/`, single separators, no trailing `/`, trimmed segments.
/// The bucket root is `/`.
pub fn sanitize_path(path: &str) -> String {
    let joined = path
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined)
}

/// Number of segments in a sanitized path; the bucket root has depth 0
pub fn path_depth(path: &str) -> usize {
    sanitize_path(path)
        .split('/')
        .filter(|segment| !segment.is_empty())
        .count()
}

/// Whether the path sits directly under the bucket root
pub fn is_top_level_path(path: &str) -> bool {
    path_depth(path) <= 1
}

/// The containing directory of a path; the parent of a top-level path is `/`
pub fn parent_path(path: &str) -> String {
    let sanitized = sanitize_path(path);
    match sanitized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => sanitized[..idx].to_string(),
    }
}

/// Join a directory path and an entry name
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Whether a name is the reserved folder marker
pub fn is_meta_file_name(name: &str) -> bool {
    name == META_FILE_NAME
}

/// Recover the in-bucket path from the backend's content-addressed form
///
/// The backend reports item paths as `/ipfs/<cid>/a/b.txt` (or `/ipns/...`);
/// the catalog keys on the `/a/b.txt` part. Returns `None` when the input is
/// not in that form.
pub fn file_path_from_backend_path(raw: &str) -> Option<String> {
    let mut segments = raw.split('/').filter(|segment| !segment.is_empty());
    match segments.next() {
        Some("ipfs") | Some("ipns") => {
            segments.next()?;
            let rest = segments.collect::<Vec<_>>().join("/");
            Some(format!("/{}", rest))
        }
        _ => None,
    }
}

/// A file set grouped by containing directory, ordered parent-before-child
///
/// Each level holds the items of exactly one directory; levels are visited
/// shallowest directory first, so a folder is always processed before any
/// file beneath it. Groups are never empty.
#[derive(Debug)]
pub struct PathLevels<T> {
    levels: Vec<Vec<T>>,
}

impl<T> PathLevels<T> {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[T]> {
        self.levels.iter().map(|level| level.as_slice())
    }
}

impl<T> IntoIterator for PathLevels<T> {
    type Item = Vec<T>;
    type IntoIter = std::vec::IntoIter<Vec<T>>;
    fn into_iter(self) -> Self::IntoIter {
        self.levels.into_iter()
    }
}

/// Group items by containing directory, shallowest directory first
///
/// This is the ordering backbone for uploads: iterating the result visits
/// every directory after its parent, so folder creation for `/a/b` always
/// precedes pushes into `/a/b/c`.
pub fn re_order_path_by_parents<T, F>(items: Vec<T>, path_of: F) -> PathLevels<T>
where
    F: Fn(&T) -> &str,
{
    let mut groups: Vec<(String, Vec<T>)> = Vec::new();
    for item in items {
        let dir = parent_path(path_of(&item));
        match groups.iter().position(|(d, _)| *d == dir) {
            Some(idx) => groups[idx].1.push(item),
            None => groups.push((dir, vec![item])),
        }
    }
    groups.sort_by(|(a, _), (b, _)| path_depth(a).cmp(&path_depth(b)).then_with(|| a.cmp(b)));
    PathLevels {
        levels: groups.into_iter().map(|(_, group)| group).collect(),
    }
}

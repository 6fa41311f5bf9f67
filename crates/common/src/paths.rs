//! Working-tree path conventions
//!
//! Every path stored by the daemon is relative to the enlistment's working
//! directory and uses git's `/` separator. Modified-path entries that name a
//! folder carry a trailing separator; file entries never do. Comparisons are
//! case-insensitive, so lookups go through [`case_key`].

/// Separator used by git for paths in the index and in modified-path entries.
pub const GIT_PATH_SEPARATOR: char = '/';

/// The repository attributes file. Always present in the modified-paths set.
pub const GIT_ATTRIBUTES: &str = ".gitattributes";

/// Name of the git metadata directory at the root of the working tree.
pub const DOT_GIT_ROOT: &str = ".git";

/// Normalize a virtual path into a modified-path entry.
///
/// Platform separators become `/`, leading and trailing separators are
/// trimmed, and folders get exactly one trailing `/`.
pub fn normalize_entry(virtual_path: &str, is_folder: bool) -> String {
    let converted = if std::path::MAIN_SEPARATOR != GIT_PATH_SEPARATOR {
        virtual_path.replace(std::path::MAIN_SEPARATOR, "/")
    } else {
        virtual_path.to_string()
    };

    let mut entry = converted.trim_matches(GIT_PATH_SEPARATOR).to_string();
    if is_folder {
        entry.push(GIT_PATH_SEPARATOR);
    }
    entry
}

/// Key used for case-insensitive membership tests.
pub fn case_key(path: &str) -> String {
    path.to_lowercase()
}

/// Iterate over the folder entries that strictly contain `entry`, shallowest first.
///
/// For `a/b/c.txt` this yields `a/` then `a/b/`. For the folder entry `a/b/`
/// it yields only `a/`: an entry never covers itself.
pub fn ancestor_folders(entry: &str) -> AncestorFolders<'_> {
    let segments: Vec<&str> = entry
        .split(GIT_PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect();
    AncestorFolders {
        segments,
        prefix: String::new(),
        next: 0,
    }
}

/// Iterator returned by [`ancestor_folders`].
#[derive(Debug)]
pub struct AncestorFolders<'a> {
    segments: Vec<&'a str>,
    prefix: String,
    next: usize,
}

impl Iterator for AncestorFolders<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        // the last segment is the entry itself
        if self.next + 1 >= self.segments.len() {
            return None;
        }

        self.prefix.push_str(self.segments[self.next]);
        self.prefix.push(GIT_PATH_SEPARATOR);
        self.next += 1;
        Some(self.prefix.clone())
    }
}

/// Whether `path` names something strictly inside the `.git` directory.
///
/// `.git` itself, `.gitattributes` and `.gitsubfolder/...` are not inside it.
pub fn is_path_inside_dot_git(path: &str) -> bool {
    let prefix_len = DOT_GIT_ROOT.len();
    let Some(head) = path.get(..prefix_len) else {
        return false;
    };
    let rest = &path[prefix_len..];

    head.eq_ignore_ascii_case(DOT_GIT_ROOT)
        && rest
            .chars()
            .next()
            .is_some_and(|c| c == GIT_PATH_SEPARATOR || c == std::path::MAIN_SEPARATOR)
}

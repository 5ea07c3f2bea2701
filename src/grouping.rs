//! Partitions a flat listing of downloaded file names into per-work archive
//! sets.

use std::sync::LazyLock;

use regex::Regex;

static ARCHIVE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((?:RJ|VJ|BJ)\d+)\.").expect("valid archive name regex"));

/// Takes one archive set off the front of `files`.
///
/// Returns the group and the names still to be processed. The first name is
/// always consumed: when it does not look like an archive the group is empty
/// and the name is dropped. Split parts keep their listing order.
pub fn group_one(mut files: Vec<String>) -> (Vec<String>, Vec<String>) {
    if files.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let first = files.remove(0);
    let Some(captures) = ARCHIVE_NAME.captures(&first) else {
        return (Vec::new(), files);
    };
    let work = captures[1].to_string();

    if first.ends_with(".zip") {
        return (vec![first], files);
    }
    if !first.contains("part") {
        return (Vec::new(), files);
    }

    let (mut parts, rest): (Vec<String>, Vec<String>) =
        files.into_iter().partition(|name| name.contains(&work));
    parts.insert(0, first);
    (parts, rest)
}

/// Repeats [`group_one`] until the listing is exhausted, keeping non-empty
/// groups.
pub fn group_all(mut files: Vec<String>) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    while !files.is_empty() {
        let (group, rest) = group_one(files);
        if !group.is_empty() {
            groups.push(group);
        }
        files = rest;
    }
    groups
}

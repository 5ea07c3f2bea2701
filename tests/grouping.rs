use std::fs;

use dlsite_manager::archive::ArchiveSet;
use dlsite_manager::fs_util::file_name;
use dlsite_manager::grouping::{group_all, group_one};

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn zip_is_its_own_group() {
    let (group, rest) = group_one(names(&["RJ1.zip", "RJ1.part1.exe"]));
    assert_eq!(group, names(&["RJ1.zip"]));
    assert_eq!(rest, names(&["RJ1.part1.exe"]));
}

#[test]
fn split_parts_are_collected_in_listing_order() {
    let (group, rest) = group_one(names(&[
        "RJ2.part2.rar",
        "VJ9.zip",
        "RJ2.part1.exe",
        "RJ2.part3.rar",
    ]));
    assert_eq!(group, names(&["RJ2.part2.rar", "RJ2.part1.exe", "RJ2.part3.rar"]));
    assert_eq!(rest, names(&["VJ9.zip"]));
}

#[test]
fn unrecognized_first_name_is_dropped() {
    let (group, rest) = group_one(names(&["cover.jpg", "RJ3.zip"]));
    assert!(group.is_empty());
    assert_eq!(rest, names(&["RJ3.zip"]));

    let (group, rest) = group_one(names(&["RJ4.exe"]));
    assert!(group.is_empty());
    assert!(rest.is_empty());
}

#[test]
fn every_archive_lands_in_exactly_one_group() {
    let groups = group_all(names(&[
        "BJ5.zip",
        "RJ6.part1.exe",
        "readme.txt",
        "RJ6.part2.rar",
        "RJ7.zip",
    ]));
    assert_eq!(
        groups,
        vec![
            names(&["BJ5.zip"]),
            names(&["RJ6.part1.exe", "RJ6.part2.rar"]),
            names(&["RJ7.zip"]),
        ]
    );
}

#[test]
fn archive_sets_skip_hidden_files() {
    let temp = tempfile::tempdir().unwrap();
    for name in [".RJ8.zip", "RJ9.zip", "RJ9.part1.exe.downloading"] {
        fs::write(temp.path().join(name), b"x").unwrap();
    }
    fs::create_dir(temp.path().join("RJ10.zip")).unwrap();

    let sets = ArchiveSet::from_directory(temp.path()).unwrap();

    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].code(), "RJ9");
    assert_eq!(
        sets[0].paths().iter().map(|path| file_name(path)).collect::<Vec<_>>(),
        names(&["RJ9.zip"])
    );
}

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;

use dlsite_manager::error::ManagerError;
use dlsite_manager::extract::{
    ExtractOutcome, Extractor, SystemUnarchiver, Unarchiver, select_target,
};

#[derive(Default)]
struct RecordingUnarchiver {
    fail: bool,
    targets: Mutex<Vec<PathBuf>>,
}

impl Unarchiver for RecordingUnarchiver {
    fn unarchive(&self, dir: &Path, target: &Path) -> Result<(), ManagerError> {
        self.targets.lock().unwrap().push(target.to_path_buf());
        if self.fail {
            return Err(ManagerError::ExtractionTool {
                target: target.to_path_buf(),
                message: "exit status 1".to_string(),
            });
        }
        fs::write(dir.join("track01.wav"), b"pcm").unwrap();
        Ok(())
    }
}

fn touch(dir: &Path, names: &[&str]) {
    for name in names {
        fs::write(dir.join(name), b"x").unwrap();
    }
}

#[test]
fn part_one_is_selected_over_part_eleven() {
    let mut names = vec!["RJ1.part10.rar".to_string(), "RJ1.part11.rar".to_string()];
    names.push("RJ1.part1.exe".to_string());
    names.extend((2..=9).map(|part| format!("RJ1.part{part}.rar")));
    let files: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();
    assert_eq!(files.len(), 11);

    assert_eq!(select_target(&files), Some(&PathBuf::from("RJ1.part1.exe")));
}

#[test]
fn hidden_part_one_is_ignored() {
    let files: Vec<PathBuf> = [".RJ1.part1.exe", "RJ1.part2.rar", "RJ1.part1.rar"]
        .iter()
        .map(PathBuf::from)
        .collect();
    assert_eq!(select_target(&files), Some(&PathBuf::from("RJ1.part1.rar")));
}

#[test]
fn single_file_is_the_target() {
    let files = vec![PathBuf::from("RJ1.zip")];
    assert_eq!(select_target(&files), Some(&PathBuf::from("RJ1.zip")));
    assert_eq!(select_target(&[]), None);
}

#[test]
fn successful_extraction_removes_archives() {
    let temp = tempfile::tempdir().unwrap();
    touch(temp.path(), &["RJ1.part1.exe", "RJ1.part2.rar"]);
    let extractor = Extractor::new(RecordingUnarchiver::default());

    let outcome = extractor.unarchive(temp.path(), false).unwrap();

    assert_matches!(outcome, ExtractOutcome::Extracted { removed: 2, .. });
    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["track01.wav".to_string()]);
}

#[test]
fn keep_flag_leaves_archives() {
    let temp = tempfile::tempdir().unwrap();
    touch(temp.path(), &["RJ1.zip"]);
    let extractor = Extractor::new(RecordingUnarchiver::default());

    let outcome = extractor.unarchive(temp.path(), true).unwrap();

    assert_matches!(outcome, ExtractOutcome::Extracted { removed: 0, .. });
    assert!(temp.path().join("RJ1.zip").exists());
}

#[test]
fn failed_extraction_deletes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    touch(temp.path(), &["RJ1.part1.exe", "RJ1.part2.rar"]);
    let extractor = Extractor::new(RecordingUnarchiver {
        fail: true,
        ..RecordingUnarchiver::default()
    });

    let result = extractor.unarchive(temp.path(), false);

    assert_matches!(result, Err(ManagerError::ExtractionTool { .. }));
    assert!(temp.path().join("RJ1.part1.exe").exists());
    assert!(temp.path().join("RJ1.part2.rar").exists());
}

#[test]
fn empty_directory_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let extractor = Extractor::new(RecordingUnarchiver::default());
    assert_eq!(
        extractor.unarchive(temp.path(), false).unwrap(),
        ExtractOutcome::Empty
    );
}

#[test]
fn zip_is_extracted_without_unar() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("RJ2.zip");
    {
        let file = fs::File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("RJ2/readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();
    }
    let extractor = Extractor::new(SystemUnarchiver::with_program(None));

    extractor.unarchive(temp.path(), false).unwrap();

    assert_eq!(
        fs::read_to_string(temp.path().join("RJ2").join("readme.txt")).unwrap(),
        "hello"
    );
    assert!(!archive.exists());
}

#[test]
fn rar_without_unar_reports_missing_tool() {
    let temp = tempfile::tempdir().unwrap();
    touch(temp.path(), &["RJ3.part1.rar"]);
    let extractor = Extractor::new(SystemUnarchiver::with_program(None));

    assert_matches!(
        extractor.unarchive(temp.path(), false),
        Err(ManagerError::MissingTool(_))
    );
    assert!(temp.path().join("RJ3.part1.rar").exists());
}

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::{
    compression::CompressionType,
    config::Config,
    error::StepError,
    model::{DataStats, DataType, OperationState, Subject},
    shell::CommandOutput,
    testing::FakeShell,
};

use super::*;

const PACKAGE: &str = "com.example";

struct Fixture {
    temp: TempDir,
    shell: Arc<FakeShell>,
    toolbox: Toolbox,
}

impl Fixture {
    fn new(shell: FakeShell) -> Self {
        let temp = TempDir::new().unwrap();
        let config = Config {
            data_root: temp.path().join("data"),
            scratch_dir: temp.path().join("scratch"),
            ..Config::default()
        };
        fs::create_dir_all(temp.path().join("backup")).unwrap();
        let shell = shell.arc();
        let toolbox = Toolbox::new(shell.clone(), Arc::new(config));
        Fixture {
            temp,
            shell,
            toolbox,
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    fn backup_dir(&self) -> PathBuf {
        self.path("backup")
    }

    fn write(&self, relative: &str, contents: &[u8]) {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn packages(&self) -> PackageProcessor {
        PackageProcessor::new(self.toolbox.clone())
    }

    async fn backup(&self, processor: &dyn DataTypeProcessor, subject: &mut Subject, data_type: DataType) -> StepResult {
        let existing = BTreeSet::new();
        let dst_dir = self.backup_dir();
        processor
            .backup(
                data_type,
                BackupStep {
                    subject,
                    prior: None,
                    dst_dir: &dst_dir,
                    existing: &existing,
                },
            )
            .await
    }

    async fn restore(&self, processor: &dyn DataTypeProcessor, subject: &Subject, data_type: DataType) -> StepResult {
        let src_dir = self.backup_dir();
        processor
            .restore(
                data_type,
                RestoreStep {
                    subject,
                    src_dir: &src_dir,
                    user_id: 0,
                },
            )
            .await
    }
}

fn package() -> Subject {
    let mut subject = Subject::package(PACKAGE, 0);
    subject.index_info.compression_type = CompressionType::Tar;
    subject
}

fn archived_names(archive: &Path) -> Vec<String> {
    let output = std::process::Command::new("tar")
        .arg("-tf")
        .arg(archive)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim_end_matches('/').to_owned())
        .collect()
}

#[test]
fn exclusion_patterns() {
    assert_eq!(
        exclusions(PACKAGE, DataType::User),
        vec![
            "\"com.example/.ota\"",
            "\"com.example/cache\"",
            "\"com.example/lib\"",
            "\"com.example/code_cache\"",
            "\"com.example/no_backup\"",
        ]
    );
    assert_eq!(
        exclusions(PACKAGE, DataType::Obb),
        vec!["\"com.example/cache\"", "\"Backup_\"*"]
    );
    assert!(exclusions(PACKAGE, DataType::Apk).is_empty());
    assert_eq!(restore_exclusions(PACKAGE, DataType::Data).len(), 6);
    assert_eq!(restore_exclusions(PACKAGE, DataType::UserDe).len(), 5);
}

#[tokio::test]
async fn backup_archives_only_present_types() {
    let fixture = Fixture::new(FakeShell::new());
    fixture.write("data/user/0/com.example/files/notes.txt", b"hello");
    fixture.write("data/user/0/com.example/cache/junk", b"junk");
    let processor = fixture.packages();
    let mut subject = package();

    let apk = fixture.backup(&processor, &mut subject, DataType::Apk).await;
    assert!(matches!(apk, Err(StepError::NotFoundOptional(_))));

    fixture
        .backup(&processor, &mut subject, DataType::User)
        .await
        .unwrap();
    let de = fixture.backup(&processor, &mut subject, DataType::UserDe).await;
    assert_eq!(de.unwrap_err().state(), OperationState::Skip);

    let entries = fs::read_dir(fixture.backup_dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(entries, vec!["user.tar".to_owned()]);

    let names = archived_names(&fixture.backup_dir().join("user.tar"));
    assert!(names.contains(&"com.example/files/notes.txt".to_owned()));
    assert!(!names.iter().any(|name| name.contains("cache")));

    assert_eq!(subject.recorded_bytes(DataType::User), Some(9));
    assert_eq!(fixture.shell.lines_starting_with("tar -t").len(), 1);
}

#[tokio::test]
async fn missing_user_data_halts_the_item() {
    let fixture = Fixture::new(FakeShell::new());
    let processor = fixture.packages();
    let mut subject = package();

    let err = fixture
        .backup(&processor, &mut subject, DataType::User)
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::NotFoundRequired(_)));
    assert!(err.halts_item());
    assert_eq!(err.state(), OperationState::Error);
}

#[tokio::test]
async fn unchanged_data_is_skipped() {
    let fixture = Fixture::new(FakeShell::new());
    fixture.write("data/user/0/com.example/files/notes.txt", b"hello");
    let processor = fixture.packages();
    let mut subject = package();
    let mut prior = package();
    prior
        .data_stats
        .insert(DataType::User, DataStats { bytes: 5, timestamp: 1 });
    let existing = BTreeSet::from(["user.tar".to_owned()]);
    let dst_dir = fixture.backup_dir();

    let result = processor
        .backup(
            DataType::User,
            BackupStep {
                subject: &mut subject,
                prior: Some(&prior),
                dst_dir: &dst_dir,
                existing: &existing,
            },
        )
        .await;
    assert_eq!(
        result,
        Err(StepError::Skipped("data has not changed".to_owned()))
    );
    assert!(fixture.shell.lines_starting_with("tar ").is_empty());
}

#[tokio::test]
async fn unselected_types_are_skipped() {
    let fixture = Fixture::new(FakeShell::new());
    fixture.write("data/user/0/com.example/files/notes.txt", b"hello");
    let processor = fixture.packages();
    let mut subject = package();
    subject.selection = BTreeSet::from([DataType::Apk]);

    let result = fixture.backup(&processor, &mut subject, DataType::User).await;
    assert_eq!(result, Err(not_selected()));
    assert!(fixture.shell.lines().is_empty());
}

#[tokio::test]
async fn restore_reapplies_owner_and_label() {
    let shell = FakeShell::new()
        .reply_lines("ls -Zd", &["u:object_r:app_data_file:s0:c512,c768"])
        .reply_lines("pm list packages", &["package:com.example uid:10123"]);
    let fixture = Fixture::new(shell);
    fixture.write("data/user/0/com.example/files/notes.txt", b"hello");
    let processor = fixture.packages();
    let mut subject = package();
    fixture
        .backup(&processor, &mut subject, DataType::User)
        .await
        .unwrap();
    fs::remove_dir_all(fixture.path("data/user/0/com.example")).unwrap();

    fixture
        .restore(&processor, &subject, DataType::User)
        .await
        .unwrap();

    assert_eq!(
        fs::read(fixture.path("data/user/0/com.example/files/notes.txt")).unwrap(),
        b"hello"
    );
    let origin = fixture.path("data/user/0/com.example");
    assert_eq!(
        fixture.shell.lines_starting_with("chown"),
        vec![format!("chown -hR \"10123:10123\" \"{}\"", origin.display())]
    );
    assert_eq!(
        fixture.shell.lines_starting_with("chcon"),
        vec![format!(
            "chcon -hR \"u:object_r:app_data_file:s0:c512,c768\" \"{}\"",
            origin.display()
        )]
    );
    let extract = fixture.shell.lines_starting_with("tar --totals");
    assert!(extract[1].contains("--exclude=\"com.example/cache\""));
    assert!(extract[1].contains("-xpf"));
}

#[tokio::test]
async fn external_restore_uses_parent_label_and_group() {
    let fixture = Fixture::new(FakeShell::new());
    let origin = fixture.path("data/media/0/Android/data/com.example");
    let type_dir = fixture.path("data/media/0/Android/data");
    fixture.shell.rescript(
        "ls -Zd",
        CommandOutput {
            code: 0,
            out: vec!["u:object_r:system_data_file:s0".to_owned()],
        },
    );
    // checked before the catch-all above
    fixture.shell.rescript(
        format!("ls -Zd \"{}\"", origin.display()),
        CommandOutput::failed("No such file or directory"),
    );
    fixture.shell.rescript(
        "stat -c",
        CommandOutput {
            code: 0,
            out: vec!["1078".to_owned()],
        },
    );
    fixture.shell.rescript(
        "pm list packages",
        CommandOutput {
            code: 0,
            out: vec!["package:com.example uid:10123".to_owned()],
        },
    );
    fixture.write("data/media/0/Android/data/com.example/files/a.bin", b"abc");
    let processor = fixture.packages();
    let mut subject = package();
    fixture
        .backup(&processor, &mut subject, DataType::Data)
        .await
        .unwrap();

    fixture
        .restore(&processor, &subject, DataType::Data)
        .await
        .unwrap();
    assert_eq!(
        fixture.shell.lines_starting_with("chown"),
        vec![format!("chown -hR \"10123:1078\" \"{}\"", origin.display())]
    );
    assert_eq!(
        fixture.shell.lines_starting_with("chcon"),
        vec![format!(
            "chcon -hR \"u:object_r:app_data_file:s0\" \"{}\"",
            origin.display()
        )]
    );
    assert_eq!(
        fixture.shell.lines_starting_with("stat -c"),
        vec![format!("stat -c '%g' \"{}\"", type_dir.display())]
    );
}

#[tokio::test]
async fn restore_without_archive_skips() {
    let fixture = Fixture::new(FakeShell::new());
    let processor = fixture.packages();
    let subject = package();

    let err = fixture
        .restore(&processor, &subject, DataType::Data)
        .await
        .unwrap_err();
    assert_eq!(err.state(), OperationState::Skip);
    assert!(fixture.shell.lines().is_empty());
}

#[tokio::test]
async fn restore_fails_without_a_label() {
    let shell = FakeShell::new().fail("ls -Zd");
    let fixture = Fixture::new(shell);
    fixture.write("data/user/0/com.example/files/notes.txt", b"hello");
    let processor = fixture.packages();
    let mut subject = package();
    fixture
        .backup(&processor, &mut subject, DataType::User)
        .await
        .unwrap();

    let err = fixture
        .restore(&processor, &subject, DataType::User)
        .await
        .unwrap_err();
    assert_eq!(err.state(), OperationState::Error);
    assert!(fixture.shell.lines_starting_with("chown").is_empty());
}

/// Backs up two APK files from a fake install dir into the fixture's backup dir.
async fn backup_splits(fixture: &Fixture, files: &[&str]) -> Subject {
    for file in files {
        fixture.write(&format!("app/com.example-1/{file}"), b"apk");
    }
    let base = fixture.path("app/com.example-1/base.apk");
    fixture.shell.rescript(
        "pm path",
        CommandOutput {
            code: 0,
            out: vec![format!("package:{}", base.display())],
        },
    );
    let processor = fixture.packages();
    let mut subject = package();
    fixture
        .backup(&processor, &mut subject, DataType::Apk)
        .await
        .unwrap();
    subject
}

#[tokio::test]
async fn apk_backup_streams_every_split() {
    let fixture = Fixture::new(FakeShell::new());
    backup_splits(&fixture, &["base.apk", "split_config.apk", "notes.txt"]).await;

    let mut names = archived_names(&fixture.backup_dir().join("apk.tar"));
    names.sort();
    assert_eq!(names, vec!["./base.apk", "./split_config.apk"]);
    assert_eq!(
        fixture.shell.lines_starting_with("tar --totals -cpf - ./*.apk").len(),
        1
    );
}

#[tokio::test]
async fn split_install_commits_after_all_writes() {
    let fixture = Fixture::new(FakeShell::new());
    let subject = backup_splits(&fixture, &["base.apk", "split_config.apk"]).await;
    fixture.shell.rescript(
        "pm install-create",
        CommandOutput {
            code: 0,
            out: vec!["Success: created install session [77]".to_owned()],
        },
    );
    fixture.shell.rescript(
        "pm list packages",
        CommandOutput {
            code: 0,
            out: vec!["package:com.example uid:10123".to_owned()],
        },
    );

    fixture
        .restore(&fixture.packages(), &subject, DataType::Apk)
        .await
        .unwrap();

    let writes = fixture.shell.lines_starting_with("pm install-write");
    assert_eq!(writes.len(), 2);
    assert!(writes[0].starts_with("pm install-write 77 base.apk "));
    assert!(writes[1].starts_with("pm install-write 77 split_config.apk "));
    assert_eq!(
        fixture.shell.lines_starting_with("pm install-commit"),
        vec!["pm install-commit 77"]
    );
    assert!(fixture.shell.lines_starting_with("pm install-abandon").is_empty());
    assert!(!fixture.path("scratch/apk/com.example").exists());
}

#[tokio::test]
async fn split_install_abandons_on_write_failure() {
    let fixture = Fixture::new(FakeShell::new());
    let subject = backup_splits(&fixture, &["base.apk", "split_config.apk"]).await;
    fixture.shell.rescript(
        "pm install-create",
        CommandOutput {
            code: 0,
            out: vec!["Success: created install session [77]".to_owned()],
        },
    );
    fixture
        .shell
        .rescript("pm install-write 77 split", CommandOutput::failed("write failed"));

    let err = fixture
        .restore(&fixture.packages(), &subject, DataType::Apk)
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::CommandFailure(_)));
    assert_eq!(
        fixture.shell.lines_starting_with("pm install-abandon"),
        vec!["pm install-abandon 77"]
    );
    assert!(fixture.shell.lines_starting_with("pm install-commit").is_empty());
}

#[tokio::test]
async fn single_apk_is_installed_directly_and_verified() {
    let fixture = Fixture::new(FakeShell::new());
    let subject = backup_splits(&fixture, &["base.apk"]).await;

    // installs, but the package manager never lists it
    let err = fixture
        .restore(&fixture.packages(), &subject, DataType::Apk)
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::VerificationFailure(_)));
    assert!(err.halts_item());

    let installs = fixture.shell.lines_starting_with("pm install ");
    assert_eq!(installs.len(), 1);
    assert!(installs[0].starts_with("pm install --user 0 -r -t "));
    assert!(fixture.shell.lines_starting_with("pm install-create").is_empty());
}

#[tokio::test]
async fn empty_apk_archive_is_an_error() {
    let fixture = Fixture::new(FakeShell::new());
    fixture.write("empty/readme.txt", b"nothing");
    let output = fixture
        .toolbox
        .codec
        .compress(&CompressArgs {
            pipe: true,
            exclusions: &[],
            follow_symlinks: false,
            src_dir: &fixture.path("empty"),
            src: "readme.txt",
            dst: &fixture.backup_dir().join("apk.tar"),
            program: None,
        })
        .await;
    assert!(output.is_success());

    let err = fixture
        .restore(&fixture.packages(), &package(), DataType::Apk)
        .await
        .unwrap_err();
    assert_eq!(err, StepError::CommandFailure("archive empty".to_owned()));
}

#[tokio::test]
async fn missing_apk_archive_depends_on_install_state() {
    let fixture = Fixture::new(FakeShell::new());
    let processor = fixture.packages();
    let subject = package();

    let err = fixture
        .restore(&processor, &subject, DataType::Apk)
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::VerificationFailure(_)));

    fixture.shell.rescript(
        "pm list packages",
        CommandOutput {
            code: 0,
            out: vec!["package:com.example uid:10123".to_owned()],
        },
    );
    let err = fixture
        .restore(&processor, &subject, DataType::Apk)
        .await
        .unwrap_err();
    assert_eq!(err.state(), OperationState::Skip);
}

#[tokio::test]
async fn media_round_trip() {
    let fixture = Fixture::new(FakeShell::new());
    fixture.write("sdcard/Pictures/cat.jpg", b"meow");
    let processor = MediaProcessor::new(fixture.toolbox.clone());
    let path = fixture.path("sdcard/Pictures");
    let mut subject = Subject::media("Pictures", path.to_string_lossy());
    subject.index_info.compression_type = CompressionType::Tar;

    fixture
        .backup(&processor, &mut subject, DataType::Media)
        .await
        .unwrap();
    assert!(fixture.backup_dir().join("media.tar").exists());
    fs::remove_dir_all(&path).unwrap();

    fixture
        .restore(&processor, &subject, DataType::Media)
        .await
        .unwrap();
    assert_eq!(fs::read(path.join("cat.jpg")).unwrap(), b"meow");

    let mut missing = Subject::media("Music", fixture.path("sdcard/Music").to_string_lossy());
    let err = fixture
        .backup(&processor, &mut missing, DataType::Media)
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::NotFoundRequired(_)));
}

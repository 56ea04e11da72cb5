use std::{fs, path::Path, sync::Arc};

use pretty_assertions::assert_eq;

use crate::{compression::CompressionType, shell::SystemShell};

use super::*;

const ZSTD: &str = "zstd -r -T0 --ultra -1 -q --priority=rt";

fn direct<'a>(exclusions: &'a [String], program: Option<&'a str>) -> CompressArgs<'a> {
    CompressArgs {
        pipe: false,
        exclusions,
        follow_symlinks: false,
        src_dir: Path::new("/data/user/0"),
        src: "com.example",
        dst: Path::new("/backup/user.tar.zst"),
        program,
    }
}

#[test]
fn compress_direct_with_filter() {
    let exclusions = vec!["\"com.example/cache\"".to_owned(), "\"Backup_\"*".to_owned()];
    assert_eq!(
        compress_command(&direct(&exclusions, Some(ZSTD))),
        format!(
            "tar --totals --exclude=\"com.example/cache\" --exclude=\"Backup_\"* -cpf \
             \"/backup/user.tar.zst\" -C \"/data/user/0\" \"com.example\" -I \"{ZSTD}\""
        )
    );
}

#[test]
fn compress_direct_plain_tar_omits_filter() {
    let mut args = direct(&[], None);
    args.follow_symlinks = true;
    assert_eq!(
        compress_command(&args),
        "tar --totals -h -cpf \"/backup/user.tar.zst\" -C \"/data/user/0\" \"com.example\""
    );
}

#[test]
fn compress_pipe_keeps_globs_unquoted() {
    let args = CompressArgs {
        pipe: true,
        src: "./*.apk",
        ..direct(&[], Some(ZSTD))
    };
    assert_eq!(
        compress_command(&args),
        format!("tar --totals -cpf - ./*.apk | {ZSTD} > \"/backup/user.tar.zst\"")
    );

    let args = CompressArgs {
        pipe: true,
        ..direct(&[], None)
    };
    assert_eq!(
        compress_command(&args),
        "tar --totals -cpf - -C \"/data/user/0\" \"com.example\" > \"/backup/user.tar.zst\""
    );
}

#[test]
fn compress_pipe_keeps_exclusions() {
    let exclusions = vec!["\"com.example/cache\"".to_owned(), "\"Backup_\"*".to_owned()];
    let mut args = CompressArgs {
        pipe: true,
        ..direct(&exclusions, Some(ZSTD))
    };
    args.follow_symlinks = true;
    assert_eq!(
        compress_command(&args),
        format!(
            "tar --totals --exclude=\"com.example/cache\" --exclude=\"Backup_\"* -h -cpf - \
             -C \"/data/user/0\" \"com.example\" | {ZSTD} > \"/backup/user.tar.zst\""
        )
    );
}

#[test]
fn decompress_flags() {
    let exclusions = vec!["\"com.example/cache\"".to_owned()];
    let args = DecompressArgs {
        exclusions: &exclusions,
        clear: true,
        touch: true,
        src: Path::new("/backup/user.tar.zst"),
        dst: Path::new("/data/user/0"),
        program: Some("zstd"),
    };
    assert_eq!(
        decompress_command(&args),
        "tar --totals --exclude=\"com.example/cache\" --recursive-unlink -xmpf \
         \"/backup/user.tar.zst\" -C \"/data/user/0\" -I \"zstd\""
    );

    let args = DecompressArgs {
        exclusions: &[],
        clear: false,
        touch: false,
        program: None,
        ..args
    };
    assert_eq!(
        decompress_command(&args),
        "tar --totals -xpf \"/backup/user.tar.zst\" -C \"/data/user/0\""
    );
}

#[test]
fn test_command_discards_output() {
    assert_eq!(
        test_command(Path::new("/a b/media.tar.lz4"), Some("zstd")),
        "tar -t -f \"/a b/media.tar.lz4\" -I \"zstd\" > /dev/null 2>&1"
    );
}

#[test]
fn compression_type_programs() {
    assert_eq!(CompressionType::Tar.compress_program(1), None);
    assert_eq!(CompressionType::Zstd.compress_program(1).as_deref(), Some(ZSTD));
    assert_eq!(
        CompressionType::Lz4.compress_program(3).as_deref(),
        Some("zstd -r -T0 --ultra -3 -q --priority=rt --format=lz4")
    );
    assert_eq!(
        CompressionType::from_file_name("user_de.tar.lz4"),
        Some(CompressionType::Lz4)
    );
    assert_eq!(CompressionType::from_file_name("user.zip"), None);
}

#[tokio::test]
async fn tar_roundtrip_and_test() {
    let dir = tempfile::tempdir().unwrap();
    let src_dir = dir.path().join("src");
    let dst_dir = dir.path().join("dst");
    fs::create_dir_all(src_dir.join("com.example/cache")).unwrap();
    fs::create_dir_all(&dst_dir).unwrap();
    fs::write(src_dir.join("com.example/prefs.xml"), "<map/>").unwrap();
    fs::write(src_dir.join("com.example/cache/junk"), "junk").unwrap();

    let codec = ArchiveCodec::new(Arc::new(SystemShell::new()));
    let archive = dir.path().join("user.tar");
    let exclusions = vec!["\"com.example/cache\"".to_owned()];
    let output = codec
        .compress(&CompressArgs {
            pipe: false,
            exclusions: &exclusions,
            follow_symlinks: false,
            src_dir: &src_dir,
            src: "com.example",
            dst: &archive,
            program: None,
        })
        .await;
    assert!(output.is_success(), "{}", output.out_string());
    assert!(codec.test(&archive, None).await.is_success());

    let output = codec
        .decompress(&DecompressArgs {
            exclusions: &[],
            clear: false,
            touch: true,
            src: &archive,
            dst: &dst_dir,
            program: None,
        })
        .await;
    assert!(output.is_success(), "{}", output.out_string());
    assert_eq!(
        fs::read_to_string(dst_dir.join("com.example/prefs.xml")).unwrap(),
        "<map/>"
    );
    assert!(!dst_dir.join("com.example/cache").exists());
}

#[tokio::test]
async fn piped_archive_leaves_out_excluded_folders() {
    let dir = tempfile::tempdir().unwrap();
    let src_dir = dir.path().join("src");
    let dst_dir = dir.path().join("dst");
    fs::create_dir_all(src_dir.join("com.example/cache")).unwrap();
    fs::create_dir_all(&dst_dir).unwrap();
    fs::write(src_dir.join("com.example/prefs.xml"), "<map/>").unwrap();
    fs::write(src_dir.join("com.example/cache/junk"), "junk").unwrap();

    let codec = ArchiveCodec::new(Arc::new(SystemShell::new()));
    let archive = dir.path().join("user.tar");
    let exclusions = vec!["\"com.example/cache\"".to_owned()];
    let output = codec
        .compress(&CompressArgs {
            pipe: true,
            exclusions: &exclusions,
            follow_symlinks: false,
            src_dir: &src_dir,
            src: "com.example",
            dst: &archive,
            program: None,
        })
        .await;
    assert!(output.is_success(), "{}", output.out_string());

    let output = codec
        .decompress(&DecompressArgs {
            exclusions: &[],
            clear: false,
            touch: false,
            src: &archive,
            dst: &dst_dir,
            program: None,
        })
        .await;
    assert!(output.is_success(), "{}", output.out_string());
    assert!(dst_dir.join("com.example/prefs.xml").exists());
    assert!(!dst_dir.join("com.example/cache").exists());
}

#[tokio::test]
async fn test_fails_on_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("broken.tar");
    fs::write(&archive, "definitely not a tarball").unwrap();

    let codec = ArchiveCodec::new(Arc::new(SystemShell::new()));
    let output = codec.test(&archive, None).await;
    assert!(!output.is_success());
}

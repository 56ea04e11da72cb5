use std::path::Path;

use pretty_assertions::assert_eq;

use crate::testing::FakeShell;

use super::*;

#[test]
fn session_id_parsing() {
    assert_eq!(
        parse_session_id("Success: created install session [1034567]"),
        Some(1_034_567)
    );
    assert_eq!(parse_session_id("Failure [INSTALL_FAILED]"), None);
}

#[test]
fn child_label() {
    assert_eq!(
        derive_child_label("u:object_r:system_data_file:s0"),
        "u:object_r:app_data_file:s0"
    );
}

#[tokio::test]
async fn package_queries() {
    let shell = FakeShell::new()
        .reply_lines(
            "pm list packages -U --user 0 \"com.example\"",
            &["package:com.example.pro uid:10200", "package:com.example uid:10123"],
        )
        .reply_lines(
            "pm path --user 0 \"com.example\"",
            &[
                "package:/data/app/~~x/com.example-1/base.apk",
                "package:/data/app/~~x/com.example-1/split_config.en.apk",
            ],
        )
        .arc();
    let device = Device::new(shell, None);

    assert!(device.is_installed("com.example", 0).await);
    assert!(!device.is_installed("com.other", 0).await);
    assert_eq!(device.package_uid("com.example", 0).await, Some(10123));
    assert_eq!(
        device.package_source_paths("com.example", 0).await,
        vec![
            "/data/app/~~x/com.example-1/base.apk".to_owned(),
            "/data/app/~~x/com.example-1/split_config.en.apk".to_owned(),
        ]
    );
}

#[tokio::test]
async fn install_commands_carry_installer() {
    let shell = FakeShell::new()
        .reply_lines("pm install-create", &["Success: created install session [77]"])
        .arc();
    let device = Device::new(shell.clone(), Some("com.android.vending".to_owned()));

    device.install(Path::new("/tmp/base.apk"), 10).await;
    let session = device.install_create(10).await.unwrap();
    assert_eq!(session, 77);

    assert_eq!(
        shell.lines(),
        vec![
            "pm install -i com.android.vending --user 10 -r -t \"/tmp/base.apk\"".to_owned(),
            "pm install-create -i com.android.vending --user 10 -t".to_owned(),
        ]
    );
}

#[tokio::test]
async fn install_create_without_id_fails() {
    let shell = FakeShell::new()
        .reply_lines("pm install-create", &["Error: something"])
        .arc();
    let device = Device::new(shell, None);
    assert!(matches!(
        device.install_create(0).await,
        Err(Error::InvalidSessionId(_))
    ));
}

#[tokio::test]
async fn security_context_query() {
    let shell = FakeShell::new()
        .reply_lines("ls -Zd", &["u:object_r:app_data_file:s0:c123"])
        .arc();
    let device = Device::new(shell.clone(), None);
    assert_eq!(
        device.security_context(Path::new("/data/user/0/com.example")).await.as_deref(),
        Some("u:object_r:app_data_file:s0:c123")
    );
    assert_eq!(
        shell.lines()[0],
        "ls -Zd \"/data/user/0/com.example\" | awk 'NF>1{print $1}'"
    );
}

#[tokio::test]
async fn install_env_only_touches_consent_when_needed() {
    let shell = FakeShell::new()
        .reply_lines("settings get global package_verifier_user_consent", &["-1"])
        .arc();
    Device::new(shell.clone(), None).set_up_install_env().await;
    assert_eq!(shell.lines_starting_with("settings put").len(), 2);

    let shell = FakeShell::new()
        .reply_lines("settings get global package_verifier_user_consent", &["1"])
        .arc();
    Device::new(shell.clone(), None).set_up_install_env().await;
    assert_eq!(
        shell.lines_starting_with("settings put"),
        vec![
            "settings put global verifier_verify_adb_installs 0".to_owned(),
            "settings put global package_verifier_enable 0".to_owned(),
            "settings put global package_verifier_user_consent -1".to_owned(),
            "settings put global upload_apk_enable 0".to_owned(),
        ]
    );
}

#[tokio::test]
async fn ambient_settings_roundtrip() {
    let shell = FakeShell::new()
        .reply_lines(
            "settings get secure default_input_method",
            &["com.example.ime/.Service"],
        )
        .reply_lines("settings get secure enabled_accessibility_services", &["null"])
        .arc();
    let device = Device::new(shell.clone(), None);

    let ambient = device.capture_ambient().await;
    assert_eq!(
        ambient,
        AmbientSettings {
            input_method: Some("com.example.ime/.Service".to_owned()),
            accessibility_services: None,
        }
    );

    assert!(device.restore_ambient(&ambient).await.is_success());
    assert_eq!(
        shell.lines_starting_with("ime"),
        vec![
            "ime enable \"com.example.ime/.Service\"".to_owned(),
            "ime set \"com.example.ime/.Service\"".to_owned(),
        ]
    );
    assert!(shell
        .lines_starting_with("settings put secure accessibility_enabled")
        .is_empty());
}

#[test]
fn disk_space_parsing() {
    assert_eq!(
        parse_disk_space("1000 4000 4096"),
        Some((4_096_000, 16_384_000))
    );
    assert_eq!(parse_disk_space("stat: cannot read"), None);
    assert_eq!(parse_disk_space("1 2"), None);
}

#[cfg(test)]
mod tests;

use std::{path::Path, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    shell::{quote, CommandOutput, Shell},
};

static SESSION_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillPolicy {
    Disabled,
    #[default]
    ForceStop,
    Kill,
}

/// Input method and accessibility services, captured before a backup run
/// and written back afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientSettings {
    pub input_method: Option<String>,
    pub accessibility_services: Option<String>,
}

/// Typed front for the package manager, the security label tools and the
/// settings store, all reached through the one shell channel.
#[derive(Debug, Clone)]
pub struct Device {
    shell: Arc<dyn Shell>,
    installer: Option<String>,
}

impl Device {
    pub fn new(shell: Arc<dyn Shell>, installer: Option<String>) -> Self {
        Device { shell, installer }
    }

    pub fn shell(&self) -> &Arc<dyn Shell> {
        &self.shell
    }

    pub async fn security_context(&self, path: &Path) -> Option<String> {
        let line = format!(
            "ls -Zd {} | awk 'NF>1{{print $1}}'",
            quote(path.to_string_lossy())
        );
        let output = self.shell.run(&line).await;
        let label = output.first_line();
        (output.is_success() && !label.is_empty()).then(|| label.to_owned())
    }

    pub async fn chown(&self, path: &Path, uid: u32, gid: u32) -> CommandOutput {
        let line = format!("chown -hR \"{uid}:{gid}\" {}", quote(path.to_string_lossy()));
        self.shell.run(&line).await
    }

    pub async fn chcon(&self, path: &Path, label: &str) -> CommandOutput {
        let line = format!("chcon -hR {} {}", quote(label), quote(path.to_string_lossy()));
        self.shell.run(&line).await
    }

    pub async fn gid_of(&self, path: &Path) -> Option<u32> {
        let line = format!("stat -c '%g' {}", quote(path.to_string_lossy()));
        let output = self.shell.run(&line).await;
        if output.is_success() {
            output.first_line().parse().ok()
        } else {
            None
        }
    }

    /// Available and total bytes of the filesystem holding `path`.
    pub async fn disk_space(&self, path: &Path) -> Option<(u64, u64)> {
        let line = format!("stat -f -c '%a %b %S' {}", quote(path.to_string_lossy()));
        let output = self.shell.run(&line).await;
        if !output.is_success() {
            return None;
        }
        parse_disk_space(output.first_line())
    }

    /// `(name, uid)` pairs reported for `package` by the package manager.
    async fn list_package(&self, package: &str, user_id: u32) -> Vec<(String, Option<u32>)> {
        let line = format!("pm list packages -U --user {user_id} {}", quote(package));
        let output = self.shell.run(&line).await;
        if !output.is_success() {
            return vec![];
        }
        output.out.iter().filter_map(|line| parse_package_line(line)).collect()
    }

    pub async fn is_installed(&self, package: &str, user_id: u32) -> bool {
        self.list_package(package, user_id)
            .await
            .iter()
            .any(|(name, _)| name == package)
    }

    pub async fn package_uid(&self, package: &str, user_id: u32) -> Option<u32> {
        self.list_package(package, user_id)
            .await
            .into_iter()
            .find(|(name, _)| name == package)
            .and_then(|(_, uid)| uid)
    }

    /// Paths of the installed package files, base first.
    pub async fn package_source_paths(&self, package: &str, user_id: u32) -> Vec<String> {
        let line = format!("pm path --user {user_id} {}", quote(package));
        let output = self.shell.run(&line).await;
        if !output.is_success() {
            return vec![];
        }
        output
            .out
            .iter()
            .filter_map(|line| line.trim().strip_prefix("package:"))
            .map(ToOwned::to_owned)
            .collect()
    }

    fn installer_arg(&self) -> String {
        self.installer
            .as_ref()
            .map(|installer| format!(" -i {installer}"))
            .unwrap_or_default()
    }

    pub async fn install(&self, apk: &Path, user_id: u32) -> CommandOutput {
        let line = format!(
            "pm install{} --user {user_id} -r -t {}",
            self.installer_arg(),
            quote(apk.to_string_lossy())
        );
        self.shell.run(&line).await
    }

    pub async fn install_create(&self, user_id: u32) -> Result<u32> {
        let line = format!("pm install-create{} --user {user_id} -t", self.installer_arg());
        let output = self.shell.run(&line).await;
        let out = output.out_string();
        if !output.is_success() {
            return Err(Error::InvalidSessionId(out));
        }
        parse_session_id(&out).ok_or(Error::InvalidSessionId(out))
    }

    pub async fn install_write(&self, session: u32, name: &str, path: &Path) -> CommandOutput {
        let line = format!(
            "pm install-write {session} {name} {}",
            quote(path.to_string_lossy())
        );
        self.shell.run(&line).await
    }

    pub async fn install_commit(&self, session: u32) -> CommandOutput {
        self.shell.run(&format!("pm install-commit {session}")).await
    }

    pub async fn install_abandon(&self, session: u32) -> CommandOutput {
        self.shell.run(&format!("pm install-abandon {session}")).await
    }

    pub async fn settings_get(&self, namespace: &str, key: &str) -> Option<String> {
        let output = self
            .shell
            .run(&format!("settings get {namespace} {key}"))
            .await;
        let value = output.first_line();
        (output.is_success() && !value.is_empty() && value != "null").then(|| value.to_owned())
    }

    pub async fn settings_put(&self, namespace: &str, key: &str, value: &str) -> CommandOutput {
        self.shell
            .run(&format!("settings put {namespace} {key} {value}"))
            .await
    }

    /// Turns off the install-time verifier so restored packages install unattended.
    pub async fn set_up_install_env(&self) -> CommandOutput {
        let mut output = self
            .settings_put("global", "verifier_verify_adb_installs", "0")
            .await
            .and(self.settings_put("global", "package_verifier_enable", "0").await);
        let consent = self
            .settings_get("global", "package_verifier_user_consent")
            .await;
        if consent.as_deref() != Some("-1") {
            output = output
                .and(
                    self.settings_put("global", "package_verifier_user_consent", "-1")
                        .await,
                )
                .and(self.settings_put("global", "upload_apk_enable", "0").await);
        }
        output
    }

    pub async fn capture_ambient(&self) -> AmbientSettings {
        AmbientSettings {
            input_method: self.settings_get("secure", "default_input_method").await,
            accessibility_services: self
                .settings_get("secure", "enabled_accessibility_services")
                .await,
        }
    }

    pub async fn restore_ambient(&self, settings: &AmbientSettings) -> CommandOutput {
        let mut output = CommandOutput::ok();
        if let Some(input_method) = &settings.input_method {
            let key = quote(input_method);
            output = output
                .and(self.shell.run(&format!("ime enable {key}")).await)
                .and(self.shell.run(&format!("ime set {key}")).await)
                .and(self.settings_put("secure", "default_input_method", &key).await);
        }
        if let Some(services) = &settings.accessibility_services {
            output = output
                .and(
                    self.settings_put("secure", "enabled_accessibility_services", &quote(services))
                        .await,
                )
                .and(self.settings_put("secure", "accessibility_enabled", "1").await);
        }
        output
    }

    /// Best effort, the result is only logged.
    pub async fn kill(&self, package: &str, user_id: u32, policy: KillPolicy) -> CommandOutput {
        let force_stop = format!("am force-stop --user {user_id} {}", quote(package));
        match policy {
            KillPolicy::Disabled => CommandOutput::ok(),
            KillPolicy::ForceStop => self.shell.run(&force_stop).await,
            KillPolicy::Kill => {
                let kill = format!("am kill --user {user_id} {}", quote(package));
                self.shell
                    .run(&kill)
                    .await
                    .and(self.shell.run(&force_stop).await)
            }
        }
    }
}

pub fn parse_session_id(out: &str) -> Option<u32> {
    SESSION_ID
        .captures(out)
        .and_then(|captures| captures.get(1))
        .and_then(|id| id.as_str().parse().ok())
}

/// Parses `<available blocks> <total blocks> <block size>`.
pub fn parse_disk_space(line: &str) -> Option<(u64, u64)> {
    let numbers = line
        .split_whitespace()
        .map(str::parse::<u64>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .ok()?;
    match numbers.as_slice() {
        [available, total, block_size] => Some((available * block_size, total * block_size)),
        _ => None,
    }
}

fn parse_package_line(line: &str) -> Option<(String, Option<u32>)> {
    let rest = line.trim().strip_prefix("package:")?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_owned();
    let uid = parts
        .find_map(|part| part.strip_prefix("uid:"))
        .and_then(|uid| uid.parse().ok());
    Some((name, uid))
}

/// `system_data_file` parents label their children `app_data_file`.
pub fn derive_child_label(parent_label: &str) -> String {
    parent_label.replace("system_data_file", "app_data_file")
}

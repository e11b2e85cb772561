use std::io;

use lazy_static::lazy_static;
use regex::Regex;

use crate::command::{run_cmd, CmdOutput};
use crate::config::AdbConfig;
use crate::intent::CommandBuilder;
use crate::Context;

/// A permission as reported by `pm list permissions -f`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePermission {
    pub name: String,
    pub protection_level: Option<String>,
}

/// The Adb trait abstracts the handful of `adb` commands used here
pub trait Adb: Send + Sync {
    fn get_connected_devices(&self) -> crate::Result<Vec<String>>;

    /// Essentially the same as running `adb shell '...'`
    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput>;

    /// List every permission known to the device along with its protection
    /// level
    fn list_permissions(&self) -> crate::Result<Vec<DevicePermission>> {
        let output = self.shell("pm list permissions -f")?;
        check_adb_stderr(&output.stderr_utf8_lossy())?;
        let output = output.err_on_status()?;
        Ok(parse_permission_list(&output.stdout_utf8_lossy()))
    }
}

lazy_static! {
    static ref DEVICE_NOT_FOUND: Regex =
        Regex::new(r"device\s+'([^']+)'\s+not\s+found").expect("valid regex");
}

/// Turn the errors adb itself prints on stderr into an [crate::Error]
fn check_adb_stderr(stderr: &str) -> crate::Result<()> {
    if stderr.contains("no devices/emulators") {
        return Err(crate::Error::NoAdbDevice);
    }
    if let Some(caps) = DEVICE_NOT_FOUND.captures(stderr) {
        let serial = caps
            .get(1)
            .map(|m| String::from(m.as_str()))
            .unwrap_or_else(|| "?".into());
        return Err(crate::Error::AdbDeviceNotFound(serial));
    }
    Ok(())
}

/// Parse the output of `pm list permissions -f`
///
/// Each permission starts with a `+ permission:<name>` line followed by
/// indented `key:value` lines, one of which is `protectionLevel:<level>`.
pub fn parse_permission_list(output: &str) -> Vec<DevicePermission> {
    let mut perms = Vec::new();
    let mut current: Option<DevicePermission> = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("+ permission:") {
            if let Some(done) = current.take() {
                perms.push(done);
            }
            current = Some(DevicePermission {
                name: name.trim().to_string(),
                protection_level: None,
            });
        } else if let Some(level) = line.strip_prefix("protectionLevel:") {
            if let Some(cur) = current.as_mut() {
                let level = level.trim();
                if !level.is_empty() {
                    cur.protection_level = Some(level.to_string());
                }
            }
        }
    }

    if let Some(done) = current {
        perms.push(done);
    }
    perms
}

/// An `Adb` implementation that just invokes the external `adb` command.
#[derive(Clone)]
pub struct ExecAdb {
    bin: String,
    serial: Option<String>,
}

impl ExecAdb {
    /// Creates a new `ExecAdb` using the `[adb]` config section, falling back
    /// to `adb` on the path and `ANDROID_SERIAL` for anything not configured
    pub fn new(ctx: &dyn Context, cfg: &AdbConfig) -> crate::Result<Self> {
        let bin = match &cfg.executable {
            Some(v) => v.clone(),
            None => ctx.get_bin("adb")?,
        };
        let serial = cfg
            .serial
            .clone()
            .or_else(|| ctx.maybe_get_env("ANDROID_SERIAL"));
        Ok(Self { bin, serial })
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// A [CommandBuilder] whose commands target the same adb and device
    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder::new(&self.bin, self.serial.as_deref())
    }
}

impl Default for ExecAdb {
    fn default() -> Self {
        Self {
            bin: "adb".into(),
            serial: None,
        }
    }
}

macro_rules! adb_cmd {
    ($adb:ident, $cmd:literal, $($args:expr),*) => {
        if let Some(ref serial) = $adb.serial {
            run_cmd(&$adb.bin, &["-s", serial, $cmd, $($args),*])
        } else {
            run_cmd(&$adb.bin, &[$cmd, $($args),*])
        }
    }
}

impl Adb for ExecAdb {
    /// Returns a list of all connected devices (similar to `adb devices -l`)
    fn get_connected_devices(&self) -> crate::Result<Vec<String>> {
        let output = run_cmd(&self.bin, &["devices", "-l"])?;
        let out_str = output.stdout_utf8_lossy();

        // The first line is the `List of devices attached` header
        let devices = out_str
            .lines()
            .skip(1)
            .filter(|l| l.contains("device"))
            .filter_map(|l| l.split_ascii_whitespace().next())
            .map(String::from)
            .collect::<Vec<String>>();

        if devices.is_empty() {
            return Err(crate::Error::NoAdbDevice);
        }

        Ok(devices)
    }

    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput> {
        adb_cmd!(self, "shell", shell_cmd)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::AdbConfig;
    use crate::testing::{mock_adb, tmp_context, MockAdb, TestContext};
    use rstest::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    const PM_OUTPUT: &str = "All Permissions:

+ permission:android.permission.INTERNET
  package:android
  label:have full network access
  description:Allows the app to create network sockets.
  protectionLevel:normal
+ permission:android.permission.READ_LOGS
  package:android
  label:null
  protectionLevel:signature|privileged|development
+ permission:com.vendor.NO_LEVEL
  package:com.vendor
";

    #[test]
    fn test_parse_permission_list() {
        let perms = parse_permission_list(PM_OUTPUT);
        assert_eq!(
            perms,
            vec![
                DevicePermission {
                    name: "android.permission.INTERNET".into(),
                    protection_level: Some("normal".into()),
                },
                DevicePermission {
                    name: "android.permission.READ_LOGS".into(),
                    protection_level: Some("signature|privileged|development".into()),
                },
                DevicePermission {
                    name: "com.vendor.NO_LEVEL".into(),
                    protection_level: None,
                },
            ]
        );
        assert!(parse_permission_list("").is_empty());
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> CmdOutput {
        CmdOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[rstest]
    fn test_list_permissions(mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .withf(|cmd| cmd == "pm list permissions -f")
            .times(1)
            .returning(|_| Ok(output(0, PM_OUTPUT, "")));

        let perms = mock_adb.list_permissions().unwrap();
        assert_eq!(perms.len(), 3);
    }

    #[rstest]
    #[case("error: no devices/emulators found", "no device")]
    #[case("error: device 'R58M' not found", "R58M")]
    fn test_list_permissions_device_errors(
        mut mock_adb: MockAdb,
        #[case] stderr: &'static str,
        #[case] expected: &str,
    ) {
        mock_adb
            .expect_shell()
            .returning(move |_| Ok(output(1, "", stderr)));

        let err = mock_adb.list_permissions().unwrap_err();
        match err {
            crate::Error::NoAdbDevice => assert_eq!(expected, "no device"),
            crate::Error::AdbDeviceNotFound(serial) => assert_eq!(serial, expected),
            e => panic!("unexpected error {}", e),
        }
    }

    #[rstest]
    fn test_exec_adb_from_config(mut tmp_context: TestContext) {
        tmp_context
            .set_bin("adb", "/sdk/platform-tools/adb")
            .set_env("ANDROID_SERIAL", "from-env");

        let adb = ExecAdb::new(&tmp_context, &AdbConfig::default()).unwrap();
        assert_eq!(adb.serial(), Some("from-env"));
        assert_eq!(
            adb.command_builder().prefix(),
            "/sdk/platform-tools/adb -s from-env"
        );

        let cfg = AdbConfig {
            executable: Some("adb".into()),
            serial: Some("emulator-5554".into()),
        };
        let adb = ExecAdb::new(&tmp_context, &cfg).unwrap();
        assert_eq!(adb.command_builder().prefix(), "adb -s emulator-5554");
    }
}

use std::io;

use mockall::mock;
use rstest::fixture;

use crate::adb::DevicePermission;
use crate::command::CmdOutput;

mock! {
    pub Adb {}

    impl crate::adb::Adb for Adb {
        fn get_connected_devices(&self) -> crate::Result<Vec<String>>;
        fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput>;
    }
}

#[fixture]
pub fn mock_adb() -> MockAdb {
    MockAdb::new()
}

pub fn device_permission(name: &str, level: Option<&str>) -> DevicePermission {
    DevicePermission {
        name: name.into(),
        protection_level: level.map(String::from),
    }
}

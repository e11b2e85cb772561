use mockall::mock;

use crate::dispatch::ExecOutput;

mock! {
    pub ProtectionLookup {}

    impl crate::classify::ProtectionLookup for ProtectionLookup {
        fn protection_level(&self, permission: &str) -> Option<String>;
    }
}

mock! {
    pub CommandExecutor {}

    impl crate::dispatch::CommandExecutor for CommandExecutor {
        fn execute(&self, command_text: &str) -> crate::Result<ExecOutput>;
    }
}

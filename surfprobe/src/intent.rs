//! Builds `am start` probe commands for reachable activities

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::classify::Verdict;
use crate::command::{double_quote, quote, single_quote};
use crate::model::{ActivityRecord, DataSpec};

/// How the payload is delivered to the activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VariantKind {
    /// Primary data URI
    Data,
    /// String extra named `url`
    Extra,
    /// `{"url": payload}` as a string extra named `json`
    Json,
    /// Data URI plus a string extra named `target`
    Combined,
}

impl VariantKind {
    /// Every variant, in the order commands are emitted
    pub const ALL: [VariantKind; 4] = [Self::Data, Self::Extra, Self::Json, Self::Combined];

    fn suffix(&self, payload: &str) -> String {
        match self {
            Self::Data => format!(" -d {}", double_quote(payload)),
            Self::Extra => format!(" -e url {}", double_quote(payload)),
            Self::Json => {
                let body = serde_json::json!({ "url": payload });
                format!(" -e json {}", single_quote(&body.to_string()))
            }
            Self::Combined => {
                let quoted = double_quote(payload);
                format!(" -d {0} -e target {0}", quoted)
            }
        }
    }
}

impl Display for VariantKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Data => "data",
            Self::Extra => "extra",
            Self::Json => "json",
            Self::Combined => "combined",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeCommand {
    pub activity_name: String,
    pub filter_index: usize,
    pub actions: Vec<String>,
    pub categories: Vec<String>,
    pub data: DataSpec,
    pub command_text: String,
    pub variant: VariantKind,
    /// The filter had no action, so this is a plain explicit start
    pub bare: bool,
}

/// Builds the command text for probes
///
/// The prefix is what invokes adb, `adb` by default or `adb -s <serial>` when
/// a specific device is targeted.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    prefix: String,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self {
            prefix: String::from("adb"),
        }
    }
}

impl CommandBuilder {
    pub fn new(adb_exe: &str, serial: Option<&str>) -> Self {
        let mut prefix = quote(adb_exe).into_owned();
        if let Some(serial) = serial {
            prefix.push_str(" -s ");
            prefix.push_str(&quote(serial));
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build every probe command for the activity
    ///
    /// Nothing is built for an activity that isn't part of the attack
    /// surface. Otherwise each data spec of each filter yields one command per
    /// [VariantKind], in filter, data spec, variant order.
    pub fn build(
        &self,
        record: &ActivityRecord,
        verdict: &Verdict,
        component_package: &str,
        payload: &str,
    ) -> Vec<ProbeCommand> {
        if !verdict.is_surface {
            return Vec::new();
        }

        let mut commands = Vec::new();

        for (filter_index, filter) in record.intent_filters.iter().enumerate() {
            let action = filter.first_action();

            let mut base = format!(
                "{} shell am start -n {}/{}",
                self.prefix, component_package, record.name
            );
            if let Some(action) = action {
                base.push_str(" -a ");
                base.push_str(action);
            }
            for cat in &filter.categories {
                base.push_str(" -c ");
                base.push_str(cat);
            }

            for data in &filter.data {
                for variant in VariantKind::ALL {
                    commands.push(ProbeCommand {
                        activity_name: record.name.clone(),
                        filter_index,
                        actions: filter.actions.clone(),
                        categories: filter.categories.clone(),
                        data: data.clone(),
                        command_text: format!("{}{}", base, variant.suffix(payload)),
                        variant,
                        bare: action.is_none(),
                    });
                }
            }
        }

        log::debug!("built {} commands for {}", commands.len(), record.name);
        commands
    }
}

/// [CommandBuilder::build] with the default `adb` prefix
pub fn build_commands(
    record: &ActivityRecord,
    verdict: &Verdict,
    component_package: &str,
    payload: &str,
) -> Vec<ProbeCommand> {
    CommandBuilder::default().build(record, verdict, component_package, payload)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::IntentFilter;
    use crate::Exported;
    use rstest::*;

    const PAYLOAD: &str = "https://mymalware.com";

    fn surface() -> Verdict {
        Verdict {
            is_surface: true,
            ..Default::default()
        }
    }

    fn filter(actions: &[&str], categories: &[&str], data: usize) -> IntentFilter {
        IntentFilter {
            actions: actions.iter().map(|it| it.to_string()).collect(),
            categories: categories.iter().map(|it| it.to_string()).collect(),
            data: (0..data)
                .map(|i| DataSpec {
                    scheme: Some(format!("s{}", i)),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn record(filters: Vec<IntentFilter>) -> ActivityRecord {
        ActivityRecord {
            name: "com.x.A".into(),
            exported: Exported::True,
            permission: None,
            intent_filters: filters,
        }
    }

    #[test]
    fn test_single_filter_commands() {
        let rec = record(vec![IntentFilter {
            actions: vec!["android.intent.action.VIEW".into()],
            categories: vec![],
            data: vec![DataSpec::default()],
        }]);
        let cmds = build_commands(&rec, &surface(), "com.x", PAYLOAD);

        assert_eq!(cmds.len(), 4);
        assert!(cmds.iter().all(|it| it.data.is_placeholder() && !it.bare));
        assert_eq!(
            cmds.iter().map(|it| it.variant).collect::<Vec<_>>(),
            VariantKind::ALL.to_vec()
        );

        let base = "adb shell am start -n com.x/com.x.A -a android.intent.action.VIEW";
        assert_eq!(cmds[0].command_text, format!("{} -d \"{}\"", base, PAYLOAD));
        assert_eq!(
            cmds[1].command_text,
            format!("{} -e url \"{}\"", base, PAYLOAD)
        );
        assert_eq!(
            cmds[2].command_text,
            format!("{} -e json '{{\"url\":\"{}\"}}'", base, PAYLOAD)
        );
        assert_eq!(
            cmds[3].command_text,
            format!("{} -d \"{1}\" -e target \"{1}\"", base, PAYLOAD)
        );
    }

    #[test]
    fn test_bare_and_categories() {
        let rec = record(vec![filter(
            &[],
            &["android.intent.category.DEFAULT", "android.intent.category.BROWSABLE"],
            1,
        )]);
        let cmds = build_commands(&rec, &surface(), "com.launcher", PAYLOAD);
        assert!(cmds.iter().all(|it| it.bare));
        assert!(cmds[0].command_text.starts_with(
            "adb shell am start -n com.launcher/com.x.A -c android.intent.category.DEFAULT -c android.intent.category.BROWSABLE -d"
        ));
        assert!(!cmds[0].command_text.contains(" -a "));
    }

    #[test]
    fn test_first_action_only() {
        let rec = record(vec![filter(&["a.ONE", "a.TWO"], &[], 1)]);
        let cmds = build_commands(&rec, &surface(), "com.x", PAYLOAD);
        assert!(cmds[0].command_text.contains(" -a a.ONE "));
        assert!(!cmds[0].command_text.contains("a.TWO"));
        assert_eq!(cmds[0].actions, vec!["a.ONE", "a.TWO"]);
    }

    #[rstest]
    #[case(vec![1], 4)]
    #[case(vec![1, 3], 16)]
    #[case(vec![2, 2, 1], 20)]
    #[case(vec![], 0)]
    fn test_cardinality(#[case] data_counts: Vec<usize>, #[case] expected: usize) {
        let rec = record(
            data_counts
                .iter()
                .map(|d| filter(&["a.VIEW"], &[], *d))
                .collect(),
        );
        let cmds = build_commands(&rec, &surface(), "com.x", PAYLOAD);
        assert_eq!(cmds.len(), expected);

        let none = build_commands(&rec, &Verdict::default(), "com.x", PAYLOAD);
        assert!(none.is_empty());
    }

    #[test]
    fn test_ordering_and_determinism() {
        let rec = record(vec![filter(&["a.VIEW"], &[], 2), filter(&["a.SEND"], &[], 1)]);
        let first = build_commands(&rec, &surface(), "com.x", PAYLOAD);
        let second = build_commands(&rec, &surface(), "com.x", PAYLOAD);
        assert_eq!(first, second);

        let order = first
            .iter()
            .map(|it| (it.filter_index, it.data.scheme.clone().unwrap(), it.variant))
            .collect::<Vec<_>>();
        assert_eq!(order[0], (0, "s0".to_string(), VariantKind::Data));
        assert_eq!(order[3], (0, "s0".to_string(), VariantKind::Combined));
        assert_eq!(order[4], (0, "s1".to_string(), VariantKind::Data));
        assert_eq!(order[8], (1, "s0".to_string(), VariantKind::Data));
    }

    #[test]
    fn test_payload_with_quotes_stays_one_argument() {
        let payload = "https://x.com/?q=\"a'b\"&n=$(id)`id`";
        let rec = record(vec![filter(&["a.VIEW"], &[], 1)]);
        let cmds = build_commands(&rec, &surface(), "com.x", payload);
        assert_eq!(cmds.len(), 4);

        let args = cmds
            .iter()
            .map(|it| crate::command::split(&it.command_text).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(&args[0][args[0].len() - 2..], ["-d", payload]);
        assert_eq!(&args[1][args[1].len() - 3..], ["-e", "url", payload]);

        let json = args[2].last().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(parsed["url"], payload);

        assert_eq!(
            &args[3][args[3].len() - 5..],
            ["-d", payload, "-e", "target", payload]
        );
    }

    #[test]
    fn test_serial_prefix() {
        let builder = CommandBuilder::new("adb", Some("emulator-5554"));
        assert_eq!(builder.prefix(), "adb -s emulator-5554");

        let builder = CommandBuilder::new("/opt/android sdk/adb", None);
        assert_eq!(builder.prefix(), "'/opt/android sdk/adb'");

        let rec = record(vec![filter(&["a.VIEW"], &[], 1)]);
        let cmds = CommandBuilder::new("adb", Some("R58M")).build(&rec, &surface(), "com.x", PAYLOAD);
        assert!(cmds
            .iter()
            .all(|it| it.command_text.starts_with("adb -s R58M shell am start -n com.x/com.x.A")));
    }
}

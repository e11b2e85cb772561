use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::dispatch::ProbeResult;
use crate::model::ActivityRecord;
use crate::utils::{ensure_dir_exists, path_str};
use crate::Verdict;

pub const ANALYSIS_SHEET: &str = "Activity_Analysis";
pub const PROBE_SHEET: &str = "AttackSurfaceTest";

pub const ANALYSIS_HEADERS: [&str; 8] = [
    "ActivityName",
    "Exported(Raw)",
    "Permission",
    "IntentFilterCount",
    "IsAttackSurface",
    "IntentFilters(JSON)",
    "ProtectionLevel",
    "UsedFreePermission",
];

pub const PROBE_HEADERS: [&str; 7] = [
    "ActivityName",
    "FilterIndex",
    "Actions",
    "Categories",
    "DataAttrs(JSON)",
    "ConstructedIntent",
    "TestResult",
];

/// Most characters an Excel cell can hold
pub const XLSX_CELL_LIMIT: usize = 32_767;
/// Appended to text cut down to [XLSX_CELL_LIMIT]
pub const TRUNCATED_MARKER: &str = "...[truncated]";

/// Where analysis rows and probe results end up
pub trait ReportSink {
    fn write_analysis(&mut self, record: &ActivityRecord, verdict: &Verdict) -> crate::Result<()>;

    fn write_probe_result(&mut self, result: &ProbeResult) -> crate::Result<()>;

    /// Flush everything to disk, nothing is guaranteed to be written before
    /// this is called
    fn save(&mut self) -> crate::Result<()>;
}

enum Cell {
    Text(String),
    Count(usize),
}

impl Display for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Count(n) => write!(f, "{}", n),
        }
    }
}

fn bool_text(b: bool) -> String {
    String::from(if b { "True" } else { "False" })
}

fn analysis_cells(record: &ActivityRecord, verdict: &Verdict) -> [Cell; 8] {
    [
        Cell::Text(record.name.clone()),
        Cell::Text(record.exported.to_string()),
        Cell::Text(record.permission.clone().unwrap_or_default()),
        Cell::Count(record.intent_filters.len()),
        Cell::Text(bool_text(verdict.is_surface)),
        Cell::Text(record.filters_json()),
        Cell::Text(verdict.protection_level.clone().unwrap_or_default()),
        Cell::Text(bool_text(verdict.used_free_permission)),
    ]
}

fn probe_cells(result: &ProbeResult) -> [Cell; 7] {
    let cmd = &result.command;
    [
        Cell::Text(cmd.activity_name.clone()),
        Cell::Count(cmd.filter_index),
        Cell::Text(cmd.actions.iter().join(", ")),
        Cell::Text(cmd.categories.iter().join(", ")),
        Cell::Text(cmd.data.to_json()),
        Cell::Text(cmd.command_text.clone()),
        Cell::Text(result.result_text()),
    ]
}

/// Cut `text` to fit in one xlsx cell, ending it with [TRUNCATED_MARKER]
fn fit_xlsx_cell(text: &str) -> Cow<'_, str> {
    let len = text.chars().count();
    if len <= XLSX_CELL_LIMIT {
        return Cow::Borrowed(text);
    }
    log::warn!(
        "cell of {} characters truncated to {}",
        len,
        XLSX_CELL_LIMIT
    );
    let keep = XLSX_CELL_LIMIT - TRUNCATED_MARKER.chars().count();
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str(TRUNCATED_MARKER);
    Cow::Owned(cut)
}

fn ensure_parent_exists(path: &Path) -> crate::Result<()> {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => Ok(ensure_dir_exists(p)?),
        _ => Ok(()),
    }
}

/// An `.xlsx` workbook with one sheet for the analysis and one for probes
pub struct XlsxReport {
    path: PathBuf,
    workbook: Workbook,
    analysis_row: u32,
    probe_row: u32,
}

impl XlsxReport {
    pub fn new(path: &Path) -> crate::Result<Self> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();

        let sheet = workbook.add_worksheet();
        sheet.set_name(ANALYSIS_SHEET)?;
        Self::write_header(sheet, &ANALYSIS_HEADERS, &header)?;
        sheet.set_column_width(0, 50)?;
        sheet.set_column_width(5, 80)?;

        let sheet = workbook.add_worksheet();
        sheet.set_name(PROBE_SHEET)?;
        Self::write_header(sheet, &PROBE_HEADERS, &header)?;
        sheet.set_column_width(0, 50)?;
        sheet.set_column_width(5, 100)?;

        Ok(Self {
            path: path.to_path_buf(),
            workbook,
            analysis_row: 1,
            probe_row: 1,
        })
    }

    fn write_header(sheet: &mut Worksheet, headers: &[&str], fmt: &Format) -> crate::Result<()> {
        for (col, name) in headers.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *name, fmt)?;
        }
        Ok(())
    }

    fn write_row(sheet: &mut Worksheet, row: u32, cells: &[Cell]) -> crate::Result<()> {
        for (col, cell) in cells.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(s) => sheet.write_string(row, col, fit_xlsx_cell(s).as_ref())?,
                Cell::Count(n) => sheet.write_number(row, col, *n as f64)?,
            };
        }
        Ok(())
    }
}

impl ReportSink for XlsxReport {
    fn write_analysis(&mut self, record: &ActivityRecord, verdict: &Verdict) -> crate::Result<()> {
        let sheet = self.workbook.worksheet_from_name(ANALYSIS_SHEET)?;
        Self::write_row(sheet, self.analysis_row, &analysis_cells(record, verdict))?;
        self.analysis_row += 1;
        Ok(())
    }

    fn write_probe_result(&mut self, result: &ProbeResult) -> crate::Result<()> {
        let sheet = self.workbook.worksheet_from_name(PROBE_SHEET)?;
        Self::write_row(sheet, self.probe_row, &probe_cells(result))?;
        self.probe_row += 1;
        Ok(())
    }

    fn save(&mut self) -> crate::Result<()> {
        ensure_parent_exists(&self.path)?;
        self.workbook.save(&self.path)?;
        log::info!("wrote report to {}", path_str(&self.path));
        Ok(())
    }
}

/// The same tables as [XlsxReport] as two CSV files next to each other:
/// `<stem>_activities.csv` and `<stem>_probes.csv`
pub struct CsvReport {
    analysis: csv::Writer<BufWriter<File>>,
    probes: csv::Writer<BufWriter<File>>,
}

impl CsvReport {
    pub fn new(path: &Path) -> crate::Result<Self> {
        ensure_parent_exists(path)?;
        let (analysis_path, probes_path) = Self::paths_for(path);

        let mut analysis = Self::open_writer(&analysis_path)?;
        analysis.write_record(ANALYSIS_HEADERS)?;

        let mut probes = Self::open_writer(&probes_path)?;
        probes.write_record(PROBE_HEADERS)?;

        Ok(Self { analysis, probes })
    }

    /// The activity and probe file for a report requested at `path`
    pub fn paths_for(path: &Path) -> (PathBuf, PathBuf) {
        let stem = path
            .file_stem()
            .map(|it| it.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("analysis_result"));
        (
            path.with_file_name(format!("{}_activities.csv", stem)),
            path.with_file_name(format!("{}_probes.csv", stem)),
        )
    }

    fn open_writer(path: &Path) -> crate::Result<csv::Writer<BufWriter<File>>> {
        let file = File::create(path)?;
        Ok(csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file)))
    }
}

impl ReportSink for CsvReport {
    fn write_analysis(&mut self, record: &ActivityRecord, verdict: &Verdict) -> crate::Result<()> {
        let cells = analysis_cells(record, verdict);
        self.analysis.write_record(cells.iter().map(|c| c.to_string()))?;
        Ok(())
    }

    fn write_probe_result(&mut self, result: &ProbeResult) -> crate::Result<()> {
        let cells = probe_cells(result);
        self.probes.write_record(cells.iter().map(|c| c.to_string()))?;
        Ok(())
    }

    fn save(&mut self) -> crate::Result<()> {
        self.analysis.flush()?;
        self.probes.flush()?;
        Ok(())
    }
}

/// Pick a sink from the extension of `path`, `.csv` or `.xlsx`
pub fn open_report(path: &Path) -> crate::Result<Box<dyn ReportSink>> {
    let ext = path
        .extension()
        .map(|it| it.to_string_lossy().to_ascii_lowercase());

    match ext.as_deref() {
        Some("xlsx") => Ok(Box::new(XlsxReport::new(path)?)),
        Some("csv") => Ok(Box::new(CsvReport::new(path)?)),
        _ => Err(crate::Error::Report(format!(
            "unsupported report format for {} (expected .xlsx or .csv)",
            path_str(path)
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dispatch::Outcome;
    use crate::intent::{ProbeCommand, VariantKind};
    use crate::model::{DataSpec, IntentFilter};
    use crate::testing::{tmp_dir, TmpDir};
    use crate::Exported;
    use rstest::*;
    use std::fs;

    fn record() -> ActivityRecord {
        ActivityRecord {
            name: "com.example.Web".into(),
            exported: Exported::True,
            permission: Some("com.example.P".into()),
            intent_filters: vec![IntentFilter {
                actions: vec!["android.intent.action.VIEW".into()],
                categories: vec![
                    "android.intent.category.DEFAULT".into(),
                    "android.intent.category.BROWSABLE".into(),
                ],
                data: vec![DataSpec {
                    scheme: Some("https".into()),
                    ..Default::default()
                }],
            }],
        }
    }

    fn result(outcome: Outcome, detail: Option<&str>) -> ProbeResult {
        let rec = record();
        let filter = &rec.intent_filters[0];
        ProbeResult {
            command: ProbeCommand {
                activity_name: rec.name.clone(),
                filter_index: 0,
                actions: filter.actions.clone(),
                categories: filter.categories.clone(),
                data: filter.data[0].clone(),
                command_text: "adb shell am start -n com.example/com.example.Web".into(),
                variant: VariantKind::Data,
                bare: false,
            },
            outcome,
            detail: detail.map(String::from),
        }
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    #[rstest]
    fn test_csv_layout(tmp_dir: TmpDir) {
        let path = tmp_dir.child_path("out/report.csv");
        let mut report = open_report(&path).unwrap();
        let verdict = Verdict {
            is_surface: true,
            protection_level: Some("normal".into()),
            used_free_permission: false,
        };
        report.write_analysis(&record(), &verdict).unwrap();
        report
            .write_probe_result(&result(Outcome::Pending, Some("Starting: Intent")))
            .unwrap();
        report
            .write_probe_result(&result(Outcome::Failed, Some("Error: Activity not started")))
            .unwrap();
        report.save().unwrap();

        let (activities, probes) = CsvReport::paths_for(&path);
        assert_eq!(activities, tmp_dir.child_path("out/report_activities.csv"));

        let rows = read_csv(&activities);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ANALYSIS_HEADERS.map(String::from).to_vec());
        assert_eq!(
            rows[1][..5],
            ["com.example.Web", "true", "com.example.P", "1", "True"].map(String::from)
        );
        let filters: serde_json::Value = serde_json::from_str(&rows[1][5]).unwrap();
        assert_eq!(filters[0]["datas"][0]["scheme"], "https");
        assert_eq!(rows[1][6], "normal");
        assert_eq!(rows[1][7], "False");

        let rows = read_csv(&probes);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], PROBE_HEADERS.map(String::from).to_vec());
        assert_eq!(rows[1][1], "0");
        assert_eq!(rows[1][2], "android.intent.action.VIEW");
        assert_eq!(
            rows[1][3],
            "android.intent.category.DEFAULT, android.intent.category.BROWSABLE"
        );
        assert_eq!(rows[1][6], "Pending");
        assert_eq!(rows[2][6], "Failed: Error: Activity not started");
    }

    #[rstest]
    fn test_xlsx_written(tmp_dir: TmpDir) {
        let path = tmp_dir.child_path("analysis_result.xlsx");
        let mut report = open_report(&path).unwrap();
        report.write_analysis(&record(), &Verdict::default()).unwrap();
        report.save().unwrap();

        let bytes = fs::read(&path).unwrap();
        // xlsx is a zip archive
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_fit_xlsx_cell() {
        assert_eq!(fit_xlsx_cell("short"), "short");

        let exact = "x".repeat(XLSX_CELL_LIMIT);
        assert!(matches!(fit_xlsx_cell(&exact), Cow::Borrowed(_)));

        let long = "é".repeat(XLSX_CELL_LIMIT + 10);
        let cut = fit_xlsx_cell(&long);
        assert_eq!(cut.chars().count(), XLSX_CELL_LIMIT);
        assert!(cut.ends_with(TRUNCATED_MARKER));
    }

    #[rstest]
    fn test_xlsx_huge_cells(tmp_dir: TmpDir) {
        let mut rec = record();
        rec.intent_filters[0].data = (0..300)
            .map(|i| DataSpec {
                scheme: Some("https".into()),
                host: Some(format!("host{}.example.com", i)),
                path_prefix: Some(format!("/deep/link/{}", i)),
                ..Default::default()
            })
            .collect();
        assert!(rec.filters_json().chars().count() > XLSX_CELL_LIMIT);

        let path = tmp_dir.child_path("big.xlsx");
        let mut report = open_report(&path).unwrap();
        report.write_analysis(&rec, &Verdict::default()).unwrap();
        let output = "E".repeat(XLSX_CELL_LIMIT * 2);
        report
            .write_probe_result(&result(Outcome::Failed, Some(&output)))
            .unwrap();
        report.save().unwrap();
        assert!(path.exists());
    }

    #[rstest]
    fn test_unsupported_format(tmp_dir: TmpDir) {
        let res = open_report(&tmp_dir.child_path("report.pdf"));
        assert!(matches!(res, Err(crate::Error::Report(_))));
    }
}

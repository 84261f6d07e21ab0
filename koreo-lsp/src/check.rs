//! Batch checking from the command line.
//!
//!     `koreo-lsp check [--fail-on-warning] [PATH...]` loads every Koreo file under the given
//!     paths into one workspace, runs all FunctionTests and prints the diagnostics an editor
//!     would show, one per line:
//!
//!         path:line:column: severity[code] message
//!
//!     Lines and columns are one-based. Without paths the current directory is checked.

use std::fs;
use std::path::{Path, PathBuf};

use crate::features::diagnostics::collect_diagnostics;
use crate::features::files::collect_koreo_files;
use koreo_analysis::diagnostics::{analyze_document, Diagnostic, DocumentAnalysis, Severity};
use koreo_analysis::workspace::WorkspaceSymbols;
use thiserror::Error;
use tower_lsp::lsp_types::Url;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot address {0} as a file URI")]
    Uri(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckOptions {
    pub paths: Vec<PathBuf>,
    pub fail_on_warning: bool,
}

impl CheckOptions {
    pub fn parse(args: &[String]) -> Result<Self, CheckError> {
        let mut options = CheckOptions::default();
        for arg in args {
            match arg.as_str() {
                "--fail-on-warning" => options.fail_on_warning = true,
                flag if flag.starts_with("--") => {
                    return Err(CheckError::UnknownOption(flag.to_string()))
                }
                path => options.paths.push(PathBuf::from(path)),
            }
        }
        if options.paths.is_empty() {
            options.paths.push(PathBuf::from("."));
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub files: usize,
    pub lines: Vec<String>,
    pub errors: usize,
    pub warnings: usize,
}

impl CheckReport {
    pub fn failed(&self, fail_on_warning: bool) -> bool {
        self.errors > 0 || (fail_on_warning && self.warnings > 0)
    }

    pub fn summary(&self) -> String {
        format!(
            "checked {} files: {} errors, {} warnings",
            self.files, self.errors, self.warnings
        )
    }
}

struct LoadedFile {
    path: PathBuf,
    uri: Url,
    analysis: DocumentAnalysis,
}

pub fn run_check(options: &CheckOptions) -> Result<CheckReport, CheckError> {
    let files = collect_koreo_files(&options.paths);
    let loaded = files
        .iter()
        .map(|path| load(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut workspace = WorkspaceSymbols::default();
    for file in &loaded {
        workspace.replace_document(&file.uri, &file.analysis);
    }
    for file in &loaded {
        let runs = workspace.run_tests_in(&file.uri);
        if !runs.is_empty() {
            tracing::debug!(path = %file.path.display(), tests = runs.len(), "ran function tests");
        }
        workspace.record_runs(&file.uri, runs);
    }

    let mut report = CheckReport {
        files: loaded.len(),
        ..Default::default()
    };
    for file in &loaded {
        for diagnostic in collect_diagnostics(&file.uri, &file.analysis, &workspace) {
            match diagnostic.severity {
                Severity::Error => report.errors += 1,
                Severity::Warning => report.warnings += 1,
                Severity::Information | Severity::Hint => {}
            }
            report.lines.push(format_diagnostic(&file.path, &diagnostic));
        }
    }
    tracing::info!(
        files = report.files,
        errors = report.errors,
        warnings = report.warnings,
        "check finished"
    );
    Ok(report)
}

fn load(path: &Path) -> Result<LoadedFile, CheckError> {
    let read_error = |source| CheckError::Read {
        path: path.to_path_buf(),
        source,
    };
    let text = fs::read_to_string(path).map_err(read_error)?;
    let absolute = fs::canonicalize(path).map_err(read_error)?;
    let uri = Url::from_file_path(&absolute).map_err(|_| CheckError::Uri(absolute.clone()))?;
    Ok(LoadedFile {
        path: path.to_path_buf(),
        uri,
        analysis: analyze_document(&text),
    })
}

pub fn format_diagnostic(path: &Path, diagnostic: &Diagnostic) -> String {
    format!(
        "{}:{}:{}: {}[{}] {}",
        path.display(),
        diagnostic.range.start.line + 1,
        diagnostic.range.start.column + 1,
        diagnostic.severity.as_str(),
        diagnostic.code.as_str(),
        diagnostic.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use koreo_analysis::test_support::sample_source;
    use tempfile::tempdir;

    const PASSING: &str = "apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: double
spec:
  return:
    value: =inputs.n * 2
---
apiVersion: koreo.dev/v1beta1
kind: FunctionTest
metadata:
  name: double-test
spec:
  functionRef:
    kind: ValueFunction
    name: double
  inputs:
    n: 2
  testCases:
    - label: doubles
      expectReturn:
        value: 4
";

    #[test]
    fn parses_flags_and_paths() {
        let args = vec!["--fail-on-warning".to_string(), "resources".to_string()];
        let options = CheckOptions::parse(&args).unwrap();
        assert!(options.fail_on_warning);
        assert_eq!(options.paths, vec![PathBuf::from("resources")]);

        let defaults = CheckOptions::parse(&[]).unwrap();
        assert_eq!(defaults.paths, vec![PathBuf::from(".")]);
        assert!(matches!(
            CheckOptions::parse(&["--bogus".to_string()]),
            Err(CheckError::UnknownOption(_))
        ));
    }

    #[test]
    fn failing_case_is_reported_as_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sample.k.yaml"), sample_source()).unwrap();

        let report = run_check(&CheckOptions {
            paths: vec![dir.path().to_path_buf()],
            fail_on_warning: false,
        })
        .unwrap();

        assert_eq!(report.files, 1);
        assert!(report.failed(false));
        assert!(report
            .lines
            .iter()
            .any(|line| line.contains("error[test-failure]") && line.contains("wrong tag")));
    }

    #[test]
    fn references_resolve_across_files() {
        let dir = tempdir().unwrap();
        let (function, test) = PASSING.split_once("---\n").unwrap();
        fs::write(dir.path().join("double.k.yaml"), function).unwrap();
        fs::write(dir.path().join("double-test.k.yaml"), test).unwrap();

        let report = run_check(&CheckOptions {
            paths: vec![dir.path().to_path_buf()],
            fail_on_warning: true,
        })
        .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.errors, 0, "{:?}", report.lines);
        assert!(!report.failed(false));
    }

    #[test]
    fn unknown_fields_fail_only_with_fail_on_warning() {
        let dir = tempdir().unwrap();
        let text = PASSING.replace("  return:\n", "  retrun: {}\n  return:\n");
        fs::write(dir.path().join("double.k.yaml"), text).unwrap();

        let report = run_check(&CheckOptions {
            paths: vec![dir.path().to_path_buf()],
            fail_on_warning: false,
        })
        .unwrap();

        assert!(report.warnings > 0);
        assert!(!report.failed(false));
        assert!(report.failed(true));
        assert!(report
            .lines
            .iter()
            .any(|line| line.contains("warning[unknown-field]")));
    }

    #[test]
    fn diagnostics_are_one_based() {
        let diagnostic = Diagnostic {
            range: koreo_analysis::source::SourceLocation::new("a\nbc").range(2..3),
            severity: Severity::Warning,
            code: koreo_analysis::diagnostics::DiagnosticCode::UnknownField,
            message: "unknown field `b`".into(),
        };
        assert_eq!(
            format_diagnostic(Path::new("x.yaml"), &diagnostic),
            "x.yaml:2:1: warning[unknown-field] unknown field `b`"
        );
    }
}

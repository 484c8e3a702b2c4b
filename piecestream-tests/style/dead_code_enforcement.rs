//! Dead Code Enforcement
//!
//! Production code of the piecestream crates must not carry
//! #[allow(dead_code)] attributes. Test code is exempt.

use std::fs;
use std::path::{Path, PathBuf};

/// A dead code allowance found in production code
#[derive(Debug)]
struct DeadCodeViolation {
    file_path: String,
    line_number: usize,
    context: String,
}

/// Checker for dead code allowances across the workspace crates
struct DeadCodeChecker {
    violations: Vec<DeadCodeViolation>,
    files_checked: usize,
}

impl DeadCodeChecker {
    fn new() -> Self {
        Self {
            violations: Vec::new(),
            files_checked: 0,
        }
    }

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".."))
    }

    /// Source files of every `piecestream-*` crate
    fn find_rust_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            let is_crate = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("piecestream-"));
            if path.is_dir() && is_crate {
                Self::find_rust_files_recursive(&path, &mut files, 0)?;
            }
        }
        Ok(files)
    }

    fn find_rust_files_recursive(
        dir: &Path,
        files: &mut Vec<PathBuf>,
        depth: usize,
    ) -> std::io::Result<()> {
        if depth > 8 {
            return Ok(());
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name()
                && (name.to_string_lossy().starts_with('.') || name == "target")
            {
                continue;
            }

            if path.is_dir() {
                Self::find_rust_files_recursive(&path, files, depth + 1)?;
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
        Ok(())
    }

    /// Whether a path holds test code
    fn is_test_file(path: &Path) -> bool {
        let path_str = path.to_string_lossy().to_lowercase();
        path_str.contains("piecestream-tests")
            || path_str.contains("/tests/")
            || path_str.ends_with("tests.rs")
            || path_str.ends_with("test_mocks.rs")
    }

    fn check_source(&mut self, file_path: &str, content: &str) {
        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("#[allow(") && trimmed.contains("dead_code") {
                self.violations.push(DeadCodeViolation {
                    file_path: file_path.to_string(),
                    line_number: index + 1,
                    context: trimmed.to_string(),
                });
            }
        }
    }

    fn check_workspace(&mut self) -> std::io::Result<()> {
        for file in Self::find_rust_files(&Self::workspace_root())? {
            if Self::is_test_file(&file) {
                continue;
            }
            let content = fs::read_to_string(&file)?;
            self.files_checked += 1;
            self.check_source(&file.to_string_lossy(), &content);
        }
        Ok(())
    }

    fn report_violations(&self) -> bool {
        if self.violations.is_empty() {
            println!(
                "Dead code enforcement: {} files checked, no violations found",
                self.files_checked
            );
            return true;
        }

        println!("Dead code enforcement violations found:");
        for violation in &self.violations {
            println!("{}:{}", violation.file_path, violation.line_number);
            println!("  {}", violation.context);
        }
        println!(
            "Found {} violation(s) in {} file(s) checked",
            self.violations.len(),
            self.files_checked
        );
        println!("Remove the unused code or use it; test files are exempt.");
        false
    }
}

#[test]
fn test_is_test_file() {
    assert!(DeadCodeChecker::is_test_file(Path::new(
        "piecestream-tests/integration/teardown.rs"
    )));
    assert!(DeadCodeChecker::is_test_file(Path::new(
        "piecestream-core/src/demux/integration_tests.rs"
    )));
    assert!(DeadCodeChecker::is_test_file(Path::new(
        "piecestream-core/src/test_mocks.rs"
    )));

    assert!(!DeadCodeChecker::is_test_file(Path::new(
        "piecestream-core/src/lib.rs"
    )));
    assert!(!DeadCodeChecker::is_test_file(Path::new(
        "piecestream-sim/src/engine.rs"
    )));
}

#[test]
fn test_dead_code_detection() {
    let mut checker = DeadCodeChecker::new();
    let source = r#"
use std::collections::HashMap;

#[allow(dead_code)]
struct UnusedStruct {
    field: u32,
}

#[allow(clippy::missing_docs, dead_code)]
fn unused_function() {}
"#;
    checker.check_source("sample.rs", source);

    assert_eq!(checker.violations.len(), 2);
    assert_eq!(checker.violations[0].line_number, 4);
    assert_eq!(checker.violations[1].line_number, 9);
}

#[test]
fn dead_code_enforcement() {
    let mut checker = DeadCodeChecker::new();
    checker
        .check_workspace()
        .expect("Failed to check workspace");

    assert!(checker.files_checked > 0);
    assert!(
        checker.report_violations(),
        "Production code contains #[allow(dead_code)] attributes"
    );
}

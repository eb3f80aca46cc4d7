#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests for the Whisperers client.
//!
//! These tests verify that `Cargo.toml` keeps the panic-free lint policy and
//! that every declared demo target points at a file that exists. All checks
//! are synchronous filesystem reads.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Reads a file relative to the project root and returns its contents.
fn read_project_file(relative_path: &str) -> String {
    let path = project_root().join(relative_path);
    std::fs::read_to_string(&path).unwrap_or_else(|e| {
        panic!(
            "Failed to read '{}': {}. This file is required by project policy.",
            path.display(),
            e
        )
    })
}

mod lint_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_has_lints_clippy_section() {
        let cargo = read_project_file("Cargo.toml");
        assert!(
            cargo.contains("[lints.clippy]"),
            "Cargo.toml is missing [lints.clippy] section."
        );
    }

    #[test]
    fn cargo_toml_has_all_panic_free_lints() {
        let cargo = read_project_file("Cargo.toml");

        for lint in REQUIRED_DENY_LINTS {
            let pattern = format!("{lint} = \"deny\"");
            assert!(
                cargo.contains(&pattern),
                "Cargo.toml is missing `{pattern}` in [lints.clippy]. \
                 Panic-prone lints must be denied in library code."
            );
        }
    }
}

mod demo_targets {
    use super::*;

    #[test]
    fn every_example_path_exists() {
        let cargo = read_project_file("Cargo.toml");
        let paths: Vec<&str> = cargo
            .lines()
            .filter_map(|line| line.trim().strip_prefix("path = \""))
            .filter_map(|rest| rest.strip_suffix('"'))
            .filter(|path| path.starts_with("demos/"))
            .collect();

        assert!(!paths.is_empty(), "no demo targets declared");
        for path in paths {
            assert!(
                project_root().join(path).is_file(),
                "declared demo '{path}' does not exist"
            );
        }
    }
}

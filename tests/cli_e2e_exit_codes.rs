//! End-to-end tests for CLI exit codes.
//!
//! The statuses are documented in [`recipe_sources::exit_codes`]:
//!
//! - 0: success
//! - 1: general error
//! - 2: invalid command-line usage (handled by clap)
//! - 3: configuration error
//! - 17: freeze refused because of local modifications

#[allow(dead_code)]
mod common;
use common::prelude::*;

#[test]
fn test_exit_code_help() {
    let mut cmd = cargo_bin_cmd!("recipe-sources");

    cmd.arg("--help")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("retrieve"))
        .stdout(predicate::str::contains("freeze"))
        .stdout(predicate::str::contains("extract"));
}

#[test]
fn test_exit_code_version() {
    let mut cmd = cargo_bin_cmd!("recipe-sources");

    cmd.arg("--version")
        .assert()
        .code(0)
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_exit_code_usage_unknown_subcommand() {
    let mut cmd = cargo_bin_cmd!("recipe-sources");

    cmd.arg("fetch-everything").assert().code(2);
}

#[test]
fn test_exit_code_usage_freeze_without_output() {
    let fixture = TestFixture::new().with_config(configs::LOCAL_ONLY);

    fixture.command().arg("freeze").assert().code(2);
}

#[test]
fn test_exit_code_config_not_found() {
    let fixture = TestFixture::new();

    fixture
        .command()
        .arg("sources")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_exit_code_malformed_addon_line() {
    let fixture = TestFixture::new().with_config(configs::MALFORMED_ADDON);

    fixture
        .command()
        .arg("sources")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("git https://example.com/web.git web"));
}

#[test]
fn test_exit_code_unsupported_backend() {
    let fixture = TestFixture::new()
        .with_config("[odoo]\nversion = local server\naddons = cvs :pserver:x mod HEAD\n");

    fixture
        .command()
        .arg("sources")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("'cvs'"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_exit_code_ambiguous_part() {
    let fixture = TestFixture::new().with_config(configs::TWO_PARTS);

    fixture
        .command()
        .arg("sources")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("odoo-test"));

    fixture
        .command()
        .args(["sources", "--part", "odoo-test"])
        .assert()
        .code(0);
}

#[test]
fn test_exit_code_standalone_addon() {
    let fixture = TestFixture::new()
        .with_config("[odoo]\nversion = local server\naddons = local my_module\n")
        .with_file("my_module/__manifest__.py", "{'name': 'My module'}");

    fixture
        .command()
        .arg("retrieve")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("group="));
}

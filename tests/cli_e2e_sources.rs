//! End-to-end tests for the `recipe-sources sources` command.
//!
//! The command only parses the recipe, so these tests need no
//! version-control tool installed.

#[allow(dead_code)]
mod common;
use common::prelude::*;

#[test]
fn test_sources_text_listing() {
    let fixture = TestFixture::new().with_config(configs::WITH_VCS);

    fixture
        .command()
        .arg("sources")
        .assert()
        .success()
        .stdout(predicate::str::contains("[odoo]"))
        .stdout(predicate::str::contains(
            "git https://example.com/odoo.git odoo 16.0",
        ))
        // revision override applied
        .stdout(predicate::str::contains(
            "git https://example.com/web.git web 0123abc group=oca",
        ))
        .stdout(predicate::str::contains("merge git https://example.com/fork.git fix-branch"));
}

#[test]
fn test_sources_json() {
    let fixture = TestFixture::new().with_config(configs::WITH_VCS);

    let output = fixture
        .command()
        .args(["sources", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["part"], "odoo");

    let sources = json["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 4);
    assert_eq!(sources[0]["location"], "main");
    assert_eq!(sources[0]["type"], "vcs");
    assert_eq!(sources[0]["backend"], "git");
    assert_eq!(sources[1]["location"], "web");
    assert_eq!(sources[1]["revision"], "0123abc");
    assert_eq!(sources[1]["options"]["group"], "oca");
    assert_eq!(sources[2]["options"]["subdir"], "addons");
    assert_eq!(sources[3]["type"], "local");
    assert_eq!(sources[3]["target"], "custom");

    let merges = json["merges"].as_array().unwrap();
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0]["target"], "web");
    assert_eq!(merges[0]["revision"], "fix-branch");
}

#[test]
fn test_sources_reads_config_from_env() {
    let fixture = TestFixture::new().with_file("deploy/prod.cfg", configs::LOCAL_ONLY);

    fixture
        .command()
        .env("RECIPE_SOURCES_CONFIG", fixture.path().join("deploy/prod.cfg"))
        .arg("sources")
        .assert()
        .success()
        .stdout(predicate::str::contains("local addons-a"))
        // inline comment stripped
        .stdout(predicate::str::contains("second").not());
}

#[test]
fn test_sources_with_extends() {
    let fixture = TestFixture::new()
        .with_file("base.cfg", configs::LOCAL_ONLY)
        .with_config("[recipe]\nextends = base.cfg\n\n[odoo]\naddons = local other\n");

    fixture
        .command()
        .arg("sources")
        .assert()
        .success()
        .stdout(predicate::str::contains("local server"))
        .stdout(predicate::str::contains("local other"))
        .stdout(predicate::str::contains("addons-a").not());
}

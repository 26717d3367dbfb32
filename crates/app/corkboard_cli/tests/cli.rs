use assert_cmd::Command;
use predicates::prelude::*;

fn corkboard() -> Command {
    let mut cmd = Command::cargo_bin("corkboard").unwrap();
    cmd.env_remove("CORKBOARD_API_KEY")
        .env_remove("CORKBOARD_DATABASE_URL");
    cmd
}

#[test]
fn version_prints_package_version() {
    corkboard()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_commands() {
    corkboard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("login").and(predicate::str::contains("post")));
}

#[test]
fn demo_runs_without_a_backend() {
    corkboard()
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("signed in as bob@example.com"))
        .stdout(predicate::str::contains("You can only change your own comments."))
        .stdout(predicate::str::contains("demo complete"));
}

#[test]
fn hosted_commands_require_configuration() {
    let dir = tempfile::tempdir().unwrap();
    corkboard()
        .current_dir(dir.path())
        .env("CORKBOARD_DATA_DIR", dir.path())
        .arg("whoami")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CORKBOARD_API_KEY"));
}

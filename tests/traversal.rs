mod common;

use assert_cmd::prelude::*;
use common::{create_file, fconcat_cmd};
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_depth_cap_warns_and_succeeds() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "a/b/c/deep.txt", "deep")?;
    create_file(&input, "a/shallow.txt", "shallow")?;
    let output = temp.path().join("out.txt");

    fconcat_cmd()
        .arg(&input)
        .arg(&output)
        .args(["--max-depth", "2"])
        .assert()
        .success()
        .stderr(predicate::str::contains("[WARNING] Maximum depth 2 reached"));

    let document = fs::read_to_string(&output)?;
    assert!(document.contains("// File: a/shallow.txt"));
    assert!(document.contains("📁 a/b/"));
    assert!(!document.contains("a/b/c"));
    Ok(())
}

#[test]
fn test_quiet_log_level_hides_warnings() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "a/b/deep.txt", "deep")?;

    fconcat_cmd()
        .arg(&input)
        .arg(temp.path().join("out.txt"))
        .args(["--max-depth", "1", "--log-level", "error"])
        .assert()
        .success()
        .stderr(predicate::str::contains("WARNING").not());
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_symlink_cycle_terminates_when_following() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "a/b/file.txt", "inside")?;
    std::os::unix::fs::symlink("../..", input.join("a/b/loop"))?;
    let output = temp.path().join("out.txt");

    fconcat_cmd()
        .arg(&input)
        .arg(&output)
        .args(["--symlinks", "follow"])
        .assert()
        .success()
        .stderr(predicate::str::contains("circular symlink"));

    let document = fs::read_to_string(&output)?;
    assert_eq!(document.matches("// File: a/b/file.txt").count(), 1);
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_symlink_placeholder_names_target() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "real.txt", "real")?;
    std::os::unix::fs::symlink("real.txt", input.join("alias.txt"))?;
    let output = temp.path().join("out.txt");

    fconcat_cmd()
        .arg(&input)
        .arg(&output)
        .args(["--symlinks", "placeholder"])
        .assert()
        .success();

    let document = fs::read_to_string(&output)?;
    assert!(document.contains("// File: alias.txt\n// [Symbolic link to: real.txt]\n"));
    assert!(document.contains("// File: real.txt\nreal"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_symlinks_skipped_by_default() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "real.txt", "real")?;
    std::os::unix::fs::symlink("real.txt", input.join("alias.txt"))?;
    let output = temp.path().join("out.txt");

    fconcat_cmd().arg(&input).arg(&output).assert().success();

    let document = fs::read_to_string(&output)?;
    assert!(!document.contains("alias.txt"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_skipped_with_warning() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "secret.txt", "hidden")?;
    create_file(&input, "open.txt", "visible")?;
    fs::set_permissions(input.join("secret.txt"), fs::Permissions::from_mode(0o000))?;
    // Root can read anything; nothing to test then.
    if fs::read(input.join("secret.txt")).is_ok() {
        return Ok(());
    }
    let output = temp.path().join("out.txt");

    fconcat_cmd()
        .arg(&input)
        .arg(&output)
        .assert()
        .success()
        .stderr(predicate::str::contains("[WARNING]"));

    let document = fs::read_to_string(&output)?;
    assert!(document.contains("// File: open.txt\nvisible"));
    assert!(!document.contains("hidden"));
    Ok(())
}

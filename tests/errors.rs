mod common;

use assert_cmd::prelude::*;
use common::{create_file, fconcat_cmd};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_uncreatable_output_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    create_file(temp.path(), "a.txt", "a")?;

    fconcat_cmd()
        .arg(temp.path())
        .arg(temp.path().join("no/such/dir/out.txt"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
    Ok(())
}

#[test]
fn test_invalid_log_level_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    fconcat_cmd()
        .arg(temp.path())
        .arg(temp.path().join("out.txt"))
        .args(["--log-level", "loud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("loud"));
    Ok(())
}

#[test]
fn test_invalid_symlink_mode_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    fconcat_cmd()
        .arg(temp.path())
        .arg(temp.path().join("out.txt"))
        .args(["--symlinks", "sometimes"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn test_missing_plugin_is_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "a.txt", "a")?;

    fconcat_cmd()
        .arg(&input)
        .arg(temp.path().join("out.txt"))
        .args(["--plugin", "/definitely/not/here/libnothing.so:mode=fast"])
        .assert()
        .success()
        .stderr(predicate::str::contains("libnothing.so"))
        .stdout(predicate::str::contains("Files processed: 1"));
    Ok(())
}

#[test]
fn test_excess_plugin_parameters_are_reported() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("in");
    create_file(&input, "a.txt", "a")?;
    let params: Vec<String> = (0..17).map(|i| format!("p{}=v", i)).collect();
    let spec = format!("/definitely/not/here/libmany.so:{}", params.join(","));

    fconcat_cmd()
        .arg(&input)
        .arg(temp.path().join("out.txt"))
        .args(["--plugin", &spec])
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "[WARNING] Plugin '/definitely/not/here/libmany.so' has 17 parameters, only the first 16 are used",
        ));
    Ok(())
}

#[test]
fn test_missing_arguments_rejected() -> Result<(), Box<dyn std::error::Error>> {
    fconcat_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
    Ok(())
}

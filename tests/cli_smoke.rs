use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::tempdir;

fn run_cli(save: &Path, args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_animesort"))
        .arg("--save")
        .arg(save)
        .args(["--seed", "3"])
        .args(args)
        .env_remove("ANIMESORT_SAVE_PATH")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn write_items(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("items.json");
    std::fs::write(
        &path,
        r#"[
            {"mal_id": 1, "title": "Cowboy Bebop", "watching_status": 2},
            {"mal_id": 2, "title": "Trigun", "watching_status": 2},
            {"mal_id": 3, "title": "Monster", "watching_status": 2},
            {"mal_id": 4, "title": "Planetes", "watching_status": 2},
            {"mal_id": 5, "title": "Still Watching", "watching_status": 1}
        ]"#,
    )
    .unwrap();
    path
}

#[test]
fn rank_results_export_import_and_delete() {
    let dir = tempdir().unwrap();
    let items = write_items(dir.path());
    let save = dir.path().join("save.sqlite");

    let answers = "1\n".repeat(10);
    let out = run_cli(&save, &["rank", "--items", items.to_str().unwrap()], &answers);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("done:"), "{stdout}");
    assert!(stdout.contains("Cowboy Bebop"));
    assert!(!stdout.contains("Still Watching"));

    let out = run_cli(&save, &["results", "--top", "2"], "");
    assert!(out.status.success());
    let listed = String::from_utf8_lossy(&out.stdout);
    assert_eq!(listed.lines().count(), 2);
    assert!(listed.starts_with("   1. "));

    let exported = dir.path().join("ranking.json");
    let out = run_cli(&save, &["export", "--out", exported.to_str().unwrap()], "");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let raw = std::fs::read_to_string(&exported).unwrap();
    let document = animesort::parse_import(&raw).unwrap();
    assert_eq!(document.anime.len(), 4);
    assert_eq!(document.username, "local");

    let other_save = dir.path().join("other.sqlite");
    let out = run_cli(
        &other_save,
        &["import", "--file", exported.to_str().unwrap(), "--offline"],
        "",
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("imported ranking of 4 items"));

    let out = run_cli(&save, &["delete-save"], "");
    assert!(out.status.success());
    let out = run_cli(&save, &["results"], "");
    assert!(!out.status.success());
}

#[test]
fn quitting_early_then_resuming_a_saved_session() {
    let dir = tempdir().unwrap();
    let items = write_items(dir.path());
    let save = dir.path().join("save.sqlite");

    let out = run_cli(&save, &["rank", "--items", items.to_str().unwrap()], "2\ns\nq\n");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("saved"));
    assert!(!stdout.contains("done:"));

    let out = run_cli(&save, &["resume"], &"2\n".repeat(10));
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("done:"));
}

#[test]
fn too_few_items_fails_cleanly() {
    let dir = tempdir().unwrap();
    let items = dir.path().join("items.json");
    std::fs::write(&items, r#"[{"mal_id": 1, "title": "Alone", "watching_status": 2}]"#).unwrap();

    let out = run_cli(
        &dir.path().join("save.sqlite"),
        &["rank", "--items", items.to_str().unwrap()],
        "",
    );
    assert!(!out.status.success());
}

use std::fs;
use std::path::Path;

use predicates::prelude::*;
use songbook::document::Document;
use songbook::formats::{Block, Paragraph, ParagraphHeading, SongEntry};

fn write_song(store_dir: &Path, id: &str, title: &str, lyrics: &str) -> anyhow::Result<()> {
    let doc = Document::new(id, title)
        .with_parent("lyrics")
        .with_body(vec![
            Block::Paragraph(Paragraph::new(title).with_heading(ParagraphHeading::Title)),
            Block::Paragraph(Paragraph::new(lyrics)),
        ]);
    let dir = store_dir.join("documents");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(format!("{id}.json")), serde_json::to_vec_pretty(&doc)?)?;
    Ok(())
}

fn setup(root: &Path) -> anyhow::Result<String> {
    let store_dir = root.join("store");
    write_song(&store_dir, "zion", "Zion", "Zion, city of our God")?;
    write_song(&store_dir, "grace", "Amazing Grace", "Amazing grace")?;

    fs::write(
        root.join("ledger.yaml"),
        "sheets:\n  Songs:\n    - [Title, Document]\n    - [Zion, zion]\n    - [\"\", orphan]\n    - [Amazing Grace, grace]\n",
    )?;

    let config_path = root.join("songbook.yaml");
    fs::write(
        &config_path,
        "store_dir: store\n\
ledger:\n  path: ledger.yaml\n  sheet: Songs\n  range: A2:B\n\
output:\n  document_id: lyrics-book\n  title: Lyrics\n\
source_folder_id: lyrics\n",
    )?;
    Ok(config_path.to_string_lossy().to_string())
}

#[test]
fn build_compiles_then_skips_when_nothing_changed() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let config = setup(temp.path())?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.args(["build", "--config", &config])
        .assert()
        .success()
        .stdout("compiled 2 songs (0 failed, 2 indexed)\n");

    let compiled = fs::read_to_string(temp.path().join("store/documents/lyrics-book.json"))?;
    let doc: Document = serde_json::from_str(&compiled)?;
    let titles = doc
        .body
        .iter()
        .filter_map(Block::as_paragraph)
        .take(2)
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["AMAZING GRACE", "ZION"]);
    assert!(!temp.path().join("store/locks/lyrics-book.lock").exists());

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.args(["build", "--config", &config])
        .assert()
        .success()
        .stdout("up-to-date\n");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.args(["check", "--config", &config])
        .assert()
        .success()
        .stdout("up-to-date\n");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.args(["build", "--config", &config, "--force"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("compiled 2 songs"));

    Ok(())
}

#[test]
fn check_reports_stale_before_first_build() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let config = setup(temp.path())?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.args(["check", "--config", &config])
        .assert()
        .success()
        .stdout("stale\n");
    Ok(())
}

#[test]
fn catalog_lists_valid_rows_in_ledger_order() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let config = setup(temp.path())?;

    let output = assert_cmd::cargo::cargo_bin_cmd!("songbook")
        .args(["catalog", "--config", &config])
        .output()?;
    assert!(output.status.success());

    let entries = String::from_utf8(output.stdout)?
        .lines()
        .map(serde_json::from_str::<SongEntry>)
        .collect::<Result<Vec<_>, _>>()?;
    let ids = entries
        .iter()
        .map(|e| e.source_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["zion", "grace"]);
    Ok(())
}

#[test]
fn build_waits_out_a_held_lock_and_reports_locked() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let config = setup(temp.path())?;
    let locks_dir = temp.path().join("store/locks");
    fs::create_dir_all(&locks_dir)?;
    fs::write(
        locks_dir.join("lyrics-book.lock"),
        format!(
            "{{\"pid\":1,\"acquired_at\":\"{}\"}}",
            chrono::Utc::now().to_rfc3339()
        ),
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.args(["build", "--config", &config, "--force"])
        .assert()
        .success()
        .stdout("locked\n");
    assert!(!temp.path().join("store/documents/lyrics-book.json").exists());
    Ok(())
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let config = setup(temp.path())?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.env("RUST_LOG", "debug")
        .args(["check", "--config", &config])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
    Ok(())
}

#[test]
fn verbose_flag_logs_module_targets() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let config = setup(temp.path())?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.env_remove("RUST_LOG")
        .args(["--verbose", "check", "--config", &config])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"))
        .stderr(predicate::str::contains("songbook::staleness"));
    Ok(())
}

#[test]
fn missing_config_fails_with_context() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("songbook");
    cmd.args(["build", "--config", "/nonexistent/songbook.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("load config"));
}

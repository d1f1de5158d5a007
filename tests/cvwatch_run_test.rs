use assert_cmd::Command;
use chrono::{Datelike, Utc};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn months() -> (String, String) {
    let now = Utc::now().with_timezone(&chrono_tz::Asia::Tokyo);
    let (year, month) = (now.year(), now.month());
    let (prev_year, prev_month) = if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    };
    (
        format!("{year:04}-{month:02}"),
        format!("{prev_year:04}-{prev_month:02}"),
    )
}

fn log_page(rows: &[(String, &str, &str)], next: Option<&str>) -> String {
    let body: String = rows
        .iter()
        .map(|(time, id, name)| {
            format!("<tr><td>{time}</td><td>{id}</td><td>{name}</td><td>My Blog</td></tr>\n")
        })
        .collect();
    let pager = next
        .map(|href| format!(r#"<div class="pagination"><a rel="next" href="{href}">次へ</a></div>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body>
<table class="nav"><tr><td>ホーム</td><td>レポート</td></tr></table>
<table class="report">
<thead><tr><th>注文日時</th><th>広告ID</th><th>広告名</th><th>サイト名</th></tr></thead>
<tbody>
{body}</tbody>
</table>
{pager}
</body></html>"#
    )
}

fn write_prices(home: &Path) {
    fs::create_dir_all(home).expect("mkdir home");
    fs::write(
        home.join("prices.json"),
        r#"{
  // campaign prices
  byAdId: { "A1": 3000, "A2": 1500 },
  defaultUnitPrice: 0,
}"#,
    )
    .expect("write prices");
}

fn cvwatch(cwd: &Path, home: &Path) -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("cvwatch");
    cmd.current_dir(cwd)
        .env("HOME", cwd)
        .env("CVWATCH_HOME", home)
        .env("CVWATCH_DISCOVERY_TIMEOUT_SECS", "1")
        .env("CVWATCH_SETTLE_TIMEOUT_MS", "10")
        .env("CVWATCH_POLL_INTERVAL_MS", "10")
        .env_remove("CVWATCH_TARGET_URL")
        .env_remove("CVWATCH_WEBHOOK_URL")
        .env_remove("CVWATCH_LOGIN_URL");
    cmd
}

#[test]
fn bootstrap_then_incremental_notifies_only_new_rows() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let site = tmp.path().join("site");
    fs::create_dir_all(&site).expect("mkdir site");
    write_prices(&home);
    let (current, previous) = months();

    let page1 = site.join("page1.html");
    let known = vec![
        (format!("{current}-01 10:00"), "A1", "Spring Sale"),
        (format!("{current}-01 09:00"), "A2", "Summer Sale"),
    ];
    fs::write(&page1, log_page(&known, Some("page2.html"))).expect("write page1");
    fs::write(
        site.join("page2.html"),
        log_page(&[(format!("{previous}-28 12:00"), "A1", "Spring Sale")], None),
    )
    .expect("write page2");
    let target = format!("file://{}", page1.display());

    cvwatch(tmp.path(), &home)
        .env("CVWATCH_TARGET_URL", &target)
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode=bootstrap"))
        .stdout(predicate::str::contains("new_events=2"))
        .stdout(predicate::str::contains("\"kind\"").not());

    let state_raw = fs::read_to_string(home.join("state/cvwatch_state.json")).expect("state");
    let state: serde_json::Value = serde_json::from_str(&state_raw).expect("state json");
    assert_eq!(state["initialized"], true);
    assert_eq!(state["seenFingerprints"].as_array().map(Vec::len), Some(3));
    assert_eq!(state["monthlyTotals"][&current]["revenue"], 4500);

    let mut grown = vec![(format!("{current}-01 11:00"), "B7", "Mystery Offer")];
    grown.extend(known);
    fs::write(&page1, log_page(&grown, Some("page2.html"))).expect("rewrite page1");

    cvwatch(tmp.path(), &home)
        .env("CVWATCH_TARGET_URL", &target)
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode=incremental"))
        .stdout(predicate::str::contains("new_events=1"))
        .stdout(predicate::str::contains("\"kind\":\"conversion\""))
        .stdout(predicate::str::contains("price: unresolved (B7)"))
        .stdout(predicate::str::contains("\"kind\":\"unresolved_prices\""));

    cvwatch(tmp.path(), &home)
        .env("CVWATCH_TARGET_URL", &target)
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("new_events=0"))
        .stdout(predicate::str::contains("\"kind\"").not());

    let audit = fs::read_to_string(home.join("logs/audit.log")).expect("audit");
    assert_eq!(audit.lines().count(), 3);
}

#[test]
fn run_without_target_url_fails_with_code() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    write_prices(&home);

    cvwatch(tmp.path(), &home)
        .args(["run", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E001_CONFIG_MISSING"))
        .stderr(predicate::str::contains("CVWATCH_TARGET_URL"));
}

#[test]
fn run_without_webhook_requires_dry_run() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    write_prices(&home);

    cvwatch(tmp.path(), &home)
        .env("CVWATCH_TARGET_URL", "file:///nonexistent/page.html")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CVWATCH_WEBHOOK_URL"));
}

#[test]
fn page_without_conversion_table_times_out() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    write_prices(&home);
    let page = tmp.path().join("empty.html");
    fs::write(&page, "<html><body><p>maintenance</p></body></html>").expect("write");

    cvwatch(tmp.path(), &home)
        .env("CVWATCH_TARGET_URL", format!("file://{}", page.display()))
        .args(["run", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E005_TABLE_NOT_FOUND"));

    assert!(!home.join("state/cvwatch_state.json").exists());
}

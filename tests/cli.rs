use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const STATEMENT: &str = "\
date,description,amount
2024-03-01,PADARIA REAL LTDA,-12.50
2024-03-02,UBER *TRIP HELP.UBER.COM,-23.90
2024-03-03,Zxq Holdings,-99.00
";

struct Env {
    config: TempDir,
    data: TempDir,
}

impl Env {
    fn new() -> Self {
        let env = Self {
            config: TempDir::new().unwrap(),
            data: TempDir::new().unwrap(),
        };
        env.cmd()
            .args(["init", "--no-ai", "--data-dir"])
            .arg(env.data.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized spendtrack"));
        env
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("spendtrack").unwrap();
        cmd.env("SPENDTRACK_CONFIG_DIR", self.config.path())
            .env_remove("OPENAI_API_KEY")
            .env_remove("RUST_LOG");
        cmd
    }

    fn write(&self, name: &str, content: &str) -> std::path::PathBuf {
        let path = self.data.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn import(env: &Env, path: &Path) -> assert_cmd::assert::Assert {
    env.cmd().arg("import").arg(path).assert().success()
}

#[test]
fn test_commands_need_init() {
    let config = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(
        config.path().join("settings.json"),
        format!("{{\"data_dir\": {:?}}}", data.path().join("missing").display().to_string()),
    )
    .unwrap();
    Command::cargo_bin("spendtrack")
        .unwrap()
        .env("SPENDTRACK_CONFIG_DIR", config.path())
        .args(["expenses", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("spendtrack init"));
}

#[test]
fn test_import_then_reimport_is_all_duplicates() {
    let env = Env::new();
    let path = env.write("march.csv", STATEMENT);

    import(&env, &path)
        .stdout(predicate::str::contains("processed"))
        .stdout(predicate::str::contains("3 imported, 0 duplicates, 0 failed rows"))
        .stdout(predicate::str::contains("1 uncategorized"));

    import(&env, &path).stdout(predicate::str::contains("0 imported, 3 duplicates"));

    env.cmd()
        .args(["invoices", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("march.csv"));
}

#[test]
fn test_import_bad_file_is_reported_failed() {
    let env = Env::new();
    let path = env.write("junk.csv", "foo,bar\n1,2\n");
    import(&env, &path)
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("Missing required column"));

    env.cmd()
        .args(["expenses", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No expenses found"));
}

#[test]
fn test_import_skips_bad_rows() {
    let env = Env::new();
    let path = env.write(
        "mixed.csv",
        "date,description,amount\n2024-03-01,PADARIA REAL,-10.00\nnot a date,Zxq,-1.00\n2024-03-02,Qwv Partners,-5.00\n",
    );
    import(&env, &path)
        .stdout(predicate::str::contains("2 imported"))
        .stdout(predicate::str::contains("1 failed rows"))
        .stdout(predicate::str::contains("line 3"));
}

#[test]
fn test_expenses_add_update_and_list() {
    let env = Env::new();
    env.cmd()
        .args([
            "expenses", "add", "--date", "2024-03-05", "--merchant", "Qwv Partners", "--amount", "-42.00",
            "--category", "education", "--tag", "course",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added expense 1"))
        .stdout(predicate::str::contains("education"));

    env.cmd()
        .args(["expenses", "update", "1", "--category", "shopping"])
        .assert()
        .success()
        .stdout(predicate::str::contains("shopping (manual)"));

    env.cmd()
        .args(["expenses", "list", "--month", "2024-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Qwv Partners"))
        .stdout(predicate::str::contains("course"));

    env.cmd()
        .args(["expenses", "add", "--date", "2024-03-05", "--merchant", "X", "--amount", "-1", "--category", "snacks"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown category"));
}

#[test]
fn test_rules_add_list_delete() {
    let env = Env::new();
    env.cmd()
        .args(["rules", "add", "zxq holdings", "--category", "utilities", "--priority", "50"])
        .assert()
        .success()
        .stdout(predicate::str::contains("zxq holdings"));
    env.cmd()
        .args(["rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("zxq holdings"));

    // The new rule places the expense the seeded rules could not.
    let path = env.write("march.csv", STATEMENT);
    import(&env, &path).stdout(predicate::str::contains("3 imported").and(predicate::str::contains("uncategorized").not()));

    env.cmd()
        .args(["rules", "delete", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deactivated rule 1"));
    env.cmd().args(["rules", "delete", "1"]).assert().failure();

    env.cmd()
        .args(["rules", "add", "(", "--category", "food", "--match-type", "regex"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid rule"));
}

#[test]
fn test_reports_and_export() {
    let env = Env::new();
    let path = env.write("march.csv", STATEMENT);
    import(&env, &path);

    env.cmd()
        .args(["report", "summary", "--month", "2024-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Transactions:  3"))
        .stdout(predicate::str::contains("-135.40"));

    env.cmd()
        .args(["report", "summary", "--from", "2024-03-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--from requires --to"));

    env.cmd().args(["report", "trend", "--months", "3"]).assert().success();
    env.cmd().args(["report", "budget"]).assert().success();
    env.cmd().args(["report", "unusual"]).assert().success();

    env.cmd()
        .args(["export", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("date,merchant,amount,category,description,tags"));

    env.cmd()
        .args(["export", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"merchant\""));
}

#[test]
fn test_status_counts() {
    let env = Env::new();
    let path = env.write("march.csv", STATEMENT);
    import(&env, &path);
    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Expenses:       3"))
        .stdout(predicate::str::contains("AI:         off"));
}

#[test]
fn test_invoices_are_scoped_to_user() {
    let env = Env::new();
    let path = env.write("march.csv", STATEMENT);
    import(&env, &path);

    env.cmd()
        .args(["--user", "bob", "invoices", "delete", "1", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invoice not found: 1"));
    env.cmd()
        .args(["--user", "bob", "invoices", "show", "1"])
        .assert()
        .failure();

    env.cmd()
        .args(["invoices", "delete", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted invoice 1 and 3 expenses"));
}

#[test]
fn test_report_rejects_huge_ranges() {
    let env = Env::new();
    env.cmd()
        .args(["report", "trend", "--months", "3000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid date window"));
    env.cmd()
        .args(["report", "summary", "--days", "4000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid date window"));
}

#[test]
fn test_expenses_suggest() {
    let env = Env::new();
    let path = env.write("march.csv", STATEMENT);
    import(&env, &path);

    env.cmd()
        .args(["expenses", "suggest", "padaria"])
        .assert()
        .success()
        .stdout(predicate::str::contains("food"))
        .stdout(predicate::str::contains("your past expenses"));
    env.cmd()
        .args(["expenses", "suggest", "Spotify Premium"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entertainment"))
        .stdout(predicate::str::contains("a categorization rule"));
    env.cmd()
        .args(["expenses", "suggest", "Qwv Partners"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No suggestion"));
}

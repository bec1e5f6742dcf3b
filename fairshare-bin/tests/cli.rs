#[cfg(test)]
mod cli {
    use assert_cmd::Command;
    use predicates::str::contains;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::error::Error;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    const CONFIG: &str = r#"
duration = "300ms"
workers = 2

[throttler]
poll_interval = "50ms"

[groups.crawl]
targets = ["mirror-a", "mirror-b"]
transfer_size = 512

[groups.crawl.spec]
max_connections = 4
max_bytes_per_second = 1048576
"#;

    fn main_command() -> Command {
        // this gets the "main" binary name (e.g. `fairshare`)
        Command::cargo_bin(env!("CARGO_PKG_NAME")).expect("Couldn't get cargo package name")
    }

    /// Write `contents` to `fairshare.toml` in a fresh directory
    fn config_dir(contents: &str) -> Result<TempDir> {
        let dir = tempdir()?;
        fs::write(dir.path().join("fairshare.toml"), contents)?;
        Ok(dir)
    }

    #[test]
    fn test_help() {
        main_command()
            .arg("--help")
            .assert()
            .success()
            .stdout(contains("--peers"))
            .stdout(contains("fairshare.toml"));
    }

    #[test]
    fn test_missing_groups_is_a_config_error() -> Result<()> {
        let dir = tempdir()?;
        main_command()
            .current_dir(dir.path())
            .assert()
            .failure()
            .code(3)
            .stderr(contains("No throttle groups configured"));
        Ok(())
    }

    #[test]
    fn test_missing_explicit_config_file() -> Result<()> {
        let dir = tempdir()?;
        main_command()
            .current_dir(dir.path())
            .args(["--config", "nowhere.toml"])
            .assert()
            .failure()
            .code(3)
            .stderr(contains("Cannot load configuration file `nowhere.toml`"));
        Ok(())
    }

    #[test]
    fn test_invalid_spec_is_a_config_error() -> Result<()> {
        let dir = config_dir(&CONFIG.replace("max_connections = 4", "max_connections = 0"))?;
        main_command()
            .current_dir(dir.path())
            .assert()
            .failure()
            .code(3)
            .stderr(contains("max_connections must be positive"));
        Ok(())
    }

    #[test]
    fn test_unknown_config_field() -> Result<()> {
        let dir = config_dir(&format!("threads = 8\n{CONFIG}"))?;
        main_command()
            .current_dir(dir.path())
            .assert()
            .failure()
            .code(3);
        Ok(())
    }

    #[test]
    fn test_compact_report() -> Result<()> {
        let dir = config_dir(CONFIG)?;
        main_command()
            .current_dir(dir.path())
            .args(["--peers", "2"])
            .env("NO_COLOR", "1")
            .assert()
            .success()
            .stdout(contains("Peer 1"))
            .stdout(contains("Peer 2"))
            .stdout(contains("crawl (2 peers)"))
            .stdout(contains("mirror-a"))
            .stdout(contains("Simulated 2 peers"));
        Ok(())
    }

    #[test]
    fn test_json_report() -> Result<()> {
        let dir = config_dir(CONFIG)?;
        let output = main_command()
            .current_dir(dir.path())
            .args(["--peers", "3", "--format", "json"])
            .output()?;
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout)?;
        let peers = report["peers"].as_array().unwrap();
        assert_eq!(peers.len(), 3);
        for peer in peers {
            assert_eq!(peer["failures"], 0);
            let pool = &peer["groups"]["crawl"];
            assert_eq!(pool["peers"], 3);
            // ceil(4 / 3)
            assert_eq!(pool["bins"]["mirror-a"]["local_limit"], 2);
        }
        Ok(())
    }

    #[test]
    fn test_cli_overrides_config_file() -> Result<()> {
        let dir = config_dir(CONFIG)?;
        let path = dir.path().join("fairshare.toml");
        let output = main_command()
            .args(["--config", path.to_str().unwrap()])
            .args(["--peers", "1", "--duration", "100ms", "--format", "json"])
            .output()?;
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(report["peers"].as_array().unwrap().len(), 1);
        assert_eq!(report["peers"][0]["groups"]["crawl"]["bins"]["mirror-b"]["local_limit"], 4);
        Ok(())
    }
}

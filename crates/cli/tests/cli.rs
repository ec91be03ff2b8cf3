//! End-to-end tests for the `nb` binary
//!
//! These pin the JSON output of commands that need no cloud access. Each
//! test gets its own configuration directory.

use std::process::{Command, Output};

use tempfile::TempDir;

fn nb(config_dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nb"))
        .args(args)
        .env("NB_CONFIG_DIR", config_dir.path())
        .env_remove("NB_PROFILE")
        .env_remove("NB_REGION")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute nb")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON")
}

fn stderr_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stderr).expect("stderr should be valid JSON")
}

mod profile_tests {
    use super::*;

    #[test]
    fn test_profile_list_empty_json() {
        let dir = TempDir::new().unwrap();
        let output = nb(&dir, &["profile", "list", "--json"]);

        assert!(output.status.success());
        insta::assert_json_snapshot!(stdout_json(&output), @r#"
        {
          "profiles": []
        }
        "#);
    }

    #[test]
    fn test_profile_set_json() {
        let dir = TempDir::new().unwrap();
        let output = nb(
            &dir,
            &[
                "profile",
                "set",
                "localstack",
                "--endpoint",
                "http://localhost:4566",
                "--region",
                "us-east-1",
                "--json",
            ],
        );

        assert!(output.status.success());
        insta::assert_json_snapshot!(stdout_json(&output), @r#"
        {
          "success": true,
          "profile": "localstack",
          "message": "Profile 'localstack' configured successfully"
        }
        "#);
    }

    #[test]
    fn test_profile_list_hides_credentials() {
        let dir = TempDir::new().unwrap();
        nb(
            &dir,
            &[
                "profile",
                "set",
                "localstack",
                "--endpoint",
                "http://localhost:4566",
                "--access-key",
                "test",
                "--secret-key",
                "test",
            ],
        );
        nb(&dir, &["profile", "set", "prod", "--region", "eu-west-1"]);

        let output = nb(&dir, &["profile", "list", "--json"]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!stdout.contains("secret"));
        insta::assert_json_snapshot!(stdout_json(&output), @r#"
        {
          "profiles": [
            {
              "name": "localstack",
              "endpoint": "http://localhost:4566",
              "static_credentials": true
            },
            {
              "name": "prod",
              "region": "eu-west-1",
              "static_credentials": false
            }
          ]
        }
        "#);
    }

    #[test]
    fn test_profile_remove_json() {
        let dir = TempDir::new().unwrap();
        nb(&dir, &["profile", "set", "to-remove"]);

        let output = nb(&dir, &["profile", "remove", "to-remove", "--json"]);
        assert!(output.status.success());
        insta::assert_json_snapshot!(stdout_json(&output), @r#"
        {
          "success": true,
          "profile": "to-remove",
          "message": "Profile 'to-remove' removed successfully"
        }
        "#);

        let listed = nb(&dir, &["profile", "list", "--json"]);
        assert_eq!(stdout_json(&listed)["profiles"], serde_json::json!([]));
    }

    #[test]
    fn test_profile_remove_not_found_json() {
        let dir = TempDir::new().unwrap();
        let output = nb(&dir, &["profile", "remove", "nonexistent", "--json"]);

        assert_eq!(output.status.code(), Some(5), "exit code should be NOT_FOUND");
        insta::assert_json_snapshot!(stderr_json(&output), @r#"
        {
          "error": "Profile 'nonexistent' not found"
        }
        "#);
    }
}

mod session_tests {
    use super::*;

    #[test]
    fn test_unknown_profile_is_usage_error() {
        let dir = TempDir::new().unwrap();
        let output = nb(&dir, &["bucket", "list", "--profile", "missing", "--json"]);

        assert_eq!(output.status.code(), Some(2), "exit code should be USAGE_ERROR");
        let error = stderr_json(&output);
        assert!(
            error["error"]
                .as_str()
                .is_some_and(|message| message.contains("Profile 'missing' not found"))
        );
    }

    #[test]
    fn test_profile_set_rejects_bad_endpoint() {
        let dir = TempDir::new().unwrap();
        let output = nb(&dir, &["profile", "set", "bad", "--endpoint", "ftp://example.com"]);

        assert_eq!(output.status.code(), Some(2));
        let listed = nb(&dir, &["profile", "list", "--json"]);
        assert_eq!(stdout_json(&listed)["profiles"], serde_json::json!([]));
    }
}

mod completions_tests {
    use super::*;

    #[test]
    fn test_bash_completions() {
        let dir = TempDir::new().unwrap();
        let output = nb(&dir, &["completions", "bash"]);

        assert!(output.status.success());
        let script = String::from_utf8_lossy(&output.stdout);
        assert!(script.contains("_nb()"));
    }
}

//! JSON-lines host
//!
//! Protocol:
//! - Input: one `{"op": "...", "args": [...]}` object per line
//! - Output: one `{"ok": value}` or `{"error": message}` object per line
//!
//! Calls run one after another against a single context, so a `clone`
//! followed by `listDir` sees the cloned worktree.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use gitkit::{CallValue, GitKit};

#[derive(Debug, Deserialize)]
struct CallRequest {
    op: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CallResponse {
    Ok(CallValue),
    Error(String),
}

/// Open `path`, or stdin when no path is given.
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open batch file: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(std::io::stdin()))),
    }
}

/// Run every call in `input`, writing one response line per request.
/// Blank lines are skipped.
pub async fn run(kit: &GitKit, input: impl BufRead, mut output: impl Write) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read batch input")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<CallRequest>(&line) {
            Ok(request) => {
                tracing::debug!(op = %request.op, args = request.args.len(), "batch call");
                match kit.call(&request.op, &request.args).await {
                    Ok(value) => CallResponse::Ok(value),
                    Err(rejection) => CallResponse::Error(rejection.message),
                }
            }
            Err(e) => CallResponse::Error(format!("parse error: {}", e)),
        };
        writeln!(output, "{}", serde_json::to_string(&response)?)?;
    }
    output.flush()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn run_lines(kit: &GitKit, input: &str) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        run(kit, Cursor::new(input.as_bytes()), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_calls_share_one_context() {
        let kit = GitKit::new();
        let responses = run_lines(
            &kit,
            concat!(
                r#"{"op": "createFile", "args": ["/work/a.txt"]}"#,
                "\n\n",
                r#"{"op": "createFile", "args": ["/work/a.txt"]}"#,
                "\n",
                r#"{"op": "touchNcat", "args": ["/work/b.txt", "bee"]}"#,
                "\n",
                r#"{"op": "ls", "args": ["/work"]}"#,
                "\n",
            ),
        )
        .await;

        assert_eq!(
            responses,
            vec![
                serde_json::json!({"ok": "File created"}),
                serde_json::json!({"error": "file not created"}),
                serde_json::json!({"ok": "File created"}),
                serde_json::json!({"ok": ["a.txt", "b.txt"]}),
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_lines_do_not_stop_the_batch() {
        let kit = GitKit::new();
        let responses = run_lines(
            &kit,
            "not json\n{\"op\": \"listDir\"}\n{\"op\": \"mkfs\", \"args\": []}\n",
        )
        .await;

        assert_eq!(responses.len(), 3);
        assert!(responses[0]["error"].as_str().unwrap().starts_with("parse error"));
        assert_eq!(responses[1], serde_json::json!({"error": "missing argument: path"}));
        assert_eq!(responses[2], serde_json::json!({"error": "unknown operation: mkfs"}));
    }

    #[tokio::test]
    async fn test_reads_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"op": "encrypt", "#,
                r#""args": ["hello world", "000102030405060708090a0b0c0d0e0f"]}"#,
                "\n",
            ),
        )
        .unwrap();

        let kit = GitKit::new();
        let mut out = Vec::new();
        run(&kit, open_input(Some(&path)).unwrap(), &mut out)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"ok\":\"62f167d92e4e872a83aff0\"}\n"
        );
    }

    #[test]
    fn test_missing_batch_file() {
        let err = match open_input(Some(Path::new("/definitely/not/here.jsonl"))) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("Failed to open batch file"));
    }
}

//! Git Remote Tests
//!
//! Clone and push through the call bridge against in-process remotes.

use std::path::Path;
use std::sync::Arc;

use gitkit::git::{GitConfig, MemoryRemote, MemoryTransport};
use gitkit::{CallValue, GitKit, PushRequest, Rejection, SessionState};

const URL: &str = "mem://example/project.git";

/// Remote with one commit on master, plus a context wired to it.
fn setup() -> (Arc<MemoryRemote>, GitKit) {
    let transport = MemoryTransport::new();
    let remote = transport.register(
        URL,
        MemoryRemote::new("master").with_credentials("ada", "ghp_secret"),
    );
    remote.commit_files(
        "master",
        &[("README.md", b"# project\n"), ("src/main.rs", b"fn main() {}\n")],
        "initial commit",
    );
    let kit = GitKit::builder().transport(Arc::new(transport)).build();
    (remote, kit)
}

fn push_request(url: &str, file: &str, message: &str) -> PushRequest {
    PushRequest {
        url: url.to_string(),
        access_token: "ghp_secret".to_string(),
        username: "ada".to_string(),
        email: "ada@example.com".to_string(),
        file: file.to_string(),
        commit_message: message.to_string(),
    }
}

mod clone {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_clone_checks_out_worktree() {
        let (_, kit) = setup();

        assert_eq!(kit.clone_repo(URL).await, Ok(CallValue::from("Repo cloned")));
        assert_eq!(kit.session().state(), SessionState::Cloned);

        let entries = kit.list_dir("/repo").await.unwrap();
        assert_eq!(
            entries,
            CallValue::from(vec![
                ".git".to_string(),
                "README.md".to_string(),
                "src".to_string(),
            ])
        );
        assert_eq!(
            kit.fs()
                .read_file(Path::new("/repo/src/main.rs"))
                .await
                .unwrap(),
            b"fn main() {}\n"
        );
    }

    #[tokio::test]
    async fn test_clone_writes_origin_config() {
        let (_, kit) = setup();
        kit.clone_repo(URL).await.unwrap();

        let config = kit
            .fs()
            .read_file(Path::new("/repo/.git/config"))
            .await
            .unwrap();
        let config = String::from_utf8(config).unwrap();
        assert!(config.contains("[remote \"origin\"]"));
        assert!(config.contains(URL));
        assert!(config.contains("[branch \"master\"]"));
    }

    #[tokio::test]
    async fn test_second_clone_rejects() {
        let (_, kit) = setup();
        kit.clone_repo(URL).await.unwrap();

        let rejection = kit.clone_repo(URL).await.unwrap_err();
        assert!(rejection.message.starts_with("repository already exists"));
        assert_eq!(kit.session().state(), SessionState::Cloned);
    }

    #[tokio::test]
    async fn test_clone_unknown_remote() {
        let (_, kit) = setup();
        let rejection = kit.clone_repo("mem://nowhere").await.unwrap_err();
        assert_eq!(rejection.message, "repository not found: mem://nowhere");
        assert_eq!(kit.session().state(), SessionState::Uninitialized);

        // The failed attempt leaves the location usable.
        kit.clone_repo(URL).await.unwrap();
    }

    #[tokio::test]
    async fn test_clone_empty_remote() {
        let transport = MemoryTransport::new();
        transport.register(URL, MemoryRemote::new("master"));
        let kit = GitKit::builder().transport(Arc::new(transport)).build();

        assert_eq!(
            kit.clone_repo(URL).await,
            Err(Rejection::new("remote repository is empty"))
        );
    }

    #[tokio::test]
    async fn test_clone_outside_allowlist() {
        let transport = MemoryTransport::new();
        transport
            .register(URL, MemoryRemote::new("master"))
            .commit_files("master", &[("a", b"a")], "init");
        let kit = GitKit::builder()
            .transport(Arc::new(transport))
            .git_config(GitConfig::new().allow_remote("https://github.com/"))
            .build();

        let rejection = kit.clone_repo(URL).await.unwrap_err();
        assert!(rejection.message.contains("not in allowlist"));
    }
}

mod push {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_push_updates_remote_branch() {
        let (remote, kit) = setup();
        kit.clone_repo(URL).await.unwrap();
        kit.write_new_file("/repo/notes.txt", "remember the milk\n")
            .await
            .unwrap();

        let outcome = kit
            .push(push_request(URL, "notes.txt", "add notes"))
            .await;
        assert_eq!(outcome, Ok(CallValue::from("Pushed")));
        assert_eq!(kit.session().state(), SessionState::Pushed);

        let head = remote.branch("master").unwrap();
        assert_eq!(remote.commit_message(&head).unwrap(), "add notes\n");

        let log = kit.session().log().await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, head);
        assert_eq!(log[0].1.author.name, "ada");
        assert_eq!(log[0].1.author.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_failed_transport_keeps_local_commit() {
        let (remote, kit) = setup();
        kit.clone_repo(URL).await.unwrap();
        let before = kit.session().log().await.unwrap().len();

        kit.write_new_file("/repo/draft.txt", "draft").await.unwrap();
        let rejection = kit
            .push(push_request("mem://unreachable", "draft.txt", "draft"))
            .await
            .unwrap_err();
        assert_eq!(rejection.message, "repository not found: mem://unreachable");

        assert_eq!(kit.session().log().await.unwrap().len(), before + 1);
        assert_eq!(kit.session().state(), SessionState::Committed);
        assert_eq!(remote.branch("master").unwrap(), kit.session().log().await.unwrap()[1].0);
    }

    #[tokio::test]
    async fn test_wrong_token_rejected_by_remote() {
        let (_, kit) = setup();
        kit.clone_repo(URL).await.unwrap();
        kit.write_new_file("/repo/a.txt", "a").await.unwrap();

        let mut request = push_request(URL, "a.txt", "a");
        request.access_token = "wrong".to_string();
        let rejection = kit.push(request).await.unwrap_err();
        assert_eq!(rejection.message, "authorization failed");
        assert!(!rejection.message.contains("wrong"));
    }

    #[tokio::test]
    async fn test_push_missing_file() {
        let (_, kit) = setup();
        kit.clone_repo(URL).await.unwrap();

        let rejection = kit
            .push(push_request(URL, "absent.txt", "nothing"))
            .await
            .unwrap_err();
        assert_eq!(rejection.message, "entry not found: absent.txt");
        assert_eq!(kit.session().log().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_unchanged_file_is_empty_commit() {
        let (_, kit) = setup();
        kit.clone_repo(URL).await.unwrap();

        let rejection = kit
            .push(push_request(URL, "README.md", "no-op"))
            .await
            .unwrap_err();
        assert_eq!(
            rejection.message,
            "cannot create empty commit: clean working tree"
        );
    }

    #[tokio::test]
    async fn test_push_without_repository() {
        let (_, kit) = setup();
        assert_eq!(
            kit.push(push_request(URL, "a.txt", "a")).await,
            Err(Rejection::new("repository does not exist"))
        );
    }

    #[tokio::test]
    async fn test_push_behind_remote_is_non_fast_forward() {
        let (remote, kit) = setup();
        kit.clone_repo(URL).await.unwrap();
        remote.commit_files("master", &[("README.md", b"changed upstream\n")], "upstream");

        kit.write_new_file("/repo/local.txt", "local").await.unwrap();
        let rejection = kit
            .push(push_request(URL, "local.txt", "local"))
            .await
            .unwrap_err();
        assert_eq!(
            rejection.message,
            "non-fast-forward update: refs/heads/master"
        );
    }

    #[tokio::test]
    async fn test_two_pushes_in_a_row() {
        let (remote, kit) = setup();
        kit.clone_repo(URL).await.unwrap();

        for (i, name) in ["one.txt", "two.txt"].iter().enumerate() {
            kit.write_new_file(&format!("/repo/{}", name), name)
                .await
                .unwrap();
            kit.push(push_request(URL, name, &format!("commit {}", i)))
                .await
                .unwrap();
        }

        let head = remote.branch("master").unwrap();
        assert_eq!(remote.commit_message(&head).unwrap(), "commit 1\n");
        assert_eq!(kit.session().log().await.unwrap().len(), 3);
    }
}

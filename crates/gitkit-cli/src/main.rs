//! Gitkit CLI - Command line interface for the embedded git client
//!
//! Usage:
//!   gitkit encrypt 'text' --key <hex>      # Encrypt with the AES-CTR cipher
//!   gitkit clone <url> --ls                # Clone into memory and list the root
//!   gitkit push <url> --file f --content c # Clone, write one file, push it
//!   gitkit batch calls.jsonl               # Run JSON-line calls against one context

mod batch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use gitkit::{CallValue, GitKit, PushRequest};

/// Gitkit - Embedded git client over a virtual filesystem
#[derive(Parser, Debug)]
#[command(name = "gitkit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Repository root inside the virtual filesystem
    #[arg(long, env = "GITKIT_REPO", default_value = gitkit::DEFAULT_REPO_LOCATION, global = true)]
    repo: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt text; prints hex ciphertext
    Encrypt {
        plaintext: String,
        /// Hex key (16, 24 or 32 bytes)
        #[arg(long, env = "GITKIT_KEY", hide_env_values = true)]
        key: String,
    },

    /// Decrypt hex ciphertext
    Decrypt {
        ciphertext: String,
        /// Hex key (16, 24 or 32 bytes)
        #[arg(long, env = "GITKIT_KEY", hide_env_values = true)]
        key: String,
    },

    /// Clone a repository into memory
    Clone {
        url: String,
        /// List the repository root after cloning
        #[arg(long)]
        ls: bool,
    },

    /// Clone, write one file and push it back
    Push {
        url: String,
        /// Worktree-relative path of the file to write and push
        #[arg(long)]
        file: String,
        /// File content
        #[arg(long, default_value = "")]
        content: String,
        #[arg(short, long, default_value = "Update from gitkit")]
        message: String,
        #[arg(long, env = "GITKIT_USERNAME")]
        username: String,
        #[arg(long, env = "GITKIT_EMAIL")]
        email: String,
        /// Access token used as the basic-auth password
        #[arg(long, env = "GITKIT_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Run JSON-line calls from a file (or stdin) against one context
    Batch { file: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GITKIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let kit = GitKit::builder().repo_location(&args.repo).build();
    tracing::debug!(repo = %args.repo, "context ready");

    match args.command {
        Command::Encrypt { plaintext, key } => {
            print_value(&kit.encrypt(&plaintext, &key).await?);
        }
        Command::Decrypt { ciphertext, key } => {
            print_value(&kit.decrypt(&ciphertext, &key).await?);
        }
        Command::Clone { url, ls } => {
            print_value(&kit.clone_repo(&url).await.context("clone failed")?);
            if ls {
                print_value(&kit.list_dir(&args.repo).await?);
            }
        }
        Command::Push {
            url,
            file,
            content,
            message,
            username,
            email,
            token,
        } => {
            kit.clone_repo(&url).await.context("clone failed")?;
            let path = format!("{}/{}", args.repo.trim_end_matches('/'), file);
            kit.write_new_file(&path, &content)
                .await
                .with_context(|| format!("failed to write {}", path))?;

            let request = PushRequest {
                url,
                access_token: token,
                username,
                email,
                file,
                commit_message: message,
            };
            print_value(&kit.push(request).await.context("push failed")?);
        }
        Command::Batch { file } => {
            let input = batch::open_input(file.as_deref())?;
            let stdout = std::io::stdout();
            batch::run(&kit, input, stdout.lock()).await?;
        }
    }

    Ok(())
}

fn print_value(value: &CallValue) {
    match value {
        CallValue::Text(text) => println!("{}", text),
        CallValue::List(items) => {
            for item in items {
                println!("{}", item);
            }
        }
    }
}

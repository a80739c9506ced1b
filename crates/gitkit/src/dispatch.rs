//! Name-based dispatch for hosts that call operations by string.
//!
//! Hosts pass an operation name and positional string arguments. Both the
//! canonical names and the legacy host aliases are accepted.

use std::fmt;
use std::str::FromStr;

use crate::bridge::PendingCall;
use crate::error::Error;
use crate::session::PushRequest;
use crate::GitKit;

/// Operations a host can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Clone,
    Push,
    CreateFile,
    WriteNewFile,
    ListDir,
    Encrypt,
    Decrypt,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Clone,
        Operation::Push,
        Operation::CreateFile,
        Operation::WriteNewFile,
        Operation::ListDir,
        Operation::Encrypt,
        Operation::Decrypt,
    ];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Clone => "clone",
            Operation::Push => "push",
            Operation::CreateFile => "createFile",
            Operation::WriteNewFile => "writeNewFile",
            Operation::ListDir => "listDir",
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
        }
    }

    /// Legacy names still sent by older hosts.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Operation::Clone => &["git_clone"],
            Operation::Push => &["git_push"],
            Operation::CreateFile => &[],
            Operation::WriteNewFile => &["touchNcat"],
            Operation::ListDir => &["ls"],
            Operation::Encrypt => &["encrypt_text"],
            Operation::Decrypt => &["decrypt_text"],
        }
    }

    /// Positional parameter names, in call order.
    pub fn params(self) -> &'static [&'static str] {
        match self {
            Operation::Clone => &["url"],
            Operation::Push => &[
                "url",
                "accessToken",
                "username",
                "email",
                "file",
                "commitMessage",
            ],
            Operation::CreateFile => &["path"],
            Operation::WriteNewFile => &["path", "content"],
            Operation::ListDir => &["path"],
            Operation::Encrypt => &["plaintext", "hexKey"],
            Operation::Decrypt => &["hexCiphertext", "hexKey"],
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == name || op.aliases().contains(&name))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::UnknownOperation(s.to_string()))
    }
}

impl GitKit {
    /// Call an operation by name with positional arguments.
    ///
    /// Unknown names and missing arguments reject immediately. Arguments
    /// beyond the operation's parameter list are ignored.
    pub fn call<S: AsRef<str>>(&self, operation: &str, args: &[S]) -> PendingCall {
        let op = match operation.parse::<Operation>() {
            Ok(op) => op,
            Err(e) => return PendingCall::rejected("call", e),
        };

        if let Some(&missing) = op.params().get(args.len()) {
            return PendingCall::rejected(op.name(), Error::ArgumentMissing(missing));
        }
        let arg = |i: usize| args[i].as_ref();

        match op {
            Operation::Clone => self.clone_repo(arg(0)),
            Operation::Push => self.push(PushRequest {
                url: arg(0).to_string(),
                access_token: arg(1).to_string(),
                username: arg(2).to_string(),
                email: arg(3).to_string(),
                file: arg(4).to_string(),
                commit_message: arg(5).to_string(),
            }),
            Operation::CreateFile => self.create_file(arg(0)),
            Operation::WriteNewFile => self.write_new_file(arg(0), arg(1)),
            Operation::ListDir => self.list_dir(arg(0)),
            Operation::Encrypt => self.encrypt(arg(0), arg(1)),
            Operation::Decrypt => self.decrypt(arg(0), arg(1)),
        }
    }
}

//! Cross-platform command interpreter selection.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Returns the interpreter and its "run this string" flag for the current platform.
///
/// Returns `(shell_program, shell_arg)` where:
/// - Windows: `("cmd.exe", "/C")`
/// - Unix-like: `(<bash on PATH>, "-c")` when bash is installed, else `("/bin/sh", "-c")`
pub async fn get_shell_command() -> (PathBuf, &'static str) {
    if cfg!(windows) {
        (PathBuf::from("cmd.exe"), "/C")
    } else {
        UnixShell::preferred().await.get_shell_command()
    }
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Bash as resolved on `PATH`, otherwise `/bin/sh`.
    /// `$SHELL` is not consulted.
    pub async fn preferred() -> Self {
        if let Some(bash) = which_async("bash").await.and_then(|p| Self::from_path(&p)) {
            return bash;
        }
        Self::Sh(PathBuf::from("/bin/sh"))
    }

    /// Create from a path to an existing executable file.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.is_absolute() && path.is_file() {
            let path_buf = path.to_path_buf();
            if path.file_name() == Some(OsStr::new("bash")) {
                Some(Self::Bash(path_buf))
            } else if path.file_name() == Some(OsStr::new("sh")) {
                Some(Self::Sh(path_buf))
            } else {
                Some(Self::Other(path_buf))
            }
        } else {
            None
        }
    }

    /// Get shell command tuple.
    #[must_use]
    pub fn get_shell_command(&self) -> (PathBuf, &'static str) {
        (self.path().to_path_buf(), "-c")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_preferred_shell_exists() {
        let (program, arg) = get_shell_command().await;
        assert!(program.is_file());
        assert_eq!(arg, "-c");
    }

    #[tokio::test]
    async fn test_preferred_follows_path_lookup() {
        match which::which("bash") {
            Ok(bash) => assert_eq!(UnixShell::preferred().await, UnixShell::Bash(bash)),
            Err(_) => assert_eq!(
                UnixShell::preferred().await,
                UnixShell::Sh(PathBuf::from("/bin/sh"))
            ),
        }
    }

    #[test]
    fn test_from_path_rejects_relative() {
        assert!(UnixShell::from_path(Path::new("bash")).is_none());
    }

    #[test]
    fn test_from_path_classifies_sh() {
        assert!(matches!(
            UnixShell::from_path(Path::new("/bin/sh")),
            Some(UnixShell::Sh(_))
        ));
    }
}

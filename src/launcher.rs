//! # Launcher Script
//!
//! Generates the POSIX shell script that runs inside the grid VM. The script
//! reassembles the image from the shipped layer archives, loads it into the
//! VM's docker daemon and runs the requested command:
//!
//! ```text
//! /root/shared/image/*.tar.manual.gz ──gunzip──► /tmp/image/*.tar ─┐
//! /root/shared/image/*.tar (client-unzipped) ──────────────────────┤
//!                                                                  ▼
//!                          cat | tar xi ──► /tmp/image/combined ──► docker load
//!                                                                  │
//!                prerun ──► docker run --rm -v shared IMAGE CMD ──► postrun
//! ```
//!
//! The script is built from a typed model ([`LauncherScript`]) and rendered
//! by a single function. Values that reach the `docker run` line (image,
//! entrypoint, every command argument) are shell-escaped individually.
//! Prerun and postrun commands are shell snippets supplied by the job
//! author and are inserted verbatim, one per line.

use crate::constants::{VM_IMAGE_DIR, VM_SCRATCH_DIR, VM_SHARED_DIR};
use crate::image::ImageRef;
use std::fmt::Write as _;

/// Command to run in the container, as given by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Argument vector, passed through unchanged.
    Args(Vec<String>),
    /// Single string, split on whitespace.
    Line(String),
}

impl CommandLine {
    /// Returns the argument vector.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Args(args) => args.clone(),
            Self::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Returns the arguments escaped and joined into one shell word list.
    pub fn to_shell(&self) -> String {
        shell_join(&self.args())
    }
}

impl Default for CommandLine {
    fn default() -> Self {
        Self::Args(Vec::new())
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(args: Vec<String>) -> Self {
        Self::Args(args)
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

/// Typed model of the in-VM launcher script.
#[derive(Debug, Clone)]
pub struct LauncherScript {
    /// Image to run.
    pub image: ImageRef,
    /// Command and arguments.
    pub command: CommandLine,
    /// Entrypoint override.
    pub entrypoint: Option<String>,
    /// Shell commands run before the container.
    pub prerun: Vec<String>,
    /// Shell commands run after the container.
    pub postrun: Vec<String>,
}

impl LauncherScript {
    /// Creates a script that runs the image's default command.
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            command: CommandLine::default(),
            entrypoint: None,
            prerun: Vec::new(),
            postrun: Vec::new(),
        }
    }

    /// Returns the `docker run` line.
    pub fn run_line(&self) -> String {
        let mut line = format!(
            "docker run --rm -v {shared}:{shared}",
            shared = VM_SHARED_DIR
        );
        if let Some(entrypoint) = &self.entrypoint {
            line.push_str(" --entrypoint ");
            line.push_str(&shell_escape(entrypoint));
        }
        line.push(' ');
        line.push_str(&shell_escape(self.image.as_str()));
        let command = self.command.to_shell();
        if !command.is_empty() {
            line.push(' ');
            line.push_str(&command);
        }
        line
    }

    /// Renders the script text.
    pub fn render(&self) -> String {
        let mut script = String::new();
        let out = &mut script;

        let _ = writeln!(out, "#!/bin/sh");
        let _ = writeln!(out, "set -e");
        let _ = writeln!(out);
        let _ = writeln!(out, "echo \"Importing Docker image from BOINC...\"");
        let _ = writeln!(out, "mkdir -p {}/combined", VM_SCRATCH_DIR);
        let _ = writeln!(
            out,
            "for f in {img}/*.tar.manual.gz; do [ -e \"$f\" ] && gunzip -c \"$f\" > {tmp}/$(basename \"$f\" .manual.gz); done",
            img = VM_IMAGE_DIR,
            tmp = VM_SCRATCH_DIR
        );
        let _ = writeln!(
            out,
            "cat $(for f in {img}/*.tar {tmp}/*.tar; do [ -e \"$f\" ] && echo \"$f\"; done) | tar xi -C {tmp}/combined",
            img = VM_IMAGE_DIR,
            tmp = VM_SCRATCH_DIR
        );
        let _ = writeln!(out, "rm -f {}/*.tar", VM_SCRATCH_DIR);
        let _ = writeln!(out, "tar cf - -C {}/combined . | docker load", VM_SCRATCH_DIR);
        let _ = writeln!(out, "rm -rf {}", VM_SCRATCH_DIR);
        let _ = writeln!(out);
        let _ = writeln!(out, "echo \"Prerun diagnostics...\"");
        let _ = writeln!(out, "docker images");
        let _ = writeln!(out, "docker ps -a");
        let _ = writeln!(out, "du -sh /var/lib/docker");
        let _ = writeln!(out, "free -m");
        let _ = writeln!(out);
        let _ = writeln!(out, "echo \"Prerun commands...\"");
        for command in &self.prerun {
            let _ = writeln!(out, "{}", command);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "echo \"Running...\"");
        let _ = writeln!(out, "{}", self.run_line());
        let _ = writeln!(out);
        let _ = writeln!(out, "echo \"Postrun commands...\"");
        for command in &self.postrun {
            let _ = writeln!(out, "{}", command);
        }

        script
    }
}

/// Characters that never need quoting in a POSIX shell word.
fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c)
}

/// Escapes a string for use as a single POSIX shell word.
///
/// Safe words are returned as is; anything else is single-quoted with
/// embedded single quotes written as `'\''`.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(is_shell_safe) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Escapes each argument and joins them with spaces.
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_escape(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> LauncherScript {
        LauncherScript::new(ImageRef::parse("boinc/app").unwrap())
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("echo"), "echo");
        assert_eq!(shell_escape("a b"), "'a b'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_command_forms_are_equivalent() {
        let line = CommandLine::from("echo  hello   world");
        let args = CommandLine::from(vec!["echo".to_string(), "hello".to_string(), "world".to_string()]);
        assert_eq!(line.args(), args.args());
        assert_eq!(line.to_shell(), "echo hello world");
    }

    #[test]
    fn test_script_structure() {
        let mut s = script();
        s.command = CommandLine::Args(vec!["sh".to_string(), "-c".to_string(), "echo hi > out".to_string()]);
        s.prerun = vec!["echo before".to_string()];
        s.postrun = vec!["echo after".to_string()];
        let text = s.render();

        assert!(text.starts_with("#!/bin/sh\nset -e\n"));
        let load = text.find("docker load").unwrap();
        let diag = text.find("free -m").unwrap();
        let pre = text.find("echo before").unwrap();
        let run = text.find("docker run").unwrap();
        let post = text.find("echo after").unwrap();
        assert!(load < diag && diag < pre && pre < run && run < post);
        assert!(text.contains(
            "docker run --rm -v /root/shared:/root/shared boinc/app:latest sh -c 'echo hi > out'"
        ));
    }

    #[test]
    fn test_entrypoint_is_escaped() {
        let mut s = script();
        s.entrypoint = Some("/bin/my tool".to_string());
        assert_eq!(
            s.run_line(),
            "docker run --rm -v /root/shared:/root/shared --entrypoint '/bin/my tool' boinc/app:latest"
        );
    }
}

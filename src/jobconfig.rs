//! VM job description (`vbox_job.xml`).
//!
//! The grid client's VM wrapper reads this file to size and configure the
//! virtual machine: OS type, shared directory, network, the completion
//! trigger the launcher relies on, and the memory size derived from the
//! work unit's memory bound.

use crate::template::escape_text;
use std::fmt::Write as _;

/// Extra `vbox_job.xml` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOption {
    /// Empty element, e.g. `<enable_graphics_support/>`.
    Flag(String),
    /// Element with a value, e.g. `<fraction_done_filename>progress</fraction_done_filename>`.
    Value(String, String),
}

impl JobOption {
    fn render(&self, out: &mut String) {
        match self {
            Self::Flag(name) => {
                let _ = writeln!(out, "    <{}/>", name);
            }
            Self::Value(name, value) => {
                let _ = writeln!(out, "    <{0}>{1}</{0}>", name, escape_text(value));
            }
        }
    }
}

/// Typed model of `vbox_job.xml`.
#[derive(Debug, Clone)]
pub struct VboxJob {
    /// VM memory in megabytes.
    pub memory_size_mb: u64,
    /// Whether the wrapper's automatic checkpoints are disabled.
    pub disable_automatic_checkpoints: bool,
    /// File the job writes its fraction done into.
    pub progress_file: Option<String>,
    /// Additional options, rendered in order.
    pub extra: Vec<JobOption>,
}

impl VboxJob {
    /// Creates a job description with the given VM memory.
    pub fn new(memory_size_mb: u64) -> Self {
        Self {
            memory_size_mb,
            disable_automatic_checkpoints: true,
            progress_file: None,
            extra: Vec::new(),
        }
    }

    /// Returns all options after the fixed header, in render order.
    pub fn options(&self) -> Vec<JobOption> {
        let mut options = Vec::new();
        if let Some(progress) = &self.progress_file {
            options.push(JobOption::Value(
                "fraction_done_filename".to_string(),
                progress.clone(),
            ));
        }
        options.extend(self.extra.iter().cloned());
        if self.disable_automatic_checkpoints {
            options.push(JobOption::Flag("disable_automatic_checkpoints".to_string()));
        }
        options.push(JobOption::Value(
            "memory_size_mb".to_string(),
            self.memory_size_mb.to_string(),
        ));
        options
    }

    /// Renders the XML document.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "<vbox_job>");
        let _ = writeln!(out);
        let _ = writeln!(out, "    <os_name>Linux26_64</os_name>");
        let _ = writeln!(out, "    <enable_isocontextualization>1</enable_isocontextualization>");
        let _ = writeln!(out, "    <enable_shared_directory/>");
        let _ = writeln!(out, "    <enable_network/>");
        let _ = writeln!(out, "    <completion_trigger_file>completion_trigger_file</completion_trigger_file>");
        let _ = writeln!(out);
        for option in self.options() {
            option.render(&mut out);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "</vbox_job>");
        out
    }
}

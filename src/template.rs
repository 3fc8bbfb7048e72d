//! Job input template.
//!
//! The scheduler matches `<file_info>` number `i` with the `i`-th file
//! passed to work creation, and `<file_ref>` number `i` tells it where the
//! job sees that file. Both sections are rendered from a single entry list,
//! so they cannot drift apart:
//!
//! ```xml
//! <?xml version="1.0" ?>
//! <input_template>
//!     <file_info>
//!         <number>0</number>
//!         <sticky/>
//!     </file_info>
//!     <workunit>
//!         <file_ref>
//!             <file_number>0</file_number>
//!             <open_name>shared/image/layer_ab.tar.manual.gz</open_name>
//!             <copy_file/>
//!         </file_ref>
//!     </workunit>
//! </input_template>
//! ```

use crate::inputs::{FileFlag, InputFile};
use std::fmt::Write as _;

/// One template entry; its position is its file number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    /// Name the job sees the file under.
    pub open_name: String,
    /// Scheduler flags.
    pub flags: Vec<FileFlag>,
}

/// Job input template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTemplate {
    entries: Vec<TemplateEntry>,
}

impl JobTemplate {
    /// Builds the template for an ordered input-file list.
    pub fn from_inputs(files: &[InputFile]) -> Self {
        Self {
            entries: files
                .iter()
                .map(|file| TemplateEntry {
                    open_name: file.open_name.clone(),
                    flags: file.flags.clone(),
                })
                .collect(),
        }
    }

    /// Returns the entries in file-number order.
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    /// Returns the number of files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the template references no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the template XML.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "<?xml version=\"1.0\" ?>");
        let _ = writeln!(out, "<input_template>");

        for (i, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(out, "    <file_info>");
            let _ = writeln!(out, "        <number>{}</number>", i);
            for flag in &entry.flags {
                let _ = writeln!(out, "        <{}/>", flag.as_str());
            }
            let _ = writeln!(out, "    </file_info>");
        }

        let _ = writeln!(out, "    <workunit>");
        for (i, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(out, "        <file_ref>");
            let _ = writeln!(out, "            <file_number>{}</file_number>", i);
            let _ = writeln!(
                out,
                "            <open_name>{}</open_name>",
                escape_text(&entry.open_name)
            );
            let _ = writeln!(out, "            <copy_file/>");
            let _ = writeln!(out, "        </file_ref>");
        }
        let _ = writeln!(out, "    </workunit>");
        let _ = writeln!(out, "</input_template>");
        out
    }
}

/// Escapes text content for XML.
pub fn escape_text(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

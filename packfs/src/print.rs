//! Terminal rendering of a content tree, for `--print`.

use std::io::{self, Write};

use packfs_core::ContentTree;

/// Write every file as a `group/file:` header, a blank line, then the
/// content.  Headers are bold when `bold` is set.
pub fn print_tree(tree: &ContentTree, out: &mut impl Write, bold: bool) -> io::Result<()> {
    for (group, files) in tree.groups() {
        for (name, content) in files.files() {
            if bold {
                writeln!(out, "\x1b[1m{group}/{name}:\x1b[0m")?;
            } else {
                writeln!(out, "{group}/{name}:")?;
            }
            writeln!(out)?;
            out.write_all(content.as_bytes())?;
            if !content.as_bytes().ends_with(b"\n") {
                writeln!(out)?;
            }
            writeln!(out)?;
        }
    }
    out.flush()
}

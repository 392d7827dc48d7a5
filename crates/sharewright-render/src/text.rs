use std::ops::Range;

/// Physical lines paired with their starting byte offset. Newlines are kept.
pub(crate) fn lines_with_offsets(document: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    document.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line)
    })
}

/// A line after joining backslash continuations.
#[derive(Debug)]
pub(crate) struct LogicalLine {
    pub range: Range<usize>,
    pub text: String,
    /// 1-based number of the first physical line.
    pub number: usize,
}

pub(crate) fn logical_lines(document: &str) -> Vec<LogicalLine> {
    let mut out = Vec::new();
    let mut current: Option<LogicalLine> = None;

    for (index, (start, line)) in lines_with_offsets(document).enumerate() {
        let content = line.trim_end_matches(['\n', '\r']);
        let (body, continues) = match content.strip_suffix('\\') {
            Some(body) => (body, true),
            None => (content, false),
        };

        let entry = current.get_or_insert_with(|| LogicalLine {
            range: start..start,
            text: String::new(),
            number: index + 1,
        });
        if !entry.text.is_empty() {
            entry.text.push(' ');
        }
        entry.text.push_str(body.trim());
        entry.range.end = start + line.len();

        if !continues {
            if let Some(done) = current.take() {
                out.push(done);
            }
        }
    }
    if let Some(rest) = current.take() {
        out.push(rest);
    }
    out
}

pub(crate) fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

pub(crate) fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('#') || t.starts_with(';')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_cover_document() {
        let doc = "a\nbb\nccc";
        let lines: Vec<_> = lines_with_offsets(doc).collect();
        assert_eq!(lines, vec![(0, "a\n"), (2, "bb\n"), (5, "ccc")]);
    }

    #[test]
    fn logical_lines_join_continuations() {
        let doc = "/srv a(rw) \\\n    b(ro)\n/other c(rw)\n";
        let lines = logical_lines(doc);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "/srv a(rw) b(ro)");
        assert_eq!(lines[0].range, 0..23);
        assert_eq!(lines[1].number, 3);
        assert_eq!(&doc[lines[1].range.clone()], "/other c(rw)\n");
    }

    #[test]
    fn comments_and_blanks() {
        assert!(is_blank("   \n"));
        assert!(is_comment("  # note"));
        assert!(is_comment("; note"));
        assert!(!is_comment("path = /x"));
    }
}

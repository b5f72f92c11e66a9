/// One loaded source document: the text it was parsed from plus the id used
/// in diagnostics (`<string>` or the file path).
///
/// The text is kept for the lifetime of the load so byte offsets recorded
/// during parsing can be mapped to line/column positions later, even after an
/// upgraded file has been rewritten on disk.
#[derive(Debug)]
pub(crate) struct Source {
    pub id: String,
    text: String,
}

impl Source {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Maps a byte offset to a readable `line L, col C` position, falling
    /// back to the raw offset when it lies beyond the last newline.
    pub fn offset(&self, pos: usize) -> String {
        let mut line = 0usize;
        let mut line_start = 0usize;
        for (i, byte) in self.text.bytes().enumerate() {
            if byte == b'\n' {
                if i >= pos {
                    return format!("line {}, col {}", line + 1, pos - line_start);
                }
                line += 1;
                line_start = i;
            }
        }
        format!("byte offset {pos}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_offsets_to_line_and_column() {
        let src = Source::new("<string>", "abc\ndef\nghi\n");
        assert_eq!(src.offset(1), "line 1, col 1");
        assert_eq!(src.offset(5), "line 2, col 2");
        assert_eq!(src.offset(9), "line 3, col 2");
    }

    #[test]
    fn falls_back_to_byte_offset_past_the_last_newline() {
        let src = Source::new("<string>", "abc\ndef");
        assert_eq!(src.offset(6), "byte offset 6");
    }
}

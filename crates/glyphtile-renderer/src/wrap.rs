use std::borrow::Cow;

use unicode_width::UnicodeWidthStr;

/// Greedy word wrap: break at whitespace so no line is wider than
/// `max_columns` display columns, unless a single word already is.
/// Existing line breaks are kept.
pub fn wrap_text(text: &str, max_columns: usize) -> Cow<'_, str> {
    if max_columns == 0 || text.lines().all(|line| line.width() <= max_columns) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut column = 0;
        for word in line.split_whitespace() {
            let width = word.width();
            if column > 0 && column + 1 + width > max_columns {
                out.push('\n');
                column = 0;
            } else if column > 0 {
                out.push(' ');
                column += 1;
            }
            out.push_str(word);
            column += width;
        }
    }
    Cow::Owned(out)
}

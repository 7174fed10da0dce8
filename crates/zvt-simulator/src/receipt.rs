//! Fixed-width receipt layout.
//!
//! Terminal printers are narrow. A [`Receipt`] collects lines already
//! padded or truncated to the printer width; each line later becomes one
//! `06 D1` print line frame.
//!
//! ```text
//! |       SIMULATOR        |
//! |------------------------|
//! |Betrag         12,34 EUR|
//! |Trace             000042|
//! ```

/// Default printer width in characters.
pub const DEFAULT_COLUMNS: usize = 24;

/// Text alignment within a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    columns: usize,
    lines: Vec<String>,
}

impl Receipt {
    pub fn new(columns: usize) -> Self {
        Receipt {
            columns: columns.max(1),
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, text: &str, alignment: Alignment) -> Self {
        let text = sanitize_text(text);
        self.lines.push(align_text(&text, self.columns, alignment));
        self
    }

    pub fn centered(self, text: &str) -> Self {
        self.line(text, Alignment::Center)
    }

    /// Label on the left, value on the right. The label yields space to
    /// the value when both do not fit.
    pub fn row(mut self, label: &str, value: &str) -> Self {
        let label = sanitize_text(label);
        let value = truncate_text(&sanitize_text(value), self.columns);
        let room = self.columns - value.chars().count();
        let label = truncate_text(&label, room.saturating_sub(1));
        let left = align_text(&label, room, Alignment::Left);
        self.lines.push(format!("{left}{value}"));
        self
    }

    pub fn separator(mut self) -> Self {
        self.lines.push("-".repeat(self.columns));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(" ".repeat(self.columns));
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl Default for Receipt {
    fn default() -> Self {
        Self::new(DEFAULT_COLUMNS)
    }
}

/// Format cents as `12,34 EUR` (or the numeric code for other currencies).
pub fn format_amount(cents: u64, currency_code: u16) -> String {
    let currency = match currency_code {
        978 => "EUR".to_string(),
        756 => "CHF".to_string(),
        840 => "USD".to_string(),
        826 => "GBP".to_string(),
        other => format!("{other:03}"),
    };
    format!("{},{:02} {}", cents / 100, cents % 100, currency)
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Pad `text` to exactly `width` characters.
pub fn align_text(text: &str, width: usize, alignment: Alignment) -> String {
    let char_count = text.chars().count();
    if char_count >= width {
        return truncate_text(text, width);
    }

    let padding = width - char_count;
    match alignment {
        Alignment::Left => format!("{}{}", text, " ".repeat(padding)),
        Alignment::Right => format!("{}{}", " ".repeat(padding), text),
        Alignment::Center => {
            let left_pad = padding / 2;
            let right_pad = padding - left_pad;
            format!("{}{}{}", " ".repeat(left_pad), text, " ".repeat(right_pad))
        }
    }
}

/// Keep printable ASCII only; the wire carries single-byte text.
fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ab", 6, Alignment::Left, "ab    ")]
    #[case("ab", 6, Alignment::Right, "    ab")]
    #[case("ab", 6, Alignment::Center, "  ab  ")]
    #[case("abcdefgh", 4, Alignment::Left, "abcd")]
    fn test_align_text(
        #[case] text: &str,
        #[case] width: usize,
        #[case] alignment: Alignment,
        #[case] expected: &str,
    ) {
        assert_eq!(align_text(text, width, alignment), expected);
    }

    #[test]
    fn test_row_layout() {
        let receipt = Receipt::new(20).row("Betrag", "12,34 EUR");
        assert_eq!(receipt.lines()[0], "Betrag     12,34 EUR");
        assert_eq!(receipt.lines()[0].len(), 20);
    }

    #[test]
    fn test_row_truncates_label_first() {
        let receipt = Receipt::new(12).row("Very long label", "123456");
        assert_eq!(receipt.lines()[0], "Very  123456");
    }

    #[test]
    fn test_every_line_has_printer_width() {
        let receipt = Receipt::default()
            .centered("SIMULATOR")
            .separator()
            .row("Trace", "000001")
            .blank();
        assert!(receipt.lines().iter().all(|l| l.chars().count() == DEFAULT_COLUMNS));
    }

    #[test]
    fn test_sanitize_drops_non_ascii() {
        let receipt = Receipt::new(10).line("Grüße\t", Alignment::Left);
        assert_eq!(receipt.lines()[0], "Gre       ");
    }

    #[rstest]
    #[case(1234, 978, "12,34 EUR")]
    #[case(5, 978, "0,05 EUR")]
    #[case(100_000, 36, "1000,00 036")]
    fn test_format_amount(#[case] cents: u64, #[case] currency: u16, #[case] expected: &str) {
        assert_eq!(format_amount(cents, currency), expected);
    }
}

//! Best-effort parsing of transfer tool output.
//!
//! Two line shapes carry progress information:
//!
//! - **Percent + rate** lines, as printed by `rsync --info=progress2`:
//!   `  1,234,567  45%  123.45MB/s    0:00:45 (xfr#1, to-chk=0/3)`
//! - **Summary** lines, printed once at the end:
//!   `sent 1,234 bytes  received 5,678,901 bytes  1,234.00 bytes/sec`
//!
//! Everything else, including malformed variants of those shapes, yields
//! `None`. Parsing never fails a transfer.

/// Progress information extracted from one output line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressSignal {
    /// Absolute number of bytes transferred so far
    Bytes(u64),
    /// Percent complete (0-100) when the total size is unknown
    Percent(f64),
}

/// Parses lines of transfer output against an optional total size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgressParser {
    total_size: Option<u64>,
}

impl TransferProgressParser {
    /// Create a parser; a total of `Some(0)` is treated as unknown.
    #[must_use]
    pub fn new(total_size: Option<u64>) -> Self {
        Self {
            total_size: total_size.filter(|&t| t > 0),
        }
    }

    /// Known total size, if any.
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Extract a progress signal from `line`.
    pub fn parse(&self, line: &str) -> Option<ProgressSignal> {
        parse_line(line, self.total_size)
    }
}

/// Extract a progress signal from a single line of output.
///
/// With a known, non-zero `total_size`, percent lines are converted to
/// `round(total_size * percent / 100)` bytes; otherwise they are returned as
/// [`ProgressSignal::Percent`].
pub fn parse_line(line: &str, total_size: Option<u64>) -> Option<ProgressSignal> {
    if is_summary_line(line) {
        return parse_received_bytes(line).map(ProgressSignal::Bytes);
    }

    let percent = parse_percent_with_rate(line)?;
    match total_size.filter(|&t| t > 0) {
        Some(total) => Some(ProgressSignal::Bytes(bytes_for_percent(total, percent))),
        None => Some(ProgressSignal::Percent(percent)),
    }
}

/// `round(total * percent / 100)`, saturating at `total`.
#[must_use]
pub fn bytes_for_percent(total: u64, percent: f64) -> u64 {
    let bytes = (total as f64 * percent / 100.0).round();
    if bytes <= 0.0 {
        0
    } else {
        (bytes as u64).min(total)
    }
}

fn is_summary_line(line: &str) -> bool {
    // rsync prints "sent N bytes  received M bytes"; older wrappers print
    // "bytes sent" / "bytes received". Both carry the count after "received".
    (line.contains("bytes sent") && line.contains("bytes received"))
        || (has_byte_count(line, "sent") && has_byte_count(line, "received"))
}

/// Whether `line` contains the token run `<word> <count> bytes`.
fn has_byte_count(line: &str, word: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens
        .windows(3)
        .any(|w| w[0] == word && parse_count(w[1]).is_some() && w[2] == "bytes")
}

fn parse_received_bytes(line: &str) -> Option<u64> {
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == "received")?;
    parse_count(tokens.next()?)
}

fn parse_count(token: &str) -> Option<u64> {
    let digits: String = token.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_percent_with_rate(line: &str) -> Option<f64> {
    let mut percent = None;
    let mut has_rate = false;
    for token in line.split_whitespace() {
        if percent.is_none()
            && let Some(number) = token.strip_suffix('%')
        {
            percent = Some(number.parse::<f64>().ok()?);
        } else if is_rate_token(token) {
            has_rate = true;
        }
    }
    let percent = percent?;
    if !has_rate || !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return None;
    }
    Some(percent)
}

fn is_rate_token(token: &str) -> bool {
    token.ends_with("B/s")
}

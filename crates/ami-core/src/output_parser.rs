//! Parsers for `reduce`'s free-text output.
//!
//! Each parser takes one raw output block (everything between two prompts,
//! command echo included) and recovers a single typed fact. Parsers are pure:
//! they never look at session or registry state.
//!
//! Mandatory facts (coordinates, rain correction, noise) fail with a
//! `ParseError` when absent. Optional facts (calibrator, flagging summary)
//! come back as `None`.

use ami_proto::{DatasetId, ParseError, ParseKind, Pointing};
use tracing::warn;

/// Lines before the first dataset in `list files` / `list comment` output:
/// the command echo and a blank line.
pub const LISTING_HEADER_LINES: usize = 2;

/// Lines after the last dataset in `list files` output: blanks and the
/// total observing time summary.
pub const FILE_LISTING_FOOTER_LINES: usize = 4;

/// Fixed-width label in front of the coordinates in `list observation` output.
const TRACKING_LABEL: &str = "Tracking    : ";

/// Reference frame the pointing is expected in.
const EXPECTED_FRAME: &str = "J2000";

/// Longest snippet kept in a `ParseError`.
const SNIPPET_LEN: usize = 120;

/// One line of a `list files` or `list comment` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub id: DatasetId,
    pub comment: Option<String>,
}

/// Splits a block into lines exactly as the tool printed them.
///
/// Unlike `str::lines`, a trailing newline yields a final empty line, so
/// header/footer counts match the raw output.
pub fn split_lines(block: &str) -> Vec<&str> {
    block
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .collect()
}

/// Parses `list files \ ` output into dataset entries.
pub fn parse_file_listing(block: &str) -> Vec<ListingEntry> {
    let lines = split_lines(block);
    let end = lines.len().saturating_sub(FILE_LISTING_FOOTER_LINES);
    if end <= LISTING_HEADER_LINES {
        return Vec::new();
    }
    parse_listing_lines(&lines[LISTING_HEADER_LINES..end])
}

/// Parses `list comment \ ` output. There is no summary footer.
pub fn parse_comment_listing(block: &str) -> Vec<ListingEntry> {
    let lines = split_lines(block);
    if lines.len() <= LISTING_HEADER_LINES {
        return Vec::new();
    }
    parse_listing_lines(&lines[LISTING_HEADER_LINES..])
}

fn parse_listing_lines(lines: &[&str]) -> Vec<ListingEntry> {
    lines
        .iter()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (id, comment) = match line.split_once(char::is_whitespace) {
                Some((id, rest)) => {
                    let rest = rest.trim();
                    (id, (!rest.is_empty()).then(|| rest.to_string()))
                }
                None => (line, None),
            };
            Some(ListingEntry {
                id: DatasetId::new(id),
                comment,
            })
        })
        .collect()
}

/// Extracts the tracked pointing from `list observation` output.
///
/// The declination separator depends on its sign: a leading `-` takes the
/// place of a padding space, so negative declinations are separated by two
/// spaces and positive ones by three.
pub fn parse_pointing(dataset: Option<&DatasetId>, block: &str) -> Result<Pointing, ParseError> {
    let err = |snippet: &str| {
        ParseError::new(ParseKind::Coordinates, snippet_of(snippet)).for_dataset(dataset)
    };

    let lines = split_lines(block);
    let Some((line, start)) = lines
        .iter()
        .find_map(|line| line.find("Tracking").map(|idx| (*line, idx)))
    else {
        return Err(err(block));
    };

    if !line.contains(EXPECTED_FRAME) {
        warn!(
            dataset = dataset.map_or("<unknown>", |d| d.as_str()),
            line, "Obs pointing may not be in J2000 format, co-ord conversion may be incorrect"
        );
    }

    let labelled = &line[start..];
    let coords = match labelled.strip_prefix(TRACKING_LABEL) {
        Some(rest) => rest,
        // Label padded differently: fall back to whatever follows the colon
        None => labelled.split_once(':').map_or("", |(_, rest)| rest),
    };
    let coords = strip_frame(coords.trim());

    let (primary, alternate) = if coords.contains('-') {
        ("  ", "   ")
    } else {
        ("   ", "  ")
    };

    split_ra_dec(coords, primary)
        .or_else(|| split_ra_dec(coords, alternate))
        .map(|(ra, dec)| Pointing::new(ra, dec))
        .ok_or_else(|| err(line))
}

/// Removes a trailing reference-frame token such as `J2000` or `B1950`.
fn strip_frame(coords: &str) -> &str {
    match coords.rsplit_once(char::is_whitespace) {
        Some((rest, last)) if last.starts_with(|c: char| c.is_ascii_alphabetic()) => rest.trim_end(),
        _ => coords,
    }
}

fn split_ra_dec<'a>(coords: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    let mut fields = coords
        .split(separator)
        .map(str::trim)
        .filter(|field| !field.is_empty());
    let ra = fields.next()?;
    let dec = fields.next()?;
    Some((ra, dec))
}

/// Returns the calibrator named in `list observation` output, if any.
pub fn parse_calibrator(block: &str) -> Option<DatasetId> {
    split_lines(block)
        .into_iter()
        .find(|line| line.contains("with calibrator"))
        .and_then(|line| line.split_whitespace().last())
        .map(DatasetId::new)
}

/// Extracts the mean amplitude correction factor from a rain-correction step.
pub fn parse_rain_correction(dataset: Option<&DatasetId>, block: &str) -> Result<f64, ParseError> {
    let err = |snippet: &str| {
        ParseError::new(ParseKind::RainCorrection, snippet_of(snippet)).for_dataset(dataset)
    };

    let line = split_lines(block)
        .into_iter()
        .find(|line| line.contains("Mean amplitude correction factor"))
        .ok_or_else(|| err(block))?;

    line.split_whitespace()
        .last()
        .and_then(parse_finite)
        .ok_or_else(|| err(line))
}

/// Extracts the flagged percentage from a `Total of ... samples flagged` line.
///
/// Returns `Ok(None)` when the summary line is missing (some flagging steps
/// legitimately report nothing) or when it reports `NaN%` for zero samples.
pub fn parse_flagging(dataset: Option<&DatasetId>, block: &str) -> Result<Option<f64>, ParseError> {
    let Some(line) = split_lines(block)
        .into_iter()
        .find(|line| line.contains("samples flagged") && line.contains("Total of"))
    else {
        return Ok(None);
    };

    let percent = line
        .split_whitespace()
        .find(|token| token.contains('%'))
        .map(|token| token.trim_matches(|c: char| matches!(c, '%' | '(' | ')' | ',')));

    match percent.and_then(|p| p.parse::<f64>().ok()) {
        Some(value) if value.is_finite() => Ok(Some(value)),
        Some(_) => Ok(None),
        None => Err(ParseError::new(ParseKind::Flagging, snippet_of(line)).for_dataset(dataset)),
    }
}

/// Extracts the estimated noise (Jy) from reweighting output.
pub fn parse_noise(dataset: Option<&DatasetId>, block: &str) -> Result<f64, ParseError> {
    let err =
        |snippet: &str| ParseError::new(ParseKind::Noise, snippet_of(snippet)).for_dataset(dataset);

    let line = split_lines(block)
        .into_iter()
        .find(|line| line.contains("estimated noise"))
        .ok_or_else(|| err(block))?;

    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens
        .len()
        .checked_sub(2)
        .and_then(|idx| parse_finite(tokens[idx]))
        .ok_or_else(|| err(line))
}

fn parse_finite(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn snippet_of(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

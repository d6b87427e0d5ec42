//! Sky positions in decimal degrees and angular separation between them.

use ami_proto::{ParseError, ParseKind, Pointing};
use marlu::RADec;

/// A position on the sky in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyPosition {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }

    /// Converts a sexagesimal pointing (RA in hours, Dec in degrees).
    ///
    /// Fields may be separated by spaces or colons; missing minutes/seconds
    /// count as zero.
    pub fn from_pointing(pointing: &Pointing) -> Result<Self, ParseError> {
        let ra_hours = parse_sexagesimal(&pointing.ra)
            .ok_or_else(|| ParseError::new(ParseKind::Coordinates, pointing.ra.clone()))?;
        let dec_deg = parse_sexagesimal(&pointing.dec)
            .ok_or_else(|| ParseError::new(ParseKind::Coordinates, pointing.dec.clone()))?;

        if !(0.0..24.0).contains(&ra_hours) || !(-90.0..=90.0).contains(&dec_deg) {
            return Err(ParseError::new(
                ParseKind::Coordinates,
                format!("out of range: {pointing}"),
            ));
        }

        Ok(Self::new(ra_hours * 15.0, dec_deg))
    }
}

/// Parses `"-45 30 15.5"` / `"12:30:00"` into a signed decimal value.
fn parse_sexagesimal(text: &str) -> Option<f64> {
    let text = text.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let mut fields = unsigned
        .split(|c: char| c.is_whitespace() || c == ':')
        .filter(|field| !field.is_empty());

    let whole: f64 = fields.next()?.parse().ok()?;
    let minutes: f64 = fields.next().map_or(Some(0.0), |f| f.parse().ok())?;
    let seconds: f64 = fields.next().map_or(Some(0.0), |f| f.parse().ok())?;
    if fields.next().is_some() || whole < 0.0 || !(0.0..60.0).contains(&minutes) {
        return None;
    }
    if !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let value = whole + minutes / 60.0 + seconds / 3600.0;
    Some(if negative { -value } else { value })
}

/// Angular distance between two sky positions.
pub trait AngularSeparation: Send + Sync {
    /// Returns the separation in degrees.
    fn separation_deg(&self, a: &SkyPosition, b: &SkyPosition) -> f64;
}

/// Great-circle separation via the haversine formula, as computed by
/// `marlu::RADec`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Haversine;

impl AngularSeparation for Haversine {
    fn separation_deg(&self, a: &SkyPosition, b: &SkyPosition) -> f64 {
        let a = RADec::from_degrees(a.ra_deg, a.dec_deg);
        let b = RADec::from_degrees(b.ra_deg, b.dec_deg);
        a.separation(b).to_degrees()
    }
}

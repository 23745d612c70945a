//! License plate validation.
//!
//! A candidate plate goes through a fixed sequence of checks and the first
//! failing one decides the rejection reason. The order is part of the
//! contract: clients map each reason to a dedicated message.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;
use validator::ValidationError;

/// Minimum plate length, after trimming.
pub const MIN_LENGTH: usize = 4;
/// Maximum plate length, after trimming.
pub const MAX_LENGTH: usize = 20;
/// Run length from which a repeated character is refused.
pub const MAX_REPEAT: usize = 5;

/// Characters that can never appear on a plate.
pub const FORBIDDEN_CHARS: &[char] = &[
    '@', '#', '$', '%', '&', '*', '(', ')', '!', '?', '+', '=', '<', '>', '/',
    '\\', '"', '\'', ';', ':', ',', '.', '{', '}', '[', ']', '~', '`',
];

/// Plates refused once separators are stripped.
pub const RESERVED_PLATES: &[&str] = &[
    "TEST", "FAKE", "NULL", "VOID", "NONE", "NA", "ADMIN", "XXX", "XXXX", "000",
    "0000", "00000", "AAAA", "ZZZZ", "POLICE", "ARMY", "GOVT", "VIP", "FBI",
    "CIA",
];

/// Regional plate shapes, matched against the normalized plate.
///
/// Italian plates are a subset of French ones, so Italy is tried first.
pub const REGIONAL_PATTERNS: &[(Region, &str)] = &[
    (
        Region::Italy,
        r"^[A-HJ-NPR-TV-Z]{2} ?\d{3} ?[A-HJ-NPR-TV-Z]{2}$",
    ),
    (Region::France, r"^[A-Z]{2}[- ]?\d{3}[- ]?[A-Z]{2}$"),
    (Region::Morocco, r"^\d{1,6}[- ]?[A-Z][- ]?\d{1,2}$"),
    (Region::Germany, r"^[A-Z]{1,3}[- ][A-Z]{1,2}[- ]?\d{1,4}[EH]?$"),
    (Region::Spain, r"^\d{4}[- ]?[A-Z]{3}$"),
    (Region::Belgium, r"^\d[- ]?[A-Z]{3}[- ]?\d{3}$"),
    (Region::UnitedKingdom, r"^[A-Z]{2}\d{2} ?[A-Z]{3}$"),
    (Region::UnitedStates, r"^[A-Z0-9]{4,8}$"),
];

/// Shape accepted when no regional pattern matched. Letter and digit counts
/// are checked separately.
const GENERIC_PATTERN: &str = r"^[A-Z0-9 -]{4,20}$";
const GENERIC_MIN_LETTERS: usize = 2;
const GENERIC_MIN_DIGITS: usize = 2;

static REGIONAL_RE: LazyLock<Vec<(Region, Regex)>> = LazyLock::new(|| {
    REGIONAL_PATTERNS
        .iter()
        .map(|(region, pattern)| (*region, Regex::new(pattern).unwrap()))
        .collect()
});

static GENERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(GENERIC_PATTERN).unwrap());

/// Plate format families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    France,
    Morocco,
    Germany,
    Spain,
    Italy,
    Belgium,
    UnitedKingdom,
    UnitedStates,
}

/// Why a plate was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlateError {
    #[error("License plate must contain at least {} characters.", MIN_LENGTH)]
    TooShort,
    #[error("License plate must not exceed {} characters.", MAX_LENGTH)]
    TooLong,
    #[error("License plate contains a forbidden character: '{0}'.")]
    ForbiddenChar(char),
    #[error("This license plate is reserved and cannot be registered.")]
    Reserved,
    #[error("License plate must contain at least one letter and one digit.")]
    MissingLetterOrDigit,
    #[error(
        "License plate must contain at least {} letters or digits.",
        MIN_LENGTH
    )]
    TooShortAlphanumeric,
    #[error("License plate format is not recognized.")]
    InvalidFormat,
    #[error(
        "License plate must not repeat a character {} times in a row.",
        MAX_REPEAT
    )]
    RepeatedChars,
    #[error("License plate must mix letters and digits.")]
    NotMixed,
}

impl PlateError {
    /// Stable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            PlateError::TooShort => "TOO_SHORT",
            PlateError::TooLong => "TOO_LONG",
            PlateError::ForbiddenChar(_) => "FORBIDDEN_CHAR",
            PlateError::Reserved => "RESERVED_PLATE",
            PlateError::MissingLetterOrDigit => "MISSING_LETTER_OR_DIGIT",
            PlateError::TooShortAlphanumeric => "TOO_SHORT_ALPHANUMERIC",
            PlateError::InvalidFormat => "INVALID_FORMAT",
            PlateError::RepeatedChars => "REPEATED_CHARS",
            PlateError::NotMixed => "NOT_MIXED",
        }
    }
}

/// An accepted license plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plate {
    normalized: String,
    cleaned: String,
    region: Option<Region>,
}

impl Plate {
    /// Validate a raw plate.
    pub fn parse(raw: &str) -> Result<Self, PlateError> {
        let normalized = normalize(raw);
        let length = normalized.chars().count();

        if length < MIN_LENGTH {
            return Err(PlateError::TooShort);
        }
        if length > MAX_LENGTH {
            return Err(PlateError::TooLong);
        }
        if let Some(c) = normalized.chars().find(|c| FORBIDDEN_CHARS.contains(c))
        {
            return Err(PlateError::ForbiddenChar(c));
        }

        let cleaned = clean(&normalized);
        if RESERVED_PLATES.contains(&cleaned.as_str()) {
            return Err(PlateError::Reserved);
        }
        if !normalized.chars().any(|c| c.is_ascii_alphabetic())
            || !normalized.chars().any(|c| c.is_ascii_digit())
        {
            return Err(PlateError::MissingLetterOrDigit);
        }
        if cleaned.len() < MIN_LENGTH {
            return Err(PlateError::TooShortAlphanumeric);
        }

        let region = match match_region(&normalized) {
            Some(region) => Some(region),
            None if matches_generic(&normalized) => None,
            None => return Err(PlateError::InvalidFormat),
        };

        if longest_run(&cleaned) >= MAX_REPEAT {
            return Err(PlateError::RepeatedChars);
        }
        if !is_mixed(&cleaned) {
            return Err(PlateError::NotMixed);
        }

        Ok(Self {
            normalized,
            cleaned,
            region,
        })
    }

    /// Trimmed, uppercased plate. This is the stored form.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Plate without separators.
    #[inline]
    pub fn cleaned(&self) -> &str {
        &self.cleaned
    }

    /// Matched regional format, `None` when only the generic shape matched.
    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn into_string(self) -> String {
        self.normalized
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized)
    }
}

/// Validator hook for form fields holding a plate.
pub fn validate_plate(value: &str) -> Result<(), ValidationError> {
    Plate::parse(value).map(|_| ()).map_err(|err| {
        ValidationError::new(err.code()).with_message(err.to_string().into())
    })
}

fn normalize(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn clean(normalized: &str) -> String {
    normalized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn match_region(normalized: &str) -> Option<Region> {
    REGIONAL_RE
        .iter()
        .find(|(_, re)| re.is_match(normalized))
        .map(|(region, _)| *region)
}

fn matches_generic(normalized: &str) -> bool {
    GENERIC_RE.is_match(normalized)
        && normalized.chars().filter(|c| c.is_ascii_alphabetic()).count()
            >= GENERIC_MIN_LETTERS
        && normalized.chars().filter(|c| c.is_ascii_digit()).count()
            >= GENERIC_MIN_DIGITS
}

fn longest_run(cleaned: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;

    for c in cleaned.chars() {
        if previous == Some(c) {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }

    longest
}

fn is_mixed(cleaned: &str) -> bool {
    !cleaned.chars().all(|c| c.is_ascii_alphabetic())
        && !cleaned.chars().all(|c| c.is_ascii_digit())
}

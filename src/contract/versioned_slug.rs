//! Parser for versioned slug references.
//!
//! A reference has the shape `slug[@version]` where `version` is either the
//! token `latest` or a semantic version `major[.minor[.patch]][-pre][+build]`.
//! Missing numeric components default to 0; a missing version part selects
//! the latest release.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, opt, recognize},
    multi::many0,
    sequence::{pair, preceded},
    IResult, Parser,
};
use thiserror::Error;

use super::is_valid_slug;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SlugParseError {
    #[error("invalid slug: {0:?}")]
    SlugInvalid(String),

    #[error("invalid version: {0:?}")]
    VersionInvalid(String),
}

/// A parsed `slug@version` reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionedSlug {
    pub base: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: String,
    pub build: String,
    /// True when the reference selects the highest non-pre-release version
    /// rather than an explicit one.
    pub latest: bool,
}

impl VersionedSlug {
    /// Render the version part back into its textual form.
    pub fn version_string(&self) -> String {
        if self.latest {
            return "latest".to_string();
        }
        crate::contract::Contract::format_version(
            self.major,
            self.minor,
            self.patch,
            &self.prerelease,
            &self.build,
        )
    }
}

fn slug_part(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')(input)
}

// dot-separated identifiers as allowed in semver pre-release and build
// metadata: alphanumerics and hyphens
fn metadata_part(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-'),
        many0(pair(
            char('.'),
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-'),
        )),
    ))
    .parse(input)
}

struct ParsedVersion {
    major: u32,
    minor: u32,
    patch: u32,
    prerelease: String,
    build: String,
    latest: bool,
}

fn number(input: &str) -> IResult<&str, u32> {
    let (rest, digits) = digit1(input)?;
    match digits.parse::<u32>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn semver(input: &str) -> IResult<&str, ParsedVersion> {
    let (rest, (major, minor, patch, prerelease, build)) = (
        number,
        opt(preceded(char('.'), number)),
        opt(preceded(char('.'), number)),
        opt(preceded(char('-'), metadata_part)),
        opt(preceded(char('+'), metadata_part)),
    )
        .parse(input)?;
    Ok((
        rest,
        ParsedVersion {
            major,
            minor: minor.unwrap_or(0),
            patch: patch.unwrap_or(0),
            prerelease: prerelease.unwrap_or("").to_string(),
            build: build.unwrap_or("").to_string(),
            latest: false,
        },
    ))
}

fn latest(input: &str) -> IResult<&str, ParsedVersion> {
    let (rest, _) = tag("latest").parse(input)?;
    Ok((
        rest,
        ParsedVersion {
            major: 0,
            minor: 0,
            patch: 0,
            prerelease: String::new(),
            build: String::new(),
            latest: true,
        },
    ))
}

fn versioned_slug(input: &str) -> IResult<&str, (&str, Option<ParsedVersion>)> {
    all_consuming(pair(
        slug_part,
        opt(preceded(char('@'), alt((latest, semver)))),
    ))
    .parse(input)
}

/// Parse a `slug[@version]` reference. A bare slug resolves to `latest`.
pub fn parse_versioned_slug(input: &str) -> Result<VersionedSlug, SlugParseError> {
    let (_, (base, version)) = versioned_slug(input).map_err(|_| match input.split_once('@') {
        Some((base, v)) if is_valid_slug(base) => SlugParseError::VersionInvalid(v.to_string()),
        Some((base, _)) => SlugParseError::SlugInvalid(base.to_string()),
        None => SlugParseError::SlugInvalid(input.to_string()),
    })?;

    if !is_valid_slug(base) {
        return Err(SlugParseError::SlugInvalid(base.to_string()));
    }

    let version = version.unwrap_or(ParsedVersion {
        major: 0,
        minor: 0,
        patch: 0,
        prerelease: String::new(),
        build: String::new(),
        latest: true,
    });

    Ok(VersionedSlug {
        base: base.to_string(),
        major: version.major,
        minor: version.minor,
        patch: version.patch,
        prerelease: version.prerelease,
        build: version.build,
        latest: version.latest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version() {
        let parsed = parse_versioned_slug("card@1.2.3").unwrap();
        assert_eq!(parsed.base, "card");
        assert_eq!((parsed.major, parsed.minor, parsed.patch), (1, 2, 3));
        assert!(!parsed.latest);
        assert_eq!(parsed.version_string(), "1.2.3");
    }

    #[test]
    fn test_missing_components_default_to_zero() {
        let parsed = parse_versioned_slug("card@2").unwrap();
        assert_eq!((parsed.major, parsed.minor, parsed.patch), (2, 0, 0));
        let parsed = parse_versioned_slug("card@2.1").unwrap();
        assert_eq!((parsed.major, parsed.minor, parsed.patch), (2, 1, 0));
    }

    #[test]
    fn test_prerelease_and_build() {
        let parsed = parse_versioned_slug("card@1.0.0-alpha.1+build-7").unwrap();
        assert_eq!(parsed.prerelease, "alpha.1");
        assert_eq!(parsed.build, "build-7");
        assert_eq!(parsed.version_string(), "1.0.0-alpha.1+build-7");
    }

    #[test]
    fn test_latest_token() {
        let parsed = parse_versioned_slug("card@latest").unwrap();
        assert!(parsed.latest);
        assert_eq!(parsed.version_string(), "latest");
    }

    #[test]
    fn test_bare_slug_selects_latest() {
        let parsed = parse_versioned_slug("my-card").unwrap();
        assert_eq!(parsed.base, "my-card");
        assert!(parsed.latest);
    }

    #[test]
    fn test_round_trip_against_format_version() {
        for reference in [
            "card@1.0.0",
            "card@2.13.7-beta",
            "card@0.0.1+r2",
            "card@3.0.0-rc.1+r2",
        ] {
            let parsed = parse_versioned_slug(reference).unwrap();
            assert_eq!(
                format!("{}@{}", parsed.base, parsed.version_string()),
                reference
            );
        }
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            parse_versioned_slug("Card@1.0.0"),
            Err(SlugParseError::SlugInvalid(_))
        ));
        assert!(matches!(
            parse_versioned_slug("card@1.x"),
            Err(SlugParseError::VersionInvalid(_))
        ));
        assert!(matches!(
            parse_versioned_slug("card@"),
            Err(SlugParseError::VersionInvalid(_))
        ));
        assert!(parse_versioned_slug("").is_err());
    }
}

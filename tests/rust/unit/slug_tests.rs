//! Versioned slug reference parsing.

use autumndb::contract::{parse_versioned_slug, Contract, SlugParseError};
use test_case::test_case;

#[test_case("card@1.0.0")]
#[test_case("card@0.0.0")]
#[test_case("user-johndoe@2.13.7")]
#[test_case("card@1.0.0-alpha")]
#[test_case("card@1.0.0-alpha.2")]
#[test_case("card@1.0.0+rev1")]
#[test_case("card@1.0.0-beta+rev-2")]
fn test_round_trip_through_version_components(reference: &str) {
    // Parsing `slug@version` and re-rendering the five stored components
    // reproduces the reference exactly.
    let parsed = parse_versioned_slug(reference).unwrap();
    let rendered = format!(
        "{}@{}",
        parsed.base,
        Contract::format_version(
            parsed.major,
            parsed.minor,
            parsed.patch,
            &parsed.prerelease,
            &parsed.build
        )
    );
    assert_eq!(rendered, reference);
}

#[test]
fn test_partial_versions_default_to_zero() {
    let parsed = parse_versioned_slug("card@3").unwrap();
    assert_eq!((parsed.major, parsed.minor, parsed.patch), (3, 0, 0));
    assert_eq!(parsed.prerelease, "");
    assert_eq!(parsed.build, "");
}

#[test]
fn test_latest_selection_forms() {
    assert!(parse_versioned_slug("card@latest").unwrap().latest);
    assert!(parse_versioned_slug("card").unwrap().latest);
    assert!(!parse_versioned_slug("card@1").unwrap().latest);
}

#[test]
fn test_error_kinds() {
    assert!(matches!(
        parse_versioned_slug("UpperCase@1.0.0"),
        Err(SlugParseError::SlugInvalid(_))
    ));
    assert!(matches!(
        parse_versioned_slug("card@one.two"),
        Err(SlugParseError::VersionInvalid(_))
    ));
    let oversized = format!("{}@1.0.0", "x".repeat(300));
    assert!(matches!(
        parse_versioned_slug(&oversized),
        Err(SlugParseError::SlugInvalid(_))
    ));
}

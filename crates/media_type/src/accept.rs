//! `Accept` header parsing and quality-based matching.

use crate::parse::parse_one;
use crate::MediaType;

/// Parses a comma-separated `Accept` header into ranked [`MediaType`]
/// ranges, sorted by:
///
/// 1. descending `q`
/// 2. concreteness (explicit `type` over `*`, then explicit `subtype` over `*`)
/// 3. descending parameter count
/// 4. sorted parameter-name identity (lexicographic join), ascending
/// 5. ascending original position
///
/// Entries that fail to parse as a media type are skipped.
pub fn parse_accept(input: &str) -> Vec<MediaType> {
    let mut ranges: Vec<MediaType> = input
        .split(',')
        .enumerate()
        .filter_map(|(position, raw)| {
            let parsed = parse_one(raw, position);
            if parsed.is_none() && !raw.trim().is_empty() {
                tracing::trace!(range = raw.trim(), "skipping unparseable accept range");
            }
            parsed
        })
        .collect();

    ranges.sort_by(|a, b| {
        b.quality_thousandths()
            .cmp(&a.quality_thousandths())
            .then_with(|| concreteness(b).cmp(&concreteness(a)))
            .then_with(|| b.parameter_count().cmp(&a.parameter_count()))
            .then_with(|| a.parameter_identity().cmp(&b.parameter_identity()))
            .then_with(|| a.position.cmp(&b.position))
    });

    ranges
}

fn concreteness(mt: &MediaType) -> u8 {
    u8::from(!mt.is_wildcard_type()) * 2 + u8::from(!mt.is_wildcard_subtype())
}

/// Scans `accept_list` (already sorted by [`parse_accept`]) for the first
/// range that `target` matches, returning its quality. Returns `0.0` if no
/// range matches.
pub fn match_for_quality(target: &MediaType, accept_list: &[MediaType]) -> f64 {
    accept_list
        .iter()
        .find(|range| target.matches(range))
        .map_or(0.0, MediaType::quality)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn sorts_by_quality_then_specificity_then_parameter_count() {
        let sorted = parse_accept(
            "*/*, text/plain, text/plain; charset=UTF-8; format=fixed, text/plain; charset=utf8, text/*",
        );
        let shapes: Vec<(&str, &str, usize)> = sorted
            .iter()
            .map(|mt| (mt.type_(), mt.subtype(), mt.parameter_count()))
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("text", "plain", 2),
                ("text", "plain", 1),
                ("text", "plain", 0),
                ("text", "*", 0),
                ("*", "*", 0),
            ]
        );
    }

    #[test]
    fn match_for_quality_returns_zero_when_nothing_matches() {
        let accept = parse_accept("application/json");
        let target = MediaType::parse_one("text/html").unwrap();
        assert_eq!(match_for_quality(&target, &accept), 0.0);
    }

    #[test]
    fn match_for_quality_returns_the_first_matching_ranges_weight() {
        let accept = parse_accept("text/html;q=0.8, */*;q=0.1");
        let target = MediaType::parse_one("text/html").unwrap();
        assert_eq!(match_for_quality(&target, &accept), 0.8);
    }

    proptest! {
        #[test]
        fn parsed_ranges_have_bounded_lowercase_quality(
            type_ in "[a-zA-Z]{1,6}",
            subtype in "[a-zA-Z]{1,6}",
            q_thousandths in 0u16..=1000,
        ) {
            let header = format!("{type_}/{subtype};q=0.{q_thousandths:03}");
            let ranges = parse_accept(&header);
            for range in &ranges {
                prop_assert_eq!(range.type_(), range.type_().to_ascii_lowercase());
                prop_assert_eq!(range.subtype(), range.subtype().to_ascii_lowercase());
                prop_assert!(range.quality() >= 0.0 && range.quality() <= 1.0);
            }
        }

        #[test]
        fn parsed_ranges_are_sorted_by_descending_quality(
            qualities in proptest::collection::vec(0u16..=1000, 1..6),
        ) {
            let header = qualities
                .iter()
                .enumerate()
                .map(|(i, q)| format!("type{i}/sub{i};q=0.{q:03}"))
                .collect::<Vec<_>>()
                .join(", ");
            let ranges = parse_accept(&header);
            for window in ranges.windows(2) {
                prop_assert!(window[0].quality_thousandths() >= window[1].quality_thousandths());
            }
        }
    }
}

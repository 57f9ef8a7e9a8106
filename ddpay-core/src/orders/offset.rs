use itertools::Itertools;
use rust_decimal::Decimal;

/// Smallest positive multiple of `step` not present in `used`.
///
/// Candidates `step, 2*step, 3*step, ...` are tested in order against the
/// sorted distinct offsets, so gaps left by settled or expired orders are
/// reused before the sequence grows.
pub fn next_offset(used: impl IntoIterator<Item = Decimal>, step: Decimal) -> Decimal {
    let used: Vec<Decimal> = used
        .into_iter()
        .map(|offset| offset.normalize())
        .sorted()
        .dedup()
        .collect();

    let mut candidate = step;
    for offset in used {
        if offset < candidate.normalize() {
            continue;
        }
        if offset == candidate.normalize() {
            candidate += step;
        } else {
            break;
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_first_offset_is_one_step() {
        assert_eq!(next_offset([], dec("0.01")), dec("0.01"));
    }

    #[test]
    fn test_sequence_grows_by_step() {
        let step = dec("0.01");
        let mut used = Vec::new();
        for expected in ["0.01", "0.02", "0.03"] {
            let offset = next_offset(used.clone(), step);
            assert_eq!(offset, dec(expected));
            used.push(offset);
        }
    }

    #[test]
    fn test_gaps_are_reused() {
        let step = dec("0.01");
        assert_eq!(next_offset([dec("0.02"), dec("0.03")], step), dec("0.01"));
        assert_eq!(
            next_offset([dec("0.03"), dec("0.01"), dec("0.04")], step),
            dec("0.02")
        );
    }

    #[test]
    fn test_ignores_duplicates_and_scale() {
        let step = dec("0.01");
        assert_eq!(
            next_offset([dec("0.010"), dec("0.01"), dec("0.0200")], step),
            dec("0.03")
        );
    }

    #[test]
    fn test_offsets_off_the_step_grid_do_not_block() {
        let step = dec("0.01");
        assert_eq!(next_offset([dec("0.005"), dec("0.01")], step), dec("0.02"));
    }
}

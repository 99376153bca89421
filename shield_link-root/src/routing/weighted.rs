//! Proportional split of the round robin counter across a weighted pool.
//!
//! `numgen inc mod 100` yields `0..100`. Every interface of a pool owns a
//! contiguous inclusive range of that domain, sized by its weight. The last
//! range is always closed at [`LAST_SLOT`] so rounding never leaves a gap.

use std::fmt;
use std::ops::RangeInclusive;

use shield_link_lib::interface::Interface;

use super::Error;

/// Modulus of the `numgen` counter.
pub(crate) const RANDOM_DOMAIN: u32 = 100;
/// Upper bound of the last range in a pool.
pub(crate) const LAST_SLOT: u32 = 100;
/// Every member needs at least one counter value.
pub(crate) const MAX_POOL_SIZE: usize = RANDOM_DOMAIN as usize;
/// Offset keeping generated marks clear of marks set by other tooling.
pub(crate) const MARK_BASE: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FwMark(u32);

impl FwMark {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FwMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Hands out sequential marks, shared by both pools of one split.
#[derive(Debug, Default)]
pub(crate) struct MarkAllocator {
    issued: u32,
}

impl MarkAllocator {
    pub(crate) fn next_mark(&mut self) -> FwMark {
        self.issued += 1;
        FwMark(MARK_BASE + self.issued)
    }
}

/// One pool member with its mark and counter range.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Slot {
    pub(crate) interface: String,
    pub(crate) mark: FwMark,
    pub(crate) range: RangeInclusive<u32>,
}

pub(crate) fn check_pool_size(pool: &[Interface]) -> Result<(), Error> {
    if pool.len() > MAX_POOL_SIZE {
        Err(Error::PoolTooLarge(pool.len()))
    } else {
        Ok(())
    }
}

/// Splits `[0, LAST_SLOT]` into one contiguous range per weight.
///
/// A non-last range ends at `floor(cumulative_weight * 100 / total)`, but never
/// before its own start and never so late that a following member is left
/// without a counter value below [`RANDOM_DOMAIN`].
pub(crate) fn partition(weights: &[u32]) -> Result<Vec<RangeInclusive<u32>>, Error> {
    let count = weights.len();
    if count > MAX_POOL_SIZE {
        return Err(Error::PoolTooLarge(count));
    }

    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    let mut ranges = Vec::with_capacity(count);
    let mut start: u64 = 0;
    let mut cumulative: u64 = 0;

    for (idx, &weight) in weights.iter().enumerate() {
        cumulative += u64::from(weight);
        let end = if idx + 1 == count {
            u64::from(LAST_SLOT)
        } else {
            let following = (count - idx - 1) as u64;
            let latest_end = u64::from(RANDOM_DOMAIN) - 1 - following;
            (cumulative * u64::from(RANDOM_DOMAIN) / total).max(start).min(latest_end)
        };
        ranges.push(start as u32..=end as u32);
        start = end + 1;
    }

    Ok(ranges)
}

/// Assigns marks and ranges to a pool. An empty pool consumes no marks.
pub(crate) fn assign(pool: &[Interface], marks: &mut MarkAllocator) -> Result<Vec<Slot>, Error> {
    let weights = pool.iter().map(Interface::effective_weight).collect::<Vec<_>>();
    let ranges = partition(&weights)?;

    Ok(pool
        .iter()
        .zip(ranges)
        .map(|(iface, range)| Slot {
            interface: iface.name.clone(),
            mark: marks.next_mark(),
            range,
        })
        .collect())
}

/// Renders slots as an anonymous nft verdict map, e.g. `{ 0-25 : 0x65, 26-100 : 0x66 }`.
pub(crate) fn verdict_map(slots: &[Slot]) -> String {
    let entries = slots
        .iter()
        .map(|s| format!("{}-{} : {}", s.range.start(), s.range.end(), s.mark))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {entries} }}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn assert_covers_domain(ranges: &[RangeInclusive<u32>]) {
        assert_eq!(*ranges[0].start(), 0);
        assert_eq!(*ranges[ranges.len() - 1].end(), LAST_SLOT);
        for pair in ranges.windows(2) {
            assert_eq!(*pair[1].start(), pair[0].end() + 1, "ranges must be contiguous: {ranges:?}");
        }
        for range in ranges {
            assert!(range.start() <= range.end(), "empty range in {ranges:?}");
            assert!(*range.start() < RANDOM_DOMAIN, "unreachable range in {ranges:?}");
        }
    }

    #[rstest]
    #[case(vec![1], vec![0..=100])]
    #[case(vec![42], vec![0..=100])]
    #[case(vec![1, 3], vec![0..=25, 26..=100])]
    #[case(vec![1, 1], vec![0..=50, 51..=100])]
    #[case(vec![3, 1], vec![0..=75, 76..=100])]
    #[case(vec![1, 1, 1], vec![0..=33, 34..=66, 67..=100])]
    #[case(vec![1, 2, 1], vec![0..=25, 26..=75, 76..=100])]
    fn partitions_by_weight(#[case] weights: Vec<u32>, #[case] expected: Vec<RangeInclusive<u32>>) -> anyhow::Result<()> {
        let ranges = partition(&weights)?;
        assert_eq!(ranges, expected);
        assert_covers_domain(&ranges);
        Ok(())
    }

    #[rstest]
    #[case(vec![1, 1000])]
    #[case(vec![1, 1, 1000])]
    #[case(vec![1000, 1, 1])]
    #[case(vec![7, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1])]
    fn skewed_weights_still_cover_domain(#[case] weights: Vec<u32>) -> anyhow::Result<()> {
        let ranges = partition(&weights)?;
        assert_eq!(ranges.len(), weights.len());
        assert_covers_domain(&ranges);
        Ok(())
    }

    #[test]
    fn last_range_always_ends_at_last_slot() -> anyhow::Result<()> {
        let ranges = partition(&[5, 5, 1])?;
        assert_eq!(ranges[2], 91..=100);
        Ok(())
    }

    #[test]
    fn full_pool_gives_every_member_one_value() -> anyhow::Result<()> {
        let weights = vec![1; MAX_POOL_SIZE];
        let ranges = partition(&weights)?;
        assert_covers_domain(&ranges);
        assert_eq!(ranges[98], 98..=98);
        assert_eq!(ranges[99], 99..=100);
        Ok(())
    }

    #[test]
    fn oversized_pool_is_rejected() -> anyhow::Result<()> {
        let weights = vec![1; MAX_POOL_SIZE + 1];
        assert!(matches!(partition(&weights), Err(Error::PoolTooLarge(101))));
        Ok(())
    }

    #[test]
    fn empty_pool_has_no_ranges() -> anyhow::Result<()> {
        assert!(partition(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn assign_clamps_weights_and_shares_allocator() -> anyhow::Result<()> {
        let mut marks = MarkAllocator::default();
        let wan = assign(&[Interface::new("eth0", 0), Interface::new("eth1", 3)], &mut marks)?;
        let none = assign(&[], &mut marks)?;
        let vpn = assign(&[Interface::new("wg0", -5)], &mut marks)?;

        assert!(none.is_empty());
        assert_eq!(wan[0].range, 0..=25);
        assert_eq!(wan[1].range, 26..=100);
        assert_eq!(vpn[0].range, 0..=100);

        let marks = wan.iter().chain(vpn.iter()).map(|s| s.mark.value()).collect::<Vec<_>>();
        assert_eq!(marks, vec![101, 102, 103]);
        Ok(())
    }

    #[test]
    fn verdict_map_renders_hex_marks() -> anyhow::Result<()> {
        let mut marks = MarkAllocator::default();
        let slots = assign(&[Interface::new("wg0", 1), Interface::new("wg1", 3)], &mut marks)?;
        assert_eq!(verdict_map(&slots), "{ 0-25 : 0x65, 26-100 : 0x66 }");
        Ok(())
    }
}

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{Error, NodeBuilder, Result};

/// Twitter epoch: Thursday, November 4, 2010 1:42:54.657 UTC
pub const TWITTER_EPOCH: Duration = Duration::from_millis(1_288_834_974_657);

/// Number of bits usable by a layout. The sign bit stays clear so IDs are
/// always non-negative `i64` values.
pub const USABLE_BITS: u8 = 63;

/// A contiguous bit field inside a 64-bit identifier.
///
/// `shift` is the offset of the lowest bit and `width` the number of bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitRange {
    pub shift: u8,
    pub width: u8,
}

impl BitRange {
    pub const fn new(shift: u8, width: u8) -> Self {
        Self { shift, width }
    }

    /// Largest value the field can hold (`2^width - 1`).
    pub const fn max(&self) -> u64 {
        match self.width {
            0 => 0,
            w if w >= 64 => u64::MAX,
            w => u64::MAX >> (64 - w as u32),
        }
    }

    /// The field's bits in place.
    pub const fn mask(&self) -> u64 {
        match self.max().checked_shl(self.shift as u32) {
            Some(mask) => mask,
            None => 0,
        }
    }

    /// One past the highest bit of the field.
    const fn end(&self) -> u16 {
        self.shift as u16 + self.width as u16
    }

    const fn place(&self, value: u64) -> u64 {
        (value & self.max()) << self.shift
    }

    const fn extract(&self, raw: u64) -> u64 {
        (raw >> self.shift) & self.max()
    }

    const fn overlaps(&self, other: &Self) -> bool {
        self.width != 0
            && other.width != 0
            && (self.shift as u16) < other.end()
            && (other.shift as u16) < self.end()
    }
}

/// The fields of an identifier split back out by a [`Pattern`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Decomposed {
    pub tick: u64,
    pub node_id: u64,
    pub sequence: u64,
}

/// An immutable description of how identifiers are laid out.
///
/// A pattern partitions the low 63 bits of an `i64` between an elapsed-tick
/// field, a node field and a per-tick sequence field, and fixes the epoch and
/// the real duration of one tick. Patterns are validated once at construction
/// and then shared read-only, usually behind an [`Arc`], by every node built
/// from them.
///
/// # Example
///
/// ```
/// use std::time::{Duration, UNIX_EPOCH};
/// use leaseflake::{BitRange, Pattern};
///
/// let pattern = Pattern::new(
///     UNIX_EPOCH + Duration::from_secs(1_700_000_000),
///     Duration::from_millis(10),
///     BitRange::new(0, 8),  // sequence
///     BitRange::new(8, 16), // node
///     BitRange::new(24, 39), // time
/// )
/// .unwrap();
///
/// assert_eq!(pattern.max_node_id(), 65_535);
/// assert_eq!(pattern.max_sequence(), 255);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "PatternFields"))]
pub struct Pattern {
    epoch: SystemTime,
    tick: Duration,
    step_bits: BitRange,
    node_bits: BitRange,
    time_bits: BitRange,
}

/// Unvalidated wire form of a [`Pattern`]; deserialization goes through
/// [`Pattern::new`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct PatternFields {
    epoch: SystemTime,
    tick: Duration,
    step_bits: BitRange,
    node_bits: BitRange,
    time_bits: BitRange,
}

#[cfg(feature = "serde")]
impl TryFrom<PatternFields> for Pattern {
    type Error = Error;

    fn try_from(fields: PatternFields) -> Result<Self> {
        Self::new(
            fields.epoch,
            fields.tick,
            fields.step_bits,
            fields.node_bits,
            fields.time_bits,
        )
    }
}

impl Default for Pattern {
    /// The classic Twitter layout: 41-bit millisecond time, 10-bit node,
    /// 12-bit sequence, anchored at [`TWITTER_EPOCH`].
    fn default() -> Self {
        Self::twitter()
    }
}

impl Pattern {
    /// Builds and validates a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] when the tick is zero, the time field
    /// is empty, a field reaches past bit 62, two fields overlap, or the last
    /// tick the time field can hold is not a representable [`SystemTime`].
    pub fn new(
        epoch: SystemTime,
        tick: Duration,
        step_bits: BitRange,
        node_bits: BitRange,
        time_bits: BitRange,
    ) -> Result<Self> {
        if tick.is_zero() {
            return Err(Error::invalid_pattern("tick duration must be non-zero"));
        }
        if time_bits.width == 0 {
            return Err(Error::invalid_pattern("time field must be at least one bit wide"));
        }

        let fields = [("step", step_bits), ("node", node_bits), ("time", time_bits)];
        for (name, range) in fields {
            if range.end() > u16::from(USABLE_BITS) {
                return Err(Error::invalid_pattern(format!(
                    "{name} field (shift {}, width {}) exceeds {USABLE_BITS} usable bits",
                    range.shift, range.width
                )));
            }
        }
        for (i, (a_name, a)) in fields.iter().enumerate() {
            for (b_name, b) in &fields[i + 1..] {
                if a.overlaps(b) {
                    return Err(Error::invalid_pattern(format!(
                        "{a_name} and {b_name} fields overlap"
                    )));
                }
            }
        }

        if time_after(epoch, tick, time_bits.max()).is_none() {
            return Err(Error::invalid_pattern(format!(
                "{} ticks of {tick:?} after the epoch overflow the system clock",
                time_bits.max()
            )));
        }

        Ok(Self {
            epoch,
            tick,
            step_bits,
            node_bits,
            time_bits,
        })
    }

    /// 12-bit sequence, 10-bit node, 41-bit time, millisecond ticks from
    /// [`TWITTER_EPOCH`].
    pub fn twitter() -> Self {
        Self {
            epoch: UNIX_EPOCH + TWITTER_EPOCH,
            tick: Duration::from_millis(1),
            step_bits: BitRange::new(0, 12),
            node_bits: BitRange::new(12, 10),
            time_bits: BitRange::new(22, 41),
        }
    }

    /// Starts building a node that generates IDs with this pattern.
    pub fn node_builder(self: &Arc<Self>) -> NodeBuilder {
        NodeBuilder::new(Arc::clone(self))
    }

    pub fn epoch(&self) -> SystemTime {
        self.epoch
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn step_bits(&self) -> BitRange {
        self.step_bits
    }

    pub fn node_bits(&self) -> BitRange {
        self.node_bits
    }

    pub fn time_bits(&self) -> BitRange {
        self.time_bits
    }

    pub fn max_node_id(&self) -> u64 {
        self.node_bits.max()
    }

    pub fn max_sequence(&self) -> u64 {
        self.step_bits.max()
    }

    pub fn max_tick(&self) -> u64 {
        self.time_bits.max()
    }

    /// Number of whole ticks between the epoch and `time`. Times before the
    /// epoch map to tick zero.
    pub fn tick_at(&self, time: SystemTime) -> u64 {
        let elapsed = time.duration_since(self.epoch).unwrap_or_default();
        let ticks = elapsed.as_nanos() / self.tick.as_nanos();
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }

    /// Packs the three fields into an identifier. Values wider than their
    /// field are truncated to it.
    pub fn compose(&self, tick: u64, node_id: u64, sequence: u64) -> i64 {
        let raw = self.time_bits.place(tick)
            | self.node_bits.place(node_id)
            | self.step_bits.place(sequence);
        // Fields live below bit 63, so the sign bit is never set.
        raw as i64
    }

    /// Splits an identifier back into its fields.
    pub fn decompose(&self, id: i64) -> Decomposed {
        let raw = id as u64;
        Decomposed {
            tick: self.time_bits.extract(raw),
            node_id: self.node_bits.extract(raw),
            sequence: self.step_bits.extract(raw),
        }
    }

    /// Wall-clock start of the tick an identifier was minted in.
    pub fn timestamp_of(&self, id: i64) -> SystemTime {
        let tick = self.decompose(id).tick;
        // `new` checked that every tick the time field holds is representable.
        time_after(self.epoch, self.tick, tick).unwrap_or(self.epoch)
    }
}

/// `epoch + ticks * tick`, or `None` if it does not fit a [`SystemTime`].
fn time_after(epoch: SystemTime, tick: Duration, ticks: u64) -> Option<SystemTime> {
    let nanos = u128::from(ticks).checked_mul(tick.as_nanos())?;
    let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
    let offset = Duration::new(secs, (nanos % 1_000_000_000) as u32);
    epoch.checked_add(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(step: (u8, u8), node: (u8, u8), time: (u8, u8)) -> Result<Pattern> {
        Pattern::new(
            UNIX_EPOCH,
            Duration::from_millis(1),
            BitRange::new(step.0, step.1),
            BitRange::new(node.0, node.1),
            BitRange::new(time.0, time.1),
        )
    }

    #[test]
    fn default_is_twitter_layout() {
        let pattern = Pattern::default();
        assert_eq!(pattern.max_sequence(), 4095);
        assert_eq!(pattern.max_node_id(), 1023);
        assert_eq!(pattern.max_tick(), (1 << 41) - 1);
        assert_eq!(pattern.time_bits().mask(), ((1u64 << 41) - 1) << 22);
        assert_eq!(pattern.epoch(), UNIX_EPOCH + TWITTER_EPOCH);
    }

    #[test]
    fn rejects_overlapping_fields() {
        let err = layout((0, 12), (10, 10), (22, 41)).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }), "{err}");
    }

    #[test]
    fn rejects_fields_past_bit_62() {
        let err = layout((0, 12), (12, 10), (22, 42)).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }), "{err}");
    }

    #[test]
    fn rejects_ticks_past_the_system_clock() {
        let huge_tick = Pattern::new(
            UNIX_EPOCH,
            Duration::from_millis(u64::MAX),
            BitRange::new(0, 12),
            BitRange::new(12, 10),
            BitRange::new(22, 41),
        );
        assert!(
            matches!(huge_tick, Err(Error::InvalidPattern { .. })),
            "{huge_tick:?}"
        );
    }

    #[test]
    fn last_tick_timestamp_is_representable() {
        let pattern = Pattern::new(
            UNIX_EPOCH,
            Duration::from_secs(60 * 60 * 24),
            BitRange::new(0, 12),
            BitRange::new(12, 10),
            BitRange::new(22, 41),
        )
        .unwrap();
        let id = pattern.compose(pattern.max_tick(), 0, 0);
        let expected = UNIX_EPOCH + Duration::from_secs(60 * 60 * 24 * 2_199_023_255_551);
        assert_eq!(pattern.timestamp_of(id), expected);
    }

    #[test]
    fn rejects_zero_tick_and_empty_time() {
        let zero_tick = Pattern::new(
            UNIX_EPOCH,
            Duration::ZERO,
            BitRange::new(0, 12),
            BitRange::new(12, 10),
            BitRange::new(22, 41),
        );
        assert!(zero_tick.is_err());
        assert!(layout((0, 12), (12, 10), (22, 0)).is_err());
    }

    #[test]
    fn accepts_reordered_and_empty_fields() {
        // time in the low bits, no node field at all
        let pattern = layout((40, 20), (0, 0), (0, 40)).unwrap();
        assert_eq!(pattern.max_node_id(), 0);
        let id = pattern.compose(7, 0, 3);
        assert_eq!(id, (3 << 40) | 7);
    }

    #[test]
    fn compose_and_decompose_agree() {
        let pattern = Pattern::default();
        let id = pattern.compose(123_456, 5, 42);
        assert_eq!(id, (123_456 << 22) | (5 << 12) | 42);
        assert_eq!(
            pattern.decompose(id),
            Decomposed {
                tick: 123_456,
                node_id: 5,
                sequence: 42
            }
        );
    }

    #[test]
    fn compose_truncates_to_field_width() {
        let pattern = Pattern::default();
        let id = pattern.compose(1, 1024 + 3, 4096 + 1);
        let parts = pattern.decompose(id);
        assert_eq!(parts.node_id, 3);
        assert_eq!(parts.sequence, 1);
        assert!(id >= 0);
    }

    #[test]
    fn tick_at_floors_and_clamps() {
        let pattern = Pattern::new(
            UNIX_EPOCH + Duration::from_secs(100),
            Duration::from_millis(10),
            BitRange::new(0, 12),
            BitRange::new(12, 10),
            BitRange::new(22, 41),
        )
        .unwrap();
        let base = pattern.epoch();
        assert_eq!(pattern.tick_at(base + Duration::from_millis(29)), 2);
        assert_eq!(pattern.tick_at(base + Duration::from_millis(30)), 3);
        assert_eq!(pattern.tick_at(UNIX_EPOCH), 0);
    }

    #[test]
    fn timestamp_of_returns_tick_start() {
        let pattern = Pattern::default();
        let id = pattern.compose(1_500, 1, 1);
        assert_eq!(
            pattern.timestamp_of(id),
            pattern.epoch() + Duration::from_millis(1_500)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_keeps_layout() {
        let pattern = Pattern::default();
        let json = serde_json::to_string(&pattern).unwrap();
        let back: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pattern);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_rejects_overlapping_layout() {
        let mut value = serde_json::to_value(Pattern::default()).unwrap();
        value["node_bits"]["shift"] = serde_json::json!(6);
        assert!(serde_json::from_value::<Pattern>(value).is_err());
    }
}

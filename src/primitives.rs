use serde::{Deserialize, Serialize};

const MSAT_PER_SAT: u64 = 1000;

/// A monetary amount in millisatoshi. All payment and balance arithmetic
/// in this crate is carried out in `Msat`; satoshi values only appear in
/// network capacity statistics.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Msat(pub u64);

impl Msat {
    pub const ZERO: Msat = Msat(0);

    /// Constructs a new `Msat` from a raw millisatoshi value.
    pub const fn from_msat(msat: u64) -> Self {
        Msat(msat)
    }

    /// Returns the inner millisatoshi value.
    pub const fn msat(&self) -> u64 {
        self.0
    }

    /// Returns the satoshi amount, floored (100_678 msat becomes 100 sat).
    pub const fn to_sat_floor(&self) -> u64 {
        self.0 / MSAT_PER_SAT
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, rhs: Msat) -> Option<Msat> {
        self.0.checked_sub(rhs.0).map(Msat)
    }

    pub fn saturating_sub(self, rhs: Msat) -> Msat {
        Msat(self.0.saturating_sub(rhs.0))
    }

    pub fn min(self, rhs: Msat) -> Msat {
        Msat(self.0.min(rhs.0))
    }
}

impl std::ops::Add for Msat {
    type Output = Msat;

    fn add(self, rhs: Msat) -> Msat {
        Msat(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Msat {
    fn add_assign(&mut self, rhs: Msat) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Msat {
    fn sum<I: Iterator<Item = Msat>>(iter: I) -> Msat {
        Msat(iter.map(|a| a.0).sum())
    }
}

impl core::fmt::Display for Msat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} msat", self.0)
    }
}

/// A monetary amount in satoshi. Used for channel capacity statistics,
/// which the gossip layer reports in whole satoshi.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sat(pub u64);

impl Sat {
    pub const fn from_sat(sat: u64) -> Self {
        Sat(sat)
    }

    pub const fn sat(&self) -> u64 {
        self.0
    }

    /// Converts to millisatoshi. Saturates on overflow; real capacities
    /// are far below the saturation point.
    pub const fn to_msat(&self) -> Msat {
        Msat(self.0.saturating_mul(MSAT_PER_SAT))
    }
}

impl core::fmt::Display for Sat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// A proportion in parts per million. Its own type so that fee rates stay
/// exact integers instead of floating-point fractions.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ppm(pub u32);

impl Ppm {
    /// Constructs a new `Ppm` from a raw parts-per-million value.
    pub const fn from_ppm(value: u32) -> Self {
        Ppm(value)
    }

    /// Applies the proportion to a base amount in msat.
    ///
    /// Widens to u128 so the intermediate product cannot overflow.
    pub fn apply_to(&self, base: Msat) -> Msat {
        Msat((base.0 as u128 * self.0 as u128 / 1_000_000) as u64)
    }

    pub const fn ppm(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Ppm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ppm", self.0)
    }
}

/// A short channel id: block height, transaction index and output index
/// packed into a u64, as gossiped on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShortChannelId(pub u64);

impl ShortChannelId {
    pub const fn block(&self) -> u32 {
        (self.0 >> 40) as u32
    }

    pub const fn tx_index(&self) -> u32 {
        ((self.0 >> 16) & 0xFFFFFF) as u32
    }

    pub const fn output_index(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl From<u64> for ShortChannelId {
    fn from(scid: u64) -> Self {
        ShortChannelId(scid)
    }
}

impl core::fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block(),
            self.tx_index(),
            self.output_index()
        )
    }
}

/// Absolute block height.
pub type BlockHeight = u32;

//! Scaled-integer codec for aggregates and point streams.
//!
//! User values are doubles; storage form is scaled integers. A record's
//! `DataType` fixes the number of stored decimals for everything in it:
//! `INT64` keeps none, `SCALED1`..`SCALED3` keep one to three. Encoding is
//! `round_half_away_from_zero(value * 10^k)`; decoding divides back.
//!
//! An [`Aggregation`] carries the full stat ladder as a fixed-arity struct
//! with one optional slot per stat, in exactly one of two views at a time:
//! scaled (storage form) or double (user form). [`Aggregation::make_double`]
//! and [`Aggregation::make_scaled`] swap views by rebuilding the struct and
//! releasing the other side, never by mutating slots in place.
//!
//! [`Points`] holds a metric's raw samples, stored delta-encoded on both
//! axes: timestamps as deltas from the prior timestamp and values scaled to
//! integers then delta-encoded from the prior value.
//!
//! There is no error path here: malformed inputs yield best-effort partial
//! fills.

/// Number of decimals kept by each storage data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int64,
    Scaled1,
    Scaled2,
    Scaled3,
}

impl DataType {
    /// Multiplier between the double view and the scaled view.
    pub fn scale(self) -> f64 {
        match self {
            DataType::Int64 => 1.0,
            DataType::Scaled1 => 10.0,
            DataType::Scaled2 => 100.0,
            DataType::Scaled3 => 1000.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int64 => "INT64",
            DataType::Scaled1 => "SCALED1",
            DataType::Scaled2 => "SCALED2",
            DataType::Scaled3 => "SCALED3",
        }
    }

    /// Case-insensitive parse of the wire name; `None` for anything else.
    pub fn parse(s: &str) -> Option<DataType> {
        match s.to_ascii_uppercase().as_str() {
            "INT64" => Some(DataType::Int64),
            "SCALED1" => Some(DataType::Scaled1),
            "SCALED2" => Some(DataType::Scaled2),
            "SCALED3" => Some(DataType::Scaled3),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            DataType::Int64 => 0,
            DataType::Scaled1 => 1,
            DataType::Scaled2 => 2,
            DataType::Scaled3 => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<DataType> {
        match tag {
            0 => Some(DataType::Int64),
            1 => Some(DataType::Scaled1),
            2 => Some(DataType::Scaled2),
            3 => Some(DataType::Scaled3),
            _ => None,
        }
    }
}

fn round_half_away(value: f64) -> i64 {
    if value < 0.0 {
        (value - 0.5) as i64
    } else {
        (value + 0.5) as i64
    }
}

// The stat ladder, in its one canonical order. Every struct, accessor and
// iteration below is generated from this list so they cannot drift apart.
macro_rules! with_stats {
    ($inner:ident) => {
        $inner! {
            (count, "count"),
            (min, "min"),
            (max, "max"),
            (mean, "mean"),
            (stdev, "stdev"),
            (p99, "p99"),
            (p95, "p95"),
            (p90, "p90"),
            (p85, "p85"),
            (p80, "p80"),
            (p75, "p75"),
            (p70, "p70"),
            (p65, "p65"),
            (p60, "p60"),
            (p55, "p55"),
            (p50, "p50"),
            (p45, "p45"),
            (p40, "p40"),
            (p35, "p35"),
            (p30, "p30"),
            (p25, "p25"),
            (p20, "p20"),
            (p15, "p15"),
            (p10, "p10"),
            (p5, "p5"),
            (p1, "p1")
        }
    };
}

macro_rules! define_stat_structs {
    ($(($field:ident, $name:literal)),+ $(,)?) => {
        /// Stat names in ladder order.
        pub const STAT_NAMES: &[&str] = &[$($name),+];

        /// Storage view of the ladder: one optional scaled integer per stat.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct ScaledStats {
            $(pub $field: Option<i64>,)+
        }

        /// User view of the ladder: one optional double per stat.
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct DoubleStats {
            $(pub $field: Option<f64>,)+
        }

        impl ScaledStats {
            fn to_double(&self, scale: f64) -> DoubleStats {
                DoubleStats {
                    $($field: self.$field.map(|v| v as f64 / scale),)+
                }
            }

            /// Slots in ladder order, for the wire encoding.
            pub(crate) fn slots(&self) -> [Option<i64>; STAT_NAMES.len()] {
                [$(self.$field),+]
            }

            pub(crate) fn from_slots(slots: &[Option<i64>]) -> ScaledStats {
                let mut it = slots.iter().copied();
                ScaledStats {
                    $($field: it.next().flatten(),)+
                }
            }
        }

        impl DoubleStats {
            fn to_scaled(&self, scale: f64) -> ScaledStats {
                ScaledStats {
                    $($field: self.$field.map(|v| round_half_away(v * scale)),)+
                }
            }

            /// Value of the named stat; `None` for unknown names too.
            pub fn get(&self, stat: &str) -> Option<f64> {
                match stat {
                    $($name => self.$field,)+
                    _ => None,
                }
            }

            /// Sets the named stat; unknown names are ignored.
            pub fn set(&mut self, stat: &str, value: Option<f64>) {
                match stat {
                    $($name => self.$field = value,)+
                    _ => {}
                }
            }

            fn entries(&self) -> [(&'static str, Option<f64>); STAT_NAMES.len()] {
                [$(($name, self.$field)),+]
            }
        }
    };
}

with_stats!(define_stat_structs);

/// A single metric's stat ladder plus its data-type tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub data_type: Option<DataType>,
    pub scaled: Option<ScaledStats>,
    pub double: Option<DoubleStats>,
}

impl Aggregation {
    /// An absent tag stores whole integers.
    pub fn effective_type(&self) -> DataType {
        self.data_type.unwrap_or(DataType::Int64)
    }

    /// Rebuilds the double view from the scaled view and releases the
    /// scaled view. The type tag is not changed.
    pub fn make_double(&mut self) {
        let scale = self.effective_type().scale();
        let scaled = self.scaled.take().unwrap_or_default();
        self.double = Some(scaled.to_double(scale));
    }

    /// Rebuilds the scaled view from the double view and releases the
    /// double view. The type tag is not changed.
    pub fn make_scaled(&mut self, data_type: DataType) {
        let scale = data_type.scale();
        let double = self.double.take().unwrap_or_default();
        self.scaled = Some(double.to_scaled(scale));
    }

    /// Present stats of the double view in ladder order.
    pub fn double_fields_and_values(&self) -> Vec<(&'static str, f64)> {
        let Some(double) = &self.double else {
            return Vec::new();
        };
        double
            .entries()
            .into_iter()
            .filter_map(|(name, v)| v.map(|v| (name, v)))
            .collect()
    }

    /// Stats of the double view restricted to `filter`, in ladder order.
    /// With no filter every present stat is emitted. With a filter, only
    /// named stats are considered; `set_if_missing` additionally emits
    /// absent named stats as `None`, reserving their column slot.
    pub fn double_fields_and_values_filtered(
        &self,
        filter: Option<&std::collections::HashSet<String>>,
        set_if_missing: bool,
    ) -> Vec<(&'static str, Option<f64>)> {
        let Some(filter) = filter else {
            return self
                .double_fields_and_values()
                .into_iter()
                .map(|(name, v)| (name, Some(v)))
                .collect();
        };
        let Some(double) = &self.double else {
            return Vec::new();
        };
        double
            .entries()
            .into_iter()
            .filter(|(name, _)| filter.contains(*name))
            .filter(|(_, v)| set_if_missing || v.is_some())
            .collect()
    }

    /// Fills a standard subset of missing double stats from raw points:
    /// count first, then p99/p95/p90/p75/p50/p25/p10/p5/p1, then min, max
    /// and mean, sorting the data at most once. Other ladder slots are
    /// never fabricated.
    pub fn create_missing_double_aggregates(&mut self, raw_points: &[f64]) {
        let double = self.double.get_or_insert_with(DoubleStats::default);

        if double.count.is_none() {
            double.count = Some(raw_points.len() as f64);
        }

        // No other derivation makes sense without data.
        if double.count.is_some_and(|c| c <= 0.0) || raw_points.is_empty() {
            return;
        }

        let mut lazy = LazyData::new(raw_points);

        // Percentiles first so min/max below can reuse the sorted data.
        const PERCENTILES: &[(&str, f32)] = &[
            ("p99", 0.99),
            ("p95", 0.95),
            ("p90", 0.90),
            ("p75", 0.75),
            ("p50", 0.50),
            ("p25", 0.25),
            ("p10", 0.10),
            ("p5", 0.05),
            ("p1", 0.01),
        ];
        for &(name, p) in PERCENTILES {
            if double.get(name).is_none() {
                double.set(name, Some(lazy.percentile(p)));
            }
        }

        if double.min.is_none() {
            double.min = Some(lazy.min());
        }
        if double.max.is_none() {
            double.max = Some(lazy.max());
        }
        if double.mean.is_none() {
            double.mean = Some(lazy.mean());
        }
    }
}

/// A metric's raw samples in either storage form (`delta_timestamps` +
/// `delta_values_scaled`) or user form (`values_double`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Points {
    pub data_type: Option<DataType>,
    pub delta_timestamps: Vec<i64>,
    pub delta_values_scaled: Vec<i64>,
    pub values_double: Vec<f64>,
}

impl Points {
    pub fn effective_type(&self) -> DataType {
        self.data_type.unwrap_or(DataType::Int64)
    }

    /// Walks the scaled-delta stream with a running accumulator, producing
    /// doubles. The delta stream is released. The type tag is not changed.
    pub fn make_values_double(&mut self) {
        let scale = self.effective_type().scale();
        let mut accumulator: i64 = 0;
        self.values_double = self
            .delta_values_scaled
            .drain(..)
            .map(|delta| {
                accumulator += delta;
                accumulator as f64 / scale
            })
            .collect();
    }

    /// Scales the doubles to integers and delta-encodes them from the prior
    /// value. The doubles are released. The type tag is not changed.
    pub fn make_delta_values_scaled(&mut self, data_type: DataType) {
        let scale = data_type.scale();
        let mut previous: i64 = 0;
        self.delta_values_scaled = self
            .values_double
            .drain(..)
            .map(|value| {
                let scaled = round_half_away(value * scale);
                let delta = scaled - previous;
                previous = scaled;
                delta
            })
            .collect();
    }
}

/// Sort/scan the data once, on demand, however many stats need it.
struct LazyData {
    data: Vec<f64>,
    sorted: bool,
    min_max: Option<(f64, f64)>,
    sum: Option<f64>,
}

impl LazyData {
    fn new(data: &[f64]) -> LazyData {
        LazyData {
            data: data.to_vec(),
            sorted: false,
            min_max: None,
            sum: None,
        }
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            self.sorted = true;
        }
    }

    fn ensure_min_max(&mut self) {
        if self.min_max.is_none() {
            let (mut min, mut max) = (self.data[0], self.data[0]);
            if self.sorted {
                max = self.data[self.data.len() - 1];
            } else {
                for &val in &self.data {
                    if val < min {
                        min = val;
                    } else if val > max {
                        max = val;
                    }
                }
            }
            self.min_max = Some((min, max));
        }
    }

    fn min(&mut self) -> f64 {
        self.ensure_min_max();
        self.min_max.unwrap().0
    }

    fn max(&mut self) -> f64 {
        self.ensure_min_max();
        self.min_max.unwrap().1
    }

    fn mean(&mut self) -> f64 {
        if self.sum.is_none() {
            self.sum = Some(self.data.iter().sum());
        }
        self.sum.unwrap() / self.data.len() as f64
    }

    /// `p` is a fraction from 0 to 1. No interpolation: the value at index
    /// `floor(len * p)`.
    fn percentile(&mut self, p: f32) -> f64 {
        self.ensure_sorted();
        self.data[(self.data.len() as f32 * p) as usize]
    }
}

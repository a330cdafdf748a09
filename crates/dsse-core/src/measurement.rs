//! Measurement arrays exchanged between federates.
//!
//! A [`MeasurementArray`] is a pair of parallel sequences (`values`, `ids`) plus
//! metadata. The semantic channel (voltage magnitude, real power, ...) is carried
//! by the Rust type rather than a runtime tag: each variant is a transparent
//! newtype, so the JSON shape is identical for every channel.
//!
//! ```text
//! { "values": [7199.6, 7201.2], "ids": ["N1.1", "N1.2"], "units": "V",
//!   "equipment_type": null, "accuracy": null, "bad_data_threshold": null,
//!   "time": "2017-01-01T00:15:00" }
//! ```

use chrono::NaiveDateTime;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use crate::error::{DsseError, DsseResult};
use crate::indexing::reindex;
use crate::NodeId;

/// Real-valued measurements over a set of unique node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementArray {
    pub values: Vec<f64>,
    pub ids: Vec<NodeId>,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub equipment_type: Option<Vec<String>>,
    #[serde(default)]
    pub accuracy: Option<Vec<f64>>,
    #[serde(default)]
    pub bad_data_threshold: Option<Vec<f64>>,
    #[serde(default)]
    pub time: Option<NaiveDateTime>,
}

impl MeasurementArray {
    pub fn new(values: Vec<f64>, ids: Vec<NodeId>, units: impl Into<String>) -> Self {
        Self {
            values,
            ids,
            units: units.into(),
            equipment_type: None,
            accuracy: None,
            bad_data_threshold: None,
            time: None,
        }
    }

    pub fn with_time(mut self, time: Option<NaiveDateTime>) -> Self {
        self.time = time;
        self
    }

    pub fn with_equipment_type(mut self, equipment_type: Vec<String>) -> Self {
        self.equipment_type = Some(equipment_type);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check the shape invariants: every optional field is parallel to
    /// `values`, and ids are unique within the array.
    pub fn validate(&self) -> DsseResult<()> {
        let n = self.values.len();
        if self.ids.len() != n {
            return Err(DsseError::Validation(format!(
                "measurement has {} values but {} ids",
                n,
                self.ids.len()
            )));
        }
        check_parallel("equipment_type", self.equipment_type.as_ref().map(Vec::len), n)?;
        check_parallel("accuracy", self.accuracy.as_ref().map(Vec::len), n)?;
        check_parallel(
            "bad_data_threshold",
            self.bad_data_threshold.as_ref().map(Vec::len),
            n,
        )?;

        let mut seen = HashSet::with_capacity(n);
        for id in &self.ids {
            if !seen.insert(id.as_str()) {
                return Err(DsseError::Validation(format!(
                    "duplicate id {id} in measurement array"
                )));
            }
        }
        Ok(())
    }

    /// Map every value, keeping ids and metadata untouched.
    pub fn apply<F>(&self, mut f: F) -> Self
    where
        F: FnMut(f64) -> f64,
    {
        Self {
            values: self.values.iter().map(|&v| f(v)).collect(),
            ..self.clone()
        }
    }

    /// Concatenate arrays sharing units and timestamp.
    ///
    /// Optional parallel fields survive only when every part carries them.
    pub fn concat(parts: &[MeasurementArray]) -> DsseResult<Self> {
        let first = parts
            .first()
            .ok_or_else(|| DsseError::Validation("cannot concatenate zero arrays".into()))?;
        if let Some(p) = parts.iter().find(|p| p.units != first.units) {
            return Err(DsseError::Validation(format!(
                "cannot concatenate units {:?} with {:?}",
                first.units, p.units
            )));
        }
        if parts.iter().any(|p| p.time != first.time) {
            return Err(DsseError::Validation(
                "cannot concatenate arrays with different timestamps".into(),
            ));
        }

        Ok(Self {
            values: parts.iter().flat_map(|p| p.values.iter().copied()).collect(),
            ids: parts.iter().flat_map(|p| p.ids.iter().cloned()).collect(),
            units: first.units.clone(),
            equipment_type: concat_optional(parts, |p| p.equipment_type.as_ref()),
            accuracy: concat_optional(parts, |p| p.accuracy.as_ref()),
            bad_data_threshold: concat_optional(parts, |p| p.bad_data_threshold.as_ref()),
            time: first.time,
        })
    }
}

fn check_parallel(field: &str, len: Option<usize>, expected: usize) -> DsseResult<()> {
    match len {
        Some(len) if len != expected => Err(DsseError::Validation(format!(
            "{field} has {len} entries but measurement has {expected} values"
        ))),
        _ => Ok(()),
    }
}

fn concat_optional<T: Clone>(
    parts: &[MeasurementArray],
    field: impl Fn(&MeasurementArray) -> Option<&Vec<T>>,
) -> Option<Vec<T>> {
    let mut out = Vec::new();
    for part in parts {
        out.extend(field(part)?.iter().cloned());
    }
    Some(out)
}

/// Declare a typed channel over [`MeasurementArray`].
macro_rules! measurement_kind {
    ($(#[$meta:meta])* $name:ident, $units:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub MeasurementArray);

        impl $name {
            /// Units used when none are supplied
            pub const DEFAULT_UNITS: &'static str = $units;

            pub fn new(values: Vec<f64>, ids: Vec<NodeId>) -> Self {
                Self(MeasurementArray::new(values, ids, $units))
            }

            pub fn into_inner(self) -> MeasurementArray {
                self.0
            }

            pub fn with_time(self, time: Option<NaiveDateTime>) -> Self {
                Self(self.0.with_time(time))
            }

            /// Strictly reindex into `target` order, keeping the channel type.
            pub fn reindexed(&self, target: &[NodeId]) -> DsseResult<Self> {
                reindex(&self.0, target).map(Self)
            }
        }

        impl Deref for $name {
            type Target = MeasurementArray;
            fn deref(&self) -> &MeasurementArray {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut MeasurementArray {
                &mut self.0
            }
        }

        impl From<MeasurementArray> for $name {
            fn from(array: MeasurementArray) -> Self {
                Self(array)
            }
        }

        impl From<$name> for MeasurementArray {
            fn from(array: $name) -> Self {
                array.0
            }
        }
    };
}

measurement_kind!(
    /// Voltage magnitudes
    VoltagesMagnitude,
    "V"
);
measurement_kind!(
    /// Voltage angles in radians
    VoltagesAngle,
    "radians"
);
measurement_kind!(VoltagesReal, "V");
measurement_kind!(VoltagesImaginary, "V");
measurement_kind!(
    /// Real power, consumption-positive
    PowersReal,
    "kW"
);
measurement_kind!(
    /// Reactive power, consumption-positive
    PowersImaginary,
    "kVAR"
);

/// Declared power injections carried in the topology and on the
/// `injections` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    pub power_real: PowersReal,
    pub power_imaginary: PowersImaginary,
}

/// Values labelled by node id where ids may repeat, e.g. one entry per load
/// with several loads on the same terminal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelledArray<T> {
    pub ids: Vec<NodeId>,
    pub values: Vec<T>,
}

impl<T: Copy> LabelledArray<T> {
    pub fn new(ids: Vec<NodeId>, values: Vec<T>) -> DsseResult<Self> {
        if ids.len() != values.len() {
            return Err(DsseError::Validation(format!(
                "labelled array has {} ids but {} values",
                ids.len(),
                values.len()
            )));
        }
        Ok(Self { ids, values })
    }

    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, T)> + '_ {
        self.ids.iter().zip(self.values.iter().copied())
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> LabelledArray<U> {
        LabelledArray {
            ids: self.ids.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }
}

impl LabelledArray<Complex64> {
    /// Split into real and imaginary measurement arrays with the given units.
    pub fn split(&self, units: (&str, &str)) -> (MeasurementArray, MeasurementArray) {
        let real = MeasurementArray::new(
            self.values.iter().map(|c| c.re).collect(),
            self.ids.clone(),
            units.0,
        );
        let imag = MeasurementArray::new(
            self.values.iter().map(|c| c.im).collect(),
            self.ids.clone(),
            units.1,
        );
        (real, imag)
    }
}

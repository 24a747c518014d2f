//! Capacity negotiation for new volumes.
//!
//! Orchestrators ask for a volume as an optional `(required, limit)` pair of
//! byte counts. The appliance only allocates whole allocation units inside a
//! fixed band, so the request is either resolved to one legal byte count or
//! rejected. The checks run in a fixed order because several violations can
//! hold at once and callers rely on seeing the same one every time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One kibibyte.
pub const KIB: u64 = 1 << 10;
/// One mebibyte.
pub const MIB: u64 = 1 << 20;
/// One gibibyte.
pub const GIB: u64 = 1 << 30;
/// One tebibyte.
pub const TIB: u64 = 1 << 40;

/// Requested size bounds. A bound of `0` means "not set".
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CapacityRange {
    /// Smallest acceptable size in bytes.
    pub required_bytes: u64,
    /// Largest acceptable size in bytes.
    pub limit_bytes: u64,
}

impl CapacityRange {
    /// Builds a range from explicit bounds.
    #[must_use]
    pub const fn new(required_bytes: u64, limit_bytes: u64) -> Self {
        Self {
            required_bytes,
            limit_bytes,
        }
    }
}

/// Allocation policy enforced by the appliance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CapacityPolicy {
    /// Smallest volume the driver will create.
    pub minimum_bytes: u64,
    /// Largest volume the driver will create.
    pub maximum_bytes: u64,
    /// Size used when the request carries no bounds.
    pub default_bytes: u64,
    /// Granularity of appliance allocations.
    pub allocation_unit_bytes: u64,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            minimum_bytes: GIB,
            maximum_bytes: 128 * GIB,
            default_bytes: 16 * GIB,
            allocation_unit_bytes: GIB,
        }
    }
}

/// Reasons a capacity request is rejected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CapacityError {
    /// Both bounds set and the limit is below the required size.
    #[error("limit ({}) can not be less than required ({}) size", format_bytes(*limit), format_bytes(*required))]
    LimitBelowRequired {
        /// Requested lower bound.
        required: u64,
        /// Requested upper bound.
        limit: u64,
    },
    /// Only a required size was given and it is below the minimum.
    #[error("required ({}) can not be less than minimum supported volume size ({})", format_bytes(*required), format_bytes(*minimum))]
    RequiredBelowMinimum {
        /// Requested lower bound.
        required: u64,
        /// Policy minimum.
        minimum: u64,
    },
    /// The limit is below the minimum volume size.
    #[error("limit ({}) can not be less than minimum supported volume size ({})", format_bytes(*limit), format_bytes(*minimum))]
    LimitBelowMinimum {
        /// Requested upper bound.
        limit: u64,
        /// Policy minimum.
        minimum: u64,
    },
    /// The limit is not a whole number of allocation units.
    #[error("limit ({limit}) must be a multiple of {}", format_bytes(*unit))]
    LimitNotAligned {
        /// Requested upper bound.
        limit: u64,
        /// Allocation unit.
        unit: u64,
    },
    /// The required size exceeds the maximum volume size.
    #[error("required ({}) can not exceed maximum supported volume size ({})", format_bytes(*required), format_bytes(*maximum))]
    RequiredAboveMaximum {
        /// Requested lower bound.
        required: u64,
        /// Policy maximum.
        maximum: u64,
    },
    /// The required size is not a whole number of allocation units.
    #[error("required ({required}) must be a multiple of {}", format_bytes(*unit))]
    RequiredNotAligned {
        /// Requested lower bound.
        required: u64,
        /// Allocation unit.
        unit: u64,
    },
    /// Only a limit was given and it exceeds the maximum volume size.
    #[error("limit ({}) can not exceed maximum supported volume size ({})", format_bytes(*limit), format_bytes(*maximum))]
    LimitAboveMaximum {
        /// Requested upper bound.
        limit: u64,
        /// Policy maximum.
        maximum: u64,
    },
}

impl CapacityPolicy {
    /// Resolves a request to a byte count the appliance will accept.
    ///
    /// # Errors
    ///
    /// Returns the first [`CapacityError`] that applies, checked in a fixed
    /// order so ambiguous inputs always report the same violation.
    pub fn resolve(&self, range: Option<CapacityRange>) -> Result<u64, CapacityError> {
        let Some(CapacityRange {
            required_bytes: required,
            limit_bytes: limit,
        }) = range
        else {
            return Ok(self.default_bytes);
        };

        let required_set = required > 0;
        let limit_set = limit > 0;

        if !required_set && !limit_set {
            return Ok(self.default_bytes);
        }
        if required_set && limit_set && limit < required {
            return Err(CapacityError::LimitBelowRequired { required, limit });
        }
        if required_set && !limit_set && required < self.minimum_bytes {
            return Err(CapacityError::RequiredBelowMinimum {
                required,
                minimum: self.minimum_bytes,
            });
        }
        if limit_set && limit < self.minimum_bytes {
            return Err(CapacityError::LimitBelowMinimum {
                limit,
                minimum: self.minimum_bytes,
            });
        }
        if limit_set && !self.is_aligned(limit) {
            return Err(CapacityError::LimitNotAligned {
                limit,
                unit: self.allocation_unit_bytes,
            });
        }
        if required_set && required > self.maximum_bytes {
            return Err(CapacityError::RequiredAboveMaximum {
                required,
                maximum: self.maximum_bytes,
            });
        }
        if required_set && !self.is_aligned(required) {
            return Err(CapacityError::RequiredNotAligned {
                required,
                unit: self.allocation_unit_bytes,
            });
        }
        if !required_set && limit_set && limit > self.maximum_bytes {
            return Err(CapacityError::LimitAboveMaximum {
                limit,
                maximum: self.maximum_bytes,
            });
        }

        if required_set {
            return Ok(required);
        }
        Ok(limit)
    }

    /// Converts a resolved byte count into whole allocation units.
    #[must_use]
    pub fn units(&self, bytes: u64) -> u64 {
        bytes.checked_div(self.allocation_unit_bytes).unwrap_or(0)
    }

    fn is_aligned(&self, bytes: u64) -> bool {
        bytes.checked_rem(self.allocation_unit_bytes) == Some(0)
    }
}

/// Renders a byte count with a binary unit suffix and at most one decimal,
/// for example `16Gi` or `1.5Mi`.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    let (unit, suffix) = match bytes {
        b if b >= TIB => (TIB, "Ti"),
        b if b >= GIB => (GIB, "Gi"),
        b if b >= MIB => (MIB, "Mi"),
        b if b >= KIB => (KIB, "Ki"),
        _ => (1, ""),
    };

    let scaled = u128::from(bytes) * 10 + (u128::from(unit) >> 1);
    let tenths = scaled.checked_div(u128::from(unit)).unwrap_or(0);
    let whole = tenths.checked_div(10).unwrap_or(0);
    let fraction = tenths.checked_rem(10).unwrap_or(0);

    if fraction == 0 {
        format!("{whole}{suffix}")
    } else {
        format!("{whole}.{fraction}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn policy() -> CapacityPolicy {
        CapacityPolicy::default()
    }

    #[rstest]
    #[case(None, 16 * GIB)]
    #[case(Some(CapacityRange::new(0, 0)), 16 * GIB)]
    #[case(Some(CapacityRange::new(16 * GIB, 0)), 16 * GIB)]
    #[case(Some(CapacityRange::new(0, 8 * GIB)), 8 * GIB)]
    #[case(Some(CapacityRange::new(4 * GIB, 4 * GIB)), 4 * GIB)]
    #[case(Some(CapacityRange::new(2 * GIB, 10 * GIB)), 2 * GIB)]
    #[case(Some(CapacityRange::new(GIB, 0)), GIB)]
    #[case(Some(CapacityRange::new(128 * GIB, 0)), 128 * GIB)]
    fn resolves_legal_requests(
        policy: CapacityPolicy,
        #[case] range: Option<CapacityRange>,
        #[case] expected: u64,
    ) {
        let resolved = policy
            .resolve(range)
            .unwrap_or_else(|err| panic!("request should resolve: {err}"));
        assert_eq!(resolved, expected);
    }

    #[rstest]
    #[case(
        CapacityRange::new(4 * GIB, 2 * GIB),
        CapacityError::LimitBelowRequired { required: 4 * GIB, limit: 2 * GIB }
    )]
    #[case(
        CapacityRange::new(MIB, 0),
        CapacityError::RequiredBelowMinimum { required: MIB, minimum: GIB }
    )]
    #[case(
        CapacityRange::new(0, MIB),
        CapacityError::LimitBelowMinimum { limit: MIB, minimum: GIB }
    )]
    #[case(
        CapacityRange::new(0, GIB + MIB),
        CapacityError::LimitNotAligned { limit: GIB + MIB, unit: GIB }
    )]
    #[case(
        CapacityRange::new(200 * GIB, 0),
        CapacityError::RequiredAboveMaximum { required: 200 * GIB, maximum: 128 * GIB }
    )]
    #[case(
        CapacityRange::new(GIB + MIB, 0),
        CapacityError::RequiredNotAligned { required: GIB + MIB, unit: GIB }
    )]
    #[case(
        CapacityRange::new(0, 200 * GIB),
        CapacityError::LimitAboveMaximum { limit: 200 * GIB, maximum: 128 * GIB }
    )]
    fn rejects_illegal_requests(
        policy: CapacityPolicy,
        #[case] range: CapacityRange,
        #[case] expected: CapacityError,
    ) {
        let result = policy.resolve(Some(range));
        assert_eq!(result, Err(expected));
    }

    #[rstest]
    #[case::both_above_maximum(
        CapacityRange::new(200 * GIB, 300 * GIB),
        CapacityError::RequiredAboveMaximum { required: 200 * GIB, maximum: 128 * GIB }
    )]
    #[case::limit_small_and_unaligned(
        CapacityRange::new(0, MIB + 1),
        CapacityError::LimitBelowMinimum { limit: MIB + 1, minimum: GIB }
    )]
    #[case::limit_below_required_and_unaligned(
        CapacityRange::new(3 * GIB + 1, 2 * GIB + 1),
        CapacityError::LimitBelowRequired { required: 3 * GIB + 1, limit: 2 * GIB + 1 }
    )]
    #[case::limit_unaligned_before_required_too_large(
        CapacityRange::new(200 * GIB, 300 * GIB + 1),
        CapacityError::LimitNotAligned { limit: 300 * GIB + 1, unit: GIB }
    )]
    fn reports_first_violation_for_ambiguous_requests(
        policy: CapacityPolicy,
        #[case] range: CapacityRange,
        #[case] expected: CapacityError,
    ) {
        assert_eq!(policy.resolve(Some(range)), Err(expected));
    }

    #[rstest]
    fn resolved_values_stay_within_policy(policy: CapacityPolicy) {
        let samples = [0, MIB, GIB, GIB + 1, 7 * GIB, 128 * GIB, 129 * GIB, TIB];
        for required in samples {
            for limit in samples {
                if let Ok(bytes) = policy.resolve(Some(CapacityRange::new(required, limit))) {
                    assert!(
                        bytes >= policy.minimum_bytes && bytes <= policy.maximum_bytes,
                        "{bytes} outside policy for ({required}, {limit})"
                    );
                    assert_eq!(bytes.checked_rem(GIB), Some(0), "unaligned {bytes}");
                }
            }
        }
    }

    #[rstest]
    fn converts_bytes_to_units(policy: CapacityPolicy) {
        assert_eq!(policy.units(16 * GIB), 16);
    }

    #[rstest]
    #[case(0, "0")]
    #[case(512, "512")]
    #[case(KIB, "1Ki")]
    #[case(MIB + (MIB >> 1), "1.5Mi")]
    #[case(16 * GIB, "16Gi")]
    #[case(2 * TIB, "2Ti")]
    fn formats_bytes(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[test]
    fn error_messages_use_human_units() {
        let err = CapacityError::RequiredAboveMaximum {
            required: 200 * GIB,
            maximum: 128 * GIB,
        };
        assert_eq!(
            err.to_string(),
            "required (200Gi) can not exceed maximum supported volume size (128Gi)"
        );
    }
}

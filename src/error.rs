// Copyright 2023 Mikael Lund
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! Build-phase errors.
//!
//! Every error here is raised while tables are assembled or transformed. Once a
//! table is frozen, lookups cannot fail.

use std::collections::TryReserveError;

/// Errors raised while building, freezing or transforming tables
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to allocate {len} values for {what}")]
    Allocation {
        what: &'static str,
        len: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("{table}: grid needs at least 2 knots, got {count}")]
    TooFewKnots { table: &'static str, count: usize },
    #[error("{table}: knots must be strictly increasing, violated at index {index}")]
    NonIncreasingGrid { table: &'static str, index: usize },
    #[error("{table}: knot {index} deviates from log-spacing")]
    NotLogSpaced { table: &'static str, index: usize },
    #[error("{table}: expected {expected} values, got {actual}")]
    LengthMismatch {
        table: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{table}: couple {imc} has an inconsistent data block: {reason}")]
    InconsistentBlock {
        table: &'static str,
        imc: usize,
        reason: String,
    },
    #[error("{table}: built for {actual} material-cut couples, expected {expected}")]
    CoupleCountMismatch {
        table: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{table}: offset {value} does not fit a 32-bit index")]
    IndexOverflow { table: &'static str, value: usize },
    #[error("{0} table was never assigned")]
    MissingTable(&'static str),
}

/// Allocates an empty buffer with room for exactly `len` values.
///
/// Allocation failure is reported instead of aborting the process.
pub(crate) fn try_buffer<T>(what: &'static str, len: usize) -> Result<Vec<T>, TableError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|source| TableError::Allocation { what, len, source })?;
    Ok(buffer)
}

/// Allocates a buffer and copies `values` into it
pub(crate) fn try_copy<T: Copy>(what: &'static str, values: &[T]) -> Result<Vec<T>, TableError> {
    let mut buffer = try_buffer(what, values.len())?;
    buffer.extend_from_slice(values);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_buffer_capacity() {
        let buffer: Vec<f64> = try_buffer("test", 17).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 17);
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let err = try_buffer::<f64>("huge", usize::MAX).unwrap_err();
        assert!(matches!(err, TableError::Allocation { what: "huge", .. }));
        assert!(err.to_string().contains("huge"));
    }
}

//! Positional navigation over the group index.
//!
//! Every function takes the group `count` explicitly so callers can work
//! against a freshly loaded store. A count of zero always yields index 0.

use crate::error::{EditorError, Result};

/// Clamp any signed index into `[0, count - 1]`, or 0 for an empty index.
pub fn clamp(index: i64, count: usize) -> usize {
    if count == 0 || index <= 0 {
        return 0;
    }
    (index as u64).min(count as u64 - 1) as usize
}

pub fn next(index: usize, count: usize) -> usize {
    clamp(index as i64 + 1, count)
}

pub fn prev(index: usize, count: usize) -> usize {
    clamp(index as i64 - 1, count)
}

/// Convert a 1-based target into an index, rejecting targets out of range.
///
/// # Arguments
/// * `target` - Group number as typed by the user, starting at 1
/// * `count` - Number of groups in the index
///
/// # Returns
/// * `Ok(usize)` - The 0-based index of the target group
/// * `Err(EditorError::Range)` - `target` is outside `1..=count`
///
/// # Examples
/// ```
/// use vocab_editor::cursor::jump;
///
/// assert_eq!(jump(2, 3).unwrap(), 1);
/// assert!(jump(4, 3).is_err());
/// assert!(jump(1, 0).is_err());
/// ```
pub fn jump(target: i64, count: usize) -> Result<usize> {
    if target < 1 || target as u64 > count as u64 {
        return Err(EditorError::Range { target, count });
    }
    Ok((target - 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_stays_in_bounds() {
        for count in 0..5usize {
            for index in -3i64..8 {
                let got = clamp(index, count);
                if count == 0 {
                    assert_eq!(got, 0);
                } else {
                    assert!(got < count, "clamp({index}, {count}) = {got}");
                }
            }
        }
        assert_eq!(clamp(i64::MAX, 3), 2);
        assert_eq!(clamp(i64::MIN, 3), 0);
        assert_eq!(clamp(1, 3), 1);
    }

    #[test]
    fn next_and_prev_stop_at_the_edges() {
        assert_eq!(next(0, 3), 1);
        assert_eq!(next(2, 3), 2);
        assert_eq!(prev(0, 3), 0);
        assert_eq!(prev(2, 3), 1);
        assert_eq!(next(0, 0), 0);
        assert_eq!(prev(0, 0), 0);
        assert_eq!(next(9, 3), 2);
    }

    #[test]
    fn jump_is_one_based() {
        assert_eq!(jump(1, 2).unwrap(), 0);
        assert_eq!(jump(2, 2).unwrap(), 1);
    }

    #[test]
    fn jump_out_of_range_reports_valid_range() {
        for target in [0, 3, -1] {
            let err = jump(target, 2).unwrap_err();
            assert!(matches!(err, EditorError::Range { .. }));
            assert!(err.to_string().contains("must be between 1 and 2"));
        }
        let empty = jump(1, 0).unwrap_err();
        assert!(empty.to_string().contains("no data"), "{empty}");
    }
}

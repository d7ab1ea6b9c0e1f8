//! Utility functions

/// Align `val` up to nearest `SIZE`
///
/// # Panics
/// If `SIZE` is not a power of two
pub const fn align_up<const SIZE: usize>(val: usize) -> usize {
    assert!(SIZE.is_power_of_two());
    (val + SIZE - 1) & !(SIZE - 1)
}

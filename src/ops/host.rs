//! Host-side helpers for small per-row bookkeeping (masks, arg-max, one-hot).
//!
//! These run on `Vec<f32>` copies read back from the device. Everything the
//! merge loop needs per round is `[B, N]`-sized, so the transfer is negligible
//! next to the `[B, N, H]` composition work.

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Read an F32 tensor back to the host in logical (row-major) order.
pub fn read_f32<R: Runtime<DType = DType>>(t: &Tensor<R>) -> Vec<f32> {
    if t.is_contiguous() {
        t.to_vec::<f32>()
    } else {
        t.contiguous().to_vec::<f32>()
    }
}

/// Index of the largest entry of `row`; ties resolve to the lowest index.
pub fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Row-wise arg-max of a `[rows, n]` buffer, returned as a one-hot `[rows, n]` buffer.
pub fn one_hot_argmax(values: &[f32], n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; values.len()];
    if n == 0 {
        return out;
    }
    for (row, chunk) in values.chunks(n).enumerate() {
        out[row * n + argmax(chunk)] = 1.0;
    }
    out
}

/// Arg-max restricted to slots where `mask` is nonzero. Rows without any
/// valid slot select slot 0 (the merge is a no-op there).
pub fn masked_argmax(row: &[f32], mask: &[f32]) -> usize {
    let mut best: Option<usize> = None;
    for (i, (&v, &m)) in row.iter().zip(mask).enumerate() {
        if m == 0.0 {
            continue;
        }
        match best {
            Some(b) if row[b] >= v => {}
            _ => best = Some(i),
        }
    }
    best.unwrap_or(0)
}

/// Columns `start..` of every row of a `[rows, len]` buffer.
pub fn slice_columns(values: &[f32], len: usize, start: usize) -> Vec<f32> {
    if len == 0 {
        return Vec::new();
    }
    values
        .chunks(len)
        .flat_map(|row| row[start.min(len)..].iter().copied())
        .collect()
}

/// Per-row sum of a `[rows, n]` buffer.
pub fn row_sums(values: &[f32], n: usize) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    values.chunks(n).map(|row| row.iter().sum()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_tie_wins() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[3.0]), 0);
    }

    #[test]
    fn test_one_hot_argmax_rows() {
        let out = one_hot_argmax(&[0.1, 0.9, 0.0, 0.5, 0.2, 0.3], 3);
        assert_eq!(out, vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_masked_argmax_skips_padding() {
        assert_eq!(masked_argmax(&[0.1, 0.2, 9.0], &[1.0, 1.0, 0.0]), 1);
        assert_eq!(masked_argmax(&[0.1, 0.2, 9.0], &[0.0, 0.0, 0.0]), 0);
    }

    #[test]
    fn test_slice_columns() {
        let mask = [1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        assert_eq!(slice_columns(&mask, 4, 2), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(slice_columns(&mask, 4, 1), vec![1.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_row_sums() {
        assert_eq!(row_sums(&[1.0, 1.0, 0.0, 1.0, 0.0, 0.0], 3), vec![2.0, 1.0]);
    }
}

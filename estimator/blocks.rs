//! Block-structured square matrices over the joint parameter θ.
//!
//! The multinomial Hessian is laid out as
//!
//! ```text
//!            β_1 .. β_K            σ_1 .. σ_M
//!   β_1  [ p×p  ..  p×p   |   cross          ]
//!   ..   [                |                  ]
//!   β_K  [ p×p  ..  p×p   |                  ]
//!   σ    [ crossᵗ         |   diagonal M×M   ]
//! ```
//!
//! The cross blocks stay zero unless the full Hessian is requested.
//! `BlockLayout` owns the offset arithmetic so callers address blocks by
//! `(class, class)` or by annotator instead of raw indices.

use ndarray::{Array1, Array2, ArrayViewMut2, s};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    pub classes: usize,
    pub features: usize,
    pub annotators: usize,
}

impl BlockLayout {
    pub fn new(classes: usize, features: usize, annotators: usize) -> Self {
        Self {
            classes,
            features,
            annotators,
        }
    }

    pub fn coefficient_len(&self) -> usize {
        self.classes * self.features
    }

    pub fn total_len(&self) -> usize {
        self.coefficient_len() + self.annotators
    }

    /// Offset of class `k`'s coefficient block.
    pub fn class_offset(&self, class: usize) -> usize {
        assert!(class < self.classes, "class {class} out of range");
        class * self.features
    }

    /// Position of annotator `m`'s scale inside θ.
    pub fn scale_index(&self, annotator: usize) -> usize {
        assert!(annotator < self.annotators, "annotator {annotator} out of range");
        self.coefficient_len() + annotator
    }
}

/// Dense square matrix addressed through a `BlockLayout`.
#[derive(Clone, Debug)]
pub struct BlockMatrix {
    layout: BlockLayout,
    matrix: Array2<f64>,
}

impl BlockMatrix {
    pub fn zeros(layout: BlockLayout) -> Self {
        let n = layout.total_len();
        Self {
            layout,
            matrix: Array2::zeros((n, n)),
        }
    }

    /// Wraps an already assembled matrix. Panics if its shape disagrees with `layout`.
    pub fn from_dense(layout: BlockLayout, matrix: Array2<f64>) -> Self {
        let n = layout.total_len();
        assert_eq!(matrix.dim(), (n, n), "matrix does not match the block layout");
        Self { layout, matrix }
    }

    /// The `p × p` block coupling classes `j` and `k`.
    pub fn coefficient_block_mut(&mut self, j: usize, k: usize) -> ArrayViewMut2<'_, f64> {
        let row = self.layout.class_offset(j);
        let col = self.layout.class_offset(k);
        let p = self.layout.features;
        self.matrix.slice_mut(s![row..row + p, col..col + p])
    }

    /// Diagonal σ–σ entry for annotator `m`.
    pub fn scale_entry_mut(&mut self, annotator: usize) -> &mut f64 {
        let idx = self.layout.scale_index(annotator);
        &mut self.matrix[[idx, idx]]
    }

    /// Adds `values` to the β–σ cross entries starting at row `offset` of
    /// column `col`, and mirrors them into row `col`.
    pub fn add_cross_column(&mut self, offset: usize, col: usize, values: &Array1<f64>) {
        let len = values.len();
        let mut column = self.matrix.slice_mut(s![offset..offset + len, col]);
        column += values;
        let mut row = self.matrix.slice_mut(s![col, offset..offset + len]);
        row += values;
    }

    /// Writes the whole σ–σ diagonal.
    pub fn set_scale_diagonal(&mut self, diagonal: &Array1<f64>) {
        for (m, &value) in diagonal.iter().enumerate() {
            *self.scale_entry_mut(m) = value;
        }
    }

    /// Freezes coordinate `index`: its row and column are cleared and the
    /// diagonal set to `-1`, so a Newton solve leaves it untouched when the
    /// matching gradient entry is zero.
    pub fn pin(&mut self, index: usize) {
        self.matrix.row_mut(index).fill(0.0);
        self.matrix.column_mut(index).fill(0.0);
        self.matrix[[index, index]] = -1.0;
    }

    /// Adds `shift` to the diagonal of every coordinate not in `pinned`.
    pub fn shift_diagonal(&mut self, shift: f64, pinned: &[usize]) {
        for i in 0..self.layout.total_len() {
            if !pinned.contains(&i) {
                self.matrix[[i, i]] += shift;
            }
        }
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn blocks_land_at_the_expected_offsets() {
        let layout = BlockLayout::new(2, 3, 4);
        assert_eq!(layout.total_len(), 10);
        let mut hessian = BlockMatrix::zeros(layout);

        hessian.coefficient_block_mut(1, 0).fill(2.0);
        *hessian.scale_entry_mut(3) = -5.0;

        let m = hessian.as_array();
        assert_eq!(m.slice(s![3..6, 0..3]).sum(), 18.0);
        assert_eq!(m.slice(s![0..3, 3..6]).sum(), 0.0);
        assert_eq!(m[[9, 9]], -5.0);
        assert_eq!(m.sum(), 18.0 - 5.0);
    }

    #[test]
    fn pinned_coordinates_are_isolated() {
        let layout = BlockLayout::new(1, 2, 2);
        let mut hessian = BlockMatrix::zeros(layout);
        hessian.coefficient_block_mut(0, 0).assign(&array![[4.0, 1.0], [1.0, 3.0]]);
        hessian.set_scale_diagonal(&array![7.0, 8.0]);
        let reference = layout.scale_index(0);
        hessian.pin(reference);
        hessian.shift_diagonal(-0.5, &[reference]);

        let m = hessian.into_inner();
        assert_eq!(m[[2, 2]], -1.0);
        assert_eq!(m[[3, 3]], 7.5);
        assert_eq!(m[[0, 0]], 3.5);
        assert_eq!(m.row(2).iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[test]
    fn cross_entries_are_mirrored() {
        let layout = BlockLayout::new(2, 2, 3);
        let mut hessian = BlockMatrix::zeros(layout);
        let col = layout.scale_index(1);
        hessian.add_cross_column(layout.class_offset(1), col, &array![1.5, -2.0]);
        hessian.add_cross_column(layout.class_offset(1), col, &array![0.5, 0.0]);

        let m = hessian.as_array();
        assert_eq!(m[[2, col]], 2.0);
        assert_eq!(m[[3, col]], -2.0);
        assert_eq!(m[[col, 2]], 2.0);
        assert_eq!(m[[col, 3]], -2.0);
        assert_eq!(m, &m.t());
    }

    #[test]
    #[should_panic(expected = "class 2 out of range")]
    fn out_of_range_class_panics() {
        let mut hessian = BlockMatrix::zeros(BlockLayout::new(2, 2, 1));
        hessian.coefficient_block_mut(2, 0);
    }
}

use std::ops::{Add, Div, Index, Mul, Neg, Sub};

/// A sequence wrapper returned by every "for all children" operation.
///
/// Element-wise behavior goes through the explicit `map_*` operations;
/// the arithmetic operator impls are thin shims over them. Selection
/// supports boolean masks and index arrays in addition to plain indexing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BroadcastList<T>(Vec<T>);

impl<T> BroadcastList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, item: T) {
        self.0.push(item);
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    /// Element-wise map into a new list.
    pub fn apply<U>(&self, f: impl FnMut(&T) -> U) -> BroadcastList<U> {
        BroadcastList(self.0.iter().map(f).collect())
    }

    /// Element-wise mutation in place.
    pub fn apply_inplace(&mut self, mut f: impl FnMut(&mut T)) {
        for item in &mut self.0 {
            f(item);
        }
    }

    /// Element-wise unary operation.
    pub fn map_unary<U>(&self, f: impl FnMut(&T) -> U) -> BroadcastList<U> {
        self.apply(f)
    }

    /// Element-wise binary operation against another list of equal length.
    pub fn map_binary<U, V>(
        &self,
        other: &BroadcastList<U>,
        mut f: impl FnMut(&T, &U) -> V,
    ) -> BroadcastList<V> {
        assert_eq!(
            self.len(),
            other.len(),
            "element-wise operation on lists of different lengths"
        );
        BroadcastList(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| f(a, b))
                .collect(),
        )
    }

    /// Element-wise binary operation against a scalar.
    pub fn map_scalar<U: Copy, V>(&self, rhs: U, mut f: impl FnMut(&T, U) -> V) -> BroadcastList<V> {
        BroadcastList(self.0.iter().map(|a| f(a, rhs)).collect())
    }

    /// Element-wise comparison, yielding a boolean mask.
    pub fn compare(&self, other: &BroadcastList<T>, f: impl FnMut(&T, &T) -> bool) -> BroadcastList<bool> {
        self.map_binary(other, f)
    }

    /// Element-wise comparison against a scalar, yielding a boolean mask.
    pub fn compare_scalar<U: Copy>(&self, rhs: U, f: impl FnMut(&T, U) -> bool) -> BroadcastList<bool> {
        self.map_scalar(rhs, f)
    }
}

impl<T: Clone> BroadcastList<T> {
    /// Select or reorder by an index array.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self(indices.iter().map(|&i| self.0[i].clone()).collect())
    }

    /// Select by a boolean mask of equal length.
    pub fn masked(&self, mask: &[bool]) -> Self {
        assert_eq!(self.len(), mask.len(), "mask length does not match list length");
        Self(
            self.0
                .iter()
                .zip(mask)
                .filter(|(_, &keep)| keep)
                .map(|(item, _)| item.clone())
                .collect(),
        )
    }

    /// Ordinary sequence slice.
    pub fn slice(&self, start: usize, stop: usize) -> Self {
        let stop = stop.min(self.len());
        let start = start.min(stop);
        Self(self.0[start..stop].to_vec())
    }
}

impl<T: Clone> BroadcastList<BroadcastList<T>> {
    /// Array-style transpose for lists of equal-length lists.
    pub fn transpose(&self) -> Self {
        let Some(first) = self.0.first() else {
            return Self(Vec::new());
        };
        let inner_len = first.len();
        for row in &self.0 {
            assert_eq!(row.len(), inner_len, "transpose requires equal-length rows");
        }
        BroadcastList(
            (0..inner_len)
                .map(|j| BroadcastList(self.0.iter().map(|row| row.0[j].clone()).collect()))
                .collect(),
        )
    }

    /// Element-wise map through one level of nesting.
    pub fn apply_deep<U>(&self, mut f: impl FnMut(&T) -> U) -> BroadcastList<BroadcastList<U>> {
        BroadcastList(self.0.iter().map(|row| row.apply(&mut f)).collect())
    }
}

impl<T> Index<usize> for BroadcastList<T> {
    type Output = T;
    fn index(&self, index: usize) -> &T {
        &self.0[index]
    }
}

impl<T> IntoIterator for BroadcastList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a BroadcastList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T> FromIterator<T> for BroadcastList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// Arithmetic against a scalar.
impl<T: Copy + Add<Output = T>> Add<T> for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn add(self, rhs: T) -> Self::Output {
        self.map_scalar(rhs, |&a, b| a + b)
    }
}

impl<T: Copy + Sub<Output = T>> Sub<T> for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn sub(self, rhs: T) -> Self::Output {
        self.map_scalar(rhs, |&a, b| a - b)
    }
}

impl<T: Copy + Mul<Output = T>> Mul<T> for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn mul(self, rhs: T) -> Self::Output {
        self.map_scalar(rhs, |&a, b| a * b)
    }
}

impl<T: Copy + Div<Output = T>> Div<T> for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn div(self, rhs: T) -> Self::Output {
        self.map_scalar(rhs, |&a, b| a / b)
    }
}

// Element-wise arithmetic between lists.
impl<T: Copy + Add<Output = T>> Add for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn add(self, rhs: Self) -> Self::Output {
        self.map_binary(&rhs, |&a, &b| a + b)
    }
}

impl<T: Copy + Sub<Output = T>> Sub for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        self.map_binary(&rhs, |&a, &b| a - b)
    }
}

impl<T: Copy + Mul<Output = T>> Mul for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn mul(self, rhs: Self) -> Self::Output {
        self.map_binary(&rhs, |&a, &b| a * b)
    }
}

impl<T: Copy + Div<Output = T>> Div for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn div(self, rhs: Self) -> Self::Output {
        self.map_binary(&rhs, |&a, &b| a / b)
    }
}

impl<T: Copy + Neg<Output = T>> Neg for BroadcastList<T> {
    type Output = BroadcastList<T>;
    fn neg(self) -> Self::Output {
        self.map_unary(|&a| -a)
    }
}

use ndarray::Array1;
use num_traits::{cast::ToPrimitive, Float, NumCast};
use std::{
    cmp::Ordering,
    f64::consts::PI,
    fmt::{Debug, Display},
};

/// Assert two float values are the same up to `eps`.
#[allow(dead_code)]
pub fn assert_float_eq<T>(left: T, right: T, eps: T)
where
    T: Float + Display,
{
    if left.is_nan() {
        assert!(right.is_nan(), "left is NaN, but right is not");
    } else {
        let diff = (left - right).abs();
        assert!(
            diff < eps,
            "values |{} - {}| ≥ {} (diff: {})",
            left,
            right,
            eps,
            diff
        );
    }
}

/// Assert two float slices are the same up to `eps`.
#[allow(dead_code)]
pub fn assert_floats_eq<T>(left: &[T], right: &[T], eps: T)
where
    T: Float + Display,
{
    assert_eq!(left.len(), right.len());
    for (l, r) in left.iter().zip(right.iter()) {
        assert_float_eq(*l, *r, eps)
    }
}

/// `num` evenly spaced samples over the closed interval `[start, end]`.
/// The last sample is exactly `end`.
pub fn linspace(start: f64, end: f64, num: usize) -> Array1<f64> {
    let mut xs = Array1::linspace(start, end, num);
    let n = xs.len();
    if n > 1 {
        xs[n - 1] = end;
    }
    xs
}

/// Density of a normal distribution with mean `mu` and standard deviation `sigma` at `x`.
pub fn normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt())
}

/// Format a genetic distance with at most six decimal places.
pub fn format_float(x: f64) -> String {
    let rounded = (x * 1e6).round() / 1e6;
    if rounded == 0.0 {
        // avoid "-0"
        return "0".to_string();
    }
    format!("{}", rounded)
}

#[derive(Debug, PartialEq)]
pub enum SearchResult {
    Exact(usize),
    LowerBound(usize),
    UpperBound(usize),
    LeftOf(usize),
}

impl SearchResult {
    /// Index of the last element `<= new_val`, if there is one.
    pub fn floor_index(&self) -> Option<usize> {
        match self {
            SearchResult::Exact(idx) => Some(*idx),
            SearchResult::LowerBound(_) => None,
            SearchResult::LeftOf(idx) | SearchResult::UpperBound(idx) => Some(idx - 1),
        }
    }
}

/// Binary search on a sorted slice. Incomparable values (NaN) sort as equal.
pub fn search_sorted<T: PartialOrd>(vec: &[T], new_val: T) -> SearchResult {
    let mut left = 0;
    let mut right = vec.len();
    while left < right {
        let mid = left + (right - left) / 2;

        match vec[mid].partial_cmp(&new_val).unwrap_or(Ordering::Equal) {
            Ordering::Less => left = mid + 1,
            Ordering::Greater => right = mid,
            Ordering::Equal => return SearchResult::Exact(mid),
        }
    }

    if left == 0 {
        SearchResult::LowerBound(left)
    } else if left < vec.len() {
        SearchResult::LeftOf(left)
    } else {
        SearchResult::UpperBound(left)
    }
}

/// Linear interpolation of `y` at `x0`, clamping outside the range of `x`.
pub fn interp1d<Tx, Ty>(x: &[Tx], y: &[Ty], x0: Tx) -> Option<Ty>
where
    Tx: PartialOrd + ToPrimitive + Copy + Debug,
    Ty: ToPrimitive + NumCast + Copy + Debug,
{
    if x.len() != y.len() || x.is_empty() {
        return None;
    }
    let index = search_sorted(x, x0);
    match index {
        SearchResult::Exact(idx) => Some(y[idx]),
        SearchResult::LeftOf(idx) => {
            let x1 = ToPrimitive::to_f64(&x[idx - 1])?;
            let x2 = ToPrimitive::to_f64(&x[idx])?;
            let y1 = ToPrimitive::to_f64(&y[idx - 1])?;
            let y2 = ToPrimitive::to_f64(&y[idx])?;
            let x0 = ToPrimitive::to_f64(&x0)?;

            // linear interpolation
            let y0 = y1 + (y2 - y1) * (x0 - x1) / (x2 - x1);

            NumCast::from(y0)
        }
        SearchResult::LowerBound(_) => Some(y[0]),
        SearchResult::UpperBound(idx) => Some(y[idx - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_sorted_empty() {
        let vec: Vec<i32> = vec![];
        assert_eq!(search_sorted(&vec, 5), SearchResult::LowerBound(0));
    }

    #[test]
    fn test_search_sorted_exact_match() {
        let vec = vec![1, 2, 3, 4, 5];
        assert_eq!(search_sorted(&vec, 3), SearchResult::Exact(2));
    }

    #[test]
    fn test_search_sorted_no_exact_match_left_of() {
        let vec = vec![1, 3, 5, 7, 9];
        assert_eq!(search_sorted(&vec, 4), SearchResult::LeftOf(2));
        assert_eq!(search_sorted(&vec, 4).floor_index(), Some(1));
    }

    #[test]
    fn test_search_sorted_no_exact_match_lower_bound() {
        let vec = vec![10, 20, 30, 40, 50];
        assert_eq!(search_sorted(&vec, 5), SearchResult::LowerBound(0));
        assert_eq!(search_sorted(&vec, 5).floor_index(), None);
    }

    #[test]
    fn test_search_sorted_no_exact_match_upper_bound() {
        let vec = vec![10, 20, 30, 40, 50];
        assert_eq!(search_sorted(&vec, 55), SearchResult::UpperBound(5));
        assert_eq!(search_sorted(&vec, 55).floor_index(), Some(4));
    }

    #[test]
    fn test_search_sorted_with_floats() {
        let vec = vec![1.0, 2.5, 4., 4.8, 5.9];
        assert_eq!(search_sorted(&vec, 3.5), SearchResult::LeftOf(2));
    }

    #[test]
    fn test_interp1d() {
        let x = vec![0.0, 10.0, 20.0];
        let y = vec![0.0, 1.0, 3.0];
        assert_float_eq(interp1d(&x, &y, 15.0).unwrap(), 2.0, 1e-12);
        assert_float_eq(interp1d(&x, &y, 25.0).unwrap(), 3.0, 1e-12);
        assert_float_eq(interp1d(&x, &y, -1.0).unwrap(), 0.0, 1e-12);
    }

    #[test]
    fn test_linspace_endpoints() {
        let xs = linspace(0.0, 2.0, 5);
        assert_floats_eq(xs.as_slice().unwrap(), &[0.0, 0.5, 1.0, 1.5, 2.0], 1e-12);
    }

    #[test]
    fn test_normal_pdf_peak() {
        assert_float_eq(normal_pdf(0.0, 0.0, 1.0), 0.398_942_280_4, 1e-9);
        assert!(normal_pdf(1.0, 0.0, 1.0) < normal_pdf(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(0.1 + 0.2), "0.3");
        assert_eq!(format_float(12.0), "12");
        assert_eq!(format_float(-1e-9), "0");
    }
}

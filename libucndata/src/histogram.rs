/// A 1-D histogram. `x` holds the left edge of each bin, `y` the bin
/// contents, `dy` the per-bin error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hist1d {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub dy: Vec<f64>,
    pub sum: f64,
    pub entries: u64,
    pub nbins: usize,
}

impl Hist1d {
    /// Fill a histogram of `values` with uniform bins of width `step`
    /// spanning the full data range.
    pub fn fill(values: &[f64], step: f64) -> Self {
        if values.is_empty() || step <= 0.0 {
            return Self::default();
        }
        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let nbins = (((hi - lo) / step).ceil() as usize).max(1);
        let edges: Vec<f64> = (0..=nbins).map(|i| lo + i as f64 * step).collect();
        Self::fill_edges(values, &edges)
    }

    /// Fill a histogram with explicit bin edges. Bins are `[e_i, e_{i+1})`,
    /// except the last which is inclusive on both ends.
    pub fn fill_edges(values: &[f64], edges: &[f64]) -> Self {
        if edges.len() < 2 {
            return Self::default();
        }
        let nbins = edges.len() - 1;
        let mut y = vec![0.0f64; nbins];
        for &v in values {
            if v < edges[0] || v > edges[nbins] {
                continue;
            }
            // edges are ascending, binary search for the bin
            let mut bin = match edges.binary_search_by(|e| e.total_cmp(&v)) {
                Ok(i) => i,
                Err(i) => i - 1,
            };
            if bin >= nbins {
                bin = nbins - 1;
            }
            y[bin] += 1.0;
        }
        let dy: Vec<f64> = y.iter().map(|c| c.sqrt()).collect();
        let sum: f64 = y.iter().sum();
        Self {
            x: edges[..nbins].to_vec(),
            y,
            dy,
            entries: sum as u64,
            sum,
            nbins,
        }
    }

    /// Restrict to bins whose label lies in `[start, stop)`, refreshing the
    /// aggregate fields.
    pub fn trimmed(&self, start: f64, stop: f64) -> Self {
        let mut out = Hist1d::default();
        for i in 0..self.x.len() {
            if self.x[i] >= start && self.x[i] < stop {
                out.x.push(self.x[i]);
                out.y.push(self.y[i]);
                out.dy.push(self.dy[i]);
            }
        }
        out.sum = out.y.iter().sum();
        out.entries = out.sum as u64;
        out.nbins = out.x.len();
        out
    }
}

/// A sparse 2-D histogram: parallel bin-label vectors with contents and
/// errors. Only occupied bins are stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hist2d {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub dz: Vec<f64>,
    pub sum: f64,
    pub entries: u64,
}

impl Hist2d {
    /// Fill from paired samples with uniform bin widths on each axis. Bin
    /// labels are the left edges.
    pub fn fill(xs: &[f64], ys: &[f64], xstep: f64, ystep: f64) -> Self {
        let mut out = Hist2d::default();
        if xs.is_empty() || xs.len() != ys.len() || xstep <= 0.0 || ystep <= 0.0 {
            return out;
        }
        let x0 = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let y0 = ys.iter().cloned().fold(f64::INFINITY, f64::min);

        let mut bins: Vec<((i64, i64), f64)> = Vec::new();
        for (&x, &y) in xs.iter().zip(ys) {
            let key = (
                ((x - x0) / xstep).floor() as i64,
                ((y - y0) / ystep).floor() as i64,
            );
            match bins.iter_mut().find(|(k, _)| *k == key) {
                Some((_, count)) => *count += 1.0,
                None => bins.push((key, 1.0)),
            }
        }
        bins.sort_by(|a, b| a.0.cmp(&b.0));

        for ((ix, iy), count) in bins {
            out.x.push(x0 + ix as f64 * xstep);
            out.y.push(y0 + iy as f64 * ystep);
            out.z.push(count);
            out.dz.push(count.sqrt());
        }
        out.sum = out.z.iter().sum();
        out.entries = out.sum as u64;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_edges_counts() {
        let values = [0.5, 1.5, 1.6, 2.5, 3.0];
        let edges = [0.0, 1.0, 2.0, 3.0];
        let h = Hist1d::fill_edges(&values, &edges);
        assert_eq!(h.y, vec![1.0, 2.0, 2.0]);
        assert_eq!(h.sum, 5.0);
        assert_eq!(h.entries, 5);
    }

    #[test]
    fn test_trim_refreshes_aggregates() {
        let values = [0.5, 1.5, 2.5, 3.5];
        let h = Hist1d::fill_edges(&values, &[0.0, 1.0, 2.0, 3.0, 4.0]);
        let t = h.trimmed(1.0, 3.0);
        assert_eq!(t.sum, 2.0);
        assert_eq!(t.nbins, 2);
    }
}

use std::collections::VecDeque;

use crate::types::{Key, Point};

///Ordered k-way merge of per-security series into cross-sectional buckets.
///
///Each call to `next` finds the minimum front temporal key across the
///remaining series and pops the front point from every series aligned on it.
///Series are consumed destructively in a single pass; buckets come out in
///strictly increasing key order.
pub struct BucketIter {
    series: Vec<VecDeque<Point>>,
}

impl BucketIter {
    pub fn new(dataset: Vec<Vec<Point>>) -> Self {
        Self {
            series: dataset.into_iter().map(VecDeque::from).collect(),
        }
    }
}

impl Iterator for BucketIter {
    type Item = (Key, Vec<Point>);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self
            .series
            .iter()
            .filter_map(|series| series.front().map(|point| point.temporal()))
            .min()?;

        let mut points = Vec::new();
        for series in &mut self.series {
            if series.front().map(|point| point.temporal()) == Some(key) {
                points.push(series.pop_front().unwrap());
            }
        }
        Some((key, points))
    }
}

#[cfg(test)]
mod tests {
    use super::BucketIter;
    use crate::types::{Point, SECS_IN_DAY};

    fn point(symbol: &str, day: i64) -> Point {
        Point::new(symbol, "X", day * SECS_IN_DAY + 60)
    }

    #[test]
    fn test_that_aligned_series_merge_into_shared_buckets() {
        let aaa = vec![point("AAA", 1), point("AAA", 2), point("AAA", 3)];
        let bbb = vec![point("BBB", 1), point("BBB", 2), point("BBB", 3)];
        let buckets: Vec<_> = BucketIter::new(vec![aaa, bbb]).collect();

        assert_eq!(buckets.len(), 3);
        for (_, points) in &buckets {
            assert_eq!(points.len(), 2);
        }
    }

    #[test]
    fn test_that_gaps_produce_partial_buckets() {
        let aaa = vec![point("AAA", 1), point("AAA", 2), point("AAA", 3)];
        let bbb = vec![point("BBB", 1), point("BBB", 3)];
        let buckets: Vec<_> = BucketIter::new(vec![aaa, bbb]).collect();

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[1].1.len(), 1);
        assert_eq!(buckets[1].1[0].symbol, "AAA");
        assert_eq!(buckets[2].1.len(), 2);
    }

    #[test]
    fn test_that_bucket_keys_are_strictly_increasing() {
        let aaa = vec![point("AAA", 5), point("AAA", 9)];
        let bbb = vec![point("BBB", 1), point("BBB", 9), point("BBB", 12)];
        let keys: Vec<_> = BucketIter::new(vec![aaa, bbb]).map(|(k, _)| k).collect();

        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_that_empty_dataset_yields_no_buckets() {
        assert_eq!(BucketIter::new(vec![]).count(), 0);
        assert_eq!(BucketIter::new(vec![vec![], vec![]]).count(), 0);
    }
}

//! Target partitioning across lanes

use std::sync::Arc;

use crate::config::BridgeConfig;

/// One light a lane is responsible for
#[derive(Debug, Clone)]
pub struct LaneTarget {
    /// Position in the flattened target list; drives the generator
    pub index: usize,
    pub bridge: Arc<BridgeConfig>,
    pub light: u32,
}

/// Flatten bridges into targets, bridge order then light order
pub fn targets(bridges: &[Arc<BridgeConfig>]) -> Vec<LaneTarget> {
    bridges
        .iter()
        .flat_map(|bridge| bridge.lights.iter().map(move |light| (bridge, *light)))
        .enumerate()
        .map(|(index, (bridge, light))| LaneTarget {
            index,
            bridge: bridge.clone(),
            light,
        })
        .collect()
}

/// Deal items round-robin into `lanes` buckets
///
/// Every item lands in exactly one bucket and bucket sizes differ by at most
/// one. Callers guarantee `lanes >= 1`.
pub fn round_robin<T>(items: Vec<T>, lanes: usize) -> Vec<Vec<T>> {
    let mut buckets: Vec<Vec<T>> = (0..lanes).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        buckets[i % lanes].push(item);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(name: &str, lights: Vec<u32>) -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig {
            name: name.into(),
            ip: "127.0.0.1".into(),
            port: 80,
            username: "u".into(),
            debug_hue: None,
            lights,
        })
    }

    #[test]
    fn test_round_robin_coverage_and_balance() {
        for total in 1..40usize {
            for lanes in 1..=total.min(9) {
                let buckets = round_robin((0..total).collect(), lanes);
                assert_eq!(buckets.len(), lanes);

                let mut seen: Vec<usize> = buckets.iter().flatten().copied().collect();
                seen.sort_unstable();
                assert_eq!(seen, (0..total).collect::<Vec<_>>());

                let sizes: Vec<usize> = buckets.iter().map(Vec::len).collect();
                let max = *sizes.iter().max().unwrap();
                let min = *sizes.iter().min().unwrap();
                assert!(max - min <= 1, "{} over {}: {:?}", total, lanes, sizes);
            }
        }
    }

    #[test]
    fn test_round_robin_order() {
        assert_eq!(
            round_robin(vec!['a', 'b', 'c', 'd', 'e'], 2),
            vec![vec!['a', 'c', 'e'], vec!['b', 'd']]
        );
    }

    #[test]
    fn test_targets_are_flattened_in_order() {
        let bridges = vec![bridge("one", vec![3, 4]), bridge("two", vec![1])];
        let flat = targets(&bridges);

        let summary: Vec<(usize, &str, u32)> = flat
            .iter()
            .map(|t| (t.index, t.bridge.name.as_str(), t.light))
            .collect();
        assert_eq!(summary, vec![(0, "one", 3), (1, "one", 4), (2, "two", 1)]);
    }
}

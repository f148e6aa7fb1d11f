use std::ops::Range;

/// Position of the states of every fragment in the basis of the whole system.
/// The states of fragment `i` occupy the half-open range `starts[i]..stops[i]`,
/// the ranges follow each other in fragment order without gaps.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockIndex {
    pub starts: Vec<usize>,
    pub stops: Vec<usize>,
}

impl BlockIndex {
    pub fn from_degeneracy(degeneracy: &[usize]) -> Self {
        let stops: Vec<usize> = degeneracy
            .iter()
            .scan(0, |total, d| {
                *total += d;
                Some(*total)
            })
            .collect();
        let mut starts: Vec<usize> = Vec::with_capacity(stops.len());
        starts.push(0);
        starts.extend_from_slice(&stops[..stops.len().saturating_sub(1)]);
        starts.truncate(stops.len());
        BlockIndex { starts, stops }
    }

    pub fn n_fragments(&self) -> usize {
        self.stops.len()
    }

    /// Dimension of the basis of the whole system.
    pub fn size(&self) -> usize {
        self.stops.last().copied().unwrap_or(0)
    }

    pub fn range(&self, fragment: usize) -> Range<usize> {
        self.starts[fragment]..self.stops[fragment]
    }
}

#[test]
fn block_ranges_partition_the_basis() {
    let degeneracies: Vec<Vec<usize>> = vec![
        vec![1, 1, 2],
        vec![3],
        vec![0, 2, 0, 0, 5, 1],
        vec![2, 2, 2, 2, 2],
    ];
    for degeneracy in degeneracies.iter() {
        let blocks: BlockIndex = BlockIndex::from_degeneracy(degeneracy);
        assert_eq!(blocks.n_fragments(), degeneracy.len());
        assert_eq!(blocks.starts[0], 0);
        assert_eq!(blocks.size(), degeneracy.iter().sum::<usize>());
        assert_eq!(blocks.stops[degeneracy.len() - 1], blocks.size());
        for i in 0..degeneracy.len() - 1 {
            assert_eq!(blocks.stops[i], blocks.starts[i + 1]);
        }
        for (i, d) in degeneracy.iter().enumerate() {
            assert_eq!(blocks.range(i).len(), *d);
        }
    }
}

#[test]
fn block_ranges_of_three_fragments() {
    let blocks: BlockIndex = BlockIndex::from_degeneracy(&[1, 1, 2]);
    assert_eq!(blocks.range(0), 0..1);
    assert_eq!(blocks.range(1), 1..2);
    assert_eq!(blocks.range(2), 2..4);
    assert_eq!(blocks.size(), 4);

    let empty: BlockIndex = BlockIndex::from_degeneracy(&[]);
    assert_eq!(empty.n_fragments(), 0);
    assert_eq!(empty.size(), 0);
}

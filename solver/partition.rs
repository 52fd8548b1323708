//! Group partitions for the group lasso.
//!
//! A partition is stored as two arrays: `grp_ptr` holds the group boundaries and
//! `grp_indices` lists the features in group order, so the features of group
//! `g` are `grp_indices[grp_ptr[g]..grp_ptr[g + 1]]`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("n_features ({n_features}) is not a multiple of the desired group size ({group_size}).")]
    NotAMultiple {
        n_features: usize,
        group_size: usize,
    },

    #[error("Group {group} has size 0; every group must contain at least one feature.")]
    ZeroGroupSize { group: usize },

    #[error("Unsupported group format: {0}")]
    UnsupportedFormat(String),

    #[error("Group sizes sum to {sum}, but the design has {n_features} features.")]
    SizeSumMismatch { sum: usize, n_features: usize },

    #[error(
        "Group indices must be a permutation of 0..{n_features}; feature {feature} is missing, duplicated or out of range."
    )]
    NotAPermutation { n_features: usize, feature: usize },
}

/// The three accepted ways of describing groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupSpec {
    /// Contiguous groups of one common size.
    Size(usize),
    /// Contiguous groups with the listed sizes.
    Sizes(Vec<usize>),
    /// Explicit feature lists, one per group.
    Indices(Vec<Vec<usize>>),
}

/// Validated group structure over `n_features` features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    grp_ptr: Vec<usize>,
    grp_indices: Vec<usize>,
}

impl Partition {
    /// Converts a group description into boundaries and a feature permutation.
    pub fn from_spec(spec: &GroupSpec, n_features: usize) -> Result<Self, PartitionError> {
        match spec {
            GroupSpec::Size(0) => Err(PartitionError::ZeroGroupSize { group: 0 }),
            GroupSpec::Size(size) => {
                if n_features % size != 0 {
                    return Err(PartitionError::NotAMultiple {
                        n_features,
                        group_size: *size,
                    });
                }
                let grp_ptr = (0..=n_features / size).map(|g| g * size).collect();
                Self::try_new(grp_ptr, (0..n_features).collect())
            }
            GroupSpec::Sizes(sizes) => {
                if sizes.is_empty() {
                    return Err(PartitionError::UnsupportedFormat(
                        "the list of group sizes is empty".to_string(),
                    ));
                }
                let sum: usize = sizes.iter().sum();
                if sum != n_features {
                    return Err(PartitionError::SizeSumMismatch { sum, n_features });
                }
                Self::try_new(cumulative(sizes.iter().copied()), (0..n_features).collect())
            }
            GroupSpec::Indices(groups) => {
                if groups.is_empty() {
                    return Err(PartitionError::UnsupportedFormat(
                        "the list of groups is empty".to_string(),
                    ));
                }
                let grp_ptr = cumulative(groups.iter().map(Vec::len));
                let grp_indices: Vec<usize> = groups.iter().flatten().copied().collect();
                if grp_indices.len() != n_features {
                    return Err(PartitionError::SizeSumMismatch {
                        sum: grp_indices.len(),
                        n_features,
                    });
                }
                Self::try_new(grp_ptr, grp_indices)
            }
        }
    }

    /// Checks raw `grp_ptr` / `grp_indices` arrays.
    pub fn try_new(grp_ptr: Vec<usize>, grp_indices: Vec<usize>) -> Result<Self, PartitionError> {
        let n_features = grp_indices.len();
        if grp_ptr.len() < 2 || grp_ptr[0] != 0 || grp_ptr[grp_ptr.len() - 1] != n_features {
            return Err(PartitionError::UnsupportedFormat(format!(
                "group pointers must start at 0 and end at {n_features}"
            )));
        }
        if let Some(group) = grp_ptr.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(PartitionError::ZeroGroupSize { group });
        }
        let mut seen = vec![false; n_features];
        for &feature in &grp_indices {
            match seen.get_mut(feature) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(PartitionError::NotAPermutation { n_features, feature }),
            }
        }
        Ok(Self {
            grp_ptr,
            grp_indices,
        })
    }

    /// One group per feature.
    pub fn singletons(n_features: usize) -> Self {
        Self {
            grp_ptr: (0..=n_features).collect(),
            grp_indices: (0..n_features).collect(),
        }
    }

    pub fn n_groups(&self) -> usize {
        self.grp_ptr.len() - 1
    }

    pub fn n_features(&self) -> usize {
        self.grp_indices.len()
    }

    /// Features of group `g`, in partition order.
    #[inline]
    pub fn group(&self, g: usize) -> &[usize] {
        &self.grp_indices[self.grp_ptr[g]..self.grp_ptr[g + 1]]
    }

    pub fn ptr(&self) -> &[usize] {
        &self.grp_ptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.grp_indices
    }
}

fn cumulative(sizes: impl Iterator<Item = usize>) -> Vec<usize> {
    std::iter::once(0)
        .chain(sizes.scan(0, |total, size| {
            *total += size;
            Some(*total)
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_size_gives_contiguous_groups() {
        let partition = Partition::from_spec(&GroupSpec::Size(3), 6).unwrap();
        assert_eq!(partition.ptr(), &[0, 3, 6]);
        assert_eq!(partition.indices(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(partition.n_groups(), 2);
        assert_eq!(partition.group(1), &[3, 4, 5]);
    }

    #[test]
    fn uniform_size_must_divide_feature_count() {
        assert_eq!(
            Partition::from_spec(&GroupSpec::Size(4), 6),
            Err(PartitionError::NotAMultiple {
                n_features: 6,
                group_size: 4
            })
        );
        assert_eq!(
            Partition::from_spec(&GroupSpec::Size(0), 6),
            Err(PartitionError::ZeroGroupSize { group: 0 })
        );
    }

    #[test]
    fn size_list_uses_cumulative_boundaries() {
        let partition = Partition::from_spec(&GroupSpec::Sizes(vec![1, 3, 2]), 6).unwrap();
        assert_eq!(partition.ptr(), &[0, 1, 4, 6]);
        assert_eq!(partition.indices(), &[0, 1, 2, 3, 4, 5]);

        assert_eq!(
            Partition::from_spec(&GroupSpec::Sizes(vec![1, 3]), 6),
            Err(PartitionError::SizeSumMismatch {
                sum: 4,
                n_features: 6
            })
        );
        assert!(matches!(
            Partition::from_spec(&GroupSpec::Sizes(vec![2, 0, 4]), 6),
            Err(PartitionError::ZeroGroupSize { group: 1 })
        ));
    }

    #[test]
    fn index_lists_keep_their_internal_order() {
        let spec = GroupSpec::Indices(vec![vec![0, 2, 5], vec![1, 3], vec![4]]);
        let partition = Partition::from_spec(&spec, 6).unwrap();
        assert_eq!(partition.ptr(), &[0, 3, 5, 6]);
        assert_eq!(partition.indices(), &[0, 2, 5, 1, 3, 4]);
        assert_eq!(partition.group(0), &[0, 2, 5]);
    }

    #[test]
    fn index_lists_must_form_a_permutation() {
        let duplicated = GroupSpec::Indices(vec![vec![0, 1], vec![1, 2]]);
        assert_eq!(
            Partition::from_spec(&duplicated, 4),
            Err(PartitionError::NotAPermutation {
                n_features: 4,
                feature: 1
            })
        );
        let out_of_range = GroupSpec::Indices(vec![vec![0, 7]]);
        assert_eq!(
            Partition::from_spec(&out_of_range, 2),
            Err(PartitionError::NotAPermutation {
                n_features: 2,
                feature: 7
            })
        );
        assert!(matches!(
            Partition::from_spec(&GroupSpec::Indices(vec![]), 0),
            Err(PartitionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn group_spec_deserializes_all_three_shapes() {
        #[derive(Deserialize)]
        struct Holder {
            groups: GroupSpec,
        }
        let size: Holder = toml::from_str("groups = 5").unwrap();
        assert_eq!(size.groups, GroupSpec::Size(5));
        let sizes: Holder = toml::from_str("groups = [1, 3, 2]").unwrap();
        assert_eq!(sizes.groups, GroupSpec::Sizes(vec![1, 3, 2]));
        let lists: Holder = toml::from_str("groups = [[0, 2], [1]]").unwrap();
        assert_eq!(lists.groups, GroupSpec::Indices(vec![vec![0, 2], vec![1]]));
    }
}

use crate::error::CouplingError;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of degenerate states that are kept on each fragment, as given by the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DegeneracySpec {
    /// The same value for all fragments
    Uniform(usize),
    /// One value for each fragment, in fragment order
    PerFragment(Vec<usize>),
    /// Value for each residue name. A fragment that consists of more than one
    /// residue is looked up by the name of its first residue.
    PerResidue(BTreeMap<String, usize>),
}

impl DegeneracySpec {
    /// Resolves the setting to one value per fragment. `labels` holds
    /// the name of the first residue of every fragment.
    pub fn resolve(&self, labels: &[String]) -> Result<Array1<usize>, CouplingError> {
        match self {
            DegeneracySpec::Uniform(value) => Ok(Array1::from_elem(labels.len(), *value)),
            DegeneracySpec::PerFragment(values) => {
                if values.len() != labels.len() {
                    return Err(CouplingError::DegeneracyLength {
                        expected: labels.len(),
                        found: values.len(),
                    });
                }
                Ok(Array1::from(values.clone()))
            }
            DegeneracySpec::PerResidue(mapping) => labels
                .iter()
                .enumerate()
                .map(|(fragment, label)| {
                    mapping
                        .get(label)
                        .copied()
                        .ok_or_else(|| CouplingError::UnknownResidue {
                            fragment,
                            label: label.clone(),
                        })
                })
                .collect::<Result<Vec<usize>, CouplingError>>()
                .map(Array1::from),
        }
    }
}

/// Resolves an optional setting. Without a setting the
/// degeneracy stays unset.
pub fn resolve_degeneracy(
    spec: Option<&DegeneracySpec>,
    labels: &[String],
) -> Result<Option<Array1<usize>>, CouplingError> {
    spec.map(|spec| spec.resolve(labels)).transpose()
}

#[cfg(test)]
fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| String::from(*name)).collect()
}

#[test]
fn uniform_degeneracy_is_broadcast() {
    let resolved: Array1<usize> = DegeneracySpec::Uniform(2)
        .resolve(&labels(&["A", "A", "B", "C", "A"]))
        .unwrap();
    assert_eq!(resolved, array![2, 2, 2, 2, 2]);
}

#[test]
fn residue_degeneracy_uses_fragment_labels() {
    let mut mapping: BTreeMap<String, usize> = BTreeMap::new();
    mapping.insert(String::from("WAT"), 1);
    mapping.insert(String::from("OIL"), 3);
    let spec: DegeneracySpec = DegeneracySpec::PerResidue(mapping);

    let resolved: Array1<usize> = spec.resolve(&labels(&["WAT", "OIL", "WAT"])).unwrap();
    assert_eq!(resolved, array![1, 3, 1]);

    let error: CouplingError = spec.resolve(&labels(&["WAT", "SOL"])).unwrap_err();
    assert!(matches!(
        error,
        CouplingError::UnknownResidue { fragment: 1, ref label } if label == "SOL"
    ));
}

#[test]
fn per_fragment_degeneracy_must_match_fragment_count() {
    let spec: DegeneracySpec = DegeneracySpec::PerFragment(vec![1, 2]);
    assert_eq!(spec.resolve(&labels(&["A", "B"])).unwrap(), array![1, 2]);
    assert!(matches!(
        spec.resolve(&labels(&["A", "B", "C"])),
        Err(CouplingError::DegeneracyLength { expected: 3, found: 2 })
    ));
}

#[test]
fn missing_degeneracy_stays_unset() {
    assert_eq!(resolve_degeneracy(None, &labels(&["A"])).unwrap(), None);
    assert_eq!(
        resolve_degeneracy(Some(&DegeneracySpec::Uniform(1)), &labels(&["A"])).unwrap(),
        Some(array![1])
    );
}

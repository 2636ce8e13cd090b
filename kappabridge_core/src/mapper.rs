//! Compartment Mapper - which spatial compartments a coupling spans.

use crate::error::CouplingError;
use crate::field::ConcentrationField;
use crate::types::{CompartmentId, SpeciesDescriptor};
use std::collections::HashSet;

/// Lists the distinct compartments touched by `species` in `region`.
///
/// Order is the field's own node order (first occurrence wins), so the same
/// field always yields the same list. An empty node set gives an empty list.
pub fn map_compartments(
    field: &dyn ConcentrationField,
    species: &SpeciesDescriptor,
    region: &str,
) -> Result<Vec<CompartmentId>, CouplingError> {
    let nodes = field.nodes(&species.name, region)?;
    let mut seen = HashSet::with_capacity(nodes.len());
    let mut compartments = Vec::with_capacity(nodes.len());

    for node in nodes {
        if seen.insert(node.compartment.clone()) {
            compartments.push(node.compartment);
        }
    }

    Ok(compartments)
}

/// Maps the first species and checks every other one spans the same set.
///
/// The first species defines the canonical compartment list used to key the
/// instance registry. Any divergence is reported up front rather than as a
/// lookup failure on the first step.
pub fn validate_bindings(
    field: &dyn ConcentrationField,
    species: &[SpeciesDescriptor],
    region: &str,
) -> Result<Vec<CompartmentId>, CouplingError> {
    let Some((first, rest)) = species.split_first() else {
        return Ok(Vec::new());
    };

    let canonical = map_compartments(field, first, region)?;
    let canonical_set: HashSet<&CompartmentId> = canonical.iter().collect();

    for other in rest {
        let mapped = map_compartments(field, other, region)?;
        let mapped_set: HashSet<&CompartmentId> = mapped.iter().collect();

        if mapped_set != canonical_set {
            let missing = canonical
                .iter()
                .filter(|c| !mapped_set.contains(c))
                .cloned()
                .collect();
            let extra = mapped
                .iter()
                .filter(|c| !canonical_set.contains(c))
                .cloned()
                .collect();
            return Err(CouplingError::CompartmentMismatch {
                species: other.name.clone(),
                reference: first.name.clone(),
                missing,
                extra,
            });
        }
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockField;
    use proptest::prelude::*;

    #[test]
    fn test_map_linear_region() {
        let field = MockField::linear("cyt", "dend", &["A", "B"], 3, 1.0);
        let comps = map_compartments(&field, &"A".into(), "cyt").unwrap();
        assert_eq!(
            comps,
            vec![
                CompartmentId::new("dend", 0),
                CompartmentId::new("dend", 1),
                CompartmentId::new("dend", 2),
            ]
        );
    }

    #[test]
    fn test_map_empty_region() {
        let mut field = MockField::new();
        field.declare("A", "cyt");
        let comps = map_compartments(&field, &"A".into(), "cyt").unwrap();
        assert!(comps.is_empty());
    }

    #[test]
    fn test_map_unknown_species() {
        let field = MockField::linear("cyt", "dend", &["A"], 3, 1.0);
        let err = map_compartments(&field, &"Z".into(), "cyt").unwrap_err();
        assert!(matches!(err, CouplingError::UnknownSpecies { .. }));
    }

    #[test]
    fn test_validate_detects_mismatch() {
        let mut field = MockField::linear("cyt", "dend", &["A"], 3, 1.0);
        field.add_node("B", "cyt", CompartmentId::new("dend", 0), 1.0);
        field.add_node("B", "cyt", CompartmentId::new("soma", 0), 1.0);

        let species: Vec<SpeciesDescriptor> = vec!["A".into(), "B".into()];
        match validate_bindings(&field, &species, "cyt") {
            Err(CouplingError::CompartmentMismatch { species, missing, extra, .. }) => {
                assert_eq!(species, "B");
                assert_eq!(missing.len(), 2);
                assert_eq!(extra, vec![CompartmentId::new("soma", 0)]);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_same_set_in_other_order() {
        let mut field = MockField::linear("cyt", "dend", &["A"], 2, 1.0);
        field.add_node("B", "cyt", CompartmentId::new("dend", 1), 1.0);
        field.add_node("B", "cyt", CompartmentId::new("dend", 0), 1.0);

        let species: Vec<SpeciesDescriptor> = vec!["A".into(), "B".into()];
        let comps = validate_bindings(&field, &species, "cyt").unwrap();
        assert_eq!(comps[0], CompartmentId::new("dend", 0));
    }

    proptest! {
        #[test]
        fn prop_mapping_is_distinct_and_ordered(segments in proptest::collection::vec(0u32..6, 0..30)) {
            let mut field = MockField::new();
            field.declare("A", "cyt");
            for seg in &segments {
                field.add_node("A", "cyt", CompartmentId::new("dend", *seg), 1.0);
            }

            let comps = map_compartments(&field, &"A".into(), "cyt").unwrap();
            let again = map_compartments(&field, &"A".into(), "cyt").unwrap();
            prop_assert_eq!(&comps, &again);

            let unique: HashSet<_> = comps.iter().collect();
            prop_assert_eq!(unique.len(), comps.len());

            let mut expected = Vec::new();
            for seg in &segments {
                if !expected.contains(seg) {
                    expected.push(*seg);
                }
            }
            let got: Vec<u32> = comps.iter().map(|c| c.segment).collect();
            prop_assert_eq!(got, expected);
        }
    }
}

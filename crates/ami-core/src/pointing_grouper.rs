//! Groups datasets that were observed at (nearly) the same sky position.
//!
//! Greedy single pass: each dataset joins the first existing group whose
//! representative pointing is closer than the tolerance, otherwise it starts a
//! new group. Groups are then named after their alphabetically first member,
//! with the date suffix (everything from the first `-`) removed.

use crate::dataset_registry::{DatasetRegistry, FieldUpdate};
use crate::sky_position::{AngularSeparation, Haversine, SkyPosition};
use ami_proto::{DatasetId, ParseError, ParseKind, Pointing, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A named cluster of datasets sharing a pointing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointingGroup {
    pub name: String,
    /// Pointing of the dataset that founded the group.
    pub pointing: Pointing,
    /// Members in assignment order.
    pub members: Vec<DatasetId>,
}

/// Result of one grouping pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupingOutcome {
    pub groups: BTreeMap<String, PointingGroup>,
    /// Names produced by more than one cluster. Only the last such cluster is
    /// kept in `groups`.
    pub collisions: Vec<String>,
}

/// Clusters datasets by pointing.
#[derive(Debug, Clone)]
pub struct PointingGrouper<S = Haversine> {
    tolerance_deg: f64,
    separation: S,
}

impl PointingGrouper<Haversine> {
    /// Creates a grouper using great-circle separation.
    pub fn new(tolerance_deg: f64) -> Self {
        Self::with_separation(tolerance_deg, Haversine)
    }
}

impl Default for PointingGrouper<Haversine> {
    fn default() -> Self {
        Self::new(0.5)
    }
}

struct Cluster {
    pointing: Pointing,
    position: SkyPosition,
    members: Vec<DatasetId>,
}

impl<S: AngularSeparation> PointingGrouper<S> {
    pub fn with_separation(tolerance_deg: f64, separation: S) -> Self {
        Self {
            tolerance_deg,
            separation,
        }
    }

    pub fn tolerance_deg(&self) -> f64 {
        self.tolerance_deg
    }

    /// Groups every dataset in the registry. All pointings must be known.
    pub fn group(&self, registry: &DatasetRegistry) -> Result<GroupingOutcome> {
        let clusters = self.cluster(registry)?;
        Ok(into_outcome(clusters))
    }

    /// Groups the registry and writes each dataset's group name back.
    ///
    /// Members of colliding clusters all receive the shared name.
    pub fn assign(&self, registry: &mut DatasetRegistry) -> Result<GroupingOutcome> {
        let clusters = self.cluster(registry)?;
        for cluster in &clusters {
            let name = group_name(&cluster.members);
            for id in &cluster.members {
                registry.apply(id, FieldUpdate::GroupName(name.clone()))?;
            }
        }
        Ok(into_outcome(clusters))
    }

    fn cluster(&self, registry: &DatasetRegistry) -> Result<Vec<Cluster>> {
        let mut clusters: Vec<Cluster> = Vec::new();

        for (id, record) in registry.iter() {
            let pointing = record.pointing.as_ref().ok_or_else(|| {
                ParseError::new(ParseKind::Coordinates, "pointing not yet inspected")
                    .for_dataset(Some(id))
            })?;
            let position =
                SkyPosition::from_pointing(pointing).map_err(|e| e.for_dataset(Some(id)))?;

            let matched = clusters.iter_mut().find(|cluster| {
                self.separation.separation_deg(&cluster.position, &position) < self.tolerance_deg
            });

            match matched {
                Some(cluster) => {
                    debug!(dataset = %id, group_pointing = %cluster.pointing, "Joined group");
                    cluster.members.push(id.clone());
                }
                None => {
                    debug!(dataset = %id, pointing = %pointing, "New group");
                    clusters.push(Cluster {
                        pointing: pointing.clone(),
                        position,
                        members: vec![id.clone()],
                    });
                }
            }
        }

        Ok(clusters)
    }
}

fn into_outcome(clusters: Vec<Cluster>) -> GroupingOutcome {
    let mut outcome = GroupingOutcome::default();
    for cluster in clusters {
        let name = group_name(&cluster.members);
        if outcome.groups.contains_key(&name) {
            warn!(
                group = %name,
                pointing = %cluster.pointing,
                "Distinct pointings produce the same group name"
            );
            outcome.collisions.push(name.clone());
        }
        outcome.groups.insert(
            name.clone(),
            PointingGroup {
                name,
                pointing: cluster.pointing,
                members: cluster.members,
            },
        );
    }
    outcome
}

/// Alphabetically first member, cut at the first `-`.
fn group_name(members: &[DatasetId]) -> String {
    members
        .iter()
        .min()
        .map(|id| id.target_name().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(entries: &[(&str, &str, &str)]) -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        for (id, ra, dec) in entries {
            let id = DatasetId::new(*id);
            registry.discover(id.clone());
            registry
                .apply(&id, FieldUpdate::Pointing(Pointing::new(*ra, *dec)))
                .unwrap();
        }
        registry
    }

    struct FlatSky;

    impl AngularSeparation for FlatSky {
        fn separation_deg(&self, a: &SkyPosition, b: &SkyPosition) -> f64 {
            (a.ra_deg - b.ra_deg).abs().max((a.dec_deg - b.dec_deg).abs())
        }
    }

    #[test]
    fn test_nearby_pointings_share_a_group() {
        // A at (0, 0), B at (0.1, 0.1), C at (10, 10) degrees
        let mut registry = registry_with(&[
            ("A-1.raw", "00 00 00", "00 00 00"),
            ("B-1.raw", "00 00 24", "00 06 00"),
            ("C-1.raw", "00 40 00", "10 00 00"),
        ]);

        let outcome = PointingGrouper::new(0.5).assign(&mut registry).unwrap();

        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(
            outcome.groups["A"].members,
            vec![DatasetId::new("A-1.raw"), DatasetId::new("B-1.raw")]
        );
        assert_eq!(outcome.groups["C"].members, vec![DatasetId::new("C-1.raw")]);
        assert!(outcome.collisions.is_empty());

        let group_of = |id: &str| registry.get(&id.into()).unwrap().group_name.clone();
        assert_eq!(group_of("A-1.raw").as_deref(), Some("A"));
        assert_eq!(group_of("B-1.raw").as_deref(), Some("A"));
        assert_eq!(group_of("C-1.raw").as_deref(), Some("C"));
    }

    #[test]
    fn test_grouping_is_deterministic() {
        let registry = registry_with(&[
            ("A-1.raw", "00 00 00", "00 00 00"),
            ("B-1.raw", "00 00 24", "00 06 00"),
            ("C-1.raw", "00 40 00", "10 00 00"),
        ]);
        let grouper = PointingGrouper::new(0.5);
        let first = grouper.group(&registry).unwrap();
        let second = grouper.group(&registry).unwrap();
        assert_eq!(first.groups, second.groups);
    }

    #[test]
    fn test_group_named_after_first_member_without_date() {
        let registry = registry_with(&[
            ("PTF11kly-110525.raw", "14 03 05", "54 16 25"),
            ("PTF11kly-110523.raw", "14 03 05", "54 16 25"),
        ]);
        let outcome = PointingGrouper::new(0.5).group(&registry).unwrap();
        let group = &outcome.groups["PTF11kly"];
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.pointing, Pointing::new("14 03 05", "54 16 25"));
    }

    #[test]
    fn test_first_match_wins_not_best_match() {
        // Z is 0.35 deg from X and 0.25 deg from Y, but X's group came first
        let registry = registry_with(&[
            ("X-1.raw", "00 00 00", "00 00 00"),
            ("Y-1.raw", "00 00 00", "00 36 00"),
            ("Z-1.raw", "00 00 00", "00 21 00"),
        ]);
        let outcome = PointingGrouper::new(0.5).group(&registry).unwrap();
        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(
            outcome.groups["X"].members,
            vec![DatasetId::new("X-1.raw"), DatasetId::new("Z-1.raw")]
        );
        assert_eq!(outcome.groups["Y"].members, vec![DatasetId::new("Y-1.raw")]);
    }

    #[test]
    fn test_tolerance_is_strict() {
        let registry = registry_with(&[
            ("P-1.raw", "00 00 00", "00 00 00"),
            ("Q-1.raw", "00 00 00", "00 30 00"),
        ]);
        // Exactly 0.5 degrees apart
        let outcome = PointingGrouper::with_separation(0.5, FlatSky)
            .group(&registry)
            .unwrap();
        assert_eq!(outcome.groups.len(), 2);
    }

    #[test]
    fn test_name_collision_is_reported() {
        // Same target name, pointings 20 degrees apart
        let mut registry = registry_with(&[
            ("SRC-130101.raw", "00 00 00", "00 00 00"),
            ("SRC-130102.raw", "00 00 00", "20 00 00"),
        ]);
        let outcome = PointingGrouper::new(0.5).assign(&mut registry).unwrap();

        assert_eq!(outcome.collisions, vec!["SRC".to_string()]);
        assert_eq!(outcome.groups.len(), 1);
        for id in ["SRC-130101.raw", "SRC-130102.raw"] {
            assert_eq!(
                registry.get(&id.into()).unwrap().group_name.as_deref(),
                Some("SRC")
            );
        }
    }

    #[test]
    fn test_missing_pointing_is_error() {
        let mut registry = DatasetRegistry::new();
        registry.discover("N-1.raw".into());
        let err = PointingGrouper::new(0.5).group(&registry).unwrap_err();
        assert!(matches!(
            err,
            ami_proto::Error::Parse(ParseError { kind: ParseKind::Coordinates, .. })
        ));
    }

    #[test]
    fn test_custom_separation_function() {
        let registry = registry_with(&[
            ("A-1.raw", "00 00 00", "00 00 00"),
            ("B-1.raw", "00 01 00", "00 00 00"),
        ]);
        // 1 minute of RA = 0.25 degrees
        let outcome = PointingGrouper::with_separation(0.2, FlatSky)
            .group(&registry)
            .unwrap();
        assert_eq!(outcome.groups.len(), 2);
    }
}

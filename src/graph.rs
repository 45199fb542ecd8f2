//! Ordering of the root container and its joins by connect-condition dependencies.

use crate::condition::{Condition, Container, ContainerRole};
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Resolved container order: root first, every join after the containers its
/// connect conditions reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerOrder {
    containers: Vec<Container>,
}

impl ContainerOrder {
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn root(&self) -> &Container {
        // never empty: ordering fails without a root
        &self.containers[0]
    }

    pub fn index_of(&self, alias: &str) -> Option<usize> {
        self.containers.iter().position(|c| c.alias == alias)
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.alias.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

pub struct ContainerGraph;

impl ContainerGraph {
    /// Validates join kinds and orders `containers`.
    ///
    /// Joins keep their declaration order and cross joins go to the tail.
    /// Scanning from the second-to-last position towards the front, a
    /// dependency found later than its dependent is swapped into the
    /// dependent's position and the position is rescanned; passes repeat
    /// until nothing moves.
    pub fn order(containers: &[Container], connect: &[Condition]) -> ConfigResult<ContainerOrder> {
        let mut roots = containers.iter().filter(|c| c.role == ContainerRole::Root);
        let root = roots.next().ok_or(ConfigError::MissingRoot)?;
        if let Some(second) = roots.next() {
            return Err(ConfigError::MultipleRoots {
                first: root.alias.clone(),
                second: second.alias.clone(),
            });
        }

        for condition in connect {
            let known = |alias: &str| containers.iter().any(|c| c.alias == alias);
            for alias in condition.referenced_aliases() {
                if !known(alias) {
                    return Err(ConfigError::UnknownContainer {
                        alias: alias.to_string(),
                    });
                }
            }
            if condition.ref_container_alias() == Some(condition.container_alias()) {
                return Err(ConfigError::SelfReferencingConnect {
                    alias: condition.container_alias().to_string(),
                });
            }
        }

        let connects_of = |alias: &str| {
            connect
                .iter()
                .filter(|condition| condition.container_alias() == alias)
                .filter_map(Condition::ref_container_alias)
                .collect::<HashSet<&str>>()
        };
        if !connects_of(&root.alias).is_empty() {
            return Err(ConfigError::RootHasConnect {
                alias: root.alias.clone(),
            });
        }

        let mut pending: Vec<(&Container, HashSet<&str>)> = Vec::new();
        for container in containers.iter().filter(|c| c.role != ContainerRole::Root) {
            let dependencies = connects_of(&container.alias);
            match container.role {
                ContainerRole::CrossJoin if !dependencies.is_empty() => {
                    return Err(ConfigError::CrossJoinWithConnect {
                        alias: container.alias.clone(),
                    })
                }
                ContainerRole::Join | ContainerRole::LeftJoin if dependencies.is_empty() => {
                    return Err(ConfigError::JoinWithoutConnect {
                        alias: container.alias.clone(),
                    })
                }
                _ => pending.push((container, dependencies)),
            }
        }

        // containers without connect conditions go to the tail, keeping their relative order
        let (joins, free): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(container, _)| container.role != ContainerRole::CrossJoin);
        let mut ordered: Vec<(&Container, HashSet<&str>)> = vec![(root, HashSet::new())];
        ordered.extend(joins);
        ordered.extend(free);

        // every swap resolves at least one (transitive) dependency inversion,
        // so an acyclic graph needs at most one swap per container pair
        let budget = ordered.len() * ordered.len().saturating_sub(1) / 2;
        let mut swaps = 0;
        loop {
            let mut swapped = false;
            for position in (1..ordered.len().saturating_sub(1)).rev() {
                while let Some(later) = later_dependency(&ordered, position) {
                    swaps += 1;
                    if swaps > budget {
                        return Err(ConfigError::CircularDependency {
                            containers: unresolved(&ordered),
                        });
                    }
                    trace!(
                        container = %ordered[position].0.alias,
                        dependency = %ordered[later].0.alias,
                        "swapping dependency forward"
                    );
                    ordered.swap(position, later);
                    swapped = true;
                }
            }
            if !swapped {
                break;
            }
        }

        let order = ContainerOrder {
            containers: ordered.into_iter().map(|(container, _)| container.clone()).collect(),
        };
        debug!(order = ?order.aliases(), "container order resolved");
        Ok(order)
    }
}

/// Position of the first container after `position` that the container at
/// `position` depends on.
fn later_dependency(ordered: &[(&Container, HashSet<&str>)], position: usize) -> Option<usize> {
    let (_, dependencies) = &ordered[position];
    ordered
        .iter()
        .enumerate()
        .skip(position + 1)
        .find(|(_, (container, _))| dependencies.contains(container.alias.as_str()))
        .map(|(index, _)| index)
}

/// Containers whose dependencies can never all be resolved, sorted.
fn unresolved(ordered: &[(&Container, HashSet<&str>)]) -> Vec<String> {
    let mut resolved: HashSet<&str> = HashSet::new();
    loop {
        let before = resolved.len();
        for (container, dependencies) in ordered {
            if dependencies.iter().all(|alias| resolved.contains(alias)) {
                resolved.insert(container.alias.as_str());
            }
        }
        if resolved.len() == before {
            break;
        }
    }
    let mut stuck: Vec<String> = ordered
        .iter()
        .filter(|(container, _)| !resolved.contains(container.alias.as_str()))
        .map(|(container, _)| container.alias.clone())
        .collect();
    stuck.sort();
    stuck
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{FieldDescriptor, FieldPath, FieldRef, OperatorKind};
    use crate::value::FieldType;

    fn id(name: &str) -> FieldPath {
        FieldPath::single(FieldDescriptor::new(name, FieldType::Int64))
    }

    fn link(from: &str, to: &str) -> Condition {
        Condition::connect(from, id("RefId"), OperatorKind::Equal, FieldRef::new(to, id("Id")))
    }

    #[test]
    fn test_cross_join_moves_to_tail() {
        let containers = vec![
            Container::cross_join("Products"),
            Container::root("Orders"),
            Container::join("Customers"),
        ];
        let order =
            ContainerGraph::order(&containers, &[link("Customers", "Orders")]).unwrap();
        assert_eq!(order.aliases(), vec!["Orders", "Customers", "Products"]);
    }

    #[test]
    fn test_dependency_pulls_container_forward() {
        let containers = vec![
            Container::root("A"),
            Container::join("C"),
            Container::left_join("B"),
        ];
        let connect = vec![link("C", "B"), link("C", "A"), link("B", "A")];
        let order = ContainerGraph::order(&containers, &connect).unwrap();
        assert_eq!(order.aliases(), vec!["A", "B", "C"]);
        assert_eq!(order.index_of("C"), Some(2));
    }

    #[test]
    fn test_join_may_depend_on_cross_join() {
        let containers = vec![
            Container::root("A"),
            Container::join("B"),
            Container::cross_join("X"),
        ];
        let order = ContainerGraph::order(&containers, &[link("B", "X")]).unwrap();
        assert_eq!(order.aliases(), vec!["A", "X", "B"]);
    }

    #[test]
    fn test_dependency_swaps_into_dependent_position() {
        let containers = vec![
            Container::root("A"),
            Container::join("B"),
            Container::cross_join("X"),
            Container::join("C"),
            Container::join("D"),
        ];
        let connect = vec![link("B", "X"), link("C", "A"), link("D", "A")];
        let order = ContainerGraph::order(&containers, &connect).unwrap();
        assert_eq!(order.aliases(), vec!["A", "X", "C", "D", "B"]);
    }

    #[test]
    fn test_swap_passes_repeat_until_stable() {
        let containers = vec![
            Container::root("A"),
            Container::join("B"),
            Container::join("C"),
            Container::cross_join("X"),
        ];
        let connect = vec![link("C", "B"), link("B", "X")];
        let order = ContainerGraph::order(&containers, &connect).unwrap();
        assert_eq!(order.aliases(), vec!["A", "X", "B", "C"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let containers = vec![Container::root("A"), Container::join("B"), Container::join("C")];
        let result = ContainerGraph::order(&containers, &[link("B", "C"), link("C", "B")]);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::CircularDependency {
                containers: vec!["B".to_string(), "C".to_string()]
            }
        );
    }

    #[test]
    fn test_join_kind_constraints() {
        let containers = vec![Container::root("A"), Container::join("B")];
        assert!(matches!(
            ContainerGraph::order(&containers, &[]),
            Err(ConfigError::JoinWithoutConnect { .. })
        ));

        let containers = vec![Container::root("A"), Container::cross_join("B")];
        assert!(matches!(
            ContainerGraph::order(&containers, &[link("B", "A")]),
            Err(ConfigError::CrossJoinWithConnect { .. })
        ));

        let containers = vec![Container::root("A"), Container::join("B")];
        assert!(matches!(
            ContainerGraph::order(&containers, &[link("A", "B"), link("B", "A")]),
            Err(ConfigError::RootHasConnect { .. })
        ));

        assert_eq!(
            ContainerGraph::order(&[Container::join("B")], &[]).unwrap_err(),
            ConfigError::MissingRoot
        );
    }
}

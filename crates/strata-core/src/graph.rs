//! Artifact dependency graph and topological planning.
//!
//! Artifacts are nodes in a directed acyclic graph. An edge `A → B` means
//! "B depends on A": A must reach a terminal state before B may run.
//!
//! Ordering uses Kahn's algorithm over a sorted ready set, so the same input
//! always produces the same order and the same levels.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::{BuildArtifact, ConfigError};

/// Validated dependency graph over [`BuildArtifact`]s.
#[derive(Debug, Clone, Default)]
pub struct ArtifactGraph {
    artifacts: BTreeMap<String, BuildArtifact>,
    /// `dependency_id → {dependent_id, ...}`
    downstream: BTreeMap<String, BTreeSet<String>>,
    /// `dependent_id → {dependency_id, ...}`
    upstream: BTreeMap<String, BTreeSet<String>>,
}

impl ArtifactGraph {
    /// Build the graph, rejecting duplicate ids, dangling dependencies and cycles.
    pub fn from_artifacts<I>(artifacts: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = BuildArtifact>,
    {
        let mut graph = ArtifactGraph::default();
        for artifact in artifacts {
            if graph.artifacts.contains_key(&artifact.id) {
                return Err(ConfigError::DuplicateArtifact(artifact.id));
            }
            graph.downstream.entry(artifact.id.clone()).or_default();
            graph.upstream.entry(artifact.id.clone()).or_default();
            graph.artifacts.insert(artifact.id.clone(), artifact);
        }

        for artifact in graph.artifacts.values() {
            for dep in &artifact.depends_on {
                if !graph.artifacts.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        artifact: artifact.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let edges: Vec<(String, String)> = graph
            .artifacts
            .values()
            .flat_map(|a| a.depends_on.iter().map(move |d| (d.clone(), a.id.clone())))
            .collect();
        for (dependency, dependent) in edges {
            graph
                .downstream
                .entry(dependency.clone())
                .or_default()
                .insert(dependent.clone());
            graph.upstream.entry(dependent).or_default().insert(dependency);
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(ConfigError::DependencyCycle { ids: cycle });
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.artifacts.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&BuildArtifact> {
        self.artifacts.get(id)
    }

    /// Artifacts in id order.
    pub fn artifacts(&self) -> impl Iterator<Item = &BuildArtifact> {
        self.artifacts.values()
    }

    /// Artifacts with dependencies before dependents; ties broken by id.
    pub fn topological_order(&self) -> Result<Vec<&BuildArtifact>, ConfigError> {
        Ok(self
            .levels()?
            .into_iter()
            .flatten()
            .filter_map(|id| self.artifacts.get(&id))
            .collect())
    }

    /// Kahn waves: every artifact in level `n` depends only on artifacts in
    /// levels `< n`. Ids inside a level are sorted.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, ConfigError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .artifacts
            .keys()
            .map(|id| (id.as_str(), self.upstream.get(id).map_or(0, BTreeSet::len)))
            .collect();

        let mut current: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id.to_string())
            .collect();
        let mut levels = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for id in &current {
                for dependent in self.downstream.get(id).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.insert(dependent.clone());
                        }
                    }
                }
            }
            placed += current.len();
            levels.push(std::mem::take(&mut current));
            current = next.into_iter().collect();
        }

        if placed != self.artifacts.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(ConfigError::DependencyCycle { ids: stuck });
        }
        Ok(levels)
    }

    /// Direct dependencies of `id`.
    pub fn dependencies_of(&self, id: &str) -> Result<Vec<&str>, ConfigError> {
        self.require(id)?;
        Ok(self
            .upstream
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect())
    }

    /// Direct dependents of `id`.
    pub fn dependents_of(&self, id: &str) -> Result<Vec<&str>, ConfigError> {
        self.require(id)?;
        Ok(self
            .downstream
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect())
    }

    /// All transitive dependents of `id` (BFS over downstream edges).
    pub fn transitive_dependents_of(&self, id: &str) -> Result<BTreeSet<String>, ConfigError> {
        self.require(id)?;
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.downstream.get(&current).into_iter().flatten() {
                if visited.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        Ok(visited)
    }

    fn require(&self, id: &str) -> Result<(), ConfigError> {
        if self.artifacts.contains_key(id) {
            Ok(())
        } else {
            Err(ConfigError::UnknownArtifact(id.to_string()))
        }
    }

    /// DFS over every node; returns the first cycle path found.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        for start in self.artifacts.keys() {
            let mut path = Vec::new();
            if self.dfs_cycle(start, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    fn dfs_cycle(&self, node: &str, visited: &mut BTreeSet<String>, path: &mut Vec<String>) -> bool {
        if let Some(pos) = path.iter().position(|p| p == node) {
            path.drain(..pos);
            path.push(node.to_string());
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visited.insert(node.to_string());
        path.push(node.to_string());

        for dependent in self.downstream.get(node).into_iter().flatten() {
            if self.dfs_cycle(dependent, visited, path) {
                return true;
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArtifactKind;

    fn art(id: &str, deps: &[&str]) -> BuildArtifact {
        BuildArtifact::new(id, ArtifactKind::Table, "silver", format!("select '{id}'"))
            .with_dependencies(deps.iter().copied())
    }

    fn ids(order: &[&BuildArtifact]) -> Vec<String> {
        order.iter().map(|a| a.id.clone()).collect()
    }

    #[test]
    fn test_topological_order_respects_deps() {
        let g = ArtifactGraph::from_artifacts([art("C", &["B"]), art("A", &[]), art("B", &["A"])])
            .unwrap();
        assert_eq!(ids(&g.topological_order().unwrap()), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_order_is_independent_of_input_order() {
        let forward = vec![art("x", &[]), art("y", &[]), art("z", &["x", "y"])];
        let mut backward = forward.clone();
        backward.reverse();
        let a = ArtifactGraph::from_artifacts(forward).unwrap();
        let b = ArtifactGraph::from_artifacts(backward).unwrap();
        assert_eq!(
            ids(&a.topological_order().unwrap()),
            ids(&b.topological_order().unwrap())
        );
    }

    #[test]
    fn test_levels_group_independent_artifacts() {
        let g = ArtifactGraph::from_artifacts([
            art("A", &[]),
            art("B", &["A"]),
            art("C", &["A"]),
            art("D", &["B", "C"]),
        ])
        .unwrap();
        assert_eq!(
            g.levels().unwrap(),
            vec![vec!["A".to_string()], vec!["B".into(), "C".into()], vec!["D".into()]]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = ArtifactGraph::from_artifacts([art("X", &["Y"]), art("Y", &["X"])]).unwrap_err();
        match err {
            ConfigError::DependencyCycle { ids } => {
                assert!(ids.contains(&"X".to_string()));
                assert!(ids.contains(&"Y".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_and_duplicate_ids_are_rejected() {
        assert!(matches!(
            ArtifactGraph::from_artifacts([art("A", &["missing"])]),
            Err(ConfigError::UnknownDependency { .. })
        ));
        assert!(matches!(
            ArtifactGraph::from_artifacts([art("A", &[]), art("A", &[])]),
            Err(ConfigError::DuplicateArtifact(_))
        ));
    }

    #[test]
    fn test_transitive_dependents_covers_full_chain() {
        let g = ArtifactGraph::from_artifacts([
            art("A", &[]),
            art("B", &["A"]),
            art("C", &["B"]),
            art("D", &[]),
        ])
        .unwrap();
        let trans = g.transitive_dependents_of("A").unwrap();
        assert_eq!(trans, ["B".to_string(), "C".to_string()].into_iter().collect());
        assert!(g.transitive_dependents_of("nope").is_err());
        assert_eq!(g.dependencies_of("C").unwrap(), vec!["B"]);
        assert_eq!(g.dependents_of("A").unwrap(), vec!["B"]);
    }
}

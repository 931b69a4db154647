//! Dependency graph construction and resource-init scheduling.
//!
//! `DependencyGraph` is ported near-verbatim from `manager.rs`'s resource
//! dependency graph (Kahn's-algorithm topological sort plus DFS cycle
//! detection), generalized from "resource key" to any definition id since
//! tasks, events, and hooks all participate in the same dependency DAG here.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::future::join_all;

use crate::error::{Error, Result};

/// Dependency graph over every definition id in the registered tree.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// id -> list of dependencies (what this id depends on)
    dependencies: HashMap<String, Vec<String>>,
    /// id -> list of dependents (what depends on this id)
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dependencies: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Add a dependency relationship: `id` depends on `depends_on`.
    ///
    /// # Errors
    /// Returns an error if adding this dependency would create a cycle, or
    /// if `id == depends_on`.
    pub fn add_dependency(
        &mut self,
        id: impl Into<String>,
        depends_on: impl Into<String>,
    ) -> Result<()> {
        let id = id.into();
        let depends_on = depends_on.into();

        if id == depends_on {
            return Err(Error::CircularDependency {
                cycle: format!("{id} -> {id}"),
            });
        }

        let deps = self.dependencies.entry(id.clone()).or_default();
        if deps.contains(&depends_on) {
            return Ok(());
        }

        deps.push(depends_on.clone());
        self.dependents
            .entry(depends_on.clone())
            .or_default()
            .push(id.clone());

        if let Some(cycle) = self.detect_cycle() {
            self.remove_dependency(&id, &depends_on);
            return Err(Error::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }

        Ok(())
    }

    fn remove_dependency(&mut self, id: &str, depends_on: &str) {
        if let Some(deps) = self.dependencies.get_mut(id) {
            deps.retain(|d| d != depends_on);
        }
        if let Some(deps) = self.dependents.get_mut(depends_on) {
            deps.retain(|d| d != id);
        }
    }

    /// Remove all dependency edges involving `id`, both as source and
    /// target — used when re-registering a definition.
    pub fn remove_all_for(&mut self, id: &str) {
        if let Some(deps) = self.dependencies.remove(id) {
            for dep in &deps {
                if let Some(rev) = self.dependents.get_mut(dep.as_str()) {
                    rev.retain(|d| d != id);
                }
            }
        }
        if let Some(dependents) = self.dependents.remove(id) {
            for dep in &dependents {
                if let Some(fwd) = self.dependencies.get_mut(dep.as_str()) {
                    fwd.retain(|d| d != id);
                }
            }
        }
    }

    /// Direct dependencies of `id`.
    #[must_use]
    pub fn get_dependencies(&self, id: &str) -> Vec<String> {
        self.dependencies.get(id).cloned().unwrap_or_default()
    }

    /// Direct dependents of `id` (what depends on it).
    #[must_use]
    pub fn get_dependents(&self, id: &str) -> Vec<String> {
        self.dependents.get(id).cloned().unwrap_or_default()
    }

    /// Detect a cycle anywhere in the graph.
    #[must_use]
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in self.dependencies.keys() {
            if !visited.contains(node.as_str())
                && let Some(cycle) =
                    self.detect_cycle_dfs(node, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(cycle);
            }
        }

        None
    }

    fn detect_cycle_dfs(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        let result = self.check_deps_for_cycle(node, visited, rec_stack, path);

        rec_stack.remove(node);
        path.pop();
        result
    }

    fn check_deps_for_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        let deps = self.dependencies.get(node)?;
        for dep in deps {
            if !visited.contains(dep.as_str()) {
                let cycle = self.detect_cycle_dfs(dep, visited, rec_stack, path);
                if cycle.is_some() {
                    return cycle;
                }
            } else if rec_stack.contains(dep.as_str()) {
                let cycle_start = path
                    .iter()
                    .position(|p| p == dep)
                    .expect("cycle detected but start node missing from path");
                return Some(path[cycle_start..].to_vec());
            }
        }
        None
    }

    /// Full topological sort (dependencies before dependents) over every
    /// node in the graph.
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut all_nodes = HashSet::new();

        for (node, deps) in &self.dependencies {
            all_nodes.insert(node.clone());
            in_degree.entry(node.clone()).or_insert(0);

            for dep in deps {
                all_nodes.insert(dep.clone());
                in_degree.entry(dep.clone()).or_insert(0);
                *in_degree.entry(node.clone()).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| node.clone())
            .collect();

        for node in &all_nodes {
            if !in_degree.contains_key(node) {
                queue.push_back(node.clone());
                in_degree.insert(node.clone(), 0);
            }
        }

        let mut sorted = Vec::new();

        while let Some(node) = queue.pop_front() {
            sorted.push(node.clone());

            let Some(deps) = self.dependents.get(&node) else {
                continue;
            };
            for dependent in deps {
                let Some(degree) = in_degree.get_mut(dependent) else {
                    continue;
                };
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent.clone());
                }
            }
        }

        if sorted.len() != all_nodes.len()
            && let Some(cycle) = self.detect_cycle()
        {
            return Err(Error::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }

        Ok(sorted)
    }

    /// Initialization order for `id` and everything it transitively depends
    /// on (dependencies first).
    pub fn get_init_order(&self, id: &str) -> Result<Vec<String>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.build_init_order(id, &mut visited, &mut order)?;
        Ok(order)
    }

    fn build_init_order(
        &self,
        id: &str,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(id) {
            return Ok(());
        }
        visited.insert(id.to_string());

        if let Some(deps) = self.dependencies.get(id) {
            for dep in deps {
                self.build_init_order(dep, visited, order)?;
            }
        }

        order.push(id.to_string());
        Ok(())
    }

    /// All transitive dependencies of `id`.
    #[must_use]
    pub fn get_all_dependencies(&self, id: &str) -> HashSet<String> {
        let mut all_deps = HashSet::new();
        self.collect_dependencies(id, &mut all_deps);
        all_deps
    }

    fn collect_dependencies(&self, id: &str, collected: &mut HashSet<String>) {
        if let Some(deps) = self.dependencies.get(id) {
            for dep in deps {
                if collected.insert(dep.clone()) {
                    self.collect_dependencies(dep, collected);
                }
            }
        }
    }

    /// Whether `id` depends on `depends_on`, directly or transitively.
    #[must_use]
    pub fn depends_on(&self, id: &str, depends_on: &str) -> bool {
        self.get_all_dependencies(id).contains(depends_on)
    }
}

/// How resources are initialized during boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// One at a time, in topological order.
    Sequential,
    /// Independent resources at the same dependency depth init concurrently.
    Parallel,
    /// Not initialized at boot; first consumer triggers `init` on demand.
    Lazy,
}

/// Drives resource initialization order against a [`DependencyGraph`].
pub struct Scheduler {
    graph: DependencyGraph,
}

impl Scheduler {
    /// Build a scheduler over an already-populated graph.
    #[must_use]
    pub fn new(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    /// Borrow the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Group `ids` into frontiers suitable for parallel initialization: each
    /// frontier's members depend only on ids in strictly earlier frontiers.
    #[must_use]
    pub fn frontiers(&self, ids: &[String]) -> Vec<Vec<String>> {
        let order = ids.to_vec();
        let mut depth: HashMap<String, usize> = HashMap::new();
        for id in &order {
            let d = self
                .graph
                .get_dependencies(id)
                .iter()
                .map(|dep| depth.get(dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id.clone(), d);
        }

        let max_depth = depth.values().copied().max().unwrap_or(0);
        let mut frontiers = vec![Vec::new(); max_depth + 1];
        for id in order {
            let d = depth[&id];
            frontiers[d].push(id);
        }
        frontiers
    }

    /// Run `init` (called once per id) in the order `init_mode` prescribes.
    /// `ids` must already be in dependency order (e.g. from
    /// [`DependencyGraph::topological_sort`]).
    ///
    /// # Errors
    /// Returns the first error encountered; under `Parallel`, every member of
    /// the failing frontier still runs before the error is returned.
    pub async fn run_init<F, Fut>(&self, ids: &[String], init_mode: InitMode, init: F) -> Result<()>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        match init_mode {
            InitMode::Lazy => Ok(()),
            InitMode::Sequential => {
                for id in ids {
                    init(id.clone()).await?;
                }
                Ok(())
            }
            InitMode::Parallel => {
                for frontier in self.frontiers(ids) {
                    if frontier.is_empty() {
                        continue;
                    }
                    let results = join_all(frontier.into_iter().map(&init)).await;
                    for result in results {
                        result?;
                    }
                }
                Ok(())
            }
        }
    }
}

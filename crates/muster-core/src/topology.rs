use std::collections::{HashMap, HashSet, VecDeque};

use muster_types::Project;

use crate::error::{Error, Result};

/// Dependency-first launch order for `services` and everything they depend
/// on. An empty selection means the whole project.
///
/// Ties are broken alphabetically so the order is stable between runs.
///
/// # Errors
/// Returns an error on unknown services or a dependency cycle.
pub fn start_order(project: &Project, services: &[String]) -> Result<Vec<String>> {
    let mut to_process: VecDeque<String> = if services.is_empty() {
        project.services.keys().cloned().collect()
    } else {
        services.iter().cloned().collect()
    };

    let mut processed = HashSet::with_capacity(project.services.len());
    let mut graph: HashMap<String, Vec<String>> = HashMap::with_capacity(project.services.len());
    let mut deps_count: HashMap<String, usize> = HashMap::with_capacity(project.services.len());

    while let Some(service_name) = to_process.pop_front() {
        if !processed.insert(service_name.clone()) {
            continue;
        }
        let Some(service) = project.services.get(&service_name) else {
            return Err(Error::ServiceNotFound(service_name));
        };

        graph.entry(service_name.clone()).or_default();
        let count = deps_count.entry(service_name.clone()).or_default();

        for dependency in service.dependency_names() {
            if !project.services.contains_key(dependency) {
                return Err(Error::ServiceNotFound(dependency.to_owned()));
            }
            graph
                .entry(dependency.to_owned())
                .or_default()
                .push(service_name.clone());
            *count += 1;
            to_process.push_back(dependency.to_owned());
        }
    }

    let mut zeros: Vec<String> = deps_count
        .iter()
        .filter_map(|(s, &c)| (c == 0).then(|| s.clone()))
        .collect();
    zeros.sort();
    let mut queue: VecDeque<String> = zeros.into();

    for dependents in graph.values_mut() {
        dependents.sort();
    }

    let mut result = Vec::with_capacity(deps_count.len());
    while let Some(service) = queue.pop_front() {
        result.push(service.clone());

        let Some(dependents) = graph.get(&service) else {
            continue;
        };
        for dependent in dependents {
            if let Some(c) = deps_count.get_mut(dependent) {
                *c -= 1;
                if *c == 0 {
                    let mut v: Vec<_> = queue.into();
                    v.push(dependent.clone());
                    v.sort();
                    queue = v.into();
                }
            }
        }
    }

    if result.len() != processed.len() {
        return Err(Error::CircularDependencyDetected);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use muster_types::{Condition, Dependency, Restart, Service, Settings};

    use super::*;

    fn project(edges: &[(&str, &[&str])]) -> Project {
        Project {
            version: 1,
            name: "project".to_owned(),
            root: "/".into(),
            settings: Settings::default(),
            services: edges
                .iter()
                .map(|(name, deps)| {
                    (
                        (*name).to_owned(),
                        Service {
                            cmd: vec!["echo".to_owned()],
                            cwd: Some("/".into()),
                            env: BTreeMap::new(),
                            deps: deps
                                .iter()
                                .map(|d| Dependency {
                                    service: (*d).to_owned(),
                                    condition: Condition::Started,
                                })
                                .collect(),
                            healthcheck: None,
                            restart: Restart::Never,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_start_order() {
        let project = project(&[
            ("A", &["B", "C"]),
            ("B", &[]),
            ("C", &["D", "E"]),
            ("D", &["F"]),
            ("E", &[]),
            ("F", &[]),
        ]);

        let result = start_order(&project, &["A".to_owned()]).unwrap();
        assert_eq!(result, vec!["B", "E", "F", "D", "C", "A"]);
    }

    #[test]
    fn test_start_order_selection_pulls_dependencies_only() {
        let project = project(&[("api", &["db"]), ("db", &[]), ("web", &["api"])]);

        assert_eq!(start_order(&project, &["api".to_owned()]).unwrap(), vec!["db", "api"]);
        assert_eq!(start_order(&project, &[]).unwrap(), vec!["db", "api", "web"]);
    }

    #[test]
    fn test_start_order_errors() {
        let cyclic = project(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(
            start_order(&cyclic, &[]),
            Err(Error::CircularDependencyDetected)
        ));

        let project = project(&[("a", &[])]);
        assert!(matches!(
            start_order(&project, &["nope".to_owned()]),
            Err(Error::ServiceNotFound(name)) if name == "nope"
        ));
    }
}

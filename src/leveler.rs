//! Dependency leveling for the parallel policy
//!
//! Groups tasks into waves: every dependency of a task in level N sits in a
//! level < N. A pass that places nothing (cycle or unknown dependency) forces
//! every remaining task into one final level, so leveling always terminates.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::crew::Task;

/// Tasks that had to be forced into the final level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedLevel {
    /// Ids of the tasks in the forced level
    pub task_ids: Vec<String>,
    /// Dependency ids that were never satisfied
    pub unmet: Vec<String>,
}

/// Result of leveling a task list
#[derive(Debug, Clone)]
pub struct Leveling {
    pub levels: Vec<Vec<Arc<Task>>>,
    /// Set when the last level is a cycle/missing-dependency fallback
    pub forced: Option<ForcedLevel>,
}

impl Leveling {
    /// Number of levels
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Whether `level_index` is the forced fallback level
    pub fn is_forced(&self, level_index: usize) -> bool {
        self.forced.is_some() && level_index + 1 == self.levels.len()
    }

    /// Level index of each task id, in level order
    pub fn level_of(&self, task_id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|t| t.id == task_id))
    }
}

/// Group `tasks` into dependency levels
///
/// Within a level, tasks keep their declaration order.
pub fn level(tasks: &[Arc<Task>]) -> Leveling {
    let mut remaining: Vec<Arc<Task>> = tasks.to_vec();
    let mut placed: HashSet<String> = HashSet::with_capacity(tasks.len());
    let mut levels: Vec<Vec<Arc<Task>>> = Vec::new();
    let mut forced = None;

    while !remaining.is_empty() {
        // Eligibility is judged against prior levels only
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|task| task.depends_on.iter().all(|dep| placed.contains(dep)));

        if ready.is_empty() {
            let unmet: Vec<String> = {
                let mut seen = HashSet::new();
                blocked
                    .iter()
                    .flat_map(|t| t.depends_on.iter())
                    .filter(|dep| !placed.contains(*dep) && seen.insert(dep.as_str()))
                    .cloned()
                    .collect()
            };
            let task_ids: Vec<String> = blocked.iter().map(|t| t.id.clone()).collect();

            warn!(
                tasks = ?task_ids,
                unmet = ?unmet,
                "dependency cycle or unknown dependency; forcing remaining tasks into a final level"
            );

            forced = Some(ForcedLevel { task_ids, unmet });
            levels.push(blocked);
            break;
        }

        placed.extend(ready.iter().map(|t| t.id.clone()));
        levels.push(ready);
        remaining = blocked;
    }

    Leveling { levels, forced }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Arc<Task> {
        Arc::new(Task::new(id, format!("do {}", id)).depends_on(deps.iter().copied()))
    }

    fn ids(level: &[Arc<Task>]) -> Vec<&str> {
        level.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn independent_tasks_share_one_level() {
        let tasks = vec![task("a", &[]), task("b", &[]), task("c", &[])];
        let leveling = level(&tasks);
        assert_eq!(leveling.len(), 1);
        assert_eq!(ids(&leveling.levels[0]), vec!["a", "b", "c"]);
        assert!(leveling.forced.is_none());
    }

    #[test]
    fn diamond_produces_three_levels() {
        let tasks = vec![
            task("d", &["b", "c"]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("a", &[]),
        ];
        let leveling = level(&tasks);
        assert_eq!(leveling.len(), 3);
        assert_eq!(ids(&leveling.levels[0]), vec!["a"]);
        assert_eq!(ids(&leveling.levels[1]), vec!["b", "c"]);
        assert_eq!(ids(&leveling.levels[2]), vec!["d"]);
    }

    #[test]
    fn every_dependency_in_strictly_earlier_level() {
        let tasks = vec![
            task("t1", &[]),
            task("t2", &["t1"]),
            task("t3", &["t1"]),
            task("t4", &["t2", "t3"]),
            task("t5", &[]),
            task("t6", &["t5", "t4"]),
        ];
        let leveling = level(&tasks);
        assert!(leveling.forced.is_none());

        let mut seen = HashSet::new();
        for t in &tasks {
            let lvl = leveling.level_of(&t.id).unwrap();
            assert!(seen.insert(t.id.clone()), "task placed twice");
            for dep in &t.depends_on {
                assert!(leveling.level_of(dep).unwrap() < lvl);
            }
        }
        let total: usize = leveling.levels.iter().map(Vec::len).sum();
        assert_eq!(total, tasks.len());
    }

    #[test]
    fn cycle_terminates_with_forced_level() {
        let tasks = vec![task("root", &[]), task("a", &["b"]), task("b", &["a"])];
        let leveling = level(&tasks);

        assert_eq!(leveling.len(), 2);
        assert_eq!(ids(&leveling.levels[1]), vec!["a", "b"]);
        assert!(leveling.is_forced(1));
        assert!(!leveling.is_forced(0));

        let forced = leveling.forced.unwrap();
        assert_eq!(forced.task_ids, vec!["a", "b"]);
        assert_eq!(forced.unmet, vec!["b", "a"]);
    }

    #[test]
    fn missing_dependency_forces_progress() {
        let tasks = vec![task("a", &[]), task("b", &["ghost"]), task("c", &["b"])];
        let leveling = level(&tasks);

        assert_eq!(ids(&leveling.levels[0]), vec!["a"]);
        assert_eq!(ids(&leveling.levels[1]), vec!["b", "c"]);
        let forced = leveling.forced.unwrap();
        assert_eq!(forced.unmet, vec!["ghost", "b"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let tasks = vec![task("loop", &["loop"])];
        let leveling = level(&tasks);
        assert_eq!(leveling.len(), 1);
        assert!(leveling.is_forced(0));
    }

    #[test]
    fn empty_input_yields_no_levels() {
        let leveling = level(&[]);
        assert!(leveling.is_empty());
        assert!(leveling.forced.is_none());
    }
}

use std::fmt;

/// One (method, seed) experiment unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Task {
    method: String,
    seed: i64,
}

impl Task {
    pub fn new(method: impl Into<String>, seed: i64) -> Self {
        Self {
            method: method.into(),
            seed,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }

    /// `<method>_seed<seed>`, shared by the config and log file names.
    pub fn file_stem(&self) -> String {
        format!("{}_seed{}", self.method, self.seed)
    }
}

/// Console prefix form, `<method>|seed<seed>`.
impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|seed{}", self.method, self.seed)
    }
}

/// Cross product of methods and seeds, method-major.
pub fn build_matrix<S: AsRef<str>>(methods: &[S], seeds: &[i64]) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(methods.len() * seeds.len());
    for method in methods {
        for &seed in seeds {
            tasks.push(Task::new(method.as_ref(), seed));
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn matrix_is_full_cross_product_without_duplicates() {
        let methods = ["brain_tumor", "liver", "lung"];
        let seeds = [1, 2, 3, 4];
        let tasks = build_matrix(&methods, &seeds);
        assert_eq!(tasks.len(), methods.len() * seeds.len());
        let unique: BTreeSet<_> = tasks.iter().cloned().collect();
        assert_eq!(unique.len(), tasks.len());
        for m in methods {
            for s in seeds {
                assert!(unique.contains(&Task::new(m, s)), "missing {}|seed{}", m, s);
            }
        }
    }

    #[test]
    fn matrix_is_method_major() {
        let tasks = build_matrix(&["a", "b"], &[1, 2]);
        let order: Vec<String> = tasks.iter().map(|t| t.to_string()).collect();
        assert_eq!(order, vec!["a|seed1", "a|seed2", "b|seed1", "b|seed2"]);
    }

    #[test]
    fn empty_side_yields_no_tasks() {
        assert!(build_matrix::<&str>(&[], &[1, 2]).is_empty());
        assert!(build_matrix(&["brain_tumor"], &[]).is_empty());
    }

    #[test]
    fn task_names() {
        let task = Task::new("brain_tumor", 3);
        assert_eq!(task.to_string(), "brain_tumor|seed3");
        assert_eq!(task.file_stem(), "brain_tumor_seed3");
        assert_eq!(task.method(), "brain_tumor");
        assert_eq!(task.seed(), 3);
    }
}

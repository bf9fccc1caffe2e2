//! Immutable table of the workloads this build knows about

use std::sync::Arc;

use crate::error::{StressError, StressResult};
use crate::traits::{StressClass, Stressor};

/// Normalise a workload name so `-` and `_` compare equal
pub fn munge_name(name: &str) -> String {
    name.replace('_', "-")
}

/// Ordered, read-only collection of workloads
#[derive(Clone, Default)]
pub struct Catalog {
    stressors: Vec<Arc<dyn Stressor>>,
}

impl Catalog {
    /// Create a catalog; names must be unique after munging
    pub fn new(stressors: Vec<Arc<dyn Stressor>>) -> StressResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for s in &stressors {
            if !seen.insert(munge_name(s.name())) {
                return Err(StressError::config(format!(
                    "duplicate stressor name '{}'",
                    s.name()
                )));
            }
        }
        Ok(Self { stressors })
    }

    /// Find a workload by name
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Stressor>> {
        let wanted = munge_name(name);
        self.stressors
            .iter()
            .find(|s| munge_name(s.name()) == wanted)
    }

    /// Find a workload by name or fail with `UnknownStressor`
    pub fn get(&self, name: &str) -> StressResult<&Arc<dyn Stressor>> {
        self.find(name)
            .ok_or_else(|| StressError::UnknownStressor(name.to_string()))
    }

    /// All workloads in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stressor>> {
        self.stressors.iter()
    }

    /// Workloads belonging to any of `class`
    pub fn by_class(&self, class: StressClass) -> impl Iterator<Item = &Arc<dyn Stressor>> {
        self.stressors
            .iter()
            .filter(move |s| s.class().intersects(class))
    }

    /// Number of workloads
    pub fn len(&self) -> usize {
        self.stressors.len()
    }

    /// Is the catalog empty?
    pub fn is_empty(&self) -> bool {
        self.stressors.is_empty()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stressors.iter().map(|s| s.name()))
            .finish()
    }
}

/// Parse `name[,name...]` into a class mask
pub fn parse_classes(list: &str) -> StressResult<StressClass> {
    let mut class = StressClass::empty();
    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        class |= StressClass::from_class_name(token)
            .ok_or_else(|| StressError::UnknownClass(token.to_string()))?;
    }
    if class.is_empty() {
        return Err(StressError::usage("empty class list"));
    }
    Ok(class)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exit::ExitStatus;
    use crate::traits::StressContext;

    pub(crate) struct FakeStressor {
        pub name: &'static str,
        pub class: StressClass,
        pub supported: bool,
    }

    impl Stressor for FakeStressor {
        fn name(&self) -> &str {
            self.name
        }

        fn class(&self) -> StressClass {
            self.class
        }

        fn supported(&self) -> Result<(), String> {
            if self.supported {
                Ok(())
            } else {
                Err("not here".into())
            }
        }

        fn run(&self, _ctx: &mut StressContext<'_>) -> ExitStatus {
            ExitStatus::Success
        }
    }

    pub(crate) fn fake(name: &'static str, class: StressClass) -> Arc<dyn Stressor> {
        Arc::new(FakeStressor {
            name,
            class,
            supported: true,
        })
    }

    pub(crate) fn sample_catalog() -> Catalog {
        Catalog::new(vec![
            fake("cpu", StressClass::CPU),
            fake("vm", StressClass::VM | StressClass::MEMORY),
            fake("pipe", StressClass::PIPE_IO | StressClass::OS),
            fake("soft_lockup", StressClass::SCHEDULER | StressClass::PATHOLOGICAL),
            Arc::new(FakeStressor {
                name: "rdrand",
                class: StressClass::CPU,
                supported: false,
            }),
        ])
        .unwrap()
    }

    #[test]
    fn test_find_ignores_dash_underscore() {
        let catalog = sample_catalog();
        assert!(catalog.find("soft-lockup").is_some());
        assert!(catalog.find("soft_lockup").is_some());
        assert!(catalog.find("gpu").is_none());
        assert!(matches!(catalog.get("gpu"), Err(StressError::UnknownStressor(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Catalog::new(vec![fake("a-b", StressClass::CPU), fake("a_b", StressClass::CPU)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_by_class() {
        let catalog = sample_catalog();
        let names: Vec<_> = catalog.by_class(StressClass::CPU).map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["cpu", "rdrand"]);
    }

    #[test]
    fn test_parse_classes() {
        assert_eq!(
            parse_classes("cpu,memory").unwrap(),
            StressClass::CPU | StressClass::MEMORY
        );
        assert!(matches!(parse_classes("cpu,gpu"), Err(StressError::UnknownClass(_))));
        assert!(parse_classes("").is_err());
    }
}

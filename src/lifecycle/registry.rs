//! Two-phase GPU object lifecycle.
//!
//! Objects are constructed as plain data first, then registered with the
//! [`InitRegistry`] together with the objects they depend on. The registry
//! creates their GPU resources in dependency order and destroys them in the
//! reverse order.

use std::collections::VecDeque;

use crate::backend::GpuBackend;
use crate::error::{RenderError, RenderResult};

/// A component that owns GPU resources.
///
/// `create` and `destroy` are symmetric. `destroy` is only called on objects
/// whose `create` succeeded.
pub trait GpuObject {
    fn name(&self) -> &str;

    fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()>;

    fn destroy(&mut self, backend: &mut dyn GpuBackend);
}

/// Identifies an object registered with an [`InitRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

struct Entry {
    object: Box<dyn GpuObject>,
    dependencies: Vec<ObjectId>,
}

/// Orders creation of GPU objects by their declared dependencies.
#[derive(Default)]
pub struct InitRegistry {
    entries: Vec<Entry>,
    created: Vec<ObjectId>,
}

impl InitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object. Every id in `dependencies` is created first.
    pub fn register(
        &mut self,
        object: Box<dyn GpuObject>,
        dependencies: &[ObjectId],
    ) -> ObjectId {
        let id = ObjectId(self.entries.len());
        self.entries.push(Entry {
            object,
            dependencies: dependencies.to_vec(),
        });
        id
    }

    /// Declare that `dependent` must be created after `dependency`.
    pub fn add_dependency(&mut self, dependent: ObjectId, dependency: ObjectId) {
        self.entries[dependent.0].dependencies.push(dependency);
    }

    pub fn get(&self, id: ObjectId) -> &dyn GpuObject {
        self.entries[id.0].object.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `initialize_all` has run and the objects are live.
    pub fn is_initialized(&self) -> bool {
        !self.created.is_empty()
    }

    /// Creation order respecting every declared dependency (Kahn's algorithm).
    pub fn initialization_order(&self) -> RenderResult<Vec<ObjectId>> {
        let n = self.entries.len();
        let mut in_degree = vec![0usize; n];
        for (index, entry) in self.entries.iter().enumerate() {
            in_degree[index] = entry.dependencies.len();
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(index) = queue.pop_front() {
            order.push(ObjectId(index));
            for (dependent, entry) in self.entries.iter().enumerate() {
                for dependency in &entry.dependencies {
                    if dependency.0 == index {
                        in_degree[dependent] -= 1;
                        if in_degree[dependent] == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if order.len() != n {
            let stuck = (0..n).find(|&i| in_degree[i] > 0).unwrap_or(0);
            return Err(RenderError::DependencyCycle(
                self.entries[stuck].object.name().to_string(),
            ));
        }
        Ok(order)
    }

    /// Create every object in dependency order.
    ///
    /// If one fails, the objects already created are destroyed in reverse
    /// order and the original error is returned.
    pub fn initialize_all(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(
            self.created.is_empty(),
            "InitRegistry initialized twice without destroy_all"
        );
        let order = self.initialization_order()?;
        for id in order {
            let entry = &mut self.entries[id.0];
            log::debug!("Initializing {}", entry.object.name());
            if let Err(err) = entry.object.create(backend) {
                log::error!("Failed to initialize {}: {}", entry.object.name(), err);
                self.destroy_all(backend);
                return Err(err);
            }
            self.created.push(id);
        }
        Ok(())
    }

    /// Destroy every created object in reverse creation order.
    pub fn destroy_all(&mut self, backend: &mut dyn GpuBackend) {
        crate::assert_render_thread!();
        while let Some(id) = self.created.pop() {
            let entry = &mut self.entries[id.0];
            log::debug!("Destroying {}", entry.object.name());
            entry.object.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::backend::DummyBackend;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl GpuObject for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn create(&mut self, _backend: &mut dyn GpuBackend) -> RenderResult<()> {
            if self.fail {
                return Err(RenderError::NotCreated("recorder"));
            }
            self.log.lock().push(format!("create {}", self.name));
            Ok(())
        }

        fn destroy(&mut self, _backend: &mut dyn GpuBackend) {
            self.log.lock().push(format!("destroy {}", self.name));
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn GpuObject> {
        Box::new(Recorder {
            name,
            log: log.clone(),
            fail: false,
        })
    }

    #[test]
    fn test_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InitRegistry::new();
        let pipeline = registry.register(recorder("pipeline", &log), &[]);
        let layout = registry.register(recorder("layout", &log), &[]);
        registry.add_dependency(pipeline, layout);

        let mut backend = DummyBackend::new();
        registry.initialize_all(&mut backend).unwrap();
        registry.destroy_all(&mut backend);

        assert_eq!(
            *log.lock(),
            vec![
                "create layout",
                "create pipeline",
                "destroy pipeline",
                "destroy layout"
            ]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InitRegistry::new();
        let a = registry.register(recorder("a", &log), &[]);
        let b = registry.register(recorder("b", &log), &[a]);
        registry.add_dependency(a, b);

        let mut backend = DummyBackend::new();
        let err = registry.initialize_all(&mut backend).unwrap_err();
        assert!(matches!(err, RenderError::DependencyCycle(_)));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_failure_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InitRegistry::new();
        let a = registry.register(recorder("a", &log), &[]);
        registry.register(
            Box::new(Recorder {
                name: "b",
                log: log.clone(),
                fail: true,
            }),
            &[a],
        );

        let mut backend = DummyBackend::new();
        assert!(registry.initialize_all(&mut backend).is_err());
        assert_eq!(*log.lock(), vec!["create a", "destroy a"]);
        assert!(!registry.is_initialized());
    }
}

//! Lifecycle Manager: topological init/shutdown of services with per-node
//! timeouts and graceful degradation when a non-critical service fails.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
    Shutdown,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("service {0} timed out during init")]
    InitTimeout(String),
    #[error("critical service {0} failed to initialize: {1}")]
    CriticalServiceFailed(String, String),
    #[error("dependency cycle detected among: {0:?}")]
    DependencyCycle(Vec<String>),
    #[error("unknown dependency {1} declared by service {0}")]
    UnknownDependency(String, String),
}

#[async_trait]
pub trait LifecycleService: Send + Sync {
    async fn initialize(&self) -> Result<(), String>;
    async fn shutdown(&self) -> Result<(), String> {
        Ok(())
    }
}

struct ServiceNode {
    name: String,
    depends_on: Vec<String>,
    critical: bool,
    service: Arc<dyn LifecycleService>,
}

/// Orchestrates init/shutdown of a DAG of services: config first, then
/// logging, then leaf services, then composites that depend on them.
pub struct LifecycleManager {
    nodes: Vec<ServiceNode>,
    states: Mutex<HashMap<String, ServiceState>>,
    init_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(init_timeout: Duration) -> Self {
        Self {
            nodes: Vec::new(),
            states: Mutex::new(HashMap::new()),
            init_timeout,
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        depends_on: Vec<String>,
        critical: bool,
        service: Arc<dyn LifecycleService>,
    ) {
        let name = name.into();
        self.states.lock().unwrap().insert(name.clone(), ServiceState::Uninitialized);
        self.nodes.push(ServiceNode { name, depends_on, critical, service });
    }

    pub fn state_of(&self, name: &str) -> Option<ServiceState> {
        self.states.lock().unwrap().get(name).copied()
    }

    pub fn states(&self) -> HashMap<String, ServiceState> {
        self.states.lock().unwrap().clone()
    }

    fn topological_order(&self) -> Result<Vec<usize>, LifecycleError> {
        let index_by_name: HashMap<&str, usize> =
            self.nodes.iter().enumerate().map(|(i, n)| (n.name.as_str(), i)).collect();

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                let Some(&dep_idx) = index_by_name.get(dep.as_str()) else {
                    return Err(LifecycleError::UnknownDependency(node.name.clone(), dep.clone()));
                };
                dependents[dep_idx].push(i);
                in_degree[i] += 1;
            }
        }

        let mut queue: VecDeque<usize> =
            in_degree.iter().enumerate().filter(|(_, &d)| d == 0).map(|(i, _)| i).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &dep_idx in &dependents[idx] {
                in_degree[dep_idx] -= 1;
                if in_degree[dep_idx] == 0 {
                    queue.push_back(dep_idx);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let remaining: Vec<String> = (0..self.nodes.len())
                .filter(|i| !order.contains(i))
                .map(|i| self.nodes[i].name.clone())
                .collect();
            return Err(LifecycleError::DependencyCycle(remaining));
        }

        Ok(order)
    }

    /// Initializes every registered service in dependency order. A
    /// non-critical failure degrades that node and continues; a critical
    /// failure aborts and returns an error immediately.
    pub async fn init_all(&self) -> Result<(), LifecycleError> {
        let order = self.topological_order()?;

        for idx in order {
            let node = &self.nodes[idx];
            self.states.lock().unwrap().insert(node.name.clone(), ServiceState::Initializing);

            let result = tokio::time::timeout(self.init_timeout, node.service.initialize()).await;

            let state = match result {
                Ok(Ok(())) => {
                    info!(service = %node.name, "service initialized");
                    ServiceState::Ready
                }
                Ok(Err(e)) if node.critical => {
                    self.states.lock().unwrap().insert(node.name.clone(), ServiceState::Failed);
                    return Err(LifecycleError::CriticalServiceFailed(node.name.clone(), e));
                }
                Ok(Err(e)) => {
                    warn!(service = %node.name, error = %e, "non-critical service degraded");
                    ServiceState::Degraded
                }
                Err(_) if node.critical => {
                    self.states.lock().unwrap().insert(node.name.clone(), ServiceState::Failed);
                    return Err(LifecycleError::InitTimeout(node.name.clone()));
                }
                Err(_) => {
                    warn!(service = %node.name, "non-critical service init timed out, degrading");
                    ServiceState::Degraded
                }
            };

            self.states.lock().unwrap().insert(node.name.clone(), state);
        }

        Ok(())
    }

    /// Shuts down in reverse dependency order, best-effort: a failing
    /// shutdown is logged but never blocks the rest of the sequence.
    pub async fn shutdown_all(&self) {
        let order = self.topological_order().unwrap_or_else(|_| (0..self.nodes.len()).collect());
        for &idx in order.iter().rev() {
            let node = &self.nodes[idx];
            match tokio::time::timeout(self.init_timeout, node.service.shutdown()).await {
                Ok(Ok(())) => {
                    self.states.lock().unwrap().insert(node.name.clone(), ServiceState::Shutdown);
                }
                Ok(Err(e)) => {
                    warn!(service = %node.name, error = %e, "shutdown returned an error");
                    self.states.lock().unwrap().insert(node.name.clone(), ServiceState::Shutdown);
                }
                Err(_) => {
                    warn!(service = %node.name, "shutdown timed out");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkService(Arc<AtomicUsize>);
    #[async_trait]
    impl LifecycleService for OkService {
        async fn initialize(&self) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingService;
    #[async_trait]
    impl LifecycleService for FailingService {
        async fn initialize(&self) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn initializes_dependencies_before_dependents() {
        let order_log = Arc::new(Mutex::new(Vec::new()));
        struct Logging(Arc<Mutex<Vec<String>>>, &'static str);
        #[async_trait]
        impl LifecycleService for Logging {
            async fn initialize(&self) -> Result<(), String> {
                self.0.lock().unwrap().push(self.1.to_string());
                Ok(())
            }
        }

        let mut manager = LifecycleManager::new(Duration::from_secs(1));
        manager.register("composite", vec!["leaf".to_string()], true, Arc::new(Logging(order_log.clone(), "composite")));
        manager.register("leaf", vec!["config".to_string()], true, Arc::new(Logging(order_log.clone(), "leaf")));
        manager.register("config", vec![], true, Arc::new(Logging(order_log.clone(), "config")));

        manager.init_all().await.unwrap();
        assert_eq!(*order_log.lock().unwrap(), vec!["config", "leaf", "composite"]);
        assert_eq!(manager.state_of("composite"), Some(ServiceState::Ready));
    }

    #[tokio::test]
    async fn non_critical_failure_degrades_without_aborting() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut manager = LifecycleManager::new(Duration::from_secs(1));
        manager.register("flaky", vec![], false, Arc::new(FailingService));
        manager.register("after", vec!["flaky".to_string()], true, Arc::new(OkService(counter.clone())));

        manager.init_all().await.unwrap();
        assert_eq!(manager.state_of("flaky"), Some(ServiceState::Degraded));
        assert_eq!(manager.state_of("after"), Some(ServiceState::Ready));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn critical_failure_aborts_initialization() {
        let mut manager = LifecycleManager::new(Duration::from_secs(1));
        manager.register("core", vec![], true, Arc::new(FailingService));
        let err = manager.init_all().await.unwrap_err();
        assert!(matches!(err, LifecycleError::CriticalServiceFailed(_, _)));
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let mut manager = LifecycleManager::new(Duration::from_secs(1));
        manager.register("a", vec!["b".to_string()], true, Arc::new(FailingService));
        manager.register("b", vec!["a".to_string()], true, Arc::new(FailingService));
        assert!(matches!(manager.topological_order(), Err(LifecycleError::DependencyCycle(_))));
    }
}

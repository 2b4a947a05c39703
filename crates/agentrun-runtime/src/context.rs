//! Per-process wiring handed to every runtime component.

use std::sync::Arc;

use agentrun_broker::{ControlChannel, LivenessRegistry, MemoryBroker, ResponseLog};
use agentrun_core::InstanceId;
use agentrun_settings::AgentRunSettings;
use agentrun_store::StatusStore;

/// The instance identity, the four shared services and the loaded settings.
///
/// Built once at startup and cloned into coordinators, tailers and the
/// reconciler. Cloning is cheap.
#[derive(Clone)]
pub struct WorkerContext {
    /// This worker's instance id.
    pub instance_id: InstanceId,
    /// Liveness markers.
    pub liveness: Arc<dyn LivenessRegistry>,
    /// Response logs.
    pub log: Arc<dyn ResponseLog>,
    /// Control signals.
    pub control: Arc<dyn ControlChannel>,
    /// Durable run records.
    pub store: Arc<dyn StatusStore>,
    /// Loaded settings.
    pub settings: Arc<AgentRunSettings>,
}

impl WorkerContext {
    /// Wire a context from its parts.
    pub fn new(
        instance_id: InstanceId,
        liveness: Arc<dyn LivenessRegistry>,
        log: Arc<dyn ResponseLog>,
        control: Arc<dyn ControlChannel>,
        store: Arc<dyn StatusStore>,
        settings: AgentRunSettings,
    ) -> Self {
        Self {
            instance_id,
            liveness,
            log,
            control,
            store,
            settings: Arc::new(settings),
        }
    }

    /// Context whose broker services all share one [`MemoryBroker`].
    pub fn with_memory_broker(
        instance_id: InstanceId,
        broker: &MemoryBroker,
        store: Arc<dyn StatusStore>,
        settings: AgentRunSettings,
    ) -> Self {
        Self::new(
            instance_id,
            Arc::new(broker.clone()),
            Arc::new(broker.clone()),
            Arc::new(broker.clone()),
            store,
            settings,
        )
    }

    /// The same services under another instance id.
    pub fn for_instance(&self, instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

use flowcore::{FlowError, Step, StepBody, StepError, StepId, TemplateId, TemplateIdentity, TemplateRef};
use indexmap::IndexMap;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Factory trait for creating step bodies
pub trait StepTemplate: Send + Sync {
    /// Structural identity used to resolve persisted references
    fn identity(&self) -> TemplateIdentity;

    /// Create a fresh step body, pulling capabilities from `services`
    fn create(&self, services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError>;

    /// Optional: description and category for listings
    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata::default()
    }
}

/// A device exposed by a device provider
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub kind: String,
}

/// Runtime object created from a device-provider template
pub trait DeviceProvider: Send + Sync {
    fn devices(&self) -> Vec<DeviceInfo>;
}

/// Factory trait for device providers
pub trait DeviceProviderTemplate: Send + Sync {
    fn identity(&self) -> TemplateIdentity;

    fn create(&self, services: &ServiceProvider) -> Result<Arc<dyn DeviceProvider>, StepError>;

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata::default()
    }
}

/// Metadata about a template
#[derive(Debug, Clone, Serialize)]
pub struct TemplateMetadata {
    pub description: String,
    pub category: String,
}

impl Default for TemplateMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Listing entry for a registered template
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub id: TemplateId,
    pub identity: TemplateIdentity,
    pub load_order: usize,
    pub metadata: TemplateMetadata,
}

/// Shared capabilities handed to template factories, keyed by type
#[derive(Default, Clone)]
pub struct ServiceProvider {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, StepError> {
        self.get::<T>()
            .ok_or(StepError::MissingService(std::any::type_name::<T>()))
    }
}

/// Registry of available step and device-provider templates.
///
/// Template ids are assigned at registration and change between hosts;
/// identities do not.
pub struct PluginRegistry {
    templates: IndexMap<TemplateId, Arc<dyn StepTemplate>>,
    by_identity: HashMap<TemplateIdentity, TemplateId>,
    device_providers: IndexMap<TemplateId, Arc<dyn DeviceProviderTemplate>>,
    services: ServiceProvider,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            templates: IndexMap::new(),
            by_identity: HashMap::new(),
            device_providers: IndexMap::new(),
            services: ServiceProvider::new(),
        }
    }

    /// Register a step template. Re-registering an identity replaces it.
    pub fn register(&mut self, template: Arc<dyn StepTemplate>) -> TemplateId {
        let identity = template.identity();
        tracing::info!("Registering step template: {}", identity);

        if let Some(id) = self.by_identity.get(&identity).copied() {
            self.templates.insert(id, template);
            return id;
        }
        let id = Uuid::new_v4();
        self.templates.insert(id, template);
        self.by_identity.insert(identity, id);
        id
    }

    pub fn register_device_provider(&mut self, template: Arc<dyn DeviceProviderTemplate>) -> TemplateId {
        tracing::info!("Registering device provider: {}", template.identity());
        let id = Uuid::new_v4();
        self.device_providers.insert(id, template);
        id
    }

    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut ServiceProvider {
        &mut self.services
    }

    pub fn resolve(&self, id: TemplateId) -> Option<TemplateRef> {
        self.templates.get(&id).map(|t| TemplateRef {
            id,
            identity: t.identity(),
        })
    }

    pub fn resolve_identity(&self, identity: &TemplateIdentity) -> Option<TemplateRef> {
        self.by_identity.get(identity).map(|id| TemplateRef {
            id: *id,
            identity: identity.clone(),
        })
    }

    /// Create a step with a fresh id from a template id
    pub fn instantiate(&self, template_id: TemplateId) -> Result<Step, FlowError> {
        self.instantiate_as(template_id, Uuid::new_v4())
    }

    /// Create a step with a caller-chosen id
    pub fn instantiate_as(&self, template_id: TemplateId, step_id: StepId) -> Result<Step, FlowError> {
        let template = self
            .templates
            .get(&template_id)
            .ok_or_else(|| FlowError::TemplateNotFound(template_id.to_string()))?;

        let body = template.create(&self.services)?;
        body.on_created()?;

        let template_ref = TemplateRef {
            id: template_id,
            identity: template.identity(),
        };
        Ok(Step::new(step_id, template_ref, body))
    }

    pub fn list_templates(&self) -> Vec<TemplateInfo> {
        self.templates
            .iter()
            .enumerate()
            .map(|(load_order, (id, t))| TemplateInfo {
                id: *id,
                identity: t.identity(),
                load_order,
                metadata: t.metadata(),
            })
            .collect()
    }

    pub fn list_device_providers(&self) -> Vec<TemplateInfo> {
        self.device_providers
            .iter()
            .enumerate()
            .map(|(load_order, (id, t))| TemplateInfo {
                id: *id,
                identity: t.identity(),
                load_order,
                metadata: t.metadata(),
            })
            .collect()
    }

    pub fn create_device_provider(&self, id: TemplateId) -> Result<Arc<dyn DeviceProvider>, FlowError> {
        let template = self
            .device_providers
            .get(&id)
            .ok_or_else(|| FlowError::TemplateNotFound(id.to_string()))?;
        Ok(template.create(&self.services)?)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

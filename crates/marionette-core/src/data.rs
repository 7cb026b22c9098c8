//! Data backend: project lookup, project parsing, and entity persistence.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::DataError;
use crate::ids::{ExperimentId, ProjectId};
use crate::model::{Experiment, Project, SimulatorConfiguration};

/// An entity handed to [`DataManager::save`].
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    /// A whole project, replacing the stored copy.
    Project(Project),
    /// One experiment, replacing the copy inside its project.
    Experiment(Experiment),
    /// The simulator configuration of one aspect.
    SimulatorConfiguration {
        /// Owning project.
        project_id: ProjectId,
        /// Owning experiment.
        experiment_id: ExperimentId,
        /// Instance path of the aspect.
        instance_path: String,
        /// New configuration.
        configuration: SimulatorConfiguration,
    },
}

impl Entity {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Project(_) => "project",
            Self::Experiment(_) => "experiment",
            Self::SimulatorConfiguration { .. } => "simulator configuration",
        }
    }
}

/// Storage for projects and their children.
#[async_trait]
pub trait DataManager: Send + Sync {
    /// Whether this is the non-persistent default backend.
    ///
    /// Mutating operations are refused while this returns `true`.
    fn is_default(&self) -> bool;

    /// Look up a project by ID.
    async fn project_by_id(&self, id: ProjectId) -> Result<Option<Project>, DataError>;

    /// Build a project from a JSON document.
    fn project_from_json(&self, json: &str) -> Result<Project, DataError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Persist an entity.
    async fn save(&self, entity: Entity) -> Result<(), DataError>;

    /// Remove an experiment from its project, clearing the project's active
    /// experiment if it pointed there.
    async fn delete_experiment(
        &self,
        project_id: ProjectId,
        experiment_id: ExperimentId,
    ) -> Result<(), DataError>;
}

/// Process-local project store.
///
/// Constructed with [`InMemoryDataManager::new`] it reports itself as the
/// default backend. [`InMemoryDataManager::persistent`] accepts writes.
#[derive(Debug, Default)]
pub struct InMemoryDataManager {
    projects: RwLock<IndexMap<ProjectId, Project>>,
    persistent: bool,
}

impl InMemoryDataManager {
    /// The default, read-only backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that accepts saves.
    pub fn persistent() -> Self {
        Self {
            projects: RwLock::default(),
            persistent: true,
        }
    }

    /// Seed the store with projects.
    #[must_use]
    pub fn with_projects(self, projects: impl IntoIterator<Item = Project>) -> Self {
        {
            let mut store = self.projects.write();
            for project in projects {
                let _ = store.insert(project.id, project);
            }
        }
        self
    }

    /// Number of stored projects.
    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }

    fn require_persistent(&self) -> Result<(), DataError> {
        if self.persistent {
            Ok(())
        } else {
            Err(DataError::Storage(
                "the default data backend does not persist entities".into(),
            ))
        }
    }

    fn apply(&self, entity: Entity) -> Result<(), DataError> {
        let mut store = self.projects.write();
        match entity {
            Entity::Project(project) => {
                let _ = store.insert(project.id, project);
            }
            Entity::Experiment(experiment) => {
                let project = store.get_mut(&experiment.project_id).ok_or_else(|| {
                    DataError::MissingEntity {
                        entity: "experiment",
                        reason: format!("project {} not stored", experiment.project_id),
                    }
                })?;
                match project.experiment_mut(experiment.id) {
                    Some(slot) => *slot = experiment,
                    None => project.experiments.push(experiment),
                }
            }
            Entity::SimulatorConfiguration {
                project_id,
                experiment_id,
                instance_path,
                configuration,
            } => {
                let aspect = store
                    .get_mut(&project_id)
                    .and_then(|p| p.experiment_mut(experiment_id))
                    .and_then(|e| e.aspect_configuration_mut(&instance_path))
                    .ok_or_else(|| DataError::MissingEntity {
                        entity: "simulator configuration",
                        reason: format!(
                            "aspect {instance_path} not stored in experiment {experiment_id} of project {project_id}"
                        ),
                    })?;
                aspect.simulator_configuration = configuration;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DataManager for InMemoryDataManager {
    fn is_default(&self) -> bool {
        !self.persistent
    }

    async fn project_by_id(&self, id: ProjectId) -> Result<Option<Project>, DataError> {
        Ok(self.projects.read().get(&id).cloned())
    }

    async fn save(&self, entity: Entity) -> Result<(), DataError> {
        self.require_persistent()?;
        debug!(entity = entity.kind(), "saving entity");
        self.apply(entity)
    }

    async fn delete_experiment(
        &self,
        project_id: ProjectId,
        experiment_id: ExperimentId,
    ) -> Result<(), DataError> {
        self.require_persistent()?;
        let mut store = self.projects.write();
        let project = store
            .get_mut(&project_id)
            .filter(|p| p.experiment(experiment_id).is_some())
            .ok_or_else(|| DataError::MissingEntity {
                entity: "experiment",
                reason: format!("experiment {experiment_id} not stored in project {project_id}"),
            })?;
        project.experiments.retain(|e| e.id != experiment_id);
        if project.active_experiment_id == Some(experiment_id) {
            project.active_experiment_id = None;
        }
        debug!(%project_id, %experiment_id, "experiment deleted");
        Ok(())
    }
}

//! Bookkeeping manager for deployments without a simulation engine.
//!
//! Projects, watch lists, parameters and the storage link are tracked in
//! memory per connection. Trees are derived from the aspect
//! configurations. Running an experiment fails because nothing can
//! simulate it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::ManagerError;
use crate::formats::{ModelFormat, ResultsFormat};
use crate::ids::{ExperimentId, ProjectId};
use crate::manager::{Artifact, ManagerFactory, ProjectManager};
use crate::model::{AspectConfiguration, Experiment, ExperimentStatus, Project};
use crate::tree::{AspectSubtree, SharedSubtree, SubtreeMap, TreeNode};

/// Name given to experiments created by [`LocalProjectManager`].
pub const NEW_EXPERIMENT_NAME: &str = "New Experiment";

#[derive(Debug, Default)]
struct LocalState {
    open: BTreeSet<ProjectId>,
    watched: HashMap<ExperimentId, Vec<String>>,
    parameters: HashMap<ExperimentId, BTreeMap<String, String>>,
    /// Parameter paths changed since the model tree was last handed out.
    unreported: HashMap<ExperimentId, BTreeSet<String>>,
    storage_key: Option<String>,
}

/// Per-connection manager keeping state in memory.
#[derive(Debug)]
pub struct LocalProjectManager {
    scratch: PathBuf,
    exports: Vec<ModelFormat>,
    state: Mutex<LocalState>,
}

impl LocalProjectManager {
    /// Manager writing exports under `scratch`, offering `exports` besides
    /// the native format. The manager owns `scratch` and removes it when
    /// dropped.
    pub fn new(scratch: PathBuf, exports: Vec<ModelFormat>) -> Self {
        Self {
            scratch,
            exports,
            state: Mutex::default(),
        }
    }

    /// Whether `project` is currently open on this manager.
    pub fn is_open(&self, project: ProjectId) -> bool {
        self.state.lock().open.contains(&project)
    }

    fn aspect<'a>(
        experiment: &'a Experiment,
        aspect_path: &str,
    ) -> Result<&'a AspectConfiguration, ManagerError> {
        experiment.aspect_configuration(aspect_path).ok_or_else(|| {
            ManagerError::execution(format!(
                "Aspect {aspect_path} not found in experiment {}",
                experiment.id
            ))
        })
    }

    fn model_subtree(
        &self,
        aspect: &AspectConfiguration,
        experiment: &Experiment,
    ) -> AspectSubtree {
        let config = &aspect.simulator_configuration;
        let mut children = vec![
            TreeNode::leaf("simulatorId", config.simulator_id.clone()),
            TreeNode::leaf("timestep", config.timestep),
            TreeNode::leaf("length", config.length),
        ];
        let mut state = self.state.lock();
        let LocalState {
            parameters,
            unreported,
            ..
        } = &mut *state;
        if let Some(parameters) = parameters.get(&experiment.id) {
            let prefix = format!("{}.", aspect.instance_path);
            let mut fresh = unreported.get_mut(&experiment.id);
            let changed: Vec<TreeNode> = parameters
                .iter()
                .filter_map(|(path, value)| {
                    let name = path.strip_prefix(&prefix)?;
                    let leaf = TreeNode::leaf(name, value.clone());
                    let is_new = fresh.as_mut().is_some_and(|paths| paths.remove(path));
                    Some(if is_new { leaf.touched() } else { leaf })
                })
                .collect();
            if !changed.is_empty() {
                let branch = TreeNode::branch("parameters", changed);
                children.push(if branch.any_modified() {
                    branch.touched()
                } else {
                    branch
                });
            }
        }
        AspectSubtree::new(
            aspect.instance_path.clone(),
            TreeNode::branch("ModelTree", children),
        )
    }

    fn simulation_subtree(
        &self,
        aspect: &AspectConfiguration,
        experiment: &Experiment,
    ) -> AspectSubtree {
        let watched = self
            .state
            .lock()
            .watched
            .get(&experiment.id)
            .cloned()
            .unwrap_or_else(|| aspect.watched_variables.clone());
        let children = watched
            .into_iter()
            .filter(|v| v.starts_with(&aspect.instance_path))
            .map(|v| TreeNode::leaf(v, true))
            .collect();
        AspectSubtree::new(
            aspect.instance_path.clone(),
            TreeNode::branch("SimulationTree", children),
        )
    }

    fn single(subtree: AspectSubtree) -> SubtreeMap {
        let mut map = SubtreeMap::new();
        let _ = map.insert(subtree.instance_path.clone(), subtree.shared());
        map
    }

    fn require_storage(&self) -> Result<(), ManagerError> {
        if self.state.lock().storage_key.is_some() {
            Ok(())
        } else {
            Err(ManagerError::execution("No storage account is linked"))
        }
    }
}

#[async_trait]
impl ProjectManager for LocalProjectManager {
    async fn load_project(&self, project: &Project) -> Result<(), ManagerError> {
        let _ = self.state.lock().open.insert(project.id);
        debug!(project_id = %project.id, "project opened");
        Ok(())
    }

    async fn close_project(&self, project: &Project) -> Result<(), ManagerError> {
        let mut state = self.state.lock();
        if !state.open.remove(&project.id) {
            return Err(ManagerError::execution(format!(
                "Project {} is not open",
                project.id
            )));
        }
        for experiment in &project.experiments {
            let _ = state.watched.remove(&experiment.id);
            let _ = state.parameters.remove(&experiment.id);
            let _ = state.unreported.remove(&experiment.id);
        }
        Ok(())
    }

    async fn persist_project(&self, project: &Project) -> Result<Project, ManagerError> {
        let mut stored = project.clone();
        stored.volatile = false;
        Ok(stored)
    }

    async fn new_experiment(&self, project: &Project) -> Result<Experiment, ManagerError> {
        let next = project
            .experiments
            .iter()
            .map(|e| e.id.get())
            .max()
            .unwrap_or(0)
            + 1;
        let mut experiment =
            Experiment::new(ExperimentId::new(next), project.id, NEW_EXPERIMENT_NAME);
        if let Some(template) = project.experiments.first() {
            experiment.aspect_configurations = template
                .aspect_configurations
                .iter()
                .map(|a| AspectConfiguration {
                    instance_path: a.instance_path.clone(),
                    ..AspectConfiguration::default()
                })
                .collect();
        }
        Ok(experiment)
    }

    async fn load_experiment(
        &self,
        experiment: &Experiment,
    ) -> Result<SharedSubtree, ManagerError> {
        let children = experiment
            .aspect_configurations
            .iter()
            .map(|a| {
                TreeNode::leaf(
                    a.instance_path.clone(),
                    a.simulator_configuration.simulator_id.clone(),
                )
            })
            .collect();
        Ok(AspectSubtree::new(
            experiment.name.clone(),
            TreeNode::branch("aspects", children),
        )
        .shared())
    }

    async fn run_experiment(&self, experiment: &Experiment) -> Result<(), ManagerError> {
        Err(ManagerError::execution(format!(
            "No simulation engine is available to run experiment {}",
            experiment.id
        )))
    }

    async fn play_experiment(&self, experiment: &Experiment) -> Result<SubtreeMap, ManagerError> {
        if experiment.status != ExperimentStatus::Completed {
            return Err(ManagerError::execution(format!(
                "Experiment {} has no recorded results",
                experiment.id
            )));
        }
        Ok(experiment
            .aspect_configurations
            .iter()
            .map(|a| {
                let subtree = self.simulation_subtree(a, experiment);
                (subtree.instance_path.clone(), subtree.shared())
            })
            .collect())
    }

    async fn delete_experiment(&self, experiment: &Experiment) -> Result<(), ManagerError> {
        let mut state = self.state.lock();
        let _ = state.watched.remove(&experiment.id);
        let _ = state.parameters.remove(&experiment.id);
        Ok(())
    }

    async fn check_experiments_status(
        &self,
        project: &Project,
    ) -> Result<Vec<Experiment>, ManagerError> {
        Ok(project.experiments.clone())
    }

    async fn set_watched_variables(
        &self,
        variables: &[String],
        experiment: &Experiment,
    ) -> Result<(), ManagerError> {
        let _ = self
            .state
            .lock()
            .watched
            .insert(experiment.id, variables.to_vec());
        Ok(())
    }

    async fn clear_watch_lists(&self, experiment: &Experiment) -> Result<(), ManagerError> {
        let _ = self
            .state
            .lock()
            .watched
            .insert(experiment.id, Vec::new());
        Ok(())
    }

    async fn model_tree(
        &self,
        aspect_path: &str,
        experiment: &Experiment,
    ) -> Result<SubtreeMap, ManagerError> {
        let aspect = Self::aspect(experiment, aspect_path)?;
        Ok(Self::single(self.model_subtree(aspect, experiment)))
    }

    async fn simulation_tree(
        &self,
        aspect_path: &str,
        experiment: &Experiment,
    ) -> Result<SubtreeMap, ManagerError> {
        let aspect = Self::aspect(experiment, aspect_path)?;
        Ok(Self::single(self.simulation_subtree(aspect, experiment)))
    }

    async fn set_model_parameters(
        &self,
        model_path: &str,
        parameters: &BTreeMap<String, String>,
        experiment: &Experiment,
    ) -> Result<SubtreeMap, ManagerError> {
        let aspect = experiment
            .aspect_configurations
            .iter()
            .find(|a| model_path.starts_with(&a.instance_path))
            .ok_or_else(|| {
                ManagerError::execution(format!(
                    "No aspect of experiment {} owns {model_path}",
                    experiment.id
                ))
            })?;
        {
            let mut state = self.state.lock();
            let paths: Vec<String> = parameters
                .keys()
                .map(|name| format!("{model_path}.{name}"))
                .collect();
            let stored = state.parameters.entry(experiment.id).or_default();
            for (path, value) in paths.iter().zip(parameters.values()) {
                let _ = stored.insert(path.clone(), value.clone());
            }
            state.unreported.entry(experiment.id).or_default().extend(paths);
        }
        Ok(Self::single(self.model_subtree(aspect, experiment)))
    }

    async fn supported_outputs(
        &self,
        aspect_path: &str,
        experiment: &Experiment,
    ) -> Result<Vec<ModelFormat>, ManagerError> {
        let _ = Self::aspect(experiment, aspect_path)?;
        Ok(self.exports.clone())
    }

    async fn download_model(
        &self,
        aspect_path: &str,
        format: Option<&ModelFormat>,
        experiment: &Experiment,
    ) -> Result<Artifact, ManagerError> {
        let aspect = Self::aspect(experiment, aspect_path)?;
        if let Some(format) = format {
            if !self.exports.contains(format) {
                return Err(ManagerError::execution(format!(
                    "Cannot export {aspect_path} to {}",
                    format.name()
                )));
            }
        }
        let document = serde_json::to_vec_pretty(aspect)
            .map_err(|e| ManagerError::execution_caused_by("Cannot encode the model", e))?;
        let dir = self.scratch.join(Uuid::now_v7().to_string());
        let extension =
            format.map_or_else(|| "json".to_owned(), |f| f.name().to_ascii_lowercase());
        let path = dir.join(format!("model.{extension}"));
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ManagerError::execution_caused_by("Cannot prepare the export directory", e)
        })?;
        tokio::fs::write(&path, document)
            .await
            .map_err(|e| ManagerError::execution_caused_by("Cannot write the exported model", e))?;
        Ok(Artifact::Local(path))
    }

    async fn download_results(
        &self,
        aspect_path: &str,
        _format: &ResultsFormat,
        experiment: &Experiment,
    ) -> Result<Option<Artifact>, ManagerError> {
        let _ = Self::aspect(experiment, aspect_path)?;
        Ok(None)
    }

    async fn upload_model(
        &self,
        aspect_path: &str,
        format: Option<&ModelFormat>,
        experiment: &Experiment,
    ) -> Result<(), ManagerError> {
        self.require_storage()?;
        let _ = Self::aspect(experiment, aspect_path)?;
        info!(
            experiment_id = %experiment.id,
            aspect_path,
            format = format.map_or("native", ModelFormat::name),
            "model upload accepted"
        );
        Ok(())
    }

    async fn upload_results(
        &self,
        aspect_path: &str,
        format: &ResultsFormat,
        experiment: &Experiment,
    ) -> Result<(), ManagerError> {
        self.require_storage()?;
        let _ = Self::aspect(experiment, aspect_path)?;
        Err(ManagerError::execution(format!(
            "Experiment {} has no {} results to upload",
            experiment.id,
            format.name()
        )))
    }

    async fn link_storage_account(&self, key: &str) -> Result<(), ManagerError> {
        if key.trim().is_empty() {
            return Err(ManagerError::execution("Storage key is empty"));
        }
        self.state.lock().storage_key = Some(key.to_owned());
        Ok(())
    }

    async fn unlink_storage_account(&self, key: &str) -> Result<(), ManagerError> {
        let mut state = self.state.lock();
        match state.storage_key.as_deref() {
            Some(linked) if linked == key => {
                state.storage_key = None;
                Ok(())
            }
            Some(_) => Err(ManagerError::execution(
                "Storage key does not match the linked account",
            )),
            None => Err(ManagerError::execution("No storage account is linked")),
        }
    }
}

impl Drop for LocalProjectManager {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.scratch) {
            Ok(()) => debug!(path = %self.scratch.display(), "removed model exports"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.scratch.display(), error = %e, "failed to remove model exports");
            }
        }
    }
}

/// Builds a [`LocalProjectManager`] per connection.
#[derive(Clone, Debug)]
pub struct LocalManagerFactory {
    scratch: PathBuf,
    exports: Vec<ModelFormat>,
}

impl LocalManagerFactory {
    /// Factory whose managers each write exports to their own directory
    /// under `scratch`.
    pub fn new(scratch: impl Into<PathBuf>, exports: Vec<ModelFormat>) -> Self {
        Self {
            scratch: scratch.into(),
            exports,
        }
    }
}

impl ManagerFactory for LocalManagerFactory {
    fn create(&self) -> Box<dyn ProjectManager> {
        let scratch = self.scratch.join(Uuid::now_v7().to_string());
        Box::new(LocalProjectManager::new(scratch, self.exports.clone()))
    }
}

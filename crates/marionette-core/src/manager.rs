//! The project/experiment manager the dispatcher drives.
//!
//! A manager owns simulation execution, model conversion and result
//! export. Every connection gets its own instance from a [`ManagerFactory`]
//! so per-connection state never leaks across clients.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::errors::ManagerError;
use crate::formats::{ModelFormat, ResultsFormat};
use crate::model::{Experiment, Project};
use crate::tree::{SharedSubtree, SubtreeMap};

/// A file or directory produced by the manager for download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Artifact {
    /// A path on the local filesystem.
    Local(PathBuf),
    /// A remote resource to fetch.
    Remote(Url),
}

/// Project and experiment operations. All calls may fail with
/// [`ManagerError::Execution`] or [`ManagerError::Initialization`].
#[async_trait]
pub trait ProjectManager: Send + Sync {
    /// Open a project on this connection.
    async fn load_project(&self, project: &Project) -> Result<(), ManagerError>;

    /// Release a project previously loaded on this connection.
    async fn close_project(&self, project: &Project) -> Result<(), ManagerError>;

    /// Persist a project, returning the stored copy.
    async fn persist_project(&self, project: &Project) -> Result<Project, ManagerError>;

    /// Create an experiment in `project`.
    async fn new_experiment(&self, project: &Project) -> Result<Experiment, ManagerError>;

    /// Build the runtime tree for an experiment.
    async fn load_experiment(&self, experiment: &Experiment)
    -> Result<SharedSubtree, ManagerError>;

    /// Queue an experiment for simulation.
    async fn run_experiment(&self, experiment: &Experiment) -> Result<(), ManagerError>;

    /// Recorded results of a completed experiment, per aspect.
    async fn play_experiment(&self, experiment: &Experiment) -> Result<SubtreeMap, ManagerError>;

    /// Remove an experiment.
    async fn delete_experiment(&self, experiment: &Experiment) -> Result<(), ManagerError>;

    /// Current state of every experiment in a project.
    async fn check_experiments_status(
        &self,
        project: &Project,
    ) -> Result<Vec<Experiment>, ManagerError>;

    /// Record `variables` during the next run.
    async fn set_watched_variables(
        &self,
        variables: &[String],
        experiment: &Experiment,
    ) -> Result<(), ManagerError>;

    /// Stop recording all variables.
    async fn clear_watch_lists(&self, experiment: &Experiment) -> Result<(), ManagerError>;

    /// Model tree of one aspect.
    async fn model_tree(
        &self,
        aspect_path: &str,
        experiment: &Experiment,
    ) -> Result<SubtreeMap, ManagerError>;

    /// Simulation tree of one aspect.
    async fn simulation_tree(
        &self,
        aspect_path: &str,
        experiment: &Experiment,
    ) -> Result<SubtreeMap, ManagerError>;

    /// Change model parameters under `model_path`, returning the updated tree.
    async fn set_model_parameters(
        &self,
        model_path: &str,
        parameters: &BTreeMap<String, String>,
        experiment: &Experiment,
    ) -> Result<SubtreeMap, ManagerError>;

    /// Formats an aspect's model can be exported to.
    async fn supported_outputs(
        &self,
        aspect_path: &str,
        experiment: &Experiment,
    ) -> Result<Vec<ModelFormat>, ManagerError>;

    /// Export an aspect's model. `None` means the native format.
    async fn download_model(
        &self,
        aspect_path: &str,
        format: Option<&ModelFormat>,
        experiment: &Experiment,
    ) -> Result<Artifact, ManagerError>;

    /// Locate recorded results. `None` means nothing was recorded.
    async fn download_results(
        &self,
        aspect_path: &str,
        format: &ResultsFormat,
        experiment: &Experiment,
    ) -> Result<Option<Artifact>, ManagerError>;

    /// Push an exported model to the linked storage account.
    async fn upload_model(
        &self,
        aspect_path: &str,
        format: Option<&ModelFormat>,
        experiment: &Experiment,
    ) -> Result<(), ManagerError>;

    /// Push recorded results to the linked storage account.
    async fn upload_results(
        &self,
        aspect_path: &str,
        format: &ResultsFormat,
        experiment: &Experiment,
    ) -> Result<(), ManagerError>;

    /// Link an external storage account using an access key.
    async fn link_storage_account(&self, key: &str) -> Result<(), ManagerError>;

    /// Unlink the external storage account.
    async fn unlink_storage_account(&self, key: &str) -> Result<(), ManagerError>;
}

/// Builds one fresh manager per connection.
pub trait ManagerFactory: Send + Sync {
    /// A manager owned by a single connection.
    fn create(&self) -> Box<dyn ProjectManager>;
}

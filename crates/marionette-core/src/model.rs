//! Project, experiment, and aspect-configuration model.
//!
//! These are the records the dispatcher resolves and patches. They serialize
//! in the camelCase shape the browser client reads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ExperimentId, ProjectId};

/// Lifecycle state of an experiment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    /// Editable, never run.
    #[default]
    Design,
    /// Waiting for a simulator.
    Queued,
    /// A simulation is in progress.
    Running,
    /// The last run failed.
    Error,
    /// The last run finished.
    Completed,
    /// Marked for removal.
    Deleted,
}

/// Simulator settings attached to one aspect of an experiment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorConfiguration {
    /// Backend-assigned ID.
    pub id: u64,
    /// Simulator service name.
    pub simulator_id: String,
    /// Conversion service used before simulating, if any.
    pub conversion_service_id: Option<String>,
    /// Integration step.
    pub timestep: f32,
    /// Simulated duration.
    pub length: f32,
    /// Free-form simulator parameters, created on first write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}

/// Per-aspect configuration inside an experiment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AspectConfiguration {
    /// Backend-assigned ID.
    pub id: u64,
    /// Instance path of the aspect, unique within the experiment.
    pub instance_path: String,
    /// Variables recorded while simulating.
    pub watched_variables: Vec<String>,
    /// Simulator settings.
    pub simulator_configuration: SimulatorConfiguration,
}

/// An experiment belonging to exactly one project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    /// Experiment ID.
    pub id: ExperimentId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Script run when the experiment is loaded by the client.
    #[serde(default)]
    pub script: Option<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: ExperimentStatus,
    /// When the experiment last ran.
    #[serde(default)]
    pub last_ran: Option<DateTime<Utc>>,
    /// Aspect configurations keyed by instance path.
    #[serde(default)]
    pub aspect_configurations: Vec<AspectConfiguration>,
}

impl Experiment {
    /// A fresh experiment in design state with no aspects.
    pub fn new(id: ExperimentId, project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            project_id,
            name: name.into(),
            description: None,
            script: None,
            status: ExperimentStatus::Design,
            last_ran: None,
            aspect_configurations: Vec::new(),
        }
    }

    /// Aspect configuration with the given instance path.
    pub fn aspect_configuration(&self, instance_path: &str) -> Option<&AspectConfiguration> {
        self.aspect_configurations
            .iter()
            .find(|a| a.instance_path == instance_path)
    }

    /// Mutable aspect configuration with the given instance path.
    pub fn aspect_configuration_mut(
        &mut self,
        instance_path: &str,
    ) -> Option<&mut AspectConfiguration> {
        self.aspect_configurations
            .iter_mut()
            .find(|a| a.instance_path == instance_path)
    }
}

/// A project: a named set of experiments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project ID.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Volatile projects refuse persistence-affecting operations.
    #[serde(default)]
    pub volatile: bool,
    /// Experiment to open alongside the project. `-1` on the wire means none.
    #[serde(default, with = "active_experiment")]
    pub active_experiment_id: Option<ExperimentId>,
    /// Experiments in creation order.
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

impl Project {
    /// An empty, non-volatile project.
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            volatile: false,
            active_experiment_id: None,
            experiments: Vec::new(),
        }
    }

    /// Experiment with the given ID, scanning in order.
    pub fn experiment(&self, id: ExperimentId) -> Option<&Experiment> {
        self.experiments.iter().find(|e| e.id == id)
    }

    /// Mutable experiment with the given ID.
    pub fn experiment_mut(&mut self, id: ExperimentId) -> Option<&mut Experiment> {
        self.experiments.iter_mut().find(|e| e.id == id)
    }
}

/// An authenticated user as reported by a login source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Login name.
    pub login: String,
    /// Display name.
    pub name: String,
}

/// Wire mapping for the active-experiment field: `-1`, `null`, or absent all
/// mean "none".
pub mod active_experiment {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::ids::ExperimentId;

    /// The sentinel written when no experiment is active.
    pub const NONE: i64 = -1;

    /// Serialize `None` as `-1`.
    pub fn serialize<S: Serializer>(
        value: &Option<ExperimentId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_u64(id.get()),
            None => serializer.serialize_i64(NONE),
        }
    }

    /// Accept `null`, any negative number, or an experiment ID.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ExperimentId>, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|n| u64::try_from(n).ok())
            .map(ExperimentId::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_project() -> Project {
        let mut experiment = Experiment::new(ExperimentId::new(2), ProjectId::new(1), "baseline");
        experiment.aspect_configurations.push(AspectConfiguration {
            id: 10,
            instance_path: "hh.electrical".into(),
            ..AspectConfiguration::default()
        });
        Project {
            experiments: vec![experiment],
            ..Project::new(ProjectId::new(1), "hodgkin-huxley")
        }
    }

    #[test]
    fn sentinel_deserializes_to_none() {
        let p: Project = serde_json::from_value(json!({
            "id": 1, "name": "p", "activeExperimentId": -1
        }))
        .unwrap();
        assert_eq!(p.active_experiment_id, None);
    }

    #[test]
    fn missing_and_null_active_experiment_are_none() {
        let a: Project = serde_json::from_value(json!({"id": 1, "name": "p"})).unwrap();
        let b: Project =
            serde_json::from_value(json!({"id": 1, "name": "p", "activeExperimentId": null}))
                .unwrap();
        assert_eq!(a.active_experiment_id, None);
        assert_eq!(b.active_experiment_id, None);
    }

    #[test]
    fn active_experiment_serializes_sentinel() {
        let p = Project::new(ProjectId::new(3), "p");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["activeExperimentId"], -1);

        let p = Project {
            active_experiment_id: Some(ExperimentId::new(9)),
            ..p
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["activeExperimentId"], 9);
    }

    #[test]
    fn experiment_lookup_scans_by_id() {
        let p = sample_project();
        assert_eq!(p.experiment(ExperimentId::new(2)).unwrap().name, "baseline");
        assert!(p.experiment(ExperimentId::new(3)).is_none());
    }

    #[test]
    fn aspect_lookup_by_instance_path() {
        let mut p = sample_project();
        let e = p.experiment_mut(ExperimentId::new(2)).unwrap();
        assert!(e.aspect_configuration("hh.electrical").is_some());
        assert!(e.aspect_configuration("hh.mechanical").is_none());
        e.aspect_configuration_mut("hh.electrical")
            .unwrap()
            .simulator_configuration
            .timestep = 0.01;
        assert!((e.aspect_configurations[0].simulator_configuration.timestep - 0.01).abs() < f32::EPSILON);
    }

    #[test]
    fn status_uses_upper_case_on_the_wire() {
        assert_eq!(
            serde_json::to_value(ExperimentStatus::Completed).unwrap(),
            json!("COMPLETED")
        );
    }

    #[test]
    fn parameters_omitted_until_created() {
        let config = SimulatorConfiguration::default();
        let v = serde_json::to_value(&config).unwrap();
        assert!(v.get("parameters").is_none());
        assert_eq!(v["simulatorId"], "");
    }
}

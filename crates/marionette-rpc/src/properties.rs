//! Typed property patches for experiments and projects.
//!
//! A patch is parsed and validated in full before anything is mutated, so a
//! rejected key leaves the experiment untouched.

use marionette_core::{Entity, Experiment, ExperimentId, Project, ProjectId, SimulatorConfiguration};

/// Prefix of keys that set a free-form simulator parameter.
pub const SIMULATOR_PARAMETER_PREFIX: &str = "SP$";

/// Sibling key naming the aspect targeted by aspect-scoped properties.
pub const ASPECT_KEY: &str = "aspectInstancePath";

/// Rejected property patch.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Key not recognised for an experiment.
    #[error("Unknown property '{key}' for experiment {experiment_id}")]
    UnknownKey {
        /// Offending key.
        key: String,
        /// Experiment being patched.
        experiment_id: ExperimentId,
    },

    /// Key not recognised for a project.
    #[error("Unknown property '{key}' for project {project_id}")]
    UnknownProjectKey {
        /// Offending key.
        key: String,
        /// Project being patched.
        project_id: ProjectId,
    },

    /// Numeric property with a non-numeric value.
    #[error("Property '{key}' expects a number, got '{value}'")]
    InvalidNumber {
        /// Offending key.
        key: String,
        /// Value received.
        value: String,
    },

    /// Aspect-scoped property without `aspectInstancePath`.
    #[error("Property '{key}' requires {ASPECT_KEY}")]
    MissingAspect {
        /// Offending key.
        key: String,
    },

    /// `aspectInstancePath` names no aspect of the experiment.
    #[error("Aspect {instance_path} not found in experiment {experiment_id}")]
    AspectNotFound {
        /// Requested aspect.
        instance_path: String,
        /// Experiment being patched.
        experiment_id: ExperimentId,
    },
}

/// One recognised experiment property.
#[derive(Clone, Debug, PartialEq)]
pub enum ExperimentProperty {
    /// Experiment name.
    Name(String),
    /// Experiment description.
    Description(String),
    /// Experiment script URL.
    Script(String),
    /// Simulator time step.
    TimeStep(f32),
    /// Simulation length.
    Length(f32),
    /// Simulator service id.
    SimulatorId(String),
    /// Conversion service id.
    ConversionServiceId(String),
    /// `SP$<name>` parameter.
    SimulatorParameter {
        /// Parameter name without the prefix.
        name: String,
        /// Parameter value.
        value: String,
    },
}

impl ExperimentProperty {
    /// Whether the property lives on an aspect's simulator configuration.
    pub fn is_aspect_scoped(&self) -> bool {
        !matches!(self, Self::Name(_) | Self::Description(_) | Self::Script(_))
    }

    fn parse(key: &str, value: String, experiment_id: ExperimentId) -> Result<Self, PatchError> {
        let number = |value: String| {
            value
                .trim()
                .parse::<f32>()
                .map_err(|_| PatchError::InvalidNumber {
                    key: key.to_owned(),
                    value,
                })
        };
        Ok(match key {
            "name" => Self::Name(value),
            "description" => Self::Description(value),
            "script" => Self::Script(value),
            "timeStep" => Self::TimeStep(number(value)?),
            "length" => Self::Length(number(value)?),
            "simulatorId" => Self::SimulatorId(value),
            "conversionServiceId" => Self::ConversionServiceId(value),
            _ => match key.strip_prefix(SIMULATOR_PARAMETER_PREFIX) {
                Some(name) if !name.is_empty() => Self::SimulatorParameter {
                    name: name.to_owned(),
                    value,
                },
                _ => {
                    return Err(PatchError::UnknownKey {
                        key: key.to_owned(),
                        experiment_id,
                    });
                }
            },
        })
    }
}

/// Validated set of experiment property updates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExperimentPatch {
    /// Target of aspect-scoped properties.
    pub aspect: Option<String>,
    /// Updates in the order received.
    pub properties: Vec<ExperimentProperty>,
}

impl ExperimentPatch {
    /// Parse key/value pairs. Any unrecognised key rejects the whole patch.
    pub fn parse(
        pairs: impl IntoIterator<Item = (String, String)>,
        experiment_id: ExperimentId,
    ) -> Result<Self, PatchError> {
        let mut patch = Self::default();
        for (key, value) in pairs {
            if key == ASPECT_KEY {
                patch.aspect = Some(value);
                continue;
            }
            patch
                .properties
                .push(ExperimentProperty::parse(&key, value, experiment_id)?);
        }
        Ok(patch)
    }

    /// Whether nothing would change.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Apply to `experiment` and return the entities to persist.
    ///
    /// The target aspect is checked before the first mutation.
    pub fn apply(&self, experiment: &mut Experiment) -> Result<Vec<Entity>, PatchError> {
        let scoped = self.properties.iter().find(|p| p.is_aspect_scoped());
        let aspect_path = match (scoped, &self.aspect) {
            (None, _) => None,
            (Some(property), None) => {
                return Err(PatchError::MissingAspect {
                    key: property_key(property),
                });
            }
            (Some(_), Some(path)) => {
                if experiment.aspect_configuration(path).is_none() {
                    return Err(PatchError::AspectNotFound {
                        instance_path: path.clone(),
                        experiment_id: experiment.id,
                    });
                }
                Some(path.as_str())
            }
        };

        let mut experiment_touched = false;
        for property in &self.properties {
            match property {
                ExperimentProperty::Name(v) => experiment.name.clone_from(v),
                ExperimentProperty::Description(v) => experiment.description = Some(v.clone()),
                ExperimentProperty::Script(v) => experiment.script = Some(v.clone()),
                scoped => {
                    if let Some(aspect) =
                        aspect_path.and_then(|path| experiment.aspect_configuration_mut(path))
                    {
                        configure(&mut aspect.simulator_configuration, scoped);
                    }
                    continue;
                }
            }
            experiment_touched = true;
        }

        let mut entities = Vec::new();
        if experiment_touched {
            entities.push(Entity::Experiment(experiment.clone()));
        }
        if let Some(path) = aspect_path {
            if let Some(aspect) = experiment.aspect_configuration(path) {
                entities.push(Entity::SimulatorConfiguration {
                    project_id: experiment.project_id,
                    experiment_id: experiment.id,
                    instance_path: path.to_owned(),
                    configuration: aspect.simulator_configuration.clone(),
                });
            }
        }
        Ok(entities)
    }
}

fn configure(config: &mut SimulatorConfiguration, property: &ExperimentProperty) {
    match property {
        ExperimentProperty::TimeStep(v) => config.timestep = *v,
        ExperimentProperty::Length(v) => config.length = *v,
        ExperimentProperty::SimulatorId(v) => config.simulator_id.clone_from(v),
        ExperimentProperty::ConversionServiceId(v) => {
            config.conversion_service_id = Some(v.clone());
        }
        ExperimentProperty::SimulatorParameter { name, value } => {
            let _ = config
                .parameters
                .get_or_insert_with(Default::default)
                .insert(name.clone(), value.clone());
        }
        ExperimentProperty::Name(_)
        | ExperimentProperty::Description(_)
        | ExperimentProperty::Script(_) => {}
    }
}

fn property_key(property: &ExperimentProperty) -> String {
    match property {
        ExperimentProperty::Name(_) => "name".into(),
        ExperimentProperty::Description(_) => "description".into(),
        ExperimentProperty::Script(_) => "script".into(),
        ExperimentProperty::TimeStep(_) => "timeStep".into(),
        ExperimentProperty::Length(_) => "length".into(),
        ExperimentProperty::SimulatorId(_) => "simulatorId".into(),
        ExperimentProperty::ConversionServiceId(_) => "conversionServiceId".into(),
        ExperimentProperty::SimulatorParameter { name, .. } => {
            format!("{SIMULATOR_PARAMETER_PREFIX}{name}")
        }
    }
}

/// Validated project property updates. Only `name` is editable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectPatch {
    /// New project name.
    pub name: Option<String>,
}

impl ProjectPatch {
    /// Parse key/value pairs.
    pub fn parse(
        pairs: impl IntoIterator<Item = (String, String)>,
        project_id: ProjectId,
    ) -> Result<Self, PatchError> {
        let mut patch = Self::default();
        for (key, value) in pairs {
            if key == "name" {
                patch.name = Some(value);
            } else {
                return Err(PatchError::UnknownProjectKey { key, project_id });
            }
        }
        Ok(patch)
    }

    /// Apply to `project`; returns the entity to persist when anything changed.
    pub fn apply(&self, project: &mut Project) -> Option<Entity> {
        let name = self.name.as_ref()?;
        project.name.clone_from(name);
        Some(Entity::Project(project.clone()))
    }
}

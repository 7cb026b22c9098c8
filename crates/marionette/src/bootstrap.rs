//! Build the process-wide collaborators from settings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use marionette_core::{
    AuthProvider, DataManager, FormatCatalog, InMemoryDataManager, JsonTreeSerializer,
    LocalManagerFactory, ModelFormat, Project,
};
use marionette_rpc::{HttpFetcher, ServiceContext};
use marionette_server::{ConnectionRegistry, Pages, SettingsAuthProvider};
use marionette_settings::MarionetteSettings;
use tracing::{info, warn};

/// Everything the server needs, built once at startup.
pub struct Wiring {
    /// Collaborators shared by every session.
    pub services: Arc<ServiceContext>,
    /// The registry `services` deregisters from.
    pub connections: Arc<ConnectionRegistry>,
    /// Page routes and their auth sources.
    pub pages: Pages,
}

/// Read and parse every seed project document.
pub async fn load_seed_projects(
    paths: &[PathBuf],
    parser: &dyn DataManager,
) -> Result<Vec<Project>> {
    let mut projects = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed project {}", path.display()))?;
        let project = parser
            .project_from_json(&raw)
            .with_context(|| format!("Failed to parse seed project {}", path.display()))?;
        info!(project_id = %project.id, name = %project.name, "seed project loaded");
        projects.push(project);
    }
    Ok(projects)
}

/// Wire the data backend, manager factory, fetcher, and page routes.
pub async fn wire(settings: &MarionetteSettings) -> Result<Wiring> {
    let storage = &settings.storage;
    let base = if storage.persistent {
        InMemoryDataManager::persistent()
    } else {
        InMemoryDataManager::new()
    };
    let seeds = load_seed_projects(&storage.seed_projects, &base).await?;
    let data = base.with_projects(seeds);

    let exports = settings
        .formats
        .model
        .iter()
        .map(ModelFormat::new)
        .collect::<Vec<_>>();
    let fetcher = match &storage.file_root {
        Some(root) => HttpFetcher::new().with_file_root(root),
        None => HttpFetcher::new(),
    };
    let connections = Arc::new(ConnectionRegistry::new());
    let services = Arc::new(ServiceContext {
        data: Arc::new(data),
        formats: Arc::new(FormatCatalog::new(
            settings.formats.model.iter().cloned(),
            settings.formats.results.iter().cloned(),
        )),
        serializer: Arc::new(JsonTreeSerializer),
        managers: Arc::new(LocalManagerFactory::new(
            storage.archive_dir.join("exports"),
            exports,
        )),
        fetcher: Arc::new(fetcher),
        connections: connections.clone(),
        archive_root: storage.archive_dir.clone(),
        version: settings.version.clone(),
    });

    let auth = SettingsAuthProvider::new(&settings.auth);
    if let Err(e) = auth.service() {
        warn!(error = %e, "auth service unavailable, application view will redirect");
    }
    let pages = Pages::new(
        settings.views.clone(),
        Arc::new(auth),
        settings.auth.fallback_redirect.clone(),
    );

    Ok(Wiring {
        services,
        connections,
        pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_core::ProjectId;

    #[tokio::test]
    async fn seed_projects_are_parsed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        std::fs::write(&first, r#"{"id": 1, "name": "alpha"}"#).unwrap();
        std::fs::write(&second, r#"{"id": 2, "name": "beta"}"#).unwrap();

        let projects = load_seed_projects(&[first, second], &InMemoryDataManager::new())
            .await
            .unwrap();
        let names: Vec<_> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[tokio::test]
    async fn missing_seed_file_names_the_path() {
        let missing = [PathBuf::from("/no/such/seed.json")];
        let err = load_seed_projects(&missing, &InMemoryDataManager::new())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("/no/such/seed.json"));
    }

    #[tokio::test]
    async fn wired_backend_follows_storage_settings() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed.json");
        std::fs::write(&seed, r#"{"id": 7, "name": "seeded"}"#).unwrap();

        let mut settings = MarionetteSettings::default();
        settings.storage.persistent = true;
        settings.storage.seed_projects = vec![seed];
        settings.storage.archive_dir = dir.path().join("archive");
        settings.version = "9.9.9".into();

        let wiring = wire(&settings).await.unwrap();
        let services = &wiring.services;
        assert!(!services.data.is_default());
        assert_eq!(services.version, "9.9.9");
        let project = services.data.project_by_id(ProjectId::new(7)).await.unwrap();
        assert_eq!(project.map(|p| p.name), Some("seeded".to_owned()));
        assert!(services.formats.model_format("NeuroML").is_some());
    }
}

//! Subcommand implementations.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use errqr_common::ErrqrError;
use errqr_net::{Fetch, LoaderConfig, Request, ResourceLoader, Response};
use errqr_report::{
    DataStore, ErrorOptions, FormControls, OrderNumber, Photo, ReportForm, ReportSubmitter,
};
use errqr_sw::{
    CacheStorage, HostEvent, LifecycleHandler, OfflineCacheController, ServiceWorkerHost,
    SqliteCacheStorage, SwConfig,
};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;

/// Fields of the `report` subcommand.
pub struct ReportArgs {
    pub order: String,
    pub category: String,
    pub sub_category: String,
    pub description: String,
    pub photo: Option<std::path::PathBuf>,
    pub photo_type: Option<String>,
}

/// Shared handles for one CLI invocation.
pub struct App {
    config: AppConfig,
    network: Arc<dyn Fetch>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let loader = ResourceLoader::new(LoaderConfig::default())
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            network: Arc::new(loader),
        })
    }

    fn caches(&self) -> Result<Arc<dyn CacheStorage>> {
        let storage = SqliteCacheStorage::open_path(&self.config.cache_db)
            .map_err(|e| failure("Failed to open cache database", e))
            .with_context(|| format!("Cache database {}", self.config.cache_db.display()))?;
        Ok(Arc::new(storage))
    }

    fn controller(&self) -> Result<OfflineCacheController> {
        let sw_config = SwConfig::new(self.config.origin.clone());
        OfflineCacheController::new(sw_config, self.caches()?, Arc::clone(&self.network))
            .map_err(|e| failure("Invalid worker config", e))
    }

    fn data_store(&self) -> Option<DataStore> {
        match DataStore::new(&self.config.store, Arc::clone(&self.network)) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "Data store unavailable");
                None
            }
        }
    }

    /// Register the controller and run install (and activate, if it skips waiting).
    pub async fn install(&self) -> Result<()> {
        let controller = Arc::new(self.controller()?);
        let (host, mut events) = ServiceWorkerHost::new();

        let result = host.register(controller.clone()).await;
        drop(host);
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
        let outcome = result.map_err(|e| failure("Install failed", e))?;

        println!("Installed {}", controller.version());
        for url in &outcome.cached {
            println!("  cached {url}");
        }
        if outcome.skip_waiting {
            println!("Activated {}", controller.version());
        }
        Ok(())
    }

    /// Run the activate step: drop every cache but the current one.
    ///
    /// Refuses while the current version has no cache, so a missing or failed
    /// install never deletes the last working cache.
    pub async fn activate(&self) -> Result<()> {
        let controller = self.controller()?;
        let installed = controller
            .caches()
            .has(controller.version())
            .await
            .map_err(|e| failure("Activate failed", e))?;
        if !installed {
            let missing = ErrqrError::NotFound(format!("cache {}", controller.version()));
            return Err(failure("Activate failed", missing)
                .context("Run `errqr install` before `errqr activate`"));
        }

        let outcome = controller
            .on_activate()
            .await
            .map_err(|e| failure("Activate failed", e))?;

        if outcome.deleted.is_empty() {
            println!("No stale caches");
        }
        for name in &outcome.deleted {
            println!("Deleted {name}");
        }
        Ok(())
    }

    /// Fetch through the controller. Without an installed cache the request
    /// goes straight to the network.
    pub async fn fetch(&self, target: &str, navigate: bool, include_headers: bool) -> Result<()> {
        let url = self
            .config
            .origin
            .join(target)
            .with_context(|| format!("Invalid URL '{target}'"))?;
        let request = if navigate {
            Request::navigate(url)
        } else {
            Request::get(url)
        };

        let controller = self.controller()?;
        let installed = controller
            .caches()
            .has(controller.version())
            .await
            .unwrap_or(false);

        let response = if installed {
            let response = controller.on_fetch(request).await;
            controller.flush().await;
            response
        } else {
            warn!(cache = controller.version(), "Not installed, fetching from network");
            self.network
                .fetch(&request)
                .await
                .map_err(|e| failure("Fetch failed", e))?
        };

        print_response(&response, include_headers)
    }

    /// List cache names and their entries.
    pub async fn caches_list(&self) -> Result<()> {
        let caches = self.caches()?;
        let names = caches
            .keys()
            .await
            .map_err(|e| failure("Listing caches failed", e))?;
        if names.is_empty() {
            println!("No caches");
        }
        for name in names {
            let requests = caches
                .requests(&name)
                .await
                .map_err(|e| failure("Listing caches failed", e))?;
            println!("{name} ({} entries)", requests.len());
            for key in requests {
                println!("  {key}");
            }
        }
        Ok(())
    }

    /// Print categories, or the sub-categories of one category.
    pub async fn options(&self, category: Option<&str>) -> Result<()> {
        let store = self.data_store();
        let options = ErrorOptions::load(store.as_ref()).await;
        if options.is_empty() {
            println!("No options found");
            return Ok(());
        }

        let selected = match category {
            Some(category) => Some(category.to_string()),
            None => {
                let default = options.default_category();
                for c in options.categories() {
                    let marker = if Some(&c) == default.as_ref() { "*" } else { " " };
                    println!("{marker} {}", ErrorOptions::label(&c));
                }
                default
            }
        };

        if let Some(category) = selected {
            println!("Sub-categories of {}:", ErrorOptions::label(&category));
            for sub in options.sub_categories(&category) {
                println!("  {}", ErrorOptions::label(&sub));
            }
        }
        Ok(())
    }

    /// Take decoded QR text as the order number and show the form state.
    pub fn scan(&self, text: &str) {
        let order = OrderNumber::from_decoded(text);
        let controls = FormControls::derive(order.as_ref(), self.config.store.is_configured());

        match &order {
            Some(order) => println!("Order number set: {order}"),
            None => println!("Nothing decoded"),
        }
        println!("  form visible: {}", controls.form_visible);
        println!("  submit enabled: {}", controls.submit_enabled);
        println!("  clear enabled: {}", controls.clear_enabled);
    }

    /// Submit an error report.
    pub async fn report(&self, args: ReportArgs) -> Result<()> {
        let photo = match &args.photo {
            Some(path) => Some(read_photo(path, args.photo_type.as_deref()).await?),
            None => None,
        };
        let form = ReportForm {
            order_no: args.order,
            category: args.category,
            sub_category: args.sub_category,
            description: args.description,
        };

        let submitter = ReportSubmitter::new(self.data_store());
        match submitter.submit(&form, photo.as_ref()).await {
            Ok(row) => {
                info!(id = ?row.id, "Report stored");
                println!("{}", errqr_report::submit::REPORT_ADDED);
                if let Some(image) = row.image {
                    println!("  image {image}");
                }
                Ok(())
            }
            Err(e) => {
                let message = e.user_message();
                let err = ErrqrError::from(e);
                error!(
                    category = err.category(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Report failed"
                );
                bail!(message)
            }
        }
    }
}

async fn read_photo(path: &Path, mime: Option<&str>) -> Result<Photo> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read photo {}", path.display()))?;
    let guessed = mime_guess::from_path(path).first_raw();
    Ok(Photo::new(bytes, mime.or(guessed)))
}

/// Log a crate error under its category and wrap it for the CLI.
fn failure(what: &'static str, err: impl Into<ErrqrError>) -> anyhow::Error {
    let err = err.into();
    error!(
        category = err.category(),
        retryable = err.is_retryable(),
        error = %err,
        "{what}"
    );
    anyhow::Error::new(err).context(what)
}

fn log_event(event: &HostEvent) {
    match event {
        HostEvent::StateChange {
            worker_id,
            new_state,
        } => debug!(worker = ?worker_id, state = ?new_state, "Worker state changed"),
        HostEvent::UpdateFound { worker_id } => debug!(worker = ?worker_id, "Update found"),
        HostEvent::ControllerChange { worker_id } => {
            debug!(worker = ?worker_id, "Controller changed")
        }
    }
}

fn print_response(response: &Response, include_headers: bool) -> Result<()> {
    let mut out = std::io::stdout().lock();
    if include_headers {
        writeln!(out, "{} {}", response.status.as_u16(), response.status_text)?;
        for (name, value) in &response.headers {
            writeln!(out, "{}: {}", name, value.to_str().unwrap_or("<binary>"))?;
        }
        writeln!(out)?;
    }
    out.write_all(&response.body)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, Overrides};
    use errqr_report::StoreConfig;
    use errqr_sw::STATIC_CACHE;

    const OLD_CACHE: &str = "errqr-static-v1";

    fn app_with_db(path: &Path) -> App {
        let config = AppConfig::resolve(
            FileConfig::default(),
            StoreConfig::default(),
            Overrides {
                origin: Some("https://errqr.example.com".into()),
                cache_db: Some(path.to_path_buf()),
                ..Default::default()
            },
        )
        .unwrap();
        App::new(config).unwrap()
    }

    async fn seed(path: &Path, names: &[&str]) {
        let storage = SqliteCacheStorage::open_path(path).unwrap();
        for name in names {
            storage.open(name).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_activate_without_install_keeps_old_cache() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("caches.db");
        seed(&db, &[OLD_CACHE]).await;

        let err = app_with_db(&db).activate().await.unwrap_err();
        let cause = err.downcast_ref::<ErrqrError>().unwrap();
        assert_eq!(cause.category(), "not_found");
        assert!(format!("{err:#}").contains(STATIC_CACHE));

        let storage = SqliteCacheStorage::open_path(&db).unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec![OLD_CACHE.to_string()]);
    }

    #[tokio::test]
    async fn test_activate_after_install_deletes_old_cache() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("caches.db");
        seed(&db, &[OLD_CACHE, STATIC_CACHE]).await;

        app_with_db(&db).activate().await.unwrap();

        let storage = SqliteCacheStorage::open_path(&db).unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec![STATIC_CACHE.to_string()]);
    }

    #[test]
    fn test_failure_keeps_category() {
        let err = failure("Fetch failed", errqr_net::NetError::InvalidUrl("x".into()));
        assert_eq!(err.to_string(), "Fetch failed");
        assert_eq!(err.downcast_ref::<ErrqrError>().unwrap().category(), "network");
    }
}

//! In-process applications used as a transport.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AppError, HttpError};
use crate::http::{HttpClient, HttpRequest, HttpResponse};

/// An application that handles requests without a network hop.
#[async_trait]
pub trait App: Send + Sync {
    async fn startup(&self) -> Result<(), String> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), String> {
        Ok(())
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Client that hands requests to an [`App`] once it is started.
pub struct AppTransport {
    name: String,
    app: Arc<dyn App>,
    started: Arc<AtomicBool>,
}

#[async_trait]
impl HttpClient for AppTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(AppError::NotRunning(self.name.clone()).into());
        }
        self.app.handle(request).await
    }
}

fn app_key(app: &Arc<dyn App>) -> usize {
    Arc::as_ptr(app) as *const () as usize
}

/// Applications currently started by some job.
#[derive(Clone, Default)]
pub struct RunningApps {
    running: Arc<Mutex<HashSet<usize>>>,
}

impl RunningApps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, app: &Arc<dyn App>) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&app_key(app))
    }

    /// Starts `app` and returns the guard that owns its lifespan.
    ///
    /// Fails with [`AppError::AlreadyRunning`] while another guard holds the
    /// same application.
    pub async fn start(&self, name: &str, app: Arc<dyn App>) -> Result<AppGuard, AppError> {
        let key = app_key(&app);
        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if !running.insert(key) {
                return Err(AppError::AlreadyRunning(name.to_string()));
            }
        }
        let mut guard = AppGuard {
            name: name.to_string(),
            app,
            key,
            started: Arc::new(AtomicBool::new(false)),
            running: self.running.clone(),
            released: false,
        };
        if let Err(message) = guard.app.startup().await {
            guard.release();
            return Err(AppError::Lifecycle {
                app: guard.name.clone(),
                stage: "startup",
                message,
            });
        }
        guard.started.store(true, Ordering::SeqCst);
        debug!(app = %guard.name, "application started");
        Ok(guard)
    }
}

/// Holds an application's running mark; dropping it releases the mark.
pub struct AppGuard {
    name: String,
    app: Arc<dyn App>,
    key: usize,
    started: Arc<AtomicBool>,
    running: Arc<Mutex<HashSet<usize>>>,
    released: bool,
}

impl AppGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> AppTransport {
        AppTransport {
            name: self.name.clone(),
            app: self.app.clone(),
            started: self.started.clone(),
        }
    }

    /// Stops the application. Transports handed out earlier reject
    /// further requests.
    pub async fn shutdown(mut self) -> Result<(), AppError> {
        self.started.store(false, Ordering::SeqCst);
        let result = self.app.shutdown().await;
        self.release();
        debug!(app = %self.name, "application stopped");
        result.map_err(|message| AppError::Lifecycle {
            app: self.name.clone(),
            stage: "shutdown",
            message,
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl Drop for AppGuard {
    fn drop(&mut self) {
        if !self.released {
            self.started.store(false, Ordering::SeqCst);
            warn!(app = %self.name, "application guard dropped without shutdown");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl App for Echo {
        async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            Ok(HttpResponse::new(200, request.url))
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected_until_release() {
        let apps = RunningApps::new();
        let app: Arc<dyn App> = Arc::new(Echo);
        let guard = apps.start("echo", app.clone()).await.expect("start");
        assert!(apps.is_running(&app));
        let err = apps.start("echo", app.clone()).await.err().expect("already running");
        assert_eq!(err, AppError::AlreadyRunning("echo".into()));

        drop(guard);
        assert!(!apps.is_running(&app));
        let guard = apps.start("echo", app).await.expect("restart");
        guard.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn transport_refuses_requests_after_shutdown() {
        let apps = RunningApps::new();
        let guard = apps.start("echo", Arc::new(Echo)).await.expect("start");
        let transport = guard.transport();
        let request = HttpRequest::new(reqjob_core::schema::Method::Get, "http://app/x");
        assert_eq!(transport.send(request.clone()).await.expect("send").text(), "http://app/x");

        guard.shutdown().await.expect("shutdown");
        let err = transport.send(request).await.expect_err("stopped");
        assert!(matches!(err, HttpError::App(AppError::NotRunning(_))));
    }
}

//! Event hooks run around each request.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqjob_core::schema::HookPhase;
use tracing::{debug, warn};

use crate::error::{HookError, VerifyError};
use crate::http::{HttpRequest, HttpResponse};

/// What a hook sees in each phase.
#[derive(Debug)]
pub enum HookEvent<'a> {
    BuildRequest(&'a mut HttpRequest),
    Request(&'a HttpRequest),
    Response(&'a HttpResponse),
    Expect {
        response: &'a HttpResponse,
        errors: &'a [VerifyError],
    },
    Success(&'a HttpResponse),
    Error {
        response: &'a HttpResponse,
        errors: &'a [VerifyError],
    },
    Complete(&'a HttpResponse),
    /// Transport and hook failures, rendered.
    Exception(&'a [String]),
}

impl HookEvent<'_> {
    pub fn phase(&self) -> HookPhase {
        match self {
            HookEvent::BuildRequest(_) => HookPhase::BuildRequest,
            HookEvent::Request(_) => HookPhase::Request,
            HookEvent::Response(_) => HookPhase::Response,
            HookEvent::Expect { .. } => HookPhase::Expect,
            HookEvent::Success(_) => HookPhase::Success,
            HookEvent::Error { .. } => HookPhase::Error,
            HookEvent::Complete(_) => HookPhase::Complete,
            HookEvent::Exception(_) => HookPhase::Exception,
        }
    }
}

pub trait Hook: Send + Sync {
    fn call(&self, event: &mut HookEvent<'_>) -> Result<(), HookError>;
}

impl<F> Hook for F
where
    F: Fn(&mut HookEvent<'_>) -> Result<(), HookError> + Send + Sync,
{
    fn call(&self, event: &mut HookEvent<'_>) -> Result<(), HookError> {
        self(event)
    }
}

/// A hook together with the reference it was resolved from.
#[derive(Clone)]
pub struct NamedHook {
    pub name: String,
    pub hook: Arc<dyn Hook>,
}

impl std::fmt::Debug for NamedHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedHook").field("name", &self.name).finish()
    }
}

/// Resolved hooks for one task, per phase.
#[derive(Debug, Clone, Default)]
pub struct TaskHooks {
    phases: BTreeMap<HookPhase, Vec<NamedHook>>,
}

impl TaskHooks {
    pub fn push(&mut self, phase: HookPhase, hook: NamedHook) {
        self.phases.entry(phase).or_default().push(hook);
    }

    pub fn get(&self, phase: HookPhase) -> &[NamedHook] {
        self.phases.get(&phase).map_or(&[], Vec::as_slice)
    }

    /// Runs every hook of the event's phase in order. A failing hook does not
    /// stop the ones after it; all failures are returned.
    pub fn dispatch(&self, event: &mut HookEvent<'_>) -> Vec<HookError> {
        let mut failures = Vec::new();
        for named in self.get(event.phase()) {
            if let Err(err) = named.hook.call(event) {
                warn!(hook = %named.name, phase = %event.phase(), error = %err, "hook failed");
                failures.push(err);
            }
        }
        failures
    }
}

pub(crate) fn debug_request(event: &mut HookEvent<'_>) -> Result<(), HookError> {
    let request: &HttpRequest = match &*event {
        HookEvent::Request(request) => request,
        HookEvent::BuildRequest(request) => request,
        _ => return Ok(()),
    };
    debug!(
        method = %request.method,
        url = %request.full_url(),
        headers = ?request.headers,
        "request"
    );
    Ok(())
}

fn response_of<'a>(event: &HookEvent<'a>) -> Option<&'a HttpResponse> {
    match event {
        HookEvent::Response(r) | HookEvent::Success(r) | HookEvent::Complete(r) => Some(*r),
        HookEvent::Expect { response, .. } | HookEvent::Error { response, .. } => Some(*response),
        _ => None,
    }
}

pub(crate) fn debug_response(event: &mut HookEvent<'_>) -> Result<(), HookError> {
    let Some(response) = response_of(event) else {
        return Ok(());
    };
    debug!(
        status = response.status,
        url = %response.url,
        elapsed_ms = response.elapsed.as_millis() as u64,
        body = %response.text(),
        "response"
    );
    Ok(())
}

pub(crate) fn raise_for_status(event: &mut HookEvent<'_>) -> Result<(), HookError> {
    let Some(response) = response_of(event) else {
        return Ok(());
    };
    if response.is_error() {
        let side = if response.status < 500 { "Client" } else { "Server" };
        return Err(HookError::new(
            "reqjob.hooks:raise_for_status",
            format!(
                "{side} error '{} {}' for url '{}'",
                response.status,
                response.reason_phrase(),
                response.url
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_runs_every_hook_and_collects_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut hooks = TaskHooks::default();
        hooks.push(
            HookPhase::Response,
            NamedHook {
                name: "fail".into(),
                hook: Arc::new(|_: &mut HookEvent<'_>| -> Result<(), HookError> {
                    Err(HookError::new("fail", "boom"))
                }),
            },
        );
        hooks.push(
            HookPhase::Response,
            NamedHook {
                name: "count".into(),
                hook: Arc::new(move |_: &mut HookEvent<'_>| -> Result<(), HookError> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            },
        );
        let response = HttpResponse::new(200, "");
        let failures = hooks.dispatch(&mut HookEvent::Response(&response));
        assert_eq!(failures, vec![HookError::new("fail", "boom")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(hooks.dispatch(&mut HookEvent::Success(&response)).is_empty());
    }

    #[test]
    fn raise_for_status_rejects_error_codes() {
        let ok = HttpResponse::new(204, "");
        assert!(raise_for_status(&mut HookEvent::Response(&ok)).is_ok());
        let missing = HttpResponse::new(404, "");
        let err = raise_for_status(&mut HookEvent::Response(&missing)).expect_err("404");
        assert!(err.message.starts_with("Client error '404 Not Found'"));
    }
}

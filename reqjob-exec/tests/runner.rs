use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use reqjob_core::{Context, Loader, Profile};
use reqjob_exec::{
    App, AttrRegistry, CancelToken, Event, EventSink, HookError, HookEvent, HttpClient, HttpError,
    HttpRequest, HttpResponse, NoOpEventSink, PrepareError, RunError, Runner, RunningApps,
    TaskStatus,
};

#[derive(Default)]
struct Api {
    calls: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

#[async_trait]
impl App for Api {
    async fn startup(&self) -> Result<(), String> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = request.url.trim_start_matches("http://app.test");
        let (status, body) = match path {
            "/users/1" => (200, json!({"id": 1, "name": "ann"})),
            "/echo" => {
                let headers: serde_json::Map<_, _> = request
                    .headers
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), json!(v)))
                    .collect();
                let query: serde_json::Map<_, _> =
                    request.query.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                (
                    200,
                    json!({"method": request.method.as_str(), "headers": headers, "query": query}),
                )
            }
            "/fail" => return Err(HttpError::Network("refused".into())),
            _ => (404, json!({"detail": "not found"})),
        };
        Ok(HttpResponse::new(status, body.to_string()).with_header("content-type", "application/json"))
    }
}

struct Recorder {
    events: Arc<tokio::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl EventSink for Recorder {
    async fn emit(&self, event: Event) {
        self.events.lock().await.push(event.event_type().to_string());
    }
}

fn load(doc: &str) -> Profile {
    let value = Loader::new().parse_str(doc, None).unwrap();
    Profile::from_value(&value).unwrap()
}

fn registry(api: &Arc<Api>) -> AttrRegistry {
    let mut registry = AttrRegistry::new();
    registry.register_app("test.apps:api", api.clone()).unwrap();
    registry
}

fn recording_hook(registry: &mut AttrRegistry, path: &str) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    registry
        .register_hook(path, move |event: &mut HookEvent<'_>| -> Result<(), HookError> {
            let entry = match event {
                HookEvent::Exception(failures) => format!("exception: {}", failures.join(" | ")),
                other => other.phase().to_string(),
            };
            sink.lock().unwrap().push(entry);
            Ok(())
        })
        .unwrap();
    log
}

const USERS: &str = r#"
name: demo
base_url: http://app.test
app: test.apps:api
jobs:
  - name: users
    tasks:
      - name: get-user
        url: /users/{id}
        kwargs: {id: 1}
        expect:
          status_code: 200
          json: {id: 1, name: ann}
      - name: wrong-name
        url: /users/1
        expect:
          json: {name: bob}
      - name: missing
        url: /nothing
        expect:
          status_code: 404
"#;

#[tokio::test]
async fn tasks_run_in_order_and_verification_failures_do_not_abort() {
    let api = Arc::new(Api::default());
    let events = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let runner = Runner::new(registry(&api), Arc::new(Recorder { events: events.clone() }));

    let report = runner
        .run(&load(USERS), &Context::new(), &CancelToken::new())
        .await
        .unwrap();

    let statuses: Vec<_> = report.jobs[0]
        .tasks
        .iter()
        .map(|t| (t.name.as_str(), t.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("get-user", TaskStatus::Passed),
            ("wrong-name", TaskStatus::Failed),
            ("missing", TaskStatus::Passed),
        ]
    );
    assert!(!report.is_success());
    assert_eq!(report.jobs[0].tasks[1].errors[0].location(), "response.json.name");
    assert_eq!(report.jobs[0].tasks[0].status_code, Some(200));

    assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    assert_eq!(api.started.load(Ordering::SeqCst), 1);
    assert_eq!(api.stopped.load(Ordering::SeqCst), 1);

    let events = events.lock().await.clone();
    assert_eq!(events.first().map(String::as_str), Some("run.started"));
    assert_eq!(events.last().map(String::as_str), Some("run.finished"));
    assert_eq!(events.iter().filter(|e| *e == "task.finished").count(), 3);
}

#[tokio::test]
async fn hooks_run_in_pipeline_order() {
    let api = Arc::new(Api::default());
    let mut registry = registry(&api);
    let log = recording_hook(&mut registry, "test.hooks:record");
    let doc = r#"
base_url: http://app.test
app: test.apps:api
aliases:
  rec: test.hooks:record
event_hooks:
  build_request: [rec]
  request: [rec]
  response: [rec]
  expect: [rec]
  success: [rec]
  error: [rec]
  complete: [rec]
  exception: [rec]
jobs:
  - name: j
    tasks:
      - url: /users/1
        expect: {status_code: 200}
      - url: /users/1
        expect: {status_code: 500}
"#;
    let runner = Runner::new(registry, Arc::new(NoOpEventSink));
    runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap();

    let log = log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            "build_request", "request", "response", "expect", "success", "complete",
            "build_request", "request", "response", "expect", "error", "complete",
        ]
    );
}

#[tokio::test]
async fn env_headers_and_request_rewrites_reach_the_app() {
    let api = Arc::new(Api::default());
    let mut registry = registry(&api);
    registry
        .register_hook(
            "test.hooks:rewrite",
            |event: &mut HookEvent<'_>| -> Result<(), HookError> {
                if let HookEvent::BuildRequest(request) = event {
                    request.headers.push(("x-rewritten".into(), "yes".into()));
                }
                Ok(())
            },
        )
        .unwrap();
    let doc = r#"
base_url: http://app.test
app: test.apps:api
env:
  TOKEN: ${'abc' + '123'}
headers:
  authorization: ${'Bearer ' + env.TOKEN}
jobs:
  - name: j
    tasks:
      - url: /echo
        method: post
        params: {page: 2}
        event_hooks:
          build_request: [test.hooks:rewrite]
        expect:
          json:
            method: POST
            headers:
              authorization: Bearer abc123
              x-rewritten: "yes"
            query: {page: "2"}
"#;
    let runner = Runner::new(registry, Arc::new(NoOpEventSink));
    let report = runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    let task = &report.jobs[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Passed, "{:?}", task.errors);
}

#[tokio::test]
async fn transport_failures_reach_exception_hooks() {
    let api = Arc::new(Api::default());
    let mut registry = registry(&api);
    let log = recording_hook(&mut registry, "test.hooks:record");
    let doc = r#"
base_url: http://app.test
app: test.apps:api
jobs:
  - name: j
    event_hooks:
      exception: [test.hooks:record]
      response: [test.hooks:record]
    tasks:
      - url: /fail
      - url: /users/1
"#;
    let runner = Runner::new(registry, Arc::new(NoOpEventSink));
    let report = runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap();

    let tasks = &report.jobs[0].tasks;
    assert_eq!(tasks[0].status, TaskStatus::Errored);
    assert_eq!(tasks[0].failures, vec!["connect/dns/tls error: refused".to_string()]);
    assert_eq!(tasks[1].status, TaskStatus::Passed);
    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["exception: connect/dns/tls error: refused".to_string(), "response".to_string()]
    );
}

#[tokio::test]
async fn raise_for_status_marks_the_task_errored() {
    let api = Arc::new(Api::default());
    let doc = r#"
base_url: http://app.test
app: test.apps:api
jobs:
  - name: j
    event_hooks:
      response: [reqjob.hooks:raise_for_status]
    tasks:
      - url: /nothing
"#;
    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink));
    let report = runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    let task = &report.jobs[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Errored);
    assert!(task.failures[0].contains("404 Not Found"), "{:?}", task.failures);
}

#[tokio::test]
async fn cancelled_runs_skip_everything_without_starting_the_app() {
    let api = Arc::new(Api::default());
    let token = CancelToken::new();
    token.cancel();
    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink));
    let report = runner.run(&load(USERS), &Context::new(), &token).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.count(TaskStatus::Skipped), 3);
    assert_eq!(api.started.load(Ordering::SeqCst), 0);
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelling_mid_job_skips_the_rest_and_stops_the_app() {
    let api = Arc::new(Api::default());
    let token = CancelToken::new();
    let mut registry = registry(&api);
    let trigger = token.clone();
    registry
        .register_hook(
            "test.hooks:cancel",
            move |_: &mut HookEvent<'_>| -> Result<(), HookError> {
                trigger.cancel();
                Ok(())
            },
        )
        .unwrap();
    let doc = r#"
base_url: http://app.test
app: test.apps:api
jobs:
  - name: first
    tasks:
      - url: /users/1
        event_hooks:
          complete: [test.hooks:cancel]
      - url: /users/1
  - name: second
    tasks:
      - url: /users/1
"#;
    let runner = Runner::new(registry, Arc::new(NoOpEventSink));
    let report = runner.run(&load(doc), &Context::new(), &token).await.unwrap();

    let statuses: Vec<_> = report
        .jobs
        .iter()
        .flat_map(|j| j.tasks.iter().map(|t| t.status))
        .collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Passed, TaskStatus::Skipped, TaskStatus::Skipped]
    );
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.started.load(Ordering::SeqCst), 1);
    assert_eq!(api.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn an_app_cannot_serve_two_clients_at_once() {
    let api = Arc::new(Api::default());
    let apps = RunningApps::new();
    let guard = apps.start("test.apps:api", api.clone()).await.unwrap();

    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink)).with_running_apps(apps.clone());
    let report = runner
        .run(&load(USERS), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    for task in &report.jobs[0].tasks {
        assert_eq!(task.status, TaskStatus::Errored);
        assert_eq!(task.failures, vec!["application test.apps:api is already running".to_string()]);
    }
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);

    guard.shutdown().await.unwrap();
    let report = runner
        .run(&load(USERS), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.count(TaskStatus::Passed), 2);
}

#[tokio::test]
async fn configuration_errors_abort_before_any_request() {
    let api = Arc::new(Api::default());
    let doc = r#"
base_url: http://app.test
app: test.apps:api
jobs:
  - name: fine
    tasks:
      - url: /users/1
  - name: broken
    tasks:
      - url: /users/1
        event_hooks:
          response: [missing.mod:hook]
"#;
    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink));
    let err = runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(err, RunError::Prepare(PrepareError::AttrPath { .. })));
    assert_eq!(api.started.load(Ordering::SeqCst), 0);
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);

    let unbound = r#"
jobs:
  - name: j
    tasks:
      - url: http://app.test/users/{id}
"#;
    let err = runner
        .run(&load(unbound), &Context::new(), &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "jobs[0].tasks[0].url: missing keywords: id");

    let bad_env = "env:\n  X: ${1 / 0}\njobs: []\n";
    let err = runner
        .run(&load(bad_env), &Context::new(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Env { ref key, .. } if key == "X"));
}

struct Capture {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl HttpClient for Capture {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let auth = request.auth.as_ref().map(|a| a.header().1).unwrap_or_default();
        self.seen.lock().unwrap().push(format!("{} {} {auth}", request.method, request.full_url()));
        Ok(HttpResponse::new(204, ""))
    }
}

#[tokio::test]
async fn custom_transports_and_client_auth_defaults() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = AttrRegistry::new();
    let capture = seen.clone();
    registry
        .register_transport("test.transport:capture", move |_, _| {
            let client: Arc<dyn HttpClient> = Arc::new(Capture {
                seen: capture.clone(),
            });
            Ok(client)
        })
        .unwrap();
    let doc = r#"
base_url: https://api.test/v1/
transport: test.transport:capture
auth:
  type: reqjob.auth:BearerAuth
  args: [secret]
params: {page: 1}
jobs:
  - name: j
    tasks:
      - url: items
        expect: {status_code: 204}
      - url: items/{id}
        method: delete
        kwargs: {id: 9, force: true}
        auth:
          type: reqjob.auth:HTTPBasicAuth
          kwargs: {username: u, password: p}
"#;
    let runner = Runner::new(registry, Arc::new(NoOpEventSink));
    let report = runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(
        seen.lock().unwrap().clone(),
        vec![
            "GET https://api.test/v1/items?page=1 Bearer secret".to_string(),
            "DELETE https://api.test/v1/items/9?page=1&force=true Basic dTpw".to_string(),
        ]
    );
}

#[tokio::test]
async fn tag_filters_select_jobs() {
    let api = Arc::new(Api::default());
    let doc = r#"
base_url: http://app.test
app: test.apps:api
tags: [nightly]
jobs:
  - name: smoke
    tags: [smoke]
    tasks:
      - url: /users/1
  - name: full
    tasks:
      - url: /users/1
"#;
    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink)).with_tags(["smoke".to_string()]);
    let report = runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    let names: Vec<_> = report.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["smoke"]);

    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink)).with_tags(["nightly".to_string()]);
    let report = runner
        .run(&load(doc), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.jobs.len(), 2);
}

#[tokio::test]
async fn reports_serialize_for_output() {
    let api = Arc::new(Api::default());
    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink));
    let report = runner
        .run(&load(USERS), &Context::new(), &CancelToken::new())
        .await
        .unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["jobs"][0]["tasks"][0]["status"], "passed");
    assert_eq!(value["jobs"][0]["tasks"][1]["errors"][0]["type"], "ValueMismatch");
    assert_eq!(value["jobs"][0]["tasks"][1]["errors"][0]["actual"], "ann");
}

#[tokio::test]
async fn caller_env_overrides_profile_env() {
    let api = Arc::new(Api::default());
    let doc = r#"
base_url: http://app.test
app: test.apps:api
env:
  TOKEN: from-profile
  HEADER: ${'Bearer ' + env.TOKEN}
headers:
  authorization: ${env.HEADER}
jobs:
  - name: j
    tasks:
      - url: /echo
        expect:
          json:
            headers: {authorization: Bearer from-cli}
"#;
    let runner = Runner::new(registry(&api), Arc::new(NoOpEventSink));
    let context = Context::new().with_env("TOKEN", "from-cli");
    let report = runner
        .run(&load(doc), &context, &CancelToken::new())
        .await
        .unwrap();
    let task = &report.jobs[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Passed, "{:?}", task.errors);
}

use std::path::Path;
use std::sync::Arc;

use reqjob_exec::{
    AttrRegistry, CancelToken, CompositeEventSink, EventSink, NoOpEventSink, Runner,
    StdoutEventSink, TracingEventSink,
};
use tracing::warn;

use crate::exit_codes;
use crate::output::{print_error, print_report};
use crate::{EventsTarget, OutputArgs, SourceArgs};

use super::load_profile;

fn event_sink(events: EventsTarget) -> Arc<dyn EventSink> {
    let mut sink = CompositeEventSink::new();
    match events {
        EventsTarget::None => {}
        EventsTarget::Stdout => sink.add(Box::new(StdoutEventSink)),
        EventsTarget::Log => sink.add(Box::new(TracingEventSink)),
    }
    if sink.is_empty() {
        Arc::new(NoOpEventSink)
    } else {
        Arc::new(sink)
    }
}

pub async fn run_cmd(
    path: &Path,
    source: SourceArgs,
    tags: &[String],
    events: EventsTarget,
    output: OutputArgs,
) -> i32 {
    let profile = match load_profile(path, &source) {
        Ok(p) => p,
        Err(failure) => {
            for message in failure.messages() {
                print_error(output.format, output.quiet, &message);
            }
            return failure.exit_code();
        }
    };

    let runner = Runner::new(AttrRegistry::new(), event_sink(events)).with_tags(tags.iter().cloned());
    let token = CancelToken::new();
    let trigger = token.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, skipping remaining tasks");
            trigger.cancel();
        }
    });

    let result = runner.run(&profile, &source.context(), &token).await;
    interrupt.abort();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            return if e.is_configuration() {
                exit_codes::VALIDATION_FAILED
            } else {
                exit_codes::RUNTIME_ERROR
            };
        }
    };

    print_report(output.format, output.quiet, &report);
    if report.cancelled {
        exit_codes::CANCELLED
    } else if report.is_success() {
        exit_codes::SUCCESS
    } else {
        exit_codes::RUN_FAILED
    }
}

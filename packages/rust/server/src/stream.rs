//! Run streams: spawn the agent and pipe its events out as SSE.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use docmuse_core::{ChannelRegistry, Delivery, EventStream, RunRequest, sse};

use crate::AppState;

/// Header carrying the run id of a streamed response.
pub const RUN_ID_HEADER: &str = "x-run-id";

/// Removes the run's channel when the response body is dropped, which also
/// aborts the producer if the client went away mid-run.
struct ChannelGuard {
    channels: Arc<ChannelRegistry>,
    run_id: String,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if self.channels.remove(&self.run_id) {
            debug!(run_id = %self.run_id, "stream finished");
        }
    }
}

/// Start `request` in the background and return its event stream response.
pub fn start_run(state: &AppState, request: RunRequest) -> Response {
    let run_id = Uuid::now_v7().to_string();
    let (sender, events) = state.channels.open(&run_id);

    let agent = state.agent.clone();
    let span = info_span!("run", run_id = %run_id);
    let producer = tokio::spawn(async move { agent.stream(request, sender).await }.instrument(span));
    state.channels.attach(&run_id, producer.abort_handle());

    let guard = ChannelGuard {
        channels: state.channels.clone(),
        run_id: run_id.clone(),
    };
    let body = event_body(events, guard, state.poll_interval, state.keep_alive);

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&run_id) {
        headers.insert(RUN_ID_HEADER, value);
    }
    response
}

/// SSE frames in production order, ending once the channel is closed and
/// drained or the registry has dropped the run. A keep-alive comment goes out
/// whenever nothing was sent for `keep_alive`.
fn event_body(
    events: EventStream,
    guard: ChannelGuard,
    poll: Duration,
    keep_alive: Duration,
) -> impl futures::Stream<Item = Result<String, Infallible>> + Send + 'static {
    futures::stream::unfold(
        (events, guard, Instant::now()),
        move |(mut events, guard, last_sent)| async move {
            loop {
                match events.recv_timeout(poll).await {
                    Delivery::Event(event) => {
                        return Some((Ok(sse::encode(&event)), (events, guard, Instant::now())));
                    }
                    Delivery::Idle if guard.channels.contains(&guard.run_id) => {
                        if last_sent.elapsed() >= keep_alive {
                            let frame = sse::KEEP_ALIVE.to_string();
                            return Some((Ok(frame), (events, guard, Instant::now())));
                        }
                    }
                    Delivery::Idle | Delivery::Closed => return None,
                }
            }
        },
    )
}

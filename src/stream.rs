use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use uuid::Uuid;

use crate::jobs::{JobBus, JobMessage};
use crate::routes::AppState;

/// One frame of a job's progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(String),
    Done,
}

/// Lazy sequence of frames for one job: the backlog first, in append order,
/// then live messages awaited on the broadcast channel. Ends after the done
/// marker, or when the channel closes (job swept), or when the consumer
/// drops the stream.
pub fn frames(bus: JobBus, job_id: Uuid) -> impl Stream<Item = Frame> {
    async_stream::stream! {
        let (backlog, mut receiver) = bus.attach(job_id);
        for message in backlog {
            match message {
                JobMessage::Entry(data) => yield Frame::Message(data),
                JobMessage::Done => {
                    yield Frame::Done;
                    return;
                }
            }
        }
        loop {
            match receiver.recv().await {
                Ok(JobMessage::Entry(data)) => yield Frame::Message(data),
                Ok(JobMessage::Done) => {
                    yield Frame::Done;
                    return;
                }
                // A slow consumer skips what it missed and keeps going.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%job_id, skipped, "subscriber lagged behind job channel");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

fn frame_to_event(frame: Frame) -> Event {
    match frame {
        Frame::Message(data) => Event::default().event("message").data(data),
        Frame::Done => Event::default().event("message").data("done"),
    }
}

/// `GET /transaction/stream/{job_id}`: server-sent events until the job's
/// terminal marker. Disconnection drops the stream, which is the
/// cancellation point.
pub async fn stream_transactions_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = futures::StreamExt::map(frames(state.jobs.clone(), job_id), |frame| {
        Ok(frame_to_event(frame))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

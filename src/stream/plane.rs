//! Streaming control plane.
//!
//! One [`serve_attachment`] call per client attachment: forwards loading
//! events until the session turns terminal, then drives the playback loop at
//! the output cadence. Cleanup (observer unsubscribe, channel close) runs on
//! every exit path.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Tuning;
use crate::encode::FrameCache;
use crate::session::{LoadingEvent, SessionKey, SessionRecord, SessionRegistry};

use super::channel::ReplayChannel;
use super::messages::{
    PlaybackCommand, encode_loading_event, parse_command, session_not_found,
};

/// Playback tick period: one output frame interval at 25 Hz.
const TICK_PERIOD: Duration = Duration::from_millis(40);

/// How long each tick waits for an inbound command. Kept well under the tick
/// period so command polling never eats the cadence.
const COMMAND_POLL: Duration = Duration::from_millis(5);

/// Per-attachment playback state.
struct Playback {
    is_playing: bool,
    speed: f64,
    /// Fractional playhead; the integer part is the frame to send.
    position: f64,
    last_frame_sent: i64,
}

impl Playback {
    fn new() -> Self {
        Self {
            is_playing: false,
            speed: 1.0,
            position: 0.0,
            last_frame_sent: -1,
        }
    }
}

/// Serve one replay attachment over `channel`.
///
/// Runs until the client disconnects, the session errors out, the load
/// timeout expires, or `cancel` fires. The session build is never cancelled
/// by an attachment going away.
#[instrument(skip(registry, channel, cancel), fields(session = %key))]
pub async fn serve_attachment(
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    mut channel: impl ReplayChannel,
    cancel: CancellationToken,
) {
    let Some(record) = registry.get(&key) else {
        warn!(session = %key, "Attachment for unknown session");
        let _ = channel.send_text(session_not_found()).await;
        channel.close().await;
        return;
    };

    let attachment_id = Uuid::new_v4();
    let mut events = record.subscribe(attachment_id);
    debug!(session = %key, attachment = %attachment_id, "Attachment opened");

    // The first attachment kicks off the build, after its subscription is in
    // place so it observes the full progress sequence from zero.
    registry.start_build(&record);

    let tuning = *registry.tuning();
    attachment_loop(&record, &mut channel, &mut events, &tuning, &cancel).await;

    // Cleanup on every exit path.
    record.unsubscribe(&attachment_id);
    channel.close().await;
    info!(session = %key, attachment = %attachment_id, "Attachment closed");
}

/// Loading phase followed by playback; extracted so `serve_attachment` has a
/// single cleanup point.
async fn attachment_loop(
    record: &Arc<SessionRecord>,
    channel: &mut impl ReplayChannel,
    events: &mut mpsc::UnboundedReceiver<LoadingEvent>,
    tuning: &Tuning,
    cancel: &CancellationToken,
) {
    if !forward_loading_events(channel, events, tuning, cancel).await {
        return;
    }

    // `loading_complete` has been delivered, so the record is READY and the
    // shared encoded-frame cache exists.
    let Some(cache) = record.frame_cache() else {
        warn!("Record completed without a frame cache");
        return;
    };

    playback_loop(channel, cache, tuning, cancel).await;
}

/// Forward loading events until a terminal one arrives.
///
/// Returns `true` when `loading_complete` went out and playback should
/// start; `false` on error, timeout, disconnect, or shutdown.
async fn forward_loading_events(
    channel: &mut impl ReplayChannel,
    events: &mut mpsc::UnboundedReceiver<LoadingEvent>,
    tuning: &Tuning,
    cancel: &CancellationToken,
) -> bool {
    let deadline = Instant::now() + tuning.load_timeout;

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return false,
            outcome = timeout_at(deadline, events.recv()) => outcome,
        };

        let event = match outcome {
            Err(_) => {
                warn!("Load timeout expired for attachment");
                let event = LoadingEvent::Error {
                    message: "Loading timed out".to_string(),
                };
                let _ = channel.send_text(encode_loading_event(&event)).await;
                return false;
            }
            // The record dropped the subscriber without a terminal event.
            Ok(None) => return false,
            Ok(Some(event)) => event,
        };

        let terminal_complete = matches!(event, LoadingEvent::Complete { .. });
        let terminal_error = matches!(event, LoadingEvent::Error { .. });

        if channel
            .send_text(encode_loading_event(&event))
            .await
            .is_err()
        {
            debug!("Client disconnected during loading");
            return false;
        }

        if terminal_error {
            return false;
        }
        if terminal_complete {
            return true;
        }
    }
}

/// The 25 Hz playback loop: poll at most one command per tick, advance the
/// playhead while playing, and push a payload whenever the integer frame
/// index moves.
async fn playback_loop(
    channel: &mut impl ReplayChannel,
    cache: Arc<FrameCache>,
    tuning: &Tuning,
    cancel: &CancellationToken,
) {
    let total = cache.total_frames();
    let mut state = Playback::new();

    let mut ticker = interval(TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match timeout(COMMAND_POLL, channel.recv_text()).await {
            Ok(Some(text)) => apply_command(&text, &mut state, total, tuning),
            Ok(None) => {
                debug!("Client disconnected during playback");
                return;
            }
            // No command this tick.
            Err(_) => {}
        }

        if total == 0 {
            continue;
        }
        let end = (total - 1) as f64;

        if state.is_playing {
            // One tick advances speed * (tick_period * output_fps) = speed.
            state.position += state.speed;
            if state.position >= end {
                state.position = end;
                state.is_playing = false;
                debug!("Reached end of session, pausing");
            }
        }
        state.position = state.position.clamp(0.0, end);

        let current = state.position.floor() as i64;
        if current != state.last_frame_sent {
            match cache.get(current as usize).await {
                Ok(payload) => {
                    if channel.send_binary(payload).await.is_err() {
                        debug!("Client disconnected mid-send");
                        return;
                    }
                    state.last_frame_sent = current;
                }
                Err(err) => {
                    warn!(frame = current, error = %err, "Failed to serve frame");
                    return;
                }
            }
        }
    }
}

/// Apply one inbound command. Malformed or out-of-range commands are logged
/// and ignored; the channel stays open.
fn apply_command(text: &str, state: &mut Playback, total: usize, tuning: &Tuning) {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(err) => {
            warn!(error = %err, "Ignoring malformed command");
            return;
        }
    };

    match command {
        PlaybackCommand::Play { speed } => {
            if let Some(speed) = speed {
                if speed <= 0.0 || speed > tuning.max_speed {
                    warn!(speed, "Rejecting play with out-of-range speed");
                    return;
                }
                state.speed = speed;
            }
            state.is_playing = true;
            info!(speed = state.speed, "Playback started");
        }
        PlaybackCommand::Pause => {
            state.is_playing = false;
            info!("Playback paused");
        }
        PlaybackCommand::Seek { frame } => {
            if total == 0 {
                return;
            }
            let clamped = frame.clamp(0, (total - 1) as i64);
            state.position = clamped as f64;
            // Force a re-send even when seeking to the current frame.
            state.last_frame_sent = -1;
            info!(frame = clamped, "Seek applied");
        }
    }
}

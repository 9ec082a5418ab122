//! PulseAudio backend.
//!
//! Two server connections with different jobs:
//! - [`PulseMixer`] holds a synchronous control connection for reading and
//!   writing the default sink volume.
//! - [`StreamMonitor`] runs an event connection on a dedicated thread and
//!   reports playback/capture stream arrivals and departures.
//!
//! PipeWire's pulse compatibility server speaks the same protocol, so both
//! work there unchanged.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::introspect::{SinkInputInfo, SourceOutputInfo};
use libpulse_binding::context::subscribe::{Facility, InterestMaskSet, Operation};
use libpulse_binding::context::{Context, FlagSet, State};
use libpulse_binding::error::PAErr;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::operation::{Operation as PulseOperation, State as OperationState};
use libpulse_binding::proplist::{properties, Proplist};
use libpulse_binding::volume::{ChannelVolumes, Volume};
use pulsectl::controllers::{DeviceControl, SinkController};
use tracing::{debug, trace, warn};

use crate::mixer::{Mixer, MixerError, MixerEvent, SinkSnapshot, StreamInfo, StreamKind};
use crate::APP_NAME;

/// Control connection to the audio server.
pub struct PulseMixer {
    sinks: SinkController,
}

impl PulseMixer {
    /// Connects to the audio server.
    pub fn connect() -> Result<Self, MixerError> {
        // libpulse reads this and overrides the library's default client name.
        std::env::set_var("PULSE_PROP_application.name", APP_NAME);
        let sinks = SinkController::create().map_err(|err| MixerError::Connect(err.to_string()))?;
        Ok(Self { sinks })
    }
}

impl Mixer for PulseMixer {
    fn vol_max_norm(&self) -> u32 {
        Volume::NORMAL.0
    }

    fn default_sink(&mut self) -> Option<SinkSnapshot> {
        match self.sinks.get_default_device() {
            Ok(device) => Some(SinkSnapshot {
                index: device.index,
                channels: device.volume.len(),
                raw_volume: device.volume.avg().0,
            }),
            Err(err) => {
                debug!("No default sink available: {}", err);
                None
            }
        }
    }

    fn set_sink_volume(&mut self, sink: &SinkSnapshot, raw: u32) -> Result<(), MixerError> {
        let mut channels = ChannelVolumes::default();
        channels.set(sink.channels, Volume(raw));
        self.sinks.set_device_volume_by_index(sink.index, &channels);
        trace!(sink = sink.index, raw, "Wrote sink volume");
        Ok(())
    }
}

// `PAErr`'s inherent `to_string()` returns `Option<String>` and shadows the
// `Display` one, so the conversion formats instead.
impl From<PAErr> for MixerError {
    fn from(err: PAErr) -> Self {
        MixerError::Connect(format!("{err}"))
    }
}

/// Introspection queries answer asynchronously; dropping their handle before
/// completion cancels the callback, so handles stay parked here until done.
trait PendingQuery {
    fn completed(&self) -> bool;
}

impl<C: ?Sized> PendingQuery for PulseOperation<C> {
    fn completed(&self) -> bool {
        self.get_state() != OperationState::Running
    }
}

type QueryList = Rc<RefCell<Vec<Box<dyn PendingQuery>>>>;

/// Watches the audio server for stream lifecycle changes.
///
/// The standard mainloop and its context are single-thread types, so the
/// monitor builds them inside its own thread and never moves them out.
pub struct StreamMonitor {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamMonitor {
    /// Connects and starts delivering [`MixerEvent`]s to `notify`.
    ///
    /// Streams that already exist on the server are announced as added, so
    /// a fresh start picks up the current state. Returns once the event
    /// subscription is in place, or with the connection error if it is not.
    pub fn spawn<F>(notify: F) -> Result<Self, MixerError>
    where
        F: Fn(MixerEvent) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("pulse-monitor".into())
            .spawn(move || {
                if let Err(err) = monitor_loop(&thread_shutdown, &ready_tx, notify) {
                    warn!("Stream monitor failed: {}", err);
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|err| MixerError::Connect(err.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(MixerError::Connect(
                    "Stream monitor thread died during setup".into(),
                ))
            }
        }
    }

    /// Asks the monitor thread to stop and detaches it.
    ///
    /// The thread notices the request at its next wakeup; it is not joined
    /// so teardown never waits on server traffic.
    pub fn disconnect(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if self.thread.take().is_some() {
            debug!("Stream monitor detached");
        }
    }
}

impl Drop for StreamMonitor {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn monitor_loop<F>(
    shutdown: &AtomicBool,
    ready: &mpsc::Sender<Result<(), MixerError>>,
    notify: F,
) -> Result<(), MixerError>
where
    F: Fn(MixerEvent) + 'static,
{
    let mut proplist =
        Proplist::new().ok_or_else(|| MixerError::Connect("Proplist allocation failed".into()))?;
    proplist
        .set_str(properties::APPLICATION_NAME, APP_NAME)
        .map_err(|_| MixerError::Connect("Proplist rejected the application name".into()))?;

    let mainloop = Rc::new(RefCell::new(Mainloop::new().ok_or_else(|| {
        MixerError::Connect("Mainloop allocation failed".into())
    })?));
    let context = Rc::new(RefCell::new(
        Context::new_with_proplist(&*mainloop.borrow(), APP_NAME, &proplist)
            .ok_or_else(|| MixerError::Connect("Context allocation failed".into()))?,
    ));

    context.borrow_mut().connect(None, FlagSet::NOFLAGS, None)?;

    loop {
        match mainloop.borrow_mut().iterate(true) {
            IterateResult::Success(_) => {}
            IterateResult::Quit(_) | IterateResult::Err(_) => {
                return Err(MixerError::Connect("Mainloop died while connecting".into()));
            }
        }
        match context.borrow().get_state() {
            State::Ready => break,
            State::Failed | State::Terminated => {
                return Err(MixerError::Connect(
                    "Audio server refused the connection".into(),
                ));
            }
            _ => {}
        }
    }

    let notify = Rc::new(notify);
    let pending: QueryList = Rc::new(RefCell::new(Vec::new()));

    install_subscription(&context, &notify, &pending);
    announce_existing_streams(&context, &notify, &pending);

    let _ = ready.send(Ok(()));
    debug!("Stream monitor connected");

    while !shutdown.load(Ordering::Relaxed) {
        match mainloop.borrow_mut().iterate(true) {
            IterateResult::Success(_) => {}
            IterateResult::Quit(_) => break,
            IterateResult::Err(err) => {
                warn!("Stream monitor mainloop failed: {}", err);
                break;
            }
        }
        match context.borrow().get_state() {
            State::Ready => {}
            state => {
                warn!(?state, "Audio server connection lost");
                break;
            }
        }
        pending.borrow_mut().retain(|query| !query.completed());
    }

    context.borrow_mut().disconnect();
    Ok(())
}

fn install_subscription<F>(context: &Rc<RefCell<Context>>, notify: &Rc<F>, pending: &QueryList)
where
    F: Fn(MixerEvent) + 'static,
{
    let cb_context = Rc::clone(context);
    let cb_notify = Rc::clone(notify);
    let cb_pending = Rc::clone(pending);
    context
        .borrow_mut()
        .set_subscribe_callback(Some(Box::new(move |facility, operation, index| {
            handle_change(&cb_context, &cb_notify, &cb_pending, facility, operation, index);
        })));

    let op = context.borrow_mut().subscribe(
        InterestMaskSet::SINK_INPUT | InterestMaskSet::SOURCE_OUTPUT,
        |subscribed| {
            if !subscribed {
                warn!("Stream event subscription was rejected");
            }
        },
    );
    pending.borrow_mut().push(Box::new(op));
}

/// Reports every stream currently known to the server as added.
fn announce_existing_streams<F>(context: &Rc<RefCell<Context>>, notify: &Rc<F>, pending: &QueryList)
where
    F: Fn(MixerEvent) + 'static,
{
    let introspector = context.borrow().introspect();

    let cb_notify = Rc::clone(notify);
    let op = introspector.get_sink_input_info_list(move |entry| {
        if let ListResult::Item(info) = entry {
            (*cb_notify)(MixerEvent::StreamAdded(describe_sink_input(info)));
        }
    });
    pending.borrow_mut().push(Box::new(op));

    let cb_notify = Rc::clone(notify);
    let op = introspector.get_source_output_info_list(move |entry| {
        if let ListResult::Item(info) = entry {
            (*cb_notify)(MixerEvent::StreamAdded(describe_source_output(info)));
        }
    });
    pending.borrow_mut().push(Box::new(op));
}

fn handle_change<F>(
    context: &Rc<RefCell<Context>>,
    notify: &Rc<F>,
    pending: &QueryList,
    facility: Option<Facility>,
    operation: Option<Operation>,
    index: u32,
) where
    F: Fn(MixerEvent) + 'static,
{
    let kind = match facility {
        Some(Facility::SinkInput) => StreamKind::SinkInput,
        Some(Facility::SourceOutput) => StreamKind::SourceOutput,
        _ => return,
    };
    match operation {
        Some(Operation::New) => query_stream(context, notify, pending, kind, index),
        Some(Operation::Removed) => (*notify)(MixerEvent::StreamRemoved { id: index }),
        Some(Operation::Changed) | None => {}
    }
}

/// A new-stream event only carries the index; everything else comes from a
/// follow-up introspection query.
fn query_stream<F>(
    context: &Rc<RefCell<Context>>,
    notify: &Rc<F>,
    pending: &QueryList,
    kind: StreamKind,
    index: u32,
) where
    F: Fn(MixerEvent) + 'static,
{
    let introspector = context.borrow().introspect();
    let cb_notify = Rc::clone(notify);
    let op: Box<dyn PendingQuery> = match kind {
        StreamKind::SinkInput => Box::new(introspector.get_sink_input_info(index, move |entry| {
            if let ListResult::Item(info) = entry {
                (*cb_notify)(MixerEvent::StreamAdded(describe_sink_input(info)));
            }
        })),
        StreamKind::SourceOutput => {
            Box::new(introspector.get_source_output_info(index, move |entry| {
                if let ListResult::Item(info) = entry {
                    (*cb_notify)(MixerEvent::StreamAdded(describe_source_output(info)));
                }
            }))
        }
    };
    pending.borrow_mut().push(op);
}

fn describe_sink_input(info: &SinkInputInfo) -> StreamInfo {
    StreamInfo {
        id: info.index,
        kind: StreamKind::SinkInput,
        // Streams owned by server modules rather than clients are virtual.
        is_virtual: info.client.is_none(),
        application_id: info.proplist.get_str(properties::APPLICATION_ID),
    }
}

fn describe_source_output(info: &SourceOutputInfo) -> StreamInfo {
    StreamInfo {
        id: info.index,
        kind: StreamKind::SourceOutput,
        is_virtual: info.client.is_none(),
        application_id: info.proplist.get_str(properties::APPLICATION_ID),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libpulse_binding::error::Code;

    #[test]
    fn server_errors_convert_to_connect_failures() {
        let err = MixerError::from(PAErr::from(Code::ConnectionRefused));
        assert!(matches!(err, MixerError::Connect(_)));
        assert!(err
            .to_string()
            .starts_with("Audio server connection failed"));
    }
}

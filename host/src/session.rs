//! A scripted session: IPC client, engine threads and the loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use osn_engine::Engine;
use osn_events::{JsCallback, LoopHandle};
use osn_ipc::{request_channel, split_reply, Request, Server, Value};
use osn_server::{AudioBindings, Registry, Scope, SignalBindings};

use crate::Host;

const SOURCE_NAME: &str = "Mic/Aux";
const OUTPUT_NAME: &str = "stream";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const METER_TICKS: u32 = 5;

/// What a session delivered, and what shutdown found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub fader_events: usize,
    pub volmeter_events: usize,
    pub signal_events: usize,
    pub released: usize,
    pub leaked: u64,
}

#[derive(Default)]
struct Counters {
    fader: AtomicUsize,
    volmeter: AtomicUsize,
    signal: AtomicUsize,
}

fn counting_callback(counters: &Arc<Counters>, pick: fn(&Counters) -> &AtomicUsize) -> JsCallback {
    let counters = Arc::clone(counters);
    JsCallback::new(move |args| {
        pick(&counters).fetch_add(1, Ordering::Relaxed);
        debug!(?args, "JS callback invoked");
    })
}

/// Forward requests onto the loop thread until the channel closes.
fn spawn_ipc_bridge(
    rx: Receiver<Request>,
    loop_handle: LoopHandle,
    server: Arc<Server>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for request in rx {
            let server = Arc::clone(&server);
            let posted = loop_handle.post(move || {
                if let Err(err) = request.dispatch(&server) {
                    warn!("IPC dispatch failed: {err}");
                }
            });
            if posted.is_err() {
                break;
            }
        }
        debug!("IPC bridge stopped");
    })
}

fn call(tx: &Sender<Request>, collection: &str, function: &str, args: Vec<Value>) -> Result<Vec<Value>> {
    let (request, reply) = Request::new(collection, function, args);
    tx.send(request)
        .map_err(|_| anyhow!("Request channel closed"))?;

    let rval = reply
        .recv_timeout(REPLY_TIMEOUT)
        .with_context(|| format!("No reply to {collection}::{function}"))??;
    let (code, payload) = split_reply(&rval).context("Malformed reply")?;
    if !code.is_ok() {
        bail!("{collection}::{function} failed with {code:?}: {payload:?}");
    }
    Ok(payload.to_vec())
}

fn handle_of(payload: &[Value]) -> Result<u32> {
    payload
        .first()
        .and_then(Value::as_u32)
        .context("Reply carries no handle")
}

struct ClientParts {
    engine: Arc<Engine>,
    registry: Arc<Registry>,
    audio: Arc<AudioBindings>,
    signals: Arc<SignalBindings>,
    counters: Arc<Counters>,
}

/// Client side: IPC calls, callback registration, then engine activity.
fn client(parts: &ClientParts, tx: Sender<Request>) -> Result<()> {
    let ClientParts {
        engine,
        registry,
        audio,
        signals,
        counters,
    } = parts;

    let fader = handle_of(&call(&tx, "Fader", "Create", vec![Value::Int32(0)])?)?;
    call(&tx, "Fader", "Attach", vec![Value::UInt32(fader), Value::from(SOURCE_NAME)])?;
    let meter = handle_of(&call(&tx, "Volmeter", "Create", vec![Value::Int32(0)])?)?;
    call(&tx, "Volmeter", "Attach", vec![Value::UInt32(meter), Value::from(SOURCE_NAME)])?;
    call(&tx, "Volmeter", "SetUpdateInterval", vec![Value::UInt32(meter), Value::UInt32(10)])?;
    let polled = handle_of(&call(&tx, "Volmeter", "AddCallback", vec![Value::UInt32(meter)])?)?;
    info!(fader, meter, "Audio objects created over IPC");

    let fader_cb = audio.fader_add_callback(fader, counting_callback(counters, |c| &c.fader))?;
    audio.volmeter_add_callback(meter, counting_callback(counters, |c| &c.volmeter))?;
    for (scope, signal) in [
        (Scope::Source(SOURCE_NAME.into()), "mute"),
        (Scope::Global, "source_create"),
        (Scope::Output(OUTPUT_NAME.into()), "start"),
        (Scope::Output(OUTPUT_NAME.into()), "stop"),
    ] {
        signals.connect(scope, signal, counting_callback(counters, |c| &c.signal))?;
    }

    call(&tx, "Fader", "SetDeziBel", vec![Value::UInt32(fader), Value::Float(-6.0)])?;
    // Loop messages are FIFO: the read-back runs after the queued level
    // change has been drained.
    let db = call(&tx, "Fader", "GetDeziBel", vec![Value::UInt32(fader)])?;
    debug!(?db, "Fader level read back");

    let source = engine
        .source_by_name(SOURCE_NAME)
        .context("Session source missing")?;
    let output = engine
        .output_by_name(OUTPUT_NAME)
        .context("Session output missing")?;
    let volmeter = registry.fetch_volmeter(meter)?;

    let metering = thread::spawn(move || {
        for tick in 0..METER_TICKS {
            let level = -60.0 + tick as f32 * 10.0;
            volmeter.emit_levels(level, level - 3.0, level + 3.0, false);
            source.set_muted(tick % 2 == 1);
            thread::sleep(Duration::from_millis(10));
        }
    });
    let streaming = thread::spawn(move || {
        output.start();
        output.stop(0);
    });
    metering
        .join()
        .map_err(|_| anyhow!("Metering thread panicked"))?;
    streaming
        .join()
        .map_err(|_| anyhow!("Streaming thread panicked"))?;

    let levels = call(&tx, "Volmeter", "Query", vec![Value::UInt32(meter)])?;
    debug!(?levels, "Polled meter levels");
    call(
        &tx,
        "Volmeter",
        "RemoveCallback",
        vec![Value::UInt32(meter), Value::UInt32(polled)],
    )?;

    engine.create_source("Desktop Audio")?;

    audio.fader_remove_callback(fader, fader_cb)?;
    call(&tx, "Fader", "Destroy", vec![Value::UInt32(fader)])?;
    Ok(())
}

/// Run the session to completion and shut the registry down.
pub fn run(host: &Host) -> Result<SessionSummary> {
    host.engine.create_source(SOURCE_NAME)?;
    host.engine.create_output(OUTPUT_NAME)?;

    let counters = Arc::new(Counters::default());
    let (tx, rx) = request_channel();
    let bridge = spawn_ipc_bridge(rx, host.event_loop.handle(), Arc::clone(&host.server));

    let parts = ClientParts {
        engine: Arc::clone(&host.engine),
        registry: Arc::clone(&host.registry),
        audio: Arc::clone(&host.audio),
        signals: Arc::clone(&host.signals),
        counters: Arc::clone(&counters),
    };
    let loop_handle = host.event_loop.handle();
    let client_thread = thread::spawn(move || {
        let result = client(&parts, tx);
        if let Err(err) = loop_handle.stop() {
            warn!("Failed to stop event loop: {err}");
        }
        result
    });

    host.event_loop.run();

    let client_result = client_thread
        .join()
        .map_err(|_| anyhow!("Client thread panicked"))?;
    bridge
        .join()
        .map_err(|_| anyhow!("IPC bridge panicked"))?;
    client_result?;

    // Deliver whatever arrived between the stop request and now.
    host.event_loop.run_until_idle();

    let report = host.registry.shutdown();
    Ok(SessionSummary {
        fader_events: counters.fader.load(Ordering::Relaxed),
        volmeter_events: counters.volmeter.load(Ordering::Relaxed),
        signal_events: counters.signal.load(Ordering::Relaxed),
        released: report.released,
        leaked: report.leaked,
    })
}

#[cfg(test)]
mod tests {
    use osn_server::BindingsConfig;

    use super::*;

    #[test]
    fn test_session_delivers_and_shuts_down_clean() {
        let host = Host::new(&BindingsConfig::default()).unwrap();
        let summary = run(&host).unwrap();

        assert_eq!(summary.fader_events, 1);
        assert_eq!(summary.volmeter_events, METER_TICKS as usize);
        // Mute on every tick, one source_create, output start and stop.
        assert_eq!(summary.signal_events, METER_TICKS as usize + 3);
        assert_eq!(summary.leaked, 0);
        assert_eq!(host.registry.live_count(), 0);
    }
}

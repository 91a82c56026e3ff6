//! Fader and volmeter bindings.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use osn_engine::{AudioCallbackId, Engine, FaderType, Source, VolumeLevels};
use osn_events::{CallbackInfo, CallbackQueue, JsCallback, JsValue, QueueEntry, QueuePolicy};

use crate::error::BindingError;
use crate::object::{Handle, ObjectKind, ObjectRef};
use crate::polled::{FaderLog, MeterSlot};
use crate::registry::{Registry, Teardown};
use crate::BindingResult;

/// A fader level change waiting for delivery.
pub struct FaderData {
    info: Arc<CallbackInfo>,
    db: f32,
}

impl QueueEntry for FaderData {
    fn callback_info(&self) -> &CallbackInfo {
        &self.info
    }
}

/// A volmeter sample waiting for delivery.
pub struct VolmeterData {
    info: Arc<CallbackInfo>,
    levels: VolumeLevels,
}

impl QueueEntry for VolmeterData {
    fn callback_info(&self) -> &CallbackInfo {
        &self.info
    }
}

fn deliver_fader(entry: FaderData) {
    let payload = JsValue::object([("db", JsValue::from(entry.db))]);
    entry.info.callback().call(&[payload]);
}

fn deliver_volmeter(entry: VolmeterData) {
    let VolumeLevels {
        level,
        magnitude,
        peak,
        muted,
    } = entry.levels;
    let payload = JsValue::object([
        ("level", JsValue::from(level)),
        ("magnitude", JsValue::from(magnitude)),
        ("peak", JsValue::from(peak)),
        ("muted", JsValue::from(muted)),
    ]);
    entry.info.callback().call(&[payload]);
}

struct CallbackLink {
    owner: Handle,
    owner_kind: ObjectKind,
    id: AudioCallbackId,
    info: Arc<CallbackInfo>,
    // Recorded server-side for the client to query.
    polled: bool,
}

/// Fader and volmeter operations addressed by handle.
///
/// Engine-thread callbacks push into one queue per payload type; the loop
/// drains them and calls the JS callback with a plain object. Polled
/// callbacks record into a per-object slot instead, which the client reads
/// with `fader_query`, `volmeter_query` or `global_query`.
pub struct AudioBindings {
    registry: Arc<Registry>,
    engine: Arc<Engine>,
    policy: QueuePolicy,
    fader_queue: CallbackQueue<FaderData>,
    volmeter_queue: CallbackQueue<VolmeterData>,
    // Keyed by callback handle.
    links: Mutex<HashMap<Handle, CallbackLink>>,
    // Keyed by owner handle.
    fader_logs: Mutex<HashMap<Handle, Arc<FaderLog>>>,
    meter_slots: Mutex<HashMap<Handle, Arc<MeterSlot>>>,
}

impl AudioBindings {
    pub fn new(registry: Arc<Registry>, engine: Arc<Engine>) -> Arc<Self> {
        let policy = registry.config().queue.policy();
        let fader_queue = CallbackQueue::new(registry.loop_handle(), policy, deliver_fader);
        let volmeter_queue = CallbackQueue::new(registry.loop_handle(), policy, deliver_volmeter);

        let bindings = Arc::new(Self {
            registry,
            engine,
            policy,
            fader_queue,
            volmeter_queue,
            links: Mutex::new(HashMap::new()),
            fader_logs: Mutex::new(HashMap::new()),
            meter_slots: Mutex::new(HashMap::new()),
        });

        let weak: Weak<dyn Teardown> = Arc::downgrade(&bindings) as Weak<dyn Teardown>;
        bindings.registry.attach(weak);
        bindings
    }

    /// Events queued and not yet drained.
    pub fn queued_events(&self) -> usize {
        self.fader_queue.len() + self.volmeter_queue.len()
    }

    /// Events discarded by the queue bound.
    pub fn dropped_events(&self) -> u64 {
        self.fader_queue.dropped() + self.volmeter_queue.dropped()
    }

    // Faders

    #[instrument(skip(self))]
    pub fn fader_create(&self, kind: FaderType) -> BindingResult<Handle> {
        let fader = self.engine.create_fader(kind);
        match self.registry.map(ObjectRef::fader(&fader)) {
            Ok(handle) => {
                debug!(handle, "Fader created");
                Ok(handle)
            }
            Err(err) => {
                self.engine.destroy_fader(&fader);
                Err(err)
            }
        }
    }

    /// Destroy a fader. Callbacks still registered on it are stopped and
    /// unmapped first.
    #[instrument(skip(self))]
    pub fn fader_destroy(&self, handle: Handle) -> BindingResult<()> {
        let fader = self.registry.fetch_fader(handle)?;
        self.release_links(handle, |id| fader.remove_callback(id));
        self.fader_logs.lock().remove(&handle);
        self.registry.unmap(handle)?;
        self.engine.destroy_fader(&fader);
        debug!(handle, "Fader destroyed");
        Ok(())
    }

    pub fn fader_get_db(&self, handle: Handle) -> BindingResult<f32> {
        Ok(self.registry.fetch_fader(handle)?.db())
    }

    /// Returns the level after clamping.
    pub fn fader_set_db(&self, handle: Handle, db: f32) -> BindingResult<f32> {
        let fader = self.registry.fetch_fader(handle)?;
        fader.set_db(db);
        Ok(fader.db())
    }

    pub fn fader_get_deflection(&self, handle: Handle) -> BindingResult<f32> {
        Ok(self.registry.fetch_fader(handle)?.deflection())
    }

    pub fn fader_set_deflection(&self, handle: Handle, def: f32) -> BindingResult<f32> {
        let fader = self.registry.fetch_fader(handle)?;
        fader.set_deflection(def);
        Ok(fader.deflection())
    }

    pub fn fader_get_mul(&self, handle: Handle) -> BindingResult<f32> {
        Ok(self.registry.fetch_fader(handle)?.mul())
    }

    pub fn fader_set_mul(&self, handle: Handle, mul: f32) -> BindingResult<f32> {
        let fader = self.registry.fetch_fader(handle)?;
        fader.set_mul(mul);
        Ok(fader.mul())
    }

    pub fn fader_attach(&self, handle: Handle, source_name: &str) -> BindingResult<()> {
        let fader = self.registry.fetch_fader(handle)?;
        fader.attach(&self.source(source_name)?);
        Ok(())
    }

    pub fn fader_detach(&self, handle: Handle) -> BindingResult<()> {
        self.registry.fetch_fader(handle)?.detach();
        Ok(())
    }

    /// Register `callback` for level changes. Returns the callback handle.
    pub fn fader_add_callback(&self, handle: Handle, callback: JsCallback) -> BindingResult<Handle> {
        let fader = self.registry.fetch_fader(handle)?;
        let (cb_handle, info) = self.registry.register_callback(callback)?;

        let queue = self.fader_queue.clone();
        let entry_info = Arc::clone(&info);
        let id = fader.add_callback(move |db| {
            queue.send(FaderData {
                info: Arc::clone(&entry_info),
                db,
            });
        });

        self.insert_link(cb_handle, handle, ObjectKind::Fader, id, info, false);
        Ok(cb_handle)
    }

    /// Stop and unmap a callback. Events already queued for it are
    /// discarded at drain time.
    pub fn fader_remove_callback(&self, handle: Handle, cb_handle: Handle) -> BindingResult<()> {
        let fader = self.registry.fetch_fader(handle)?;
        let link = self.take_link(handle, cb_handle, false)?;
        fader.remove_callback(link.id);
        self.registry.release_callback(cb_handle, &link.info)?;
        Ok(())
    }

    /// Record level changes server-side until [`AudioBindings::fader_query`]
    /// collects them. Returns the callback handle and the number of polled
    /// callbacks now on the fader.
    pub fn fader_add_polled(&self, handle: Handle) -> BindingResult<(Handle, u32)> {
        let fader = self.registry.fetch_fader(handle)?;
        let (cb_handle, info) = self.registry.register_callback(JsCallback::new(|_| {}))?;

        let log = Arc::clone(
            self.fader_logs
                .lock()
                .entry(handle)
                .or_insert_with(|| Arc::new(FaderLog::new(self.policy))),
        );
        let target = Arc::downgrade(&info);
        let id = fader.add_callback(move |db| {
            if target.upgrade().is_some_and(|info| !info.is_stopped()) {
                log.push(db);
            }
        });

        let count = self.insert_link(cb_handle, handle, ObjectKind::Fader, id, info, true);
        debug!(handle, cb_handle, count, "Polled fader callback added");
        Ok((cb_handle, count))
    }

    /// Returns the number of polled callbacks left on the fader. Recorded
    /// changes are dropped with the last one.
    pub fn fader_remove_polled(&self, handle: Handle, cb_handle: Handle) -> BindingResult<u32> {
        let fader = self.registry.fetch_fader(handle)?;
        let link = self.take_link(handle, cb_handle, true)?;
        fader.remove_callback(link.id);
        self.registry.release_callback(cb_handle, &link.info)?;

        let count = self.polled_count(handle);
        if count == 0 {
            self.fader_logs.lock().remove(&handle);
        }
        Ok(count)
    }

    /// Level changes recorded since the last query, oldest first.
    pub fn fader_query(&self, handle: Handle) -> BindingResult<Vec<f32>> {
        self.registry.fetch_fader(handle)?;
        let log = self.fader_logs.lock().get(&handle).cloned();
        Ok(log.map(|log| log.drain()).unwrap_or_default())
    }

    // Volmeters

    /// Returns the handle and the update interval in milliseconds.
    #[instrument(skip(self))]
    pub fn volmeter_create(&self, kind: FaderType) -> BindingResult<(Handle, u32)> {
        let meter = self.engine.create_volmeter(kind);
        match self.registry.map(ObjectRef::volmeter(&meter)) {
            Ok(handle) => {
                debug!(handle, "Volmeter created");
                Ok((handle, meter.update_interval_ms()))
            }
            Err(err) => {
                self.engine.destroy_volmeter(&meter);
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub fn volmeter_destroy(&self, handle: Handle) -> BindingResult<()> {
        let meter = self.registry.fetch_volmeter(handle)?;
        self.release_links(handle, |id| meter.remove_callback(id));
        self.meter_slots.lock().remove(&handle);
        self.registry.unmap(handle)?;
        self.engine.destroy_volmeter(&meter);
        debug!(handle, "Volmeter destroyed");
        Ok(())
    }

    pub fn volmeter_attach(&self, handle: Handle, source_name: &str) -> BindingResult<()> {
        let meter = self.registry.fetch_volmeter(handle)?;
        meter.attach(&self.source(source_name)?);
        Ok(())
    }

    pub fn volmeter_detach(&self, handle: Handle) -> BindingResult<()> {
        self.registry.fetch_volmeter(handle)?.detach();
        Ok(())
    }

    pub fn volmeter_get_update_interval(&self, handle: Handle) -> BindingResult<u32> {
        Ok(self.registry.fetch_volmeter(handle)?.update_interval_ms())
    }

    pub fn volmeter_set_update_interval(&self, handle: Handle, ms: u32) -> BindingResult<u32> {
        let meter = self.registry.fetch_volmeter(handle)?;
        meter.set_update_interval_ms(ms);
        Ok(meter.update_interval_ms())
    }

    pub fn volmeter_add_callback(
        &self,
        handle: Handle,
        callback: JsCallback,
    ) -> BindingResult<Handle> {
        let meter = self.registry.fetch_volmeter(handle)?;
        let (cb_handle, info) = self.registry.register_callback(callback)?;

        let queue = self.volmeter_queue.clone();
        let entry_info = Arc::clone(&info);
        let id = meter.add_callback(move |levels| {
            queue.send(VolmeterData {
                info: Arc::clone(&entry_info),
                levels,
            });
        });

        self.insert_link(cb_handle, handle, ObjectKind::Volmeter, id, info, false);
        Ok(cb_handle)
    }

    pub fn volmeter_remove_callback(&self, handle: Handle, cb_handle: Handle) -> BindingResult<()> {
        let meter = self.registry.fetch_volmeter(handle)?;
        let link = self.take_link(handle, cb_handle, false)?;
        meter.remove_callback(link.id);
        self.registry.release_callback(cb_handle, &link.info)?;
        Ok(())
    }

    /// Keep the latest sample server-side for [`AudioBindings::volmeter_query`].
    /// Returns the callback handle and the number of polled callbacks now
    /// on the meter.
    pub fn volmeter_add_polled(&self, handle: Handle) -> BindingResult<(Handle, u32)> {
        let meter = self.registry.fetch_volmeter(handle)?;
        let (cb_handle, info) = self.registry.register_callback(JsCallback::new(|_| {}))?;

        let slot = Arc::clone(self.meter_slots.lock().entry(handle).or_default());
        let target = Arc::downgrade(&info);
        let id = meter.add_callback(move |levels| {
            if target.upgrade().is_some_and(|info| !info.is_stopped()) {
                slot.store(levels);
            }
        });

        let count = self.insert_link(cb_handle, handle, ObjectKind::Volmeter, id, info, true);
        debug!(handle, cb_handle, count, "Polled volmeter callback added");
        Ok((cb_handle, count))
    }

    /// Returns the number of polled callbacks left on the meter.
    pub fn volmeter_remove_polled(&self, handle: Handle, cb_handle: Handle) -> BindingResult<u32> {
        let meter = self.registry.fetch_volmeter(handle)?;
        let link = self.take_link(handle, cb_handle, true)?;
        meter.remove_callback(link.id);
        self.registry.release_callback(cb_handle, &link.info)?;

        let count = self.polled_count(handle);
        if count == 0 {
            self.meter_slots.lock().remove(&handle);
        }
        Ok(count)
    }

    /// The meter's latest sample, or silence if none arrived recently.
    pub fn volmeter_query(&self, handle: Handle) -> BindingResult<VolumeLevels> {
        self.registry.fetch_volmeter(handle)?;
        Ok(self.meter_levels(handle))
    }

    /// [`AudioBindings::volmeter_query`] for several meters at once. Handles
    /// that do not name a live volmeter are skipped.
    pub fn global_query(&self, handles: &[Handle]) -> Vec<(Handle, VolumeLevels)> {
        handles
            .iter()
            .filter_map(|&handle| match self.registry.fetch_volmeter(handle) {
                Ok(_) => Some((handle, self.meter_levels(handle))),
                Err(err) => {
                    debug!(handle, %err, "Skipping meter in global query");
                    None
                }
            })
            .collect()
    }

    fn meter_levels(&self, handle: Handle) -> VolumeLevels {
        let slot = self.meter_slots.lock().get(&handle).cloned();
        slot.unwrap_or_default().read()
    }

    fn source(&self, name: &str) -> BindingResult<Arc<Source>> {
        self.engine
            .source_by_name(name)
            .ok_or_else(|| BindingError::NotFound(name.to_string()))
    }

    /// Returns the number of polled callbacks on `owner` afterwards.
    fn insert_link(
        &self,
        cb_handle: Handle,
        owner: Handle,
        owner_kind: ObjectKind,
        id: AudioCallbackId,
        info: Arc<CallbackInfo>,
        polled: bool,
    ) -> u32 {
        let mut links = self.links.lock();
        links.insert(
            cb_handle,
            CallbackLink {
                owner,
                owner_kind,
                id,
                info,
                polled,
            },
        );
        count_polled(&links, owner)
    }

    fn polled_count(&self, owner: Handle) -> u32 {
        count_polled(&self.links.lock(), owner)
    }

    fn take_link(&self, owner: Handle, cb_handle: Handle, polled: bool) -> BindingResult<CallbackLink> {
        let mut links = self.links.lock();
        match links.get(&cb_handle) {
            Some(link) if link.owner == owner && link.polled == polled => links
                .remove(&cb_handle)
                .ok_or(BindingError::InvalidReference(u64::from(cb_handle))),
            _ => Err(BindingError::InvalidReference(u64::from(cb_handle))),
        }
    }

    /// Unregister every callback owned by `owner`, removing each from the
    /// engine object with `remove`.
    fn release_links<F>(&self, owner: Handle, remove: F) -> usize
    where
        F: Fn(AudioCallbackId) -> bool,
    {
        let released: Vec<(Handle, CallbackLink)> = {
            let mut links = self.links.lock();
            let owned: Vec<Handle> = links
                .iter()
                .filter(|(_, link)| link.owner == owner)
                .map(|(cb, _)| *cb)
                .collect();
            owned
                .into_iter()
                .filter_map(|cb| links.remove(&cb).map(|link| (cb, link)))
                .collect()
        };

        for (cb_handle, link) in &released {
            remove(link.id);
            if let Err(err) = self.registry.release_callback(*cb_handle, &link.info) {
                warn!(cb_handle, %err, "Callback already unregistered");
            }
        }
        released.len()
    }
}

fn count_polled(links: &HashMap<Handle, CallbackLink>, owner: Handle) -> u32 {
    let count = links
        .values()
        .filter(|link| link.owner == owner && link.polled)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

impl Teardown for AudioBindings {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn teardown(&self) -> usize {
        let links: Vec<(Handle, CallbackLink)> = self.links.lock().drain().collect();
        let mut released = 0;

        for (cb_handle, link) in links {
            match self.registry.release_callback(cb_handle, &link.info) {
                Ok(_) => released += 1,
                Err(err) => warn!(cb_handle, %err, "Callback already unregistered"),
            }
            match link.owner_kind {
                ObjectKind::Fader => {
                    if let Ok(fader) = self.registry.fetch_fader(link.owner) {
                        fader.remove_callback(link.id);
                    }
                }
                ObjectKind::Volmeter => {
                    if let Ok(meter) = self.registry.fetch_volmeter(link.owner) {
                        meter.remove_callback(link.id);
                    }
                }
                ObjectKind::Callback => {}
            }
        }

        let objects = self.registry.objects();
        for handle in objects.handles() {
            let destroyed = match objects.tag_of(handle) {
                Some(ObjectKind::Fader) => self.fader_destroy(handle),
                Some(ObjectKind::Volmeter) => self.volmeter_destroy(handle),
                _ => continue,
            };
            // The engine object may already be gone; drop the entry anyway.
            if let Err(err) = destroyed {
                debug!(handle, %err, "Destroy failed, unmapping directly");
                if let Err(err) = self.registry.unmap(handle) {
                    warn!(handle, %err, "Failed to unmap audio object");
                }
            }
            released += 1;
        }
        self.fader_logs.lock().clear();
        self.meter_slots.lock().clear();

        let pending = self.fader_queue.close() + self.volmeter_queue.close();
        if pending > 0 {
            debug!(pending, "Discarded undelivered audio events");
        }
        released
    }
}

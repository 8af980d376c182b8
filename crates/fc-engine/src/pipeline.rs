//! Pipeline manager
//!
//! Owner of the dataflow graph: the filter table, the path table and the
//! workers pool. Every mutation is serialised through one manager value;
//! state reads snapshot filters one at a time so a running worker is never
//! deadlocked by the control plane.
//!
//! Control-plane actions arrive as JSON envelopes. Manager actions are
//! resolved through a dispatch table and validated into typed parameter
//! records before touching the graph; filter-targeted envelopes are queued
//! on the target's inbox, optionally delayed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use serde_json::{Value, json};

use fc_core::{EngineClock, ReaderEndpoint};

use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::factory::FilterFactory;
use crate::filter::{
    DEFAULT_ID, Filter, FilterHandle, FilterKind, connect_many_to_many, connect_many_to_one,
    connect_one_to_many, connect_one_to_one, filter_state,
};
use crate::path::Path;
use crate::pool::WorkersPool;

/// One established queue edge, remembered so a failed path connect can be
/// rolled back.
#[derive(Debug, Clone, Copy)]
struct Established {
    src: i32,
    writer_id: i32,
    dst: i32,
    reader_id: i32,
}

pub struct PipelineManager {
    clock: Arc<EngineClock>,
    pool: WorkersPool,
    filters: HashMap<i32, FilterHandle>,
    paths: HashMap<i32, Path>,
    factory: Box<dyn FilterFactory>,
    stopped: bool,
}

impl PipelineManager {
    pub fn new(threads: usize, factory: Box<dyn FilterFactory>) -> Self {
        let clock = Arc::new(EngineClock::new());
        let pool = WorkersPool::new(threads, clock.clone());
        Self { clock, pool, filters: HashMap::new(), paths: HashMap::new(), factory, stopped: false }
    }

    pub fn clock(&self) -> &Arc<EngineClock> {
        &self.clock
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn filter(&self, id: i32) -> Option<&FilterHandle> {
        self.filters.get(&id)
    }

    pub fn path(&self, id: i32) -> Option<&Path> {
        self.paths.get(&id)
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// First filter id of the given kind, lowest id wins.
    pub fn search_filter_by_kind(&self, kind: FilterKind) -> Option<i32> {
        self.filters.iter().filter(|(_, h)| h.kind == kind).map(|(id, _)| *id).min()
    }

    // ============ Filter lifecycle ============

    /// Instantiate a filter of `kind` through the factory under `id`.
    pub fn create_filter(&mut self, id: i32, kind: FilterKind) -> EngineResult<()> {
        if id < 0 {
            return Err(EngineError::InvalidFilterId(id));
        }
        if self.filters.contains_key(&id) {
            return Err(EngineError::DuplicateFilterId(id));
        }
        let filter = self
            .factory
            .create(kind)
            .ok_or_else(|| EngineError::UnknownKind(format!("{kind:?}")))?;
        self.add_filter(id, filter)
    }

    /// Take ownership of `filter` and start scheduling it.
    pub fn add_filter(&mut self, id: i32, filter: Box<dyn Filter>) -> EngineResult<()> {
        if self.stopped {
            return Err(EngineError::Stopped);
        }
        if id < 0 {
            return Err(EngineError::InvalidFilterId(id));
        }
        if self.filters.contains_key(&id) {
            return Err(EngineError::DuplicateFilterId(id));
        }
        let handle = FilterHandle::new(id, filter, self.clock.clone());
        if !self.pool.add_task(handle.clone()) {
            return Err(EngineError::Stopped);
        }
        log::info!("added filter {id} ({:?})", handle.kind);
        self.filters.insert(id, handle);
        Ok(())
    }

    /// Remove a filter that no path references.
    pub fn remove_filter(&mut self, id: i32) -> EngineResult<()> {
        if !self.filters.contains_key(&id) {
            return Err(EngineError::UnknownFilter(id));
        }
        if let Some((path_id, _)) = self.paths.iter().find(|(_, p)| p.has_filter(id)) {
            return Err(EngineError::FilterInPath { filter: id, path: *path_id });
        }
        self.pool.remove_task(id);
        self.filters.remove(&id);
        log::info!("removed filter {id}");
        Ok(())
    }

    /// Park a filter's scheduling, e.g. while a control mutation touching
    /// it is pending.
    pub fn suspend_filter(&self, id: i32) -> EngineResult<()> {
        if self.pool.suspend_task(id) { Ok(()) } else { Err(EngineError::UnknownFilter(id)) }
    }

    pub fn resume_filter(&self, id: i32) -> EngineResult<()> {
        if self.pool.resume_task(id) { Ok(()) } else { Err(EngineError::UnknownFilter(id)) }
    }

    /// Register `slave` as a shared-input follower of `master`.
    pub fn add_slave(&mut self, master: i32, slave: i32) -> EngineResult<()> {
        let slave_handle =
            self.filters.get(&slave).ok_or(EngineError::UnknownFilter(slave))?.clone();
        if slave_handle.filter.lock().as_shared_slave().is_none() {
            return Err(EngineError::NotASlave(slave));
        }
        let master_handle = self.filters.get(&master).ok_or(EngineError::UnknownFilter(master))?;
        master_handle.filter.lock().register_slave(slave_handle)
    }

    // ============ Path lifecycle ============

    /// Validate and record a path. Negative writer/reader ids are allocated
    /// from the owning endpoint filter.
    pub fn create_path(
        &mut self,
        id: i32,
        origin_filter: i32,
        destination_filter: i32,
        origin_writer: i32,
        destination_reader: i32,
        mid_filters: Vec<i32>,
    ) -> EngineResult<()> {
        if self.paths.contains_key(&id) {
            return Err(EngineError::DuplicatePathId(id));
        }
        if !self.filters.contains_key(&origin_filter) {
            return Err(EngineError::UnknownFilter(origin_filter));
        }
        if !self.filters.contains_key(&destination_filter) {
            return Err(EngineError::UnknownFilter(destination_filter));
        }
        for mid in &mid_filters {
            if !self.filters.contains_key(mid) {
                return Err(EngineError::UnknownFilter(*mid));
            }
            if *mid == origin_filter || *mid == destination_filter {
                return Err(EngineError::InvalidEndpoint(format!(
                    "mid filter {mid} duplicates a path endpoint"
                )));
            }
        }
        let unique: HashSet<i32> = mid_filters.iter().copied().collect();
        if unique.len() != mid_filters.len() {
            return Err(EngineError::InvalidEndpoint("duplicated mid filters".into()));
        }

        let origin_writer = if origin_writer < 0 {
            self.filters[&origin_filter].filter.lock().io_mut().generate_writer_id()
        } else {
            origin_writer
        };
        let destination_reader = if destination_reader < 0 {
            self.filters[&destination_filter].filter.lock().io_mut().generate_reader_id()
        } else {
            destination_reader
        };

        self.paths.insert(
            id,
            Path::new(origin_filter, destination_filter, origin_writer, destination_reader, mid_filters),
        );
        Ok(())
    }

    /// Issue the queue connections for a recorded path, left to right. Any
    /// failure rolls back the edges established by this call.
    pub fn connect_path(&mut self, id: i32) -> EngineResult<()> {
        let path = self.paths.get(&id).ok_or(EngineError::UnknownPath(id))?.clone();
        for mid in path.mid_filters() {
            if !self.filters.contains_key(mid) {
                return Err(EngineError::UnknownFilter(*mid));
            }
        }

        let mut established: Vec<Established> = Vec::new();
        let result = self.connect_path_inner(&path, &mut established);
        if let Err(err) = result {
            for edge in established.iter().rev() {
                self.disconnect_edge(*edge);
            }
            return Err(err);
        }
        log::info!("connected path {id}");
        Ok(())
    }

    fn handle_of(&self, id: i32) -> EngineResult<FilterHandle> {
        self.filters.get(&id).cloned().ok_or(EngineError::UnknownFilter(id))
    }

    fn connect_path_inner(
        &mut self,
        path: &Path,
        established: &mut Vec<Established>,
    ) -> EngineResult<()> {
        let origin = path.origin_filter();
        let destination = path.destination_filter();
        let mids = path.mid_filters().to_vec();

        if mids.is_empty() {
            return self.connect_or_group(
                origin,
                path.origin_writer(),
                destination,
                path.destination_reader(),
                established,
            );
        }

        self.connect_or_group(origin, path.origin_writer(), mids[0], DEFAULT_ID, established)?;
        for window in mids.windows(2) {
            let src = self.handle_of(window[0])?;
            let dst = self.handle_of(window[1])?;
            connect_one_to_one(&src, &dst, &self.clock)?;
            established.push(Established {
                src: window[0],
                writer_id: DEFAULT_ID,
                dst: window[1],
                reader_id: DEFAULT_ID,
            });
        }

        let last = *mids.last().expect("mids checked non-empty");
        let src = self.handle_of(last)?;
        let dst = self.handle_of(destination)?;
        connect_one_to_many(&src, &dst, path.destination_reader(), &self.clock)?;
        established.push(Established {
            src: last,
            writer_id: DEFAULT_ID,
            dst: destination,
            reader_id: path.destination_reader(),
        });
        Ok(())
    }

    /// Direct connection, falling back to reader sharing when the origin
    /// writer already feeds someone.
    fn connect_or_group(
        &mut self,
        src: i32,
        writer_id: i32,
        dst: i32,
        reader_id: i32,
        established: &mut Vec<Established>,
    ) -> EngineResult<()> {
        let src_handle = self.handle_of(src)?;
        let dst_handle = self.handle_of(dst)?;
        let direct = if reader_id == DEFAULT_ID {
            connect_many_to_one(&src_handle, writer_id, &dst_handle, &self.clock)
        } else {
            connect_many_to_many(&src_handle, writer_id, &dst_handle, reader_id, &self.clock)
        };
        match direct {
            Ok(()) => {
                established.push(Established { src, writer_id, dst, reader_id });
                Ok(())
            }
            Err(first_err) => {
                match self.handle_grouping(src, writer_id, dst, reader_id) {
                    Ok(()) => {
                        established.push(Established { src, writer_id, dst, reader_id });
                        Ok(())
                    }
                    // The direct error describes the actual topology issue.
                    Err(_) => Err(first_err),
                }
            }
        }
    }

    /// Attach `dst` as a shared reader of the edge already fed by the
    /// origin writer: valid only when the recorded connection is alive and
    /// `dst` is not already one of its endpoints.
    fn handle_grouping(
        &mut self,
        org: i32,
        writer_id: i32,
        dst: i32,
        reader_id: i32,
    ) -> EngineResult<()> {
        let org_handle = self.filters.get(&org).ok_or(EngineError::UnknownFilter(org))?.clone();
        let data = {
            let guard = org_handle.filter.lock();
            if !guard.io().writer_connected(writer_id) {
                return Err(EngineError::ConnectionFailed(format!(
                    "writer {writer_id} of filter {org} is not connected"
                )));
            }
            guard
                .io()
                .connection_data(writer_id)
                .cloned()
                .ok_or_else(|| EngineError::ConnectionFailed("missing connection record".into()))?
        };

        if data.writer_filter_id != org || data.readers.is_empty() {
            return Err(EngineError::ConnectionFailed("stale connection record".into()));
        }
        for endpoint in &data.readers {
            if endpoint.filter_id == dst {
                return Err(EngineError::ConnectionFailed(format!(
                    "filter {dst} already reads this edge"
                )));
            }
            let handle = self
                .filters
                .get(&endpoint.filter_id)
                .ok_or(EngineError::UnknownFilter(endpoint.filter_id))?;
            if !handle.filter.lock().io().reader_connected(endpoint.reader_id) {
                return Err(EngineError::ConnectionFailed("recorded reader is gone".into()));
            }
        }

        let source = data.readers[0];
        let shared = {
            let guard = self.filters[&source.filter_id].filter.lock();
            guard.io().split_reader(source.reader_id).ok_or_else(|| {
                EngineError::ConnectionFailed("source reader cannot be shared".into())
            })?
        };

        let dst_handle = self.filters.get(&dst).ok_or(EngineError::UnknownFilter(dst))?.clone();
        dst_handle.filter.lock().io_mut().install_reader(reader_id, shared)?;
        org_handle
            .filter
            .lock()
            .io_mut()
            .record_writer_endpoint(writer_id, ReaderEndpoint { filter_id: dst, reader_id });
        log::debug!("filter {dst} attached as shared reader of filter {org} writer {writer_id}");
        Ok(())
    }

    fn disconnect_edge(&mut self, edge: Established) {
        if let Some(dst) = self.filters.get(&edge.dst) {
            dst.filter.lock().io_mut().disconnect_reader(edge.reader_id);
        }
        if let Some(src) = self.filters.get(&edge.src) {
            src.filter.lock().io_mut().remove_writer_endpoint(
                edge.writer_id,
                ReaderEndpoint { filter_id: edge.dst, reader_id: edge.reader_id },
            );
        }
    }

    /// Disconnect and dismantle a path: destination reader first, then mids
    /// in reverse order; endpoint filters survive while other paths still
    /// reference them.
    pub fn remove_path(&mut self, id: i32) -> EngineResult<()> {
        let path = self.paths.get(&id).ok_or(EngineError::UnknownPath(id))?.clone();

        let origin = path.origin_filter();
        let destination = path.destination_filter();
        if !self.filters.contains_key(&origin) || !self.filters.contains_key(&destination) {
            return Err(EngineError::ConnectionFailed(
                "path endpoints vanished before removal".into(),
            ));
        }
        for mid in path.mid_filters() {
            if !self.filters.contains_key(mid) {
                return Err(EngineError::UnknownFilter(*mid));
            }
        }

        // Tail side first so no reader outlives its upstream.
        if let Some(dst) = self.filters.get(&destination) {
            if !dst.filter.lock().io_mut().disconnect_reader(path.destination_reader()) {
                log::warn!("path {id}: destination reader was already disconnected");
            }
        }
        let first_hop = path.mid_filters().first().copied().unwrap_or(destination);
        let first_hop_reader =
            if path.mid_filters().is_empty() { path.destination_reader() } else { DEFAULT_ID };
        if let Some(org) = self.filters.get(&origin) {
            org.filter.lock().io_mut().remove_writer_endpoint(
                path.origin_writer(),
                ReaderEndpoint { filter_id: first_hop, reader_id: first_hop_reader },
            );
        }

        for mid in path.mid_filters().iter().rev() {
            self.pool.remove_task(*mid);
            if let Some(handle) = self.filters.remove(mid) {
                handle.filter.lock().io_mut().disconnect_reader(DEFAULT_ID);
            }
        }

        self.paths.remove(&id);

        let orphan_origin = !self.paths.values().any(|p| p.has_filter(origin));
        let orphan_destination = !self.paths.values().any(|p| p.has_filter(destination));
        if orphan_destination {
            self.pool.remove_task(destination);
            self.filters.remove(&destination);
        }
        if orphan_origin {
            self.pool.remove_task(origin);
            self.filters.remove(&origin);
        }

        log::info!("removed path {id}");
        Ok(())
    }

    /// Stop the pool, dismantle every path, drop every filter.
    pub fn stop(&mut self) -> EngineResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.pool.stop();
        let ids: Vec<i32> = self.paths.keys().copied().collect();
        for id in ids {
            if let Err(err) = self.remove_path(id) {
                log::error!("failed deleting path {id}: {err}");
            }
        }
        self.paths.clear();
        for id in self.filters.keys().copied().collect::<Vec<_>>() {
            self.pool.remove_task(id);
        }
        self.filters.clear();
        self.stopped = true;
        log::info!("pipeline stopped");
        Ok(())
    }

    // ============ Events ============

    /// Queue an event on a filter's inbox, activating after `delay_us`.
    pub fn push_filter_event(
        &self,
        filter_id: i32,
        action: impl Into<String>,
        params: Value,
        delay_us: i64,
    ) -> EngineResult<()> {
        let handle = self.filters.get(&filter_id).ok_or(EngineError::UnknownFilter(filter_id))?;
        let activation = self.clock.now_us() + delay_us.max(0) as u64;
        handle.push_event(Event::new(action, params).at(activation));
        self.pool.wake();
        Ok(())
    }

    // ============ State ============

    /// Snapshot of every filter and path, in the control-plane wire shape.
    pub fn get_state(&self) -> Value {
        let mut filters: Vec<Value> = Vec::with_capacity(self.filters.len());
        let mut ids: Vec<i32> = self.filters.keys().copied().collect();
        ids.sort_unstable();
        for id in &ids {
            let handle = &self.filters[id];
            let mut state = filter_state(&**handle.filter.lock());
            if let Value::Object(map) = &mut state {
                map.insert("id".into(), json!(id));
            }
            filters.push(state);
        }

        let mut paths: Vec<Value> = Vec::with_capacity(self.paths.len());
        let mut path_ids: Vec<i32> = self.paths.keys().copied().collect();
        path_ids.sort_unstable();
        for id in &path_ids {
            let path = &self.paths[id];
            let (avg_delay, mut lost_blocks) = match self.filters.get(&path.destination_filter()) {
                Some(dst) => {
                    let guard = dst.filter.lock();
                    (
                        guard.io().reader_avg_delay_us(path.destination_reader()),
                        guard.io().reader_lost_blocks(path.destination_reader()),
                    )
                }
                None => (0, 0),
            };
            for mid in path.mid_filters() {
                if let Some(handle) = self.filters.get(mid) {
                    lost_blocks += handle.filter.lock().io().reader_lost_blocks(DEFAULT_ID);
                }
            }
            paths.push(json!({
                "id": id,
                "originFilter": path.origin_filter(),
                "destinationFilter": path.destination_filter(),
                "originWriter": path.origin_writer(),
                "destinationReader": path.destination_reader(),
                "filters": path.mid_filters(),
                "avgDelay": avg_delay,
                "lostBlocks": lost_blocks,
            }));
        }

        json!({ "filters": filters, "paths": paths })
    }

    // ============ Control-plane dispatch ============

    /// Route one control envelope: filter-targeted envelopes are queued,
    /// manager actions run synchronously. Always returns a reply envelope
    /// whose `error` member is null on success.
    pub fn process_event(&mut self, envelope: &Value) -> Value {
        let Some(action) = envelope.get("action").and_then(Value::as_str) else {
            return reply_err("invalid envelope: missing action");
        };
        if envelope.get("params").is_none() {
            return reply_err("invalid envelope: missing params");
        }

        if let Some(filter_id) = envelope.get("filterId").and_then(Value::as_i64) {
            let delay = envelope.get("delay").and_then(Value::as_i64).unwrap_or(0);
            let params = envelope.get("params").cloned().unwrap_or(Value::Null);
            return match self.push_filter_event(filter_id as i32, action, params, delay) {
                Ok(()) => reply_ok(),
                Err(err) => reply_err(&err.to_string()),
            };
        }

        let params = envelope.get("params").cloned().unwrap_or(Value::Null);
        match lookup_action(action) {
            Some(handler) => handler(self, &params),
            None => reply_err(&format!("unknown action '{action}'")),
        }
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ============ Typed action parameters ============

#[derive(Debug, Deserialize)]
struct CreateFilterParams {
    id: i32,
    #[serde(rename = "type")]
    kind: FilterKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePathParams {
    id: i32,
    org_filter_id: i32,
    dst_filter_id: i32,
    org_writer_id: i32,
    dst_reader_id: i32,
    #[serde(default)]
    mid_filters_ids: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: i32,
}

type ActionHandler = fn(&mut PipelineManager, &Value) -> Value;

/// Action dispatch table, wire name to handler.
const ACTIONS: &[(&str, ActionHandler)] = &[
    ("getState", action_get_state),
    ("createFilter", action_create_filter),
    ("createPath", action_create_path),
    ("removePath", action_remove_path),
    ("removeFilter", action_remove_filter),
    ("stop", action_stop),
];

fn lookup_action(name: &str) -> Option<ActionHandler> {
    ACTIONS.iter().find(|(action, _)| *action == name).map(|(_, handler)| *handler)
}

fn reply_ok() -> Value {
    json!({ "error": null })
}

fn reply_err(message: &str) -> Value {
    json!({ "error": message })
}

fn action_get_state(manager: &mut PipelineManager, _params: &Value) -> Value {
    let mut reply = manager.get_state();
    if let Value::Object(map) = &mut reply {
        map.insert("error".into(), Value::Null);
    }
    reply
}

fn action_create_filter(manager: &mut PipelineManager, params: &Value) -> Value {
    let params: CreateFilterParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(err) => return reply_err(&format!("invalid createFilter params: {err}")),
    };
    match manager.create_filter(params.id, params.kind) {
        Ok(()) => reply_ok(),
        Err(err) => reply_err(&err.to_string()),
    }
}

fn action_create_path(manager: &mut PipelineManager, params: &Value) -> Value {
    let params: CreatePathParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(err) => return reply_err(&format!("invalid createPath params: {err}")),
    };
    if let Err(err) = manager.create_path(
        params.id,
        params.org_filter_id,
        params.dst_filter_id,
        params.org_writer_id,
        params.dst_reader_id,
        params.mid_filters_ids,
    ) {
        return reply_err(&err.to_string());
    }
    if let Err(err) = manager.connect_path(params.id) {
        // The path fails as a whole: drop the record created above.
        manager.paths.remove(&params.id);
        return reply_err(&err.to_string());
    }
    reply_ok()
}

fn action_remove_path(manager: &mut PipelineManager, params: &Value) -> Value {
    let params: IdParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(err) => return reply_err(&format!("invalid removePath params: {err}")),
    };
    match manager.remove_path(params.id) {
        Ok(()) => reply_ok(),
        Err(err) => reply_err(&err.to_string()),
    }
}

fn action_remove_filter(manager: &mut PipelineManager, params: &Value) -> Value {
    let params: IdParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(err) => return reply_err(&format!("invalid removeFilter params: {err}")),
    };
    match manager.remove_filter(params.id) {
        Ok(()) => reply_ok(),
        Err(err) => reply_err(&err.to_string()),
    }
}

fn action_stop(manager: &mut PipelineManager, _params: &Value) -> Value {
    match manager.stop() {
        Ok(()) => reply_ok(),
        Err(err) => reply_err(&err.to_string()),
    }
}

// ============ Engine ============

/// The single owned coordinator: a pipeline manager behind one lock,
/// shared by the control socket and any embedding code.
pub struct Engine {
    manager: Mutex<PipelineManager>,
}

impl Engine {
    pub fn new(threads: usize, factory: Box<dyn FilterFactory>) -> Self {
        Self { manager: Mutex::new(PipelineManager::new(threads, factory)) }
    }

    /// Serialised access to the manager.
    pub fn manager(&self) -> MutexGuard<'_, PipelineManager> {
        self.manager.lock()
    }

    pub fn process_event(&self, envelope: &Value) -> Value {
        self.manager.lock().process_event(envelope)
    }

    pub fn is_stopped(&self) -> bool {
        self.manager.lock().is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::LoopbackFactory;

    fn manager() -> PipelineManager {
        PipelineManager::new(2, Box::new(LoopbackFactory::default()))
    }

    #[test]
    fn test_create_filter_validation() {
        let mut m = manager();
        assert!(m.create_filter(7, FilterKind::VideoDecoder).is_ok());
        assert!(matches!(
            m.create_filter(7, FilterKind::VideoDecoder),
            Err(EngineError::DuplicateFilterId(7))
        ));
        assert!(matches!(
            m.create_filter(-1, FilterKind::VideoDecoder),
            Err(EngineError::InvalidFilterId(-1))
        ));
        m.stop().unwrap();
    }

    #[test]
    fn test_create_path_validation() {
        let mut m = manager();
        m.create_filter(1, FilterKind::Receiver).unwrap();
        m.create_filter(2, FilterKind::Transmitter).unwrap();
        m.create_filter(3, FilterKind::VideoDecoder).unwrap();

        assert!(matches!(
            m.create_path(1, 9, 2, -1, -1, vec![]),
            Err(EngineError::UnknownFilter(9))
        ));
        assert!(matches!(
            m.create_path(1, 1, 2, -1, -1, vec![3, 3]),
            Err(EngineError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            m.create_path(1, 1, 2, -1, -1, vec![1]),
            Err(EngineError::InvalidEndpoint(_))
        ));
        assert!(m.create_path(1, 1, 2, -1, -1, vec![3]).is_ok());
        assert!(matches!(
            m.create_path(1, 1, 2, -1, -1, vec![]),
            Err(EngineError::DuplicatePathId(1))
        ));
        m.stop().unwrap();
    }

    #[test]
    fn test_search_filter_by_kind() {
        let mut m = manager();
        m.create_filter(4, FilterKind::AudioMixer).unwrap();
        m.create_filter(2, FilterKind::AudioMixer).unwrap();
        assert_eq!(m.search_filter_by_kind(FilterKind::AudioMixer), Some(2));
        assert_eq!(m.search_filter_by_kind(FilterKind::Segmenter), None);
        m.stop().unwrap();
    }

    #[test]
    fn test_remove_filter_in_path_refused() {
        let mut m = manager();
        m.create_filter(1, FilterKind::Receiver).unwrap();
        m.create_filter(2, FilterKind::Transmitter).unwrap();
        m.create_path(10, 1, 2, -1, -1, vec![]).unwrap();
        assert!(matches!(
            m.remove_filter(1),
            Err(EngineError::FilterInPath { filter: 1, path: 10 })
        ));
        m.stop().unwrap();
    }

    #[test]
    fn test_process_event_dispatch() {
        let mut m = manager();
        let reply = m.process_event(&json!({
            "action": "createFilter",
            "params": {"id": 3, "type": "videoDecoder"}
        }));
        assert_eq!(reply["error"], Value::Null);

        let reply = m.process_event(&json!({
            "action": "createFilter",
            "params": {"id": 3, "type": "videoDecoder"}
        }));
        assert!(reply["error"].is_string());

        let reply = m.process_event(&json!({"action": "bogus", "params": {}}));
        assert!(reply["error"].as_str().unwrap().contains("unknown action"));

        let reply = m.process_event(&json!({"params": {}}));
        assert!(reply["error"].is_string());
        m.stop().unwrap();
    }

    #[test]
    fn test_filter_event_routing() {
        let mut m = manager();
        m.create_filter(5, FilterKind::AudioMixer).unwrap();
        let reply = m.process_event(&json!({
            "filterId": 5,
            "action": "setChannelGain",
            "params": {"reader": 1, "gain": 0.5},
            "delay": 0
        }));
        assert_eq!(reply["error"], Value::Null);

        let reply = m.process_event(&json!({
            "filterId": 99,
            "action": "setChannelGain",
            "params": {},
        }));
        assert!(reply["error"].is_string());
        m.stop().unwrap();
    }

    #[test]
    fn test_get_state_shape() {
        let mut m = manager();
        m.create_filter(1, FilterKind::Receiver).unwrap();
        m.create_filter(2, FilterKind::Transmitter).unwrap();
        m.create_path(4, 1, 2, -1, -1, vec![]).unwrap();
        m.connect_path(4).unwrap();

        let state = m.get_state();
        assert_eq!(state["filters"].as_array().unwrap().len(), 2);
        let path = &state["paths"][0];
        assert_eq!(path["id"], 4);
        assert_eq!(path["originFilter"], 1);
        assert_eq!(path["destinationFilter"], 2);
        assert!(path["avgDelay"].as_u64().is_some());
        assert!(path["lostBlocks"].as_u64().is_some());
        m.stop().unwrap();
    }

    #[test]
    fn test_stop_clears_everything() {
        let mut m = manager();
        m.create_filter(1, FilterKind::Receiver).unwrap();
        m.create_filter(2, FilterKind::Transmitter).unwrap();
        m.create_path(1, 1, 2, -1, -1, vec![]).unwrap();
        m.connect_path(1).unwrap();
        m.stop().unwrap();
        assert_eq!(m.filter_count(), 0);
        assert_eq!(m.path_count(), 0);
        assert!(m.is_stopped());
        assert!(matches!(m.create_filter(3, FilterKind::Receiver), Err(EngineError::Stopped)));
    }
}

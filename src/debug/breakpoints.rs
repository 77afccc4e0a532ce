use crate::engine::{DebugEngine, EngineBreakpoint, LineRequest};
use crate::source::Source;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub source: Arc<Source>,
    /// Requested line, 1-based.
    pub line: i64,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub handle: Option<EngineBreakpoint>,
}

impl Breakpoint {
    fn from_request(source: &Arc<Source>, request: &LineRequest) -> Self {
        Self {
            source: source.clone(),
            line: request.line,
            condition: request.condition.clone(),
            hit_condition: request.hit_condition.clone(),
            handle: None,
        }
    }

    pub fn verified(&self) -> bool {
        self.handle.is_some()
    }

    /// Line the breakpoint actually sits on.
    pub fn effective_line(&self) -> i64 {
        self.handle.map(|h| h.line).unwrap_or(self.line)
    }

    fn request(&self) -> LineRequest {
        LineRequest {
            line: self.line,
            condition: self.condition.clone(),
            hit_condition: self.hit_condition.clone(),
        }
    }
}

/// Breakpoints per source, replaced as a whole on every `setBreakpoints`.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    // keyed by source id so iteration follows submission order
    by_source: BTreeMap<u64, Vec<Breakpoint>>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records breakpoints before the engine is attached. They stay
    /// unverified until [`resolve_pending`](Self::resolve_pending).
    pub fn store_pending(&mut self, source: Arc<Source>, requests: &[LineRequest]) -> &[Breakpoint] {
        debug!("Storing {} pending breakpoints for {}", requests.len(), source.path);
        let entries = requests
            .iter()
            .map(|req| Breakpoint::from_request(&source, req))
            .collect();
        self.supersede(&source);
        self.by_source.insert(source.id, entries);
        self.for_source(source.id)
    }

    /// Re-dumping an executed cell yields a new source for the same unit.
    /// The engine holds one set per unit, so older sources lose theirs.
    fn supersede(&mut self, source: &Source) {
        self.by_source.retain(|&id, entries| {
            id == source.id || entries.first().map_or(true, |bp| bp.source.unit != source.unit)
        });
    }

    /// Drops the source's breakpoints and resolves `requests` through the
    /// engine. Lines the engine cannot bind come back unverified.
    ///
    /// If the engine call itself fails the previous set is kept.
    pub async fn replace(
        &mut self,
        engine: &dyn DebugEngine,
        source: Arc<Source>,
        requests: &[LineRequest],
    ) -> Result<&[Breakpoint]> {
        let had_any = self
            .by_source
            .values()
            .flatten()
            .any(|bp| bp.source.unit == source.unit);

        let entries = if requests.is_empty() {
            if had_any {
                engine.clear_breakpoints(&source.unit).await?;
            }
            Vec::new()
        } else {
            let handles = engine.set_breakpoints(&source.unit, requests).await?;
            requests
                .iter()
                .enumerate()
                .map(|(i, req)| Breakpoint {
                    handle: handles.get(i).copied().flatten(),
                    ..Breakpoint::from_request(&source, req)
                })
                .collect::<Vec<_>>()
        };

        let verified = entries.iter().filter(|bp| bp.verified()).count();
        info!(
            "🎯 {}: {}/{} breakpoints verified",
            source.path,
            verified,
            entries.len()
        );

        self.supersede(&source);
        self.by_source.insert(source.id, entries);
        Ok(self.for_source(source.id))
    }

    /// Resolves everything stored while detached. A source the engine
    /// refuses stays unverified; returns the number of verified breakpoints.
    pub async fn resolve_pending(&mut self, engine: &dyn DebugEngine) -> usize {
        let mut verified = 0;

        for entries in self.by_source.values_mut() {
            let Some(source) = entries.first().map(|bp| bp.source.clone()) else {
                continue;
            };
            let requests: Vec<LineRequest> = entries.iter().map(Breakpoint::request).collect();

            match engine.set_breakpoints(&source.unit, &requests).await {
                Ok(handles) => {
                    for (bp, handle) in entries.iter_mut().zip(handles) {
                        bp.handle = handle;
                        verified += usize::from(bp.verified());
                    }
                }
                Err(e) => warn!("Could not resolve pending breakpoints for {}: {}", source.path, e),
            }
        }

        verified
    }

    /// Engine handles die with the engine connection.
    pub fn invalidate_all(&mut self) {
        for bp in self.by_source.values_mut().flatten() {
            bp.handle = None;
        }
    }

    pub fn for_source(&self, source_id: u64) -> &[Breakpoint] {
        self.by_source.get(&source_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Breakpoint]> {
        self.by_source
            .values()
            .filter(|entries| !entries.is_empty())
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

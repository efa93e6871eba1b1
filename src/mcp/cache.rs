use std::collections::HashMap;

use parking_lot::RwLock;

use crate::tool::Tool;

#[derive(Debug, Default)]
struct CacheState {
    tools: Vec<Tool>,
    /// tool name -> server name
    routing: HashMap<String, String>,
    valid: bool,
    generation: u64,
}

/// Last known good tool listing and its routing table.
///
/// Both collections are copied on the way in and on the way out.
#[derive(Debug, Default)]
pub struct ToolCache {
    state: RwLock<CacheState>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first [`update`](Self::update) and after every
    /// [`invalidate`](Self::invalidate).
    pub fn get(&self) -> Option<(Vec<Tool>, HashMap<String, String>)> {
        let state = self.state.read();
        if !state.valid {
            return None;
        }
        Some((state.tools.clone(), state.routing.clone()))
    }

    pub fn update(&self, tools: &[Tool], routing: &HashMap<String, String>) {
        let mut state = self.state.write();
        state.tools = tools.to_vec();
        state.routing = routing.clone();
        state.valid = true;
    }

    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.valid = false;
        state.tools = Vec::new();
        state.routing = HashMap::new();
        state.generation += 1;
    }

    pub fn is_valid(&self) -> bool {
        self.state.read().valid
    }

    /// Number of invalidations so far.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }
}

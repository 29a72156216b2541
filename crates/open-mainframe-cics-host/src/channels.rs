//! CICS channels and containers.
//!
//! A channel is a named collection of containers; a container holds named
//! byte data. Commands that omit the channel use the current channel, or
//! the default channel `SYSTEM` when none is current. Missing channels and
//! containers are reported as response codes, not errors.

use std::collections::HashMap;

use crate::response::CicsResponse;

/// Channel used when a command names none and no channel is current.
pub const DEFAULT_CHANNEL: &str = "SYSTEM";

/// A container holding named byte data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    name: String,
    data: Vec<u8>,
}

impl Container {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A named collection of containers.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    name: String,
    containers: HashMap<String, Container>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store data in a container, replacing any previous content.
    pub fn put(&mut self, container: &str, data: &[u8]) {
        let key = normalize(container);
        self.containers
            .insert(key.clone(), Container::new(key, data.to_vec()));
    }

    pub fn get(&self, container: &str) -> Option<&Container> {
        self.containers.get(&normalize(container))
    }

    pub fn delete(&mut self, container: &str) -> bool {
        self.containers.remove(&normalize(container)).is_some()
    }

    /// Container names, sorted.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }
}

/// Channels of one session.
#[derive(Debug, Clone, Default)]
pub struct ChannelManager {
    channels: HashMap<String, Channel>,
    current: Option<String>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name a command without an explicit channel resolves to.
    pub fn effective_name(&self, channel: Option<&str>) -> String {
        channel
            .map(normalize)
            .or_else(|| self.current.clone())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string())
    }

    pub fn current_channel_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn set_current_channel(&mut self, name: Option<&str>) {
        self.current = name.map(normalize);
    }

    /// PUT CONTAINER. Creates the channel when needed.
    pub fn put_container(&mut self, channel: Option<&str>, container: &str, data: &[u8]) {
        let name = self.effective_name(channel);
        self.channels
            .entry(name.clone())
            .or_insert_with(|| Channel::new(name))
            .put(container, data);
    }

    /// GET CONTAINER. CHANNELERR when the channel is missing, CONTAINERERR
    /// when the container is missing from an existing channel.
    pub fn get_container(
        &self,
        channel: Option<&str>,
        container: &str,
    ) -> Result<&[u8], CicsResponse> {
        let channel = self
            .channels
            .get(&self.effective_name(channel))
            .ok_or(CicsResponse::Channelerr)?;
        channel
            .get(container)
            .map(Container::data)
            .ok_or(CicsResponse::Containererr)
    }

    /// DELETE CONTAINER, with the same conditions as GET CONTAINER.
    pub fn delete_container(
        &mut self,
        channel: Option<&str>,
        container: &str,
    ) -> Result<(), CicsResponse> {
        let name = self.effective_name(channel);
        let channel = self
            .channels
            .get_mut(&name)
            .ok_or(CicsResponse::Channelerr)?;
        if channel.delete(container) {
            Ok(())
        } else {
            Err(CicsResponse::Containererr)
        }
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&normalize(name))
    }

    pub fn delete_channel(&mut self, name: &str) -> bool {
        let name = normalize(name);
        if self.current.as_deref() == Some(name.as_str()) {
            self.current = None;
        }
        self.channels.remove(&name).is_some()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Drop every channel.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.current = None;
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_uppercase()
}

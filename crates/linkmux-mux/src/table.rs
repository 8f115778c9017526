use std::collections::{BTreeMap, HashMap};

use linkmux_frame::ChannelId;

use crate::channel::Channel;
use crate::error::{MuxError, Result};

/// Open channels, iterated in the order they were inserted.
#[derive(Debug)]
pub struct ChannelTable {
    slots: BTreeMap<u64, Channel>,
    index: HashMap<ChannelId, u64>,
    next_slot: u64,
    max_channels: usize,
}

impl ChannelTable {
    pub fn new(max_channels: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            index: HashMap::new(),
            next_slot: 0,
            max_channels,
        }
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.index.get(&id).and_then(|slot| self.slots.get(slot))
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        let slot = self.index.get(&id)?;
        self.slots.get_mut(slot)
    }

    /// Insert a channel under its id. Returns a reference to the stored channel.
    pub fn add_channel(&mut self, channel: Channel) -> Result<&mut Channel> {
        let id = channel.id();
        if self.contains(id) {
            return Err(MuxError::ChannelAlreadyExist(id));
        }
        if self.slots.len() >= self.max_channels {
            return Err(MuxError::TooManyChannels {
                max: self.max_channels,
            });
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        self.index.insert(id, slot);
        Ok(self.slots.entry(slot).or_insert(channel))
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<Channel> {
        let slot = self.index.remove(&id)?;
        self.slots.remove(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.slots.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.slots.values_mut()
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.iter().map(Channel::id).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

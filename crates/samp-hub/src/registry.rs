use std::collections::BTreeMap;

use samp_core::value::MapValue;
use samp_core::{ClientId, HubError, MType, Metadata, Subscriptions};

use crate::sink::SharedSink;

/// Well-known id under which the hub registers itself.
pub const HUB_CLIENT_ID: &str = "hub";

/// One registered client and everything it has declared.
pub struct ClientEntry {
    id: ClientId,
    metadata: Metadata,
    subscriptions: Subscriptions,
    sink: Option<SharedSink>,
}

impl ClientEntry {
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// A client is callable once it has declared a callback endpoint.
    pub fn is_callable(&self) -> bool {
        self.sink.is_some()
    }

    pub fn sink(&self) -> Option<&SharedSink> {
        self.sink.as_ref()
    }
}

/// The set of registered clients. Pure in-memory state; the broker
/// serialises all access behind its lock.
pub struct Registry {
    clients: BTreeMap<ClientId, ClientEntry>,
    next_serial: u64,
    hub_id: ClientId,
}

impl Registry {
    /// Creates the registry with the hub itself seeded as the first
    /// client, so it shows up in client listings and is a legal sender
    /// id for lifecycle events.
    pub fn new(hub_metadata: Metadata) -> Self {
        let hub_id = ClientId::new(HUB_CLIENT_ID);
        let mut clients = BTreeMap::new();
        clients.insert(
            hub_id.clone(),
            ClientEntry {
                id: hub_id.clone(),
                metadata: hub_metadata,
                subscriptions: Subscriptions::new(),
                sink: None,
            },
        );
        Self {
            clients,
            next_serial: 0,
            hub_id,
        }
    }

    pub fn hub_id(&self) -> &ClientId {
        &self.hub_id
    }

    /// Allocates a fresh id and inserts an empty client record.
    ///
    /// Ids count up monotonically and are never reused while the hub
    /// process runs.
    pub fn register(&mut self) -> ClientId {
        self.next_serial += 1;
        let id = ClientId::new(format!("c{}", self.next_serial));
        self.clients.insert(
            id.clone(),
            ClientEntry {
                id: id.clone(),
                metadata: Metadata::new(),
                subscriptions: Subscriptions::new(),
                sink: None,
            },
        );
        id
    }

    pub fn unregister(&mut self, id: &ClientId) -> Result<ClientEntry, HubError> {
        if id == &self.hub_id {
            return Err(HubError::InvalidArgument(
                "the hub's own registration cannot be removed".into(),
            ));
        }
        self.clients
            .remove(id)
            .ok_or_else(|| HubError::UnknownClient(id.clone()))
    }

    pub fn get(&self, id: &ClientId) -> Result<&ClientEntry, HubError> {
        self.clients
            .get(id)
            .ok_or_else(|| HubError::UnknownClient(id.clone()))
    }

    fn get_mut(&mut self, id: &ClientId) -> Result<&mut ClientEntry, HubError> {
        self.clients
            .get_mut(id)
            .ok_or_else(|| HubError::UnknownClient(id.clone()))
    }

    pub fn set_metadata(&mut self, id: &ClientId, metadata: Metadata) -> Result<(), HubError> {
        metadata.check()?;
        self.get_mut(id)?.metadata = metadata;
        Ok(())
    }

    /// Declares subscriptions. The client must be callable first: an
    /// uncallable client could never receive what it subscribes to.
    pub fn set_subscriptions(
        &mut self,
        id: &ClientId,
        subscriptions: Subscriptions,
    ) -> Result<(), HubError> {
        subscriptions.validate()?;
        let entry = self.get_mut(id)?;
        if entry.sink.is_none() {
            return Err(HubError::NotCallable(id.clone()));
        }
        entry.subscriptions = subscriptions;
        Ok(())
    }

    pub fn set_callable(&mut self, id: &ClientId, sink: Option<SharedSink>) -> Result<(), HubError> {
        let entry = self.get_mut(id)?;
        entry.sink = sink;
        if entry.sink.is_none() {
            entry.subscriptions = Subscriptions::new();
        }
        Ok(())
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Callable clients whose subscriptions match `mtype`, with the
    /// annotations of the matching entry. `exclude` drops one id from
    /// the result (typically the sender).
    pub fn subscribers_of(
        &self,
        mtype: &MType,
        exclude: Option<&ClientId>,
    ) -> Vec<(ClientId, MapValue)> {
        self.clients
            .values()
            .filter(|entry| entry.sink.is_some())
            .filter(|entry| Some(&entry.id) != exclude)
            .filter_map(|entry| {
                entry
                    .subscriptions
                    .matcher(mtype)
                    .map(|annotations| (entry.id.clone(), annotations.clone()))
            })
            .collect()
    }
}

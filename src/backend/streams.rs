//! Row-change streaming.
//!
//! The contracts trigger NOTIFYs every insert, watched-column update, and
//! delete. For each subscriber the matcher decides whether the changed
//! contract enters (`insert`), stays in (`update`), or leaves (`unmatch`)
//! its result set, re-running the subscriber's compiled query restricted to
//! one root when it has to. Link contract changes translate into updates of
//! whichever endpoint the subscriber's type gate admits.
//!
//! Per-subscriber state maps every seen contract id to the root ids it was
//! reached from, so a change to a contract expanded through `$$links`
//! re-checks the right roots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Backend, BackendError};
use crate::contract::type_base;
use crate::schema::QueryOptions;
use crate::sql::functions::NOTIFY_CHANNEL;

/// Delay before the one bounded retry when a link notification arrives
/// ahead of a visible links2 row.
const LINK_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    Insert,
    Update,
    Delete,
    Unmatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub id: Uuid,
    #[serde(rename = "contractType")]
    pub contract_type: String,
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

/// What a subscriber receives: events, or errors that never terminate the
/// subscription.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Event(StreamEvent),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Payload of the contracts trigger.
#[derive(Debug, Clone, Deserialize)]
struct ChangeNotification {
    id: Uuid,
    #[serde(default)]
    slug: String,
    #[serde(rename = "contractType")]
    contract_type: String,
    #[serde(rename = "type")]
    op: ChangeOp,
    #[serde(rename = "linkData", default)]
    link_data: Option<Value>,
}

struct Subscriber {
    id: Uuid,
    schema: Value,
    select: Value,
    options: QueryOptions,
    /// contract id → roots it was reached from (a root references itself).
    seen: HashMap<Uuid, HashSet<Uuid>>,
    sender: UnboundedSender<StreamMessage>,
}

/// Stream registry and notification pump for one backend.
pub struct Streams {
    backend: Backend,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Streams {
    pub fn new(backend: Backend) -> Arc<Self> {
        Arc::new(Streams {
            backend,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Register a subscriber. The query is compiled once up front so an
    /// invalid schema fails here rather than on the first notification.
    pub async fn attach(
        &self,
        schema: Value,
        select: Value,
        options: QueryOptions,
    ) -> Result<(Uuid, UnboundedReceiver<StreamMessage>), BackendError> {
        crate::schema::compile(&schema, &select, &options)?;

        let (sender, receiver) = unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.lock().await.push(Subscriber {
            id,
            schema,
            select,
            options,
            seen: HashMap::new(),
            sender,
        });
        debug!("stream subscriber {} attached", id);
        Ok((id, receiver))
    }

    /// Remove a subscriber; its receiver closes once in-flight work drains.
    pub async fn detach(&self, id: Uuid) {
        self.subscribers
            .lock()
            .await
            .retain(|subscriber| subscriber.id != id);
        debug!("stream subscriber {} detached", id);
    }

    /// Listen for change notifications until the process exits. The
    /// listener reconnects on failure; subscribers survive reconnects
    /// without recompiling.
    pub async fn run(self: Arc<Self>) {
        loop {
            let mut listener = match PgListener::connect_with(self.backend.pool()).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!("stream listener connection failed: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if let Err(err) = listener.listen(NOTIFY_CHANNEL).await {
                error!("LISTEN {} failed: {}", NOTIFY_CHANNEL, err);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
            debug!("listening on {}", NOTIFY_CHANNEL);

            loop {
                match listener.recv().await {
                    Ok(notification) => self.dispatch(notification.payload()).await,
                    Err(err) => {
                        warn!("notification stream dropped: {}; reconnecting", err);
                        break;
                    }
                }
            }
        }
    }

    /// Fan one notification out to every subscriber, in registration order.
    /// Errors go to the subscriber's channel; the subscription continues.
    async fn dispatch(&self, payload: &str) {
        let note: ChangeNotification = match serde_json::from_str(payload) {
            Ok(note) => note,
            Err(err) => {
                warn!("undecodable change notification: {}", err);
                return;
            }
        };

        let mut subscribers = self.subscribers.lock().await;
        for subscriber in subscribers.iter_mut() {
            match process(&self.backend, subscriber, &note, true).await {
                Ok(events) => {
                    for event in events {
                        let _ = subscriber.sender.send(StreamMessage::Event(event));
                    }
                }
                Err(err) => {
                    let _ = subscriber
                        .sender
                        .send(StreamMessage::Error(err.to_string()));
                }
            }
        }
    }
}

/// Decide the events one notification produces for one subscriber.
///
/// Boxed because link notifications recurse through the matcher as updates
/// of their endpoints.
fn process<'a>(
    backend: &'a Backend,
    subscriber: &'a mut Subscriber,
    note: &'a ChangeNotification,
    allow_retry: bool,
) -> BoxFuture<'a, Result<Vec<StreamEvent>, BackendError>> {
    Box::pin(async move {
        // A changed link reaches the subscriber through whichever endpoint its
        // top-level type gate admits.
        if type_base(&note.contract_type) == "link" && uses_links(&subscriber.schema) {
            let Some((from, to)) = link_endpoints(note) else {
                return Ok(Vec::new());
            };
            let mut events = Vec::new();
            for (endpoint_id, endpoint_type) in [from, to] {
                if !type_gate_admits(&subscriber.schema, &endpoint_type) {
                    continue;
                }
                let translated = ChangeNotification {
                    id: endpoint_id,
                    slug: String::new(),
                    contract_type: endpoint_type,
                    op: ChangeOp::Update,
                    link_data: None,
                };
                let mut endpoint_events =
                    process(backend, subscriber, &translated, false).await?;
                if endpoint_events.is_empty() && allow_retry {
                    // The notification can outrun the visible links2 row.
                    tokio::time::sleep(LINK_RETRY_DELAY).await;
                    endpoint_events =
                        process(backend, subscriber, &translated, false).await?;
                }
                events.append(&mut endpoint_events);
            }
            return Ok(events);
        }

        if let Some(roots) = subscriber.seen.get(&note.id).cloned() {
            if note.op == ChangeOp::Delete {
                evict_contract(subscriber, note.id);
                return Ok(vec![StreamEvent {
                    id: note.id,
                    contract_type: note.contract_type.clone(),
                    kind: StreamEventKind::Delete,
                    after: None,
                }]);
            }

            let mut events = Vec::new();
            for root in roots {
                match backend
                    .query_one(&subscriber.schema, &subscriber.select, &subscriber.options, root)
                    .await?
                {
                    Some(payload) => {
                        let contract_type = payload
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or(&note.contract_type)
                            .to_string();
                        record_seen(subscriber, root, &payload);
                        events.push(StreamEvent {
                            id: root,
                            contract_type,
                            kind: StreamEventKind::Update,
                            after: Some(payload),
                        });
                    }
                    None => {
                        evict_root(subscriber, root);
                        events.push(StreamEvent {
                            id: root,
                            contract_type: note.contract_type.clone(),
                            kind: StreamEventKind::Unmatch,
                            after: None,
                        });
                    }
                }
            }
            return Ok(events);
        }

        // Previously unseen contract.
        if note.op == ChangeOp::Delete {
            return Ok(Vec::new());
        }
        if !prefilter_admits(&subscriber.schema, note) {
            return Ok(Vec::new());
        }
        match backend
            .query_one(&subscriber.schema, &subscriber.select, &subscriber.options, note.id)
            .await?
        {
            Some(payload) => {
                record_seen(subscriber, note.id, &payload);
                Ok(vec![StreamEvent {
                    id: note.id,
                    contract_type: note.contract_type.clone(),
                    kind: StreamEventKind::Insert,
                    after: Some(payload),
                }])
            }
            None => Ok(Vec::new()),
        }
    })
}

fn link_endpoints(note: &ChangeNotification) -> Option<((Uuid, String), (Uuid, String))> {
    let data = note.link_data.as_ref()?;
    let endpoint = |side: &str| -> Option<(Uuid, String)> {
        let value = data.get(side)?;
        let id = value.get("id").and_then(Value::as_str)?;
        let contract_type = value.get("type").and_then(Value::as_str)?;
        Some((Uuid::parse_str(id).ok()?, contract_type.to_string()))
    };
    Some((endpoint("from")?, endpoint("to")?))
}

/// Record a matched root and every contract its expanded payload carries.
fn record_seen(subscriber: &mut Subscriber, root: Uuid, payload: &Value) {
    subscriber.seen.entry(root).or_default().insert(root);
    let mut linked = Vec::new();
    collect_linked_ids(payload, &mut linked);
    for id in linked {
        subscriber.seen.entry(id).or_default().insert(root);
    }
}

/// Forget a root: every contract that referenced only this root goes too.
fn evict_root(subscriber: &mut Subscriber, root: Uuid) {
    for roots in subscriber.seen.values_mut() {
        roots.remove(&root);
    }
    subscriber.seen.retain(|_, roots| !roots.is_empty());
}

fn evict_contract(subscriber: &mut Subscriber, id: Uuid) {
    let was_root = subscriber
        .seen
        .get(&id)
        .map(|roots| roots.contains(&id))
        .unwrap_or(false);
    if was_root {
        evict_root(subscriber, id);
    }
    subscriber.seen.remove(&id);
}

/// Ids of every contract reachable through the payload's links tree.
fn collect_linked_ids(payload: &Value, out: &mut Vec<Uuid>) {
    let Some(links) = payload.get("links").and_then(Value::as_object) else {
        return;
    };
    for linked in links.values().filter_map(Value::as_array).flatten() {
        if let Some(id) = linked
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            out.push(id);
        }
        collect_linked_ids(linked, out);
    }
}

/// Whether the schema expands links anywhere.
fn uses_links(schema: &Value) -> bool {
    match schema {
        Value::Object(object) => {
            object.contains_key("$$links") || object.values().any(uses_links)
        }
        Value::Array(values) => values.iter().any(uses_links),
        _ => false,
    }
}

/// Constant pinned at `properties.<field>` of the top level, if any.
fn top_const(schema: &Value, field: &str) -> Option<String> {
    let property = schema.get("properties")?.get(field)?;
    if let Some(constant) = property.get("const") {
        return constant.as_str().map(str::to_string);
    }
    if let Some(Value::Array(values)) = property.get("enum") {
        if let [Value::String(only)] = values.as_slice() {
            return Some(only.clone());
        }
    }
    None
}

fn type_gate_admits(schema: &Value, contract_type: &str) -> bool {
    match top_const(schema, "type") {
        None => true,
        Some(expected) => {
            expected == contract_type || type_base(&expected) == type_base(contract_type)
        }
    }
}

/// Cheap membership test on the constants the schema pins, avoiding a
/// database round-trip for contracts that can never match.
fn prefilter_admits(schema: &Value, note: &ChangeNotification) -> bool {
    if let Some(expected) = top_const(schema, "id") {
        if expected != note.id.to_string() {
            return false;
        }
    }
    if let Some(expected) = top_const(schema, "slug") {
        if expected != note.slug {
            return false;
        }
    }
    type_gate_admits(schema, &note.contract_type)
}
